//! Helper-function cache.
//!
//! Within one operation emission, sub-descriptors that cannot be inlined get
//! a shared helper function, keyed by shape fingerprint. The first request
//! assigns the next index and schedules the body; later requests for an
//! equivalent shape reuse the index. Bodies are drained and emitted after the
//! main walk, in assignment order; emitting a body may schedule further
//! helpers, so the drain loops until the worklist is dry (the descriptor
//! tree is finite, so it terminates).

use indexmap::IndexMap;

use dynssz_descriptor::{shape_fingerprint, TypeDescriptor};

/// The two helper families an operation can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HelperKind {
    Size,
    Unmarshal,
}

impl HelperKind {
    pub fn fn_name(self, index: usize) -> String {
        match self {
            HelperKind::Size => format!("size_{index}"),
            HelperKind::Unmarshal => format!("unmarshal_{index}"),
        }
    }
}

/// One scheduled helper body.
#[derive(Debug, Clone)]
pub struct PendingHelper {
    pub kind: HelperKind,
    pub index: usize,
    pub descriptor: TypeDescriptor,
}

#[derive(Debug, Clone, Default)]
pub struct HelperCache {
    size: IndexMap<u64, usize>,
    unmarshal: IndexMap<u64, usize>,
    pending: Vec<PendingHelper>,
}

impl HelperCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the size helper for `d`, scheduling its body on first use.
    pub fn request_size(&mut self, d: &TypeDescriptor) -> usize {
        Self::request(&mut self.size, &mut self.pending, HelperKind::Size, d)
    }

    /// Index of the unmarshal helper for `d`, scheduling its body on first
    /// use.
    pub fn request_unmarshal(&mut self, d: &TypeDescriptor) -> usize {
        Self::request(
            &mut self.unmarshal,
            &mut self.pending,
            HelperKind::Unmarshal,
            d,
        )
    }

    fn request(
        table: &mut IndexMap<u64, usize>,
        pending: &mut Vec<PendingHelper>,
        kind: HelperKind,
        d: &TypeDescriptor,
    ) -> usize {
        let key = shape_fingerprint(d);
        if let Some(index) = table.get(&key) {
            return *index;
        }
        let index = table.len();
        table.insert(key, index);
        pending.push(PendingHelper {
            kind,
            index,
            descriptor: d.clone(),
        });
        index
    }

    /// Drain the scheduled bodies in assignment order. Callers loop until
    /// this returns empty, since body emission may schedule more.
    pub fn take_pending(&mut self) -> Vec<PendingHelper> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

//! External-method delegation.
//!
//! A descriptor can declare that the host type already implements some of the
//! SSZ methods. Instead of checking capability booleans ad hoc, each emitter
//! resolves them once per descriptor into an ordered choice.

use dynssz_descriptor::TypeDescriptor;

/// How a sub-descriptor's body is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegation {
    /// Emit the full body inline.
    None,
    /// Call the type's dynamic-spec streaming writer.
    DynamicStream,
    /// Call the type's dynamic-spec buffered method.
    DynamicBuffered,
    /// Call the type's static fast-path method.
    FastPathBuffered,
}

/// Inputs to the delegation choice that do not vary per descriptor.
#[derive(Debug, Clone, Copy)]
pub struct DelegationPolicy {
    /// Dynamic-spec variants may be referenced (the emitter is building the
    /// dynamic variant and the type options allow expressions).
    pub allow_dynamic: bool,
    /// `no_fast_path` generation flag: never reference fast-path methods.
    pub no_fast_path: bool,
    /// The current writer is a streaming sink (serialize only).
    pub streaming: bool,
}

impl Delegation {
    /// Resolve the delegation for one descriptor. Root descriptors always
    /// emit the full body; the precedence below is dynamic streaming, then
    /// dynamic buffered, then fast path.
    pub fn choose(d: &TypeDescriptor, is_root: bool, policy: DelegationPolicy) -> Delegation {
        if is_root {
            return Delegation::None;
        }
        if policy.allow_dynamic && d.flags.has_dynamic_method {
            if policy.streaming {
                return Delegation::DynamicStream;
            }
            return Delegation::DynamicBuffered;
        }
        // The fast path assumes static sizes; descriptors whose size rests
        // on a spec expression never qualify.
        if !policy.no_fast_path && d.flags.has_fast_path && !d.flags.has_dynamic_size_expr {
            return Delegation::FastPathBuffered;
        }
        Delegation::None
    }

    pub fn is_delegated(self) -> bool {
        self != Delegation::None
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, Delegation::DynamicStream | Delegation::DynamicBuffered)
    }
}

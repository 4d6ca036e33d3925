//! Static-size variable generator.
//!
//! Deduplicates compile-time size computations that fold in spec-expression
//! variables. Sizes free of expressions collapse to literals; expression-
//! linear sizes (element size times resolved count, container field sums,
//! bitvector byte rounding) become one header local each, reused across the
//! emitted function. Variable-width descriptors are rejected.

use indexmap::IndexMap;

use dynssz_descriptor::{shape_fingerprint, TypeDescriptor, TypeKind};

use crate::error::{EmitError, EmitResult};
use crate::specvar::SpecVarTable;

/// A resolved static size: either a plain literal or a reference to a
/// header-block local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeTerm {
    Literal(u64),
    Var(String),
}

impl SizeTerm {
    /// The term as a `usize` expression in emitted source.
    pub fn expr(&self) -> String {
        match self {
            SizeTerm::Literal(n) => format!("{n}usize"),
            SizeTerm::Var(name) => name.clone(),
        }
    }

    pub fn as_literal(&self) -> Option<u64> {
        match self {
            SizeTerm::Literal(n) => Some(*n),
            SizeTerm::Var(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SizeVarTable {
    /// shape fingerprint -> (variable name, initializer expression)
    vars: IndexMap<u64, (String, String)>,
}

impl SizeVarTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Static byte size of `d` as an emitted term.
    ///
    /// Fails with [`EmitError::DynamicNotSupportedForStaticSize`] when the
    /// descriptor is SSZ-variable-width: such sizes depend on the value, not
    /// just the spec binding.
    pub fn intern(
        &mut self,
        d: &TypeDescriptor,
        specs: &mut SpecVarTable,
    ) -> EmitResult<SizeTerm> {
        if d.flags.is_ssz_dynamic {
            return Err(EmitError::DynamicNotSupportedForStaticSize);
        }
        if !d.flags.has_dynamic_size_expr {
            return Ok(SizeTerm::Literal(d.size));
        }

        let key = shape_fingerprint(d);
        if let Some((name, _)) = self.vars.get(&key) {
            return Ok(SizeTerm::Var(name.clone()));
        }

        let init = self.initializer(d, specs)?;
        let name = format!("size_v{}", self.vars.len());
        self.vars.insert(key, (name.clone(), init));
        Ok(SizeTerm::Var(name))
    }

    fn initializer(
        &mut self,
        d: &TypeDescriptor,
        specs: &mut SpecVarTable,
    ) -> EmitResult<String> {
        match d.kind {
            TypeKind::Vector => {
                let elem = d
                    .elem()
                    .ok_or_else(|| EmitError::UnknownKind("vector without element".into()))?;
                let elem_term = self.intern(elem, specs)?;
                let count = match &d.size_expr {
                    Some(expr) => {
                        let var = specs.intern(expr, d.len);
                        format!("{var} as usize")
                    }
                    None => format!("{}usize", d.len),
                };
                Ok(format!("{} * {}", elem_term.expr(), count))
            }
            TypeKind::Bitvector => {
                let bits = match &d.size_expr {
                    Some(expr) => {
                        let var = specs.intern(expr, d.bit_size);
                        format!("{var} as usize")
                    }
                    None => format!("{}usize", d.bit_size),
                };
                Ok(format!("({bits} + 7usize) / 8usize"))
            }
            TypeKind::Container | TypeKind::ProgressiveContainer => {
                let mut literal = 0u64;
                let mut parts = Vec::new();
                for field in &d.fields {
                    match self.intern(&field.elem, specs)? {
                        SizeTerm::Literal(n) => literal += n,
                        SizeTerm::Var(name) => parts.push(name),
                    }
                }
                if literal > 0 || parts.is_empty() {
                    parts.push(format!("{literal}usize"));
                }
                Ok(parts.join(" + "))
            }
            TypeKind::Wrapper => {
                let elem = d
                    .elem()
                    .ok_or_else(|| EmitError::UnknownKind("wrapper without element".into()))?;
                Ok(self.intern(elem, specs)?.expr())
            }
            TypeKind::Custom => Err(EmitError::UnknownKind("custom type in static size".into())),
            // Primitives never carry expressions; list-like kinds are
            // variable-width and were rejected above.
            other => Err(EmitError::UnknownKind(format!(
                "{other:?} cannot carry a size expression"
            ))),
        }
    }

    /// Header lines declaring the interned size locals, in first-use order.
    /// Expression variables they reference are declared earlier in the
    /// header, so ordering within this block is immaterial; first-use keeps
    /// the output deterministic.
    pub fn header_lines(&self) -> Vec<String> {
        self.vars
            .values()
            .map(|(name, init)| format!("let {name}: usize = {init};"))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

//! Shared state and plumbing for the four operation emitters.
//!
//! Each emitter is a type-directed recursive walker over the descriptor
//! tree. The walkers share per-operation state ([`EmitEnv`]) and
//! per-function state ([`FnScope`]); descriptor nodes are dispatched on kind
//! after an external-method delegation check, and recursion re-enters the
//! dispatch for children. There are no back-edges: the walk is bounded by
//! descriptor depth.

pub(crate) mod deserialize;
pub(crate) mod hash;
pub(crate) mod serialize;
pub(crate) mod size;

use dynssz_descriptor::{TypeDescriptor, TypeKind};

use crate::builder::CodeBuilder;
use crate::delegate::DelegationPolicy;
use crate::error::{EmitError, EmitResult};
use crate::funcache::{HelperCache, HelperKind};
use crate::names::{TypePrinter, RT};
use crate::sizevar::{SizeTerm, SizeVarTable};
use crate::specvar::SpecVarTable;

/// Whether the serialize target supports seeking back to patch offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriterMode {
    /// Growable byte buffer; offset slots are reserved and patched.
    Seekable,
    /// Forward-only sink; offsets are precomputed through size helpers.
    Streaming,
}

/// Per-operation emission state.
pub(crate) struct EmitEnv<'a> {
    pub printer: &'a mut TypePrinter,
    pub cache: HelperCache,
    /// Building the dynamic-spec variant of the operation.
    pub dynamic: bool,
    pub no_fast_path: bool,
}

impl<'a> EmitEnv<'a> {
    pub fn new(printer: &'a mut TypePrinter, dynamic: bool, no_fast_path: bool) -> Self {
        Self {
            printer,
            cache: HelperCache::new(),
            dynamic,
            no_fast_path,
        }
    }

    pub fn policy(&self, streaming: bool) -> DelegationPolicy {
        DelegationPolicy {
            allow_dynamic: self.dynamic,
            no_fast_path: self.no_fast_path,
            streaming,
        }
    }
}

/// Per-function emission state: header-block tables, the body under
/// construction, and the offset-pool nesting tracker.
pub(crate) struct FnScope {
    pub specs: SpecVarTable,
    pub sizes: SizeVarTable,
    pub body: CodeBuilder,
    pool_depth: usize,
    pub max_pool_depth: usize,
    pub used_specs: bool,
}

impl FnScope {
    pub fn new() -> Self {
        Self {
            specs: SpecVarTable::new(),
            sizes: SizeVarTable::new(),
            body: CodeBuilder::new(),
            pool_depth: 0,
            max_pool_depth: 0,
            used_specs: false,
        }
    }

    /// Intern a spec expression, marking the function as spec-dependent.
    pub fn spec_var(&mut self, expr: &str, default: u64) -> String {
        self.used_specs = true;
        self.specs.intern(expr, default)
    }

    /// Enter one level of dynamic-offset nesting; returns the pool slot for
    /// this level. Strict enter/leave pairing keeps the acquired footprint
    /// at the function's maximum nesting, not the sum.
    pub fn enter_pool(&mut self) -> usize {
        let level = self.pool_depth;
        self.pool_depth += 1;
        self.max_pool_depth = self.max_pool_depth.max(self.pool_depth);
        level
    }

    pub fn leave_pool(&mut self) {
        debug_assert!(self.pool_depth > 0, "unbalanced pool leave");
        self.pool_depth = self.pool_depth.saturating_sub(1);
    }
}

/// A fully rendered function body (header blocks included), indent level 0.
#[derive(Debug, Clone)]
pub(crate) struct EmittedBody {
    pub code: String,
    pub used_specs: bool,
}

/// Compose a function body: expression variables, then size variables, then
/// helper declarations, then pool acquisitions, then the main body. The
/// header order is fixed; dependent blocks always precede their users.
pub(crate) fn render_fn(scope: FnScope, helpers: &[String]) -> EmittedBody {
    let mut b = CodeBuilder::new();
    for l in scope.specs.header_lines() {
        b.line(l);
    }
    for l in scope.sizes.header_lines() {
        b.line(l);
    }
    for h in helpers {
        b.lines(h);
    }
    for level in 0..scope.max_pool_depth {
        b.line(format!("let mut offs{level} = {RT}::OffsetPool::acquire();"));
    }
    let used_specs = scope.used_specs;
    b.lines(&scope.body.finish());
    EmittedBody {
        code: b.finish(),
        used_specs,
    }
}

/// Drain and emit scheduled helper bodies until the worklist is dry, then
/// return their texts in (family, index) order along with whether any body
/// touched the spec dictionary.
pub(crate) fn drain_helpers(env: &mut EmitEnv<'_>) -> EmitResult<(Vec<String>, bool)> {
    let mut rendered: Vec<(HelperKind, usize, String)> = Vec::new();
    let mut used_specs = false;
    loop {
        let pending = env.cache.take_pending();
        if pending.is_empty() {
            break;
        }
        for p in pending {
            let body = match p.kind {
                HelperKind::Size => size::emit_size_helper(env, p.index, &p.descriptor)?,
                HelperKind::Unmarshal => {
                    deserialize::emit_unmarshal_helper(env, p.index, &p.descriptor)?
                }
            };
            used_specs |= body.used_specs;
            rendered.push((p.kind, p.index, body.code));
        }
    }
    rendered.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    Ok((rendered.into_iter().map(|r| r.2).collect(), used_specs))
}

/// A host-value expression threaded through the walk, tracking whether the
/// path already denotes a reference (so scalar reads and borrows print
/// correctly).
#[derive(Debug, Clone)]
pub(crate) struct ValExpr {
    pub path: String,
    pub is_ref: bool,
}

impl ValExpr {
    /// The method receiver.
    pub fn receiver() -> Self {
        Self {
            path: "self".into(),
            is_ref: true,
        }
    }

    /// A by-value local binding.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            path: name.into(),
            is_ref: false,
        }
    }

    /// A local binding that is itself a reference.
    pub fn local_ref(name: impl Into<String>) -> Self {
        Self {
            path: name.into(),
            is_ref: true,
        }
    }

    pub fn field(&self, name: &str) -> Self {
        Self {
            path: format!("{}.{name}", self.path),
            is_ref: false,
        }
    }

    /// The `.0` of a newtype wrapper.
    pub fn unwrapped(&self) -> Self {
        Self {
            path: format!("{}.0", self.path),
            is_ref: false,
        }
    }

    pub fn index(&self, idx: &str) -> Self {
        Self {
            path: format!("{}[{idx}]", self.path),
            is_ref: false,
        }
    }

    /// The value as a scalar expression (deref applied when needed).
    pub fn scalar(&self) -> String {
        if self.is_ref {
            format!("*{}", self.path)
        } else {
            self.path.clone()
        }
    }

    /// The value as a shared borrow.
    pub fn borrow(&self) -> String {
        if self.is_ref {
            self.path.clone()
        } else {
            format!("&{}", self.path)
        }
    }

    /// The value as an exclusive borrow.
    pub fn borrow_mut(&self) -> String {
        if self.is_ref {
            self.path.clone()
        } else {
            format!("&mut {}", self.path)
        }
    }

    /// The value as an assignment target.
    pub fn lvalue(&self) -> String {
        if self.is_ref {
            format!("*{}", self.path)
        } else {
            self.path.clone()
        }
    }
}

/// Static byte size of `d` as an emitted term. In static emission the
/// declared fallbacks fold to a literal; in dynamic emission expression-
/// involved sizes go through the size-variable table.
pub(crate) fn static_size_term(
    scope: &mut FnScope,
    d: &TypeDescriptor,
    dynamic: bool,
) -> EmitResult<SizeTerm> {
    if !dynamic {
        if d.flags.is_ssz_dynamic {
            return Err(EmitError::DynamicNotSupportedForStaticSize);
        }
        return Ok(SizeTerm::Literal(d.size));
    }
    let term = scope.sizes.intern(d, &mut scope.specs)?;
    if matches!(term, SizeTerm::Var(_)) {
        scope.used_specs = true;
    }
    Ok(term)
}

/// Effective element count of a vector (spec expression override with the
/// declared length as fallback), as a `usize` expression.
pub(crate) fn resolve_len(scope: &mut FnScope, d: &TypeDescriptor, dynamic: bool) -> String {
    match (&d.size_expr, dynamic) {
        (Some(expr), true) => {
            let var = scope.spec_var(expr, d.len);
            format!("{var} as usize")
        }
        _ => format!("{}usize", d.len),
    }
}

/// Effective element bound of a list, as a `usize` expression.
pub(crate) fn resolve_limit(scope: &mut FnScope, d: &TypeDescriptor, dynamic: bool) -> String {
    match (&d.max_expr, dynamic) {
        (Some(expr), true) => {
            let var = scope.spec_var(expr, d.limit);
            format!("{var} as usize")
        }
        _ => format!("{}usize", d.limit),
    }
}

/// Effective bit width of a bitvector, as a `usize` expression.
pub(crate) fn resolve_bits(scope: &mut FnScope, d: &TypeDescriptor, dynamic: bool) -> String {
    match (&d.size_expr, dynamic) {
        (Some(expr), true) => {
            let var = scope.spec_var(expr, d.bit_size);
            format!("{var} as usize")
        }
        _ => format!("{}usize", d.bit_size),
    }
}

/// Byte size of the container's fixed portion: fixed field sizes plus one
/// offset slot per variable-width field, as a `usize` expression.
pub(crate) fn fixed_portion_expr(
    scope: &mut FnScope,
    d: &TypeDescriptor,
    dynamic: bool,
) -> EmitResult<String> {
    let mut literal = 0u64;
    let mut parts = Vec::new();
    for field in &d.fields {
        if field.elem.flags.is_ssz_dynamic {
            literal += 4;
        } else {
            match static_size_term(scope, &field.elem, dynamic)? {
                SizeTerm::Literal(n) => literal += n,
                SizeTerm::Var(name) => parts.push(name),
            }
        }
    }
    if literal > 0 || parts.is_empty() {
        parts.push(format!("{literal}usize"));
    }
    Ok(parts.join(" + "))
}

/// Whether a sub-descriptor is emitted inline rather than through a shared
/// helper: primitives always, byte-array shapes only when no expression
/// applies (an expression-bearing shape resolves its own spec variables
/// inside its helper).
pub(crate) fn inlinable(d: &TypeDescriptor) -> bool {
    if d.kind.is_primitive() {
        return true;
    }
    (d.flags.is_byte_array || d.flags.is_string)
        && d.size_expr.is_none()
        && d.max_expr.is_none()
}

/// The descriptor's shape with the pointer indirection peeled off; the call
/// site handles the null-check/allocation and recurses on this.
pub(crate) fn deref_shape(d: &TypeDescriptor) -> TypeDescriptor {
    let mut inner = d.clone();
    inner.flags.is_pointer = false;
    inner
}

/// Roots must be named host types; everything else is reachable only as a
/// child.
pub(crate) fn check_root_kind(d: &TypeDescriptor) -> EmitResult<()> {
    match d.kind {
        TypeKind::Container
        | TypeKind::ProgressiveContainer
        | TypeKind::Wrapper
        | TypeKind::Custom => Ok(()),
        other => Err(EmitError::UnknownKind(format!(
            "{other:?} cannot be a top-level type"
        ))),
    }
}

//! Size emitter.
//!
//! Emits a routine computing the exact encoded byte length of a value.
//! Fixed-width subtrees fold to literals or static-size locals; variable-
//! width subtrees walk the value, adding one offset slot per variable-width
//! position. Non-inlinable children go through shared size helpers, which
//! the streaming serializer also uses for offset precomputation.

use dynssz_descriptor::{TypeDescriptor, TypeKind};

use crate::builder::CodeBuilder;
use crate::delegate::Delegation;
use crate::error::{EmitError, EmitResult};
use crate::names::RT;

use super::{
    check_root_kind, deref_shape, drain_helpers, fixed_portion_expr, render_fn, resolve_len,
    static_size_term, EmitEnv, EmittedBody, FnScope, ValExpr,
};

pub(crate) fn emit_size_body(env: &mut EmitEnv<'_>, d: &TypeDescriptor) -> EmitResult<EmittedBody> {
    check_root_kind(d)?;
    let mut scope = FnScope::new();
    if d.kind == TypeKind::Custom {
        scope
            .body
            .line(format!("Err({RT}::SszError::not_implemented())"));
    } else if !d.flags.is_ssz_dynamic {
        let term = static_size_term(&mut scope, d, env.dynamic)?;
        scope.body.line(format!("Ok({})", term.expr()));
    } else {
        scope.body.line("let mut sz0: usize = 0usize;");
        node(env, &mut scope, d, &ValExpr::receiver(), 0, "sz0")?;
        scope.body.line("Ok(sz0)");
    }
    let (helpers, helpers_used_specs) = drain_helpers(env)?;
    let mut body = render_fn(scope, &helpers);
    body.used_specs |= helpers_used_specs;
    Ok(body)
}

/// Full function text of one shared size helper.
pub(crate) fn emit_size_helper(
    env: &mut EmitEnv<'_>,
    index: usize,
    d: &TypeDescriptor,
) -> EmitResult<EmittedBody> {
    let mut scope = FnScope::new();
    if !d.flags.is_ssz_dynamic {
        let term = static_size_term(&mut scope, d, env.dynamic)?;
        scope.body.line(format!("Ok({})", term.expr()));
    } else {
        scope.body.line("let mut sz0: usize = 0usize;");
        node(env, &mut scope, d, &ValExpr::local_ref("value"), 0, "sz0")?;
        scope.body.line("Ok(sz0)");
    }
    let rendered = render_fn(scope, &[]);

    let ty = env.printer.rust_type(d)?;
    let specs_param = if env.dynamic {
        format!(", specs: &{RT}::DynSpecs")
    } else {
        String::new()
    };
    let mut b = CodeBuilder::new();
    b.open(format!(
        "fn size_{index}(value: &{ty}{specs_param}) -> Result<usize, {RT}::SszError> {{"
    ));
    b.lines(&rendered.code);
    b.close("}");
    Ok(EmittedBody {
        code: b.finish(),
        used_specs: rendered.used_specs,
    })
}

/// Bind `let {dest}: usize = <encoded size of val>;`, used by the streaming
/// serializer to precompute offsets.
pub(crate) fn dyn_size_binding(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    dest: &str,
) -> EmitResult<()> {
    if d.flags.is_pointer {
        let tmp = format!("{dest}_v");
        scope
            .body
            .line(format!("let {tmp} = {}.clone().unwrap_or_default();", val.path));
        let inner = deref_shape(d);
        return dyn_size_binding(env, scope, &inner, &ValExpr::local(tmp), depth, dest);
    }
    let expr = size_value_expr(env, scope, d, val)?;
    scope.body.line(format!("let {dest}: usize = {expr};"));
    Ok(())
}

/// Encoded size of a (pointer-free) child value as one expression:
/// a delegated call, a static term, an inline length, or a helper call.
fn size_value_expr(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
) -> EmitResult<String> {
    match Delegation::choose(d, false, env.policy(false)) {
        Delegation::DynamicStream | Delegation::DynamicBuffered => {
            scope.used_specs = true;
            return Ok(format!("{}.ssz_size_dyn(specs)?", val.path));
        }
        Delegation::FastPathBuffered => {
            return Ok(format!("{}.ssz_size()?", val.path));
        }
        Delegation::None => {}
    }
    if !d.flags.is_ssz_dynamic {
        return Ok(static_size_term(scope, d, env.dynamic)?.expr());
    }
    match d.kind {
        TypeKind::Bitlist | TypeKind::ProgressiveBitlist => Ok(format!(
            "if {path}.is_empty() {{ 1usize }} else {{ {path}.len() }}",
            path = val.path
        )),
        TypeKind::List | TypeKind::ProgressiveList
            if d.flags.is_byte_array || d.flags.is_string =>
        {
            Ok(format!("{}.len()", val.path))
        }
        _ => {
            let index = env.cache.request_size(d);
            let specs_arg = if env.dynamic { ", specs" } else { "" };
            Ok(format!("size_{index}({}{specs_arg})?", val.borrow()))
        }
    }
}

/// Accumulate the size of one child value into `acc`.
fn child(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    acc: &str,
) -> EmitResult<()> {
    if d.flags.is_pointer {
        let ptr = format!("ptr{depth}");
        scope
            .body
            .line(format!("let {ptr} = {}.clone().unwrap_or_default();", val.path));
        let inner = deref_shape(d);
        return child(env, scope, &inner, &ValExpr::local(ptr), depth, acc);
    }
    let expr = size_value_expr(env, scope, d, val)?;
    scope.body.line(format!("{acc} += {expr};"));
    Ok(())
}

/// Inline walk for the body owner (method root or helper root). Children go
/// through [`child`], which shares non-inlinable shapes via the cache.
fn node(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    acc: &str,
) -> EmitResult<()> {
    if !d.flags.is_ssz_dynamic {
        let term = static_size_term(scope, d, env.dynamic)?;
        scope.body.line(format!("{acc} += {};", term.expr()));
        return Ok(());
    }
    match d.kind {
        TypeKind::Container | TypeKind::ProgressiveContainer => {
            let fixed = fixed_portion_expr(scope, d, env.dynamic)?;
            scope.body.line(format!("{acc} += {fixed};"));
            for field in &d.fields {
                if field.elem.flags.is_ssz_dynamic {
                    child(env, scope, &field.elem, &val.field(&field.name), depth + 1, acc)?;
                }
            }
        }
        TypeKind::Wrapper => {
            let elem = require_elem(d)?;
            child(env, scope, elem, &val.unwrapped(), depth + 1, acc)?;
        }
        TypeKind::Bitlist | TypeKind::ProgressiveBitlist => {
            scope.body.line(format!(
                "{acc} += if {path}.is_empty() {{ 1usize }} else {{ {path}.len() }};",
                path = val.path
            ));
        }
        TypeKind::List | TypeKind::ProgressiveList => {
            if d.flags.is_byte_array || d.flags.is_string {
                scope.body.line(format!("{acc} += {}.len();", val.path));
            } else {
                let elem = require_elem(d)?;
                if !elem.flags.is_ssz_dynamic {
                    let term = static_size_term(scope, elem, env.dynamic)?;
                    scope
                        .body
                        .line(format!("{acc} += {}.len() * {};", val.path, term.expr()));
                } else {
                    scope
                        .body
                        .line(format!("{acc} += 4usize * {}.len();", val.path));
                    let item = format!("item{depth}");
                    scope
                        .body
                        .open(format!("for {item} in {}.iter() {{", val.path));
                    child(env, scope, elem, &ValExpr::local_ref(&item), depth + 1, acc)?;
                    scope.body.close("}");
                }
            }
        }
        TypeKind::Vector => {
            // Only reachable for variable-width elements; fixed vectors are
            // SSZ-fixed-width and folded above.
            let elem = require_elem(d)?;
            let len = format!("len{depth}");
            let len_expr = resolve_len(scope, d, env.dynamic);
            scope.body.line(format!("let {len}: usize = {len_expr};"));
            scope.body.open(format!("if {}.len() > {len} {{", val.path));
            scope
                .body
                .line(format!("return Err({RT}::SszError::vector_length_mismatch());"));
            scope.body.close("}");
            scope.body.line(format!("{acc} += 4usize * {len};"));
            let item = format!("item{depth}");
            scope
                .body
                .open(format!("for {item} in {}.iter() {{", val.path));
            child(env, scope, elem, &ValExpr::local_ref(&item), depth + 1, acc)?;
            scope.body.close("}");
            // Missing tail elements are emitted as defaults and still count.
            let pad = format!("pad{depth}");
            let psz = format!("psz{depth}");
            scope
                .body
                .open(format!("if {}.len() < {len} {{", val.path));
            let elem_ty = env.printer.rust_type(elem)?;
            scope
                .body
                .line(format!("let {pad}: {elem_ty} = Default::default();"));
            dyn_size_binding(env, scope, elem, &ValExpr::local(&pad), depth + 1, &psz)?;
            scope
                .body
                .line(format!("{acc} += ({len} - {}.len()) * {psz};", val.path));
            scope.body.close("}");
        }
        TypeKind::Union => {
            scope.body.line(format!("{acc} += 1usize;"));
            scope.body.open(format!("match {}.selector {{", val.path));
            for variant in &d.variants {
                let variant_ty = env.printer.rust_type(&variant.elem)?;
                let v = format!("v{depth}");
                scope.body.open(format!("{}u8 => {{", variant.tag));
                scope.body.open(format!(
                    "let {v} = match {}.value.downcast_ref::<{variant_ty}>() {{",
                    val.path
                ));
                scope.body.line("Some(v) => v,");
                scope.body.line(format!(
                    "None => return Err({RT}::SszError::invalid_union_variant()),"
                ));
                scope.body.close("};");
                child(env, scope, &variant.elem, &ValExpr::local_ref(&v), depth + 1, acc)?;
                scope.body.close("}");
            }
            scope.body.line(format!(
                "_ => return Err({RT}::SszError::invalid_union_variant()),"
            ));
            scope.body.close("}");
        }
        TypeKind::Custom => {
            scope
                .body
                .line(format!("return Err({RT}::SszError::not_implemented());"));
        }
        other => {
            return Err(EmitError::UnknownKind(format!(
                "{other:?} cannot be variable-width"
            )));
        }
    }
    Ok(())
}

fn require_elem(d: &TypeDescriptor) -> EmitResult<&TypeDescriptor> {
    d.elem()
        .ok_or_else(|| EmitError::UnknownKind(format!("{:?} without element", d.kind)))
}

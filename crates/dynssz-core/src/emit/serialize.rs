//! Serialize emitter.
//!
//! Emits a routine appending the SSZ byte form of a value to a writer. The
//! buffered variant targets a growable `Vec<u8>` and patches offset slots in
//! place; the streaming variant targets a forward-only sink and precomputes
//! offsets through size helpers. Both run off the same walker, parameterized
//! by [`WriterMode`].

use dynssz_descriptor::{TypeDescriptor, TypeKind};

use crate::delegate::Delegation;
use crate::error::{EmitError, EmitResult};
use crate::names::RT;

use super::size::dyn_size_binding;
use super::{
    check_root_kind, deref_shape, drain_helpers, render_fn, resolve_bits, resolve_len,
    resolve_limit, static_size_term, EmitEnv, EmittedBody, FnScope, ValExpr, WriterMode,
};

pub(crate) fn emit_serialize_body(
    env: &mut EmitEnv<'_>,
    d: &TypeDescriptor,
    mode: WriterMode,
) -> EmitResult<EmittedBody> {
    check_root_kind(d)?;
    let mut scope = FnScope::new();
    node(env, &mut scope, d, &ValExpr::receiver(), 0, true, mode)?;
    scope.body.line("Ok(())");
    let (helpers, helpers_used_specs) = drain_helpers(env)?;
    let mut body = render_fn(scope, &helpers);
    body.used_specs |= helpers_used_specs;
    Ok(body)
}

/// One write of a little-endian scalar through the active writer.
fn put_scalar(scope: &mut FnScope, mode: WriterMode, method: &str, value: &str) {
    match mode {
        WriterMode::Seekable => scope
            .body
            .line(format!("{RT}::enc::append_{method}(buf, {value});")),
        WriterMode::Streaming => scope.body.line(format!("w.write_{method}({value})?;")),
    }
}

fn put_bytes(scope: &mut FnScope, mode: WriterMode, bytes: &str) {
    match mode {
        WriterMode::Seekable => scope
            .body
            .line(format!("{RT}::enc::append_bytes(buf, {bytes});")),
        WriterMode::Streaming => scope.body.line(format!("w.write_bytes({bytes})?;")),
    }
}

fn put_zero(scope: &mut FnScope, mode: WriterMode, count: &str) {
    match mode {
        WriterMode::Seekable => scope
            .body
            .line(format!("{RT}::enc::append_zero_bytes(buf, {count});")),
        WriterMode::Streaming => scope.body.line(format!("w.write_zero_bytes({count})?;")),
    }
}

fn node(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    is_root: bool,
    mode: WriterMode,
) -> EmitResult<()> {
    if d.flags.is_pointer && !is_root {
        // Serialize an absent indirection as the type's default value.
        let ptr = format!("ptr{depth}");
        scope
            .body
            .line(format!("let {ptr} = {}.clone().unwrap_or_default();", val.path));
        let inner = deref_shape(d);
        return node(env, scope, &inner, &ValExpr::local(ptr), depth, false, mode);
    }

    match Delegation::choose(d, is_root, env.policy(mode == WriterMode::Streaming)) {
        Delegation::DynamicStream => {
            scope.used_specs = true;
            scope
                .body
                .line(format!("{}.ssz_write_dyn(specs, w)?;", val.path));
            return Ok(());
        }
        Delegation::DynamicBuffered => {
            scope.used_specs = true;
            scope
                .body
                .line(format!("{}.ssz_append_dyn(specs, buf)?;", val.path));
            return Ok(());
        }
        Delegation::FastPathBuffered => {
            match mode {
                WriterMode::Seekable => {
                    scope.body.line(format!("{}.ssz_append(buf)?;", val.path));
                }
                WriterMode::Streaming => {
                    // Bridge a buffered marshaler onto the streaming sink.
                    let tmp = format!("tmp{depth}");
                    scope.body.line(format!("let mut {tmp}: Vec<u8> = Vec::new();"));
                    scope
                        .body
                        .line(format!("{}.ssz_append(&mut {tmp})?;", val.path));
                    scope.body.line(format!("w.write_bytes(&{tmp})?;"));
                }
            }
            return Ok(());
        }
        Delegation::None => {}
    }

    match d.kind {
        TypeKind::Bool => put_scalar(scope, mode, "bool", &val.scalar()),
        TypeKind::Uint8 => put_scalar(scope, mode, "u8", &val.scalar()),
        TypeKind::Uint16 => put_scalar(scope, mode, "u16", &val.scalar()),
        TypeKind::Uint32 => put_scalar(scope, mode, "u32", &val.scalar()),
        TypeKind::Uint64 => {
            if d.flags.is_time {
                let v = format!("{RT}::time_to_unix({})", val.borrow());
                put_scalar(scope, mode, "u64", &v);
            } else {
                put_scalar(scope, mode, "u64", &val.scalar());
            }
        }
        TypeKind::Uint128 | TypeKind::Uint256 => put_bytes(scope, mode, &val.borrow()),
        TypeKind::Wrapper => {
            let elem = require_elem(d)?;
            node(env, scope, elem, &val.unwrapped(), depth + 1, false, mode)?;
        }
        TypeKind::Container | TypeKind::ProgressiveContainer => {
            container(env, scope, d, val, depth, mode)?;
        }
        TypeKind::Vector => vector(env, scope, d, val, depth, mode)?,
        TypeKind::Bitvector => bitvector(env, scope, d, val, depth, mode)?,
        TypeKind::List | TypeKind::ProgressiveList => list(env, scope, d, val, depth, mode)?,
        TypeKind::Bitlist | TypeKind::ProgressiveBitlist => {
            bitlist(env, scope, d, val, depth, mode)?;
        }
        TypeKind::Union => union(env, scope, d, val, depth, mode)?,
        TypeKind::Custom => {
            scope
                .body
                .line(format!("return Err({RT}::SszError::not_implemented());"));
        }
    }
    Ok(())
}

fn require_elem(d: &TypeDescriptor) -> EmitResult<&TypeDescriptor> {
    d.elem()
        .ok_or_else(|| EmitError::UnknownKind(format!("{:?} without element", d.kind)))
}

/// Serialization is identical for fixed and progressive containers: fixed
/// fields inline, one reserved offset slot per variable-width field, then
/// the variable bodies with the slots resolved.
fn container(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    mode: WriterMode,
) -> EmitResult<()> {
    let has_dynamic = d.fields.iter().any(|f| f.elem.flags.is_ssz_dynamic);
    match mode {
        WriterMode::Seekable => {
            let base = format!("base{depth}");
            if has_dynamic {
                scope.body.line(format!("let {base} = buf.len();"));
            }
            for (j, field) in d.fields.iter().enumerate() {
                let fval = val.field(&field.name);
                if field.elem.flags.is_ssz_dynamic {
                    scope.body.line(format!("let slot{depth}_{j} = buf.len();"));
                    scope.body.line(format!("{RT}::enc::append_u32(buf, 0u32);"));
                } else {
                    node(env, scope, &field.elem, &fval, depth + 1, false, mode)?;
                }
            }
            for (j, field) in d.fields.iter().enumerate() {
                if !field.elem.flags.is_ssz_dynamic {
                    continue;
                }
                let fval = val.field(&field.name);
                scope.body.line(format!(
                    "{RT}::enc::write_offset_at(buf, slot{depth}_{j}, (buf.len() - {base}) as u32);"
                ));
                node(env, scope, &field.elem, &fval, depth + 1, false, mode)?;
            }
        }
        WriterMode::Streaming => {
            // Forward-only sink: every offset is known before the static
            // section is written, via the size helpers.
            for (j, field) in d.fields.iter().enumerate() {
                if field.elem.flags.is_ssz_dynamic {
                    let fval = val.field(&field.name);
                    dyn_size_binding(
                        env,
                        scope,
                        &field.elem,
                        &fval,
                        depth + 1,
                        &format!("dsz{depth}_{j}"),
                    )?;
                }
            }
            let off = format!("off{depth}");
            if has_dynamic {
                let fixed = super::fixed_portion_expr(scope, d, env.dynamic)?;
                scope.body.line(format!("let mut {off}: usize = {fixed};"));
            }
            for (j, field) in d.fields.iter().enumerate() {
                let fval = val.field(&field.name);
                if field.elem.flags.is_ssz_dynamic {
                    scope.body.line(format!("w.write_offset({off} as u32)?;"));
                    scope.body.line(format!("{off} += dsz{depth}_{j};"));
                } else {
                    node(env, scope, &field.elem, &fval, depth + 1, false, mode)?;
                }
            }
            for field in &d.fields {
                if !field.elem.flags.is_ssz_dynamic {
                    continue;
                }
                let fval = val.field(&field.name);
                node(env, scope, &field.elem, &fval, depth + 1, false, mode)?;
            }
        }
    }
    Ok(())
}

fn vector(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    mode: WriterMode,
) -> EmitResult<()> {
    let len = format!("len{depth}");
    let len_expr = resolve_len(scope, d, env.dynamic);
    scope.body.line(format!("let {len}: usize = {len_expr};"));

    if d.flags.is_byte_array || d.flags.is_string {
        // Bulk path: emit exactly `len` bytes, truncating an over-long host
        // value and zero-padding a short one.
        let (full, sliced) = if d.flags.is_string {
            (
                format!("{}.as_bytes()", val.path),
                format!("&{}.as_bytes()[..{len}]", val.path),
            )
        } else {
            (val.borrow(), format!("&{}[..{len}]", val.path))
        };
        scope.body.open(format!("if {}.len() >= {len} {{", val.path));
        put_bytes(scope, mode, &sliced);
        scope.body.dedent();
        scope.body.open("} else {");
        put_bytes(scope, mode, &full);
        put_zero(scope, mode, &format!("{len} - {}.len()", val.path));
        scope.body.close("}");
        return Ok(());
    }

    let elem = require_elem(d)?;
    scope.body.open(format!("if {}.len() > {len} {{", val.path));
    scope
        .body
        .line(format!("return Err({RT}::SszError::vector_length_mismatch());"));
    scope.body.close("}");

    if !elem.flags.is_ssz_dynamic {
        let item = format!("item{depth}");
        scope
            .body
            .open(format!("for {item} in {}.iter() {{", val.path));
        node(env, scope, elem, &ValExpr::local_ref(&item), depth + 1, false, mode)?;
        scope.body.close("}");
        // Missing tail elements encode as zero bytes.
        let elem_size = static_size_term(scope, elem, env.dynamic)?;
        scope
            .body
            .open(format!("for _ in {}.len()..{len} {{", val.path));
        put_zero(scope, mode, &elem_size.expr());
        scope.body.close("}");
    } else {
        dynamic_elements(env, scope, elem, val, &len, true, depth, mode)?;
    }
    Ok(())
}

fn bitvector(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    mode: WriterMode,
) -> EmitResult<()> {
    let bits = format!("bits{depth}");
    let blen = format!("blen{depth}");
    let bits_expr = resolve_bits(scope, d, env.dynamic);
    scope.body.line(format!("let {bits}: usize = {bits_expr};"));
    scope
        .body
        .line(format!("let {blen}: usize = ({bits} + 7usize) / 8usize;"));
    scope.body.open(format!("if {}.len() > {blen} {{", val.path));
    scope
        .body
        .line(format!("return Err({RT}::SszError::vector_length_mismatch());"));
    scope.body.close("}");
    // Bits above the declared width must be clear.
    scope.body.open(format!(
        "if {path}.len() == {blen} && {bits} % 8usize != 0usize && {path}[{blen} - 1usize] & (0xffu8 << ({bits} % 8usize)) != 0u8 {{",
        path = val.path
    ));
    scope
        .body
        .line(format!("return Err({RT}::SszError::vector_length_mismatch());"));
    scope.body.close("}");
    put_bytes(scope, mode, &val.borrow());
    put_zero(scope, mode, &format!("{blen} - {}.len()", val.path));
    Ok(())
}

fn list(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    mode: WriterMode,
) -> EmitResult<()> {
    let max = format!("max{depth}");
    let max_expr = resolve_limit(scope, d, env.dynamic);
    scope.body.line(format!("let {max}: usize = {max_expr};"));
    scope.body.open(format!("if {}.len() > {max} {{", val.path));
    scope
        .body
        .line(format!("return Err({RT}::SszError::list_limit_exceeded());"));
    scope.body.close("}");

    if d.flags.is_byte_array || d.flags.is_string {
        let full = if d.flags.is_string {
            format!("{}.as_bytes()", val.path)
        } else {
            val.borrow()
        };
        put_bytes(scope, mode, &full);
        return Ok(());
    }

    let elem = require_elem(d)?;
    if !elem.flags.is_ssz_dynamic {
        let item = format!("item{depth}");
        scope
            .body
            .open(format!("for {item} in {}.iter() {{", val.path));
        node(env, scope, elem, &ValExpr::local_ref(&item), depth + 1, false, mode)?;
        scope.body.close("}");
    } else {
        let count = format!("{}.len()", val.path);
        dynamic_elements(env, scope, elem, val, &count, false, depth, mode)?;
    }
    Ok(())
}

/// Offset table plus bodies for a collection of variable-width elements.
/// `count` is the emitted element count; with `padded`, host values shorter
/// than the count are extended with default elements.
#[allow(clippy::too_many_arguments)]
fn dynamic_elements(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    elem: &TypeDescriptor,
    val: &ValExpr,
    count: &str,
    padded: bool,
    depth: usize,
    mode: WriterMode,
) -> EmitResult<()> {
    let i = format!("i{depth}");
    let item = format!("item{depth}");
    let pad = format!("pad{depth}");
    if padded {
        let elem_ty = env.printer.rust_type(elem)?;
        scope
            .body
            .line(format!("let {pad}: {elem_ty} = Default::default();"));
    }
    let select_item = |scope: &mut FnScope| {
        if padded {
            scope.body.line(format!(
                "let {item} = if {i} < {path}.len() {{ &{path}[{i}] }} else {{ &{pad} }};",
                path = val.path
            ));
        } else {
            scope
                .body
                .line(format!("let {item} = &{}[{i}];", val.path));
        }
    };

    match mode {
        WriterMode::Seekable => {
            let tbl = format!("tbl{depth}");
            scope.body.line(format!("let {tbl} = buf.len();"));
            scope.body.open(format!("for _ in 0usize..{count} {{"));
            scope.body.line(format!("{RT}::enc::append_u32(buf, 0u32);"));
            scope.body.close("}");
            scope.body.open(format!("for {i} in 0usize..{count} {{"));
            scope.body.line(format!(
                "{RT}::enc::write_offset_at(buf, {tbl} + 4usize * {i}, (buf.len() - {tbl}) as u32);"
            ));
            select_item(scope);
            node(env, scope, elem, &ValExpr::local_ref(&item), depth + 1, false, mode)?;
            scope.body.close("}");
        }
        WriterMode::Streaming => {
            let off = format!("off{depth}");
            let isz = format!("isz{depth}");
            scope
                .body
                .line(format!("let mut {off}: usize = 4usize * {count};"));
            scope.body.open(format!("for {i} in 0usize..{count} {{"));
            select_item(scope);
            scope.body.line(format!("w.write_offset({off} as u32)?;"));
            dyn_size_binding(env, scope, elem, &ValExpr::local_ref(&item), depth + 1, &isz)?;
            scope.body.line(format!("{off} += {isz};"));
            scope.body.close("}");
            scope.body.open(format!("for {i} in 0usize..{count} {{"));
            select_item(scope);
            node(env, scope, elem, &ValExpr::local_ref(&item), depth + 1, false, mode)?;
            scope.body.close("}");
        }
    }
    Ok(())
}

fn bitlist(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    mode: WriterMode,
) -> EmitResult<()> {
    let max = format!("max{depth}");
    let max_expr = resolve_limit(scope, d, env.dynamic);
    scope.body.line(format!("let {max}: usize = {max_expr};"));
    scope.body.open(format!("if {}.is_empty() {{", val.path));
    // Empty bitlist encodes as the lone terminator bit.
    put_scalar(scope, mode, "u8", "1u8");
    scope.body.dedent();
    scope.body.open("} else {");
    scope.body.open(format!(
        "if {path}[{path}.len() - 1usize] == 0u8 {{",
        path = val.path
    ));
    scope
        .body
        .line(format!("return Err({RT}::SszError::bitlist_not_terminated());"));
    scope.body.close("}");
    scope.body.open(format!(
        "if {RT}::bitlist_len({}) > {max} {{",
        val.borrow()
    ));
    scope
        .body
        .line(format!("return Err({RT}::SszError::list_limit_exceeded());"));
    scope.body.close("}");
    put_bytes(scope, mode, &val.borrow());
    scope.body.close("}");
    Ok(())
}

fn union(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    mode: WriterMode,
) -> EmitResult<()> {
    put_scalar(scope, mode, "u8", &format!("{}.selector", val.path));
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
        node(env, scope, &variant.elem, &ValExpr::local_ref(&v), depth + 1, false, mode)?;
        scope.body.close("}");
    }
    scope.body.line(format!(
        "_ => return Err({RT}::SszError::invalid_union_variant()),"
    ));
    scope.body.close("}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::TypePrinter;
    use dynssz_descriptor::TypeRef;

    fn emit(d: &TypeDescriptor, dynamic: bool, mode: WriterMode) -> EmittedBody {
        let mut printer = TypePrinter::new("types");
        let mut env = EmitEnv::new(&mut printer, dynamic, false);
        emit_serialize_body(&mut env, d, mode).unwrap()
    }

    fn message() -> TypeDescriptor {
        TypeDescriptor::container(
            TypeRef::new("types", "Message"),
            vec![
                ("a", TypeDescriptor::uint16()),
                ("b", TypeDescriptor::list_of(TypeDescriptor::uint16(), 4)),
            ],
        )
    }

    #[test]
    fn test_only_named_roots_are_accepted() {
        let mut printer = TypePrinter::new("types");
        let mut env = EmitEnv::new(&mut printer, false, false);
        let err = emit_serialize_body(&mut env, &TypeDescriptor::uint64(), WriterMode::Seekable)
            .unwrap_err();
        assert!(matches!(err, EmitError::UnknownKind(_)));
    }

    #[test]
    fn test_buffered_container_reserves_and_patches() {
        let body = emit(&message(), false, WriterMode::Seekable);
        assert!(body.code.contains("let base0 = buf.len();"));
        assert!(body.code.contains("let slot0_1 = buf.len();"));
        assert!(body.code.contains("write_offset_at(buf, slot0_1"));
        assert!(!body.used_specs);
    }

    #[test]
    fn test_streaming_container_precomputes_sizes() {
        let body = emit(&message(), false, WriterMode::Streaming);
        assert!(body.code.contains("let dsz0_1: usize = size_0(&self.b)?;"));
        assert!(body.code.contains("fn size_0(value: &Vec<u16>) -> Result<usize, dynssz_rt::SszError> {"));
        assert!(body.code.contains("w.write_offset(off0 as u32)?;"));
        assert!(!body.code.contains("write_offset_at"));
    }

    #[test]
    fn test_dynamic_mode_marks_spec_usage() {
        let d = TypeDescriptor::container(
            TypeRef::new("types", "Blob"),
            vec![(
                "data",
                TypeDescriptor::vector_expr(TypeDescriptor::uint64(), "N", 4),
            )],
        );
        assert!(emit(&d, true, WriterMode::Seekable).used_specs);
        assert!(!emit(&d, false, WriterMode::Seekable).used_specs);
    }

    #[test]
    fn test_fixed_vector_pads_missing_tail_with_zero_bytes() {
        let d = TypeDescriptor::container(
            TypeRef::new("types", "V"),
            vec![("v", TypeDescriptor::vector_of(TypeDescriptor::uint32(), 8))],
        );
        let body = emit(&d, false, WriterMode::Seekable);
        assert!(body.code.contains("for _ in self.v.len()..len1 {"));
        assert!(body.code.contains("append_zero_bytes(buf, 4usize);"));
        assert!(body.code.contains("vector_length_mismatch"));
    }

    #[test]
    fn test_union_rejects_unregistered_tags() {
        let d = TypeDescriptor::container(
            TypeRef::new("types", "P"),
            vec![(
                "u",
                TypeDescriptor::union_of(vec![(1, TypeDescriptor::uint32())]),
            )],
        );
        let body = emit(&d, false, WriterMode::Seekable);
        assert!(body.code.contains("1u8 => {"));
        assert!(body.code.contains("_ => return Err(dynssz_rt::SszError::invalid_union_variant()),"));
    }
}

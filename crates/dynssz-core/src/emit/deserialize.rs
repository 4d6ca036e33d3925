//! Deserialize emitter.
//!
//! Emits a routine reading a value from a cursor decoder with push/pop
//! length limits. Containers validate their offset table strictly: the first
//! dynamic offset must equal the fixed-portion size, later offsets are
//! non-decreasing and bounded by the input, and every dynamic field must
//! consume exactly its announced span. Dynamic collections stage their
//! offset tables in pooled `u32` slices, one per nesting level.

use dynssz_descriptor::{TypeDescriptor, TypeKind};

use crate::builder::CodeBuilder;
use crate::delegate::Delegation;
use crate::error::{EmitError, EmitResult};
use crate::names::RT;

use super::{
    check_root_kind, deref_shape, drain_helpers, fixed_portion_expr, inlinable, render_fn,
    resolve_bits, resolve_len, resolve_limit, static_size_term, EmitEnv, EmittedBody, FnScope,
    ValExpr,
};

pub(crate) fn emit_deserialize_body(
    env: &mut EmitEnv<'_>,
    d: &TypeDescriptor,
) -> EmitResult<EmittedBody> {
    check_root_kind(d)?;
    let mut scope = FnScope::new();
    node(env, &mut scope, d, &ValExpr::receiver(), 0)?;
    scope.body.line("Ok(())");
    let (helpers, helpers_used_specs) = drain_helpers(env)?;
    let mut body = render_fn(scope, &helpers);
    body.used_specs |= helpers_used_specs;
    Ok(body)
}

/// Full function text of one shared unmarshal helper.
pub(crate) fn emit_unmarshal_helper(
    env: &mut EmitEnv<'_>,
    index: usize,
    d: &TypeDescriptor,
) -> EmitResult<EmittedBody> {
    let mut scope = FnScope::new();
    node(env, &mut scope, d, &ValExpr::local_ref("out"), 0)?;
    scope.body.line("Ok(())");
    let rendered = render_fn(scope, &[]);

    let ty = env.printer.rust_type(d)?;
    let specs_param = if env.dynamic {
        format!(", specs: &{RT}::DynSpecs")
    } else {
        String::new()
    };
    let mut b = CodeBuilder::new();
    b.open(format!(
        "fn unmarshal_{index}(dec: &mut {RT}::Decoder<'_>, out: &mut {ty}{specs_param}) -> Result<(), {RT}::SszError> {{"
    ));
    b.lines(&rendered.code);
    b.close("}");
    Ok(EmittedBody {
        code: b.finish(),
        used_specs: rendered.used_specs,
    })
}

/// Route one child: peel pointers, try delegation, inline the simple
/// shapes, share everything else through an unmarshal helper.
fn child(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    target: &ValExpr,
    depth: usize,
) -> EmitResult<()> {
    if d.flags.is_pointer {
        let ptr = format!("ptr{depth}");
        scope.body.line(format!(
            "let {ptr} = {}.get_or_insert_with(Default::default);",
            target.path
        ));
        let inner = deref_shape(d);
        return child(env, scope, &inner, &ValExpr::local_ref(ptr), depth);
    }
    match Delegation::choose(d, false, env.policy(false)) {
        Delegation::DynamicStream | Delegation::DynamicBuffered => {
            scope.used_specs = true;
            scope
                .body
                .line(format!("{}.ssz_read_dyn(specs, dec)?;", target.path));
            return Ok(());
        }
        Delegation::FastPathBuffered => {
            scope.body.line(format!("{}.ssz_read(dec)?;", target.path));
            return Ok(());
        }
        Delegation::None => {}
    }
    if inlinable(d) {
        return node(env, scope, d, target, depth);
    }
    let index = env.cache.request_unmarshal(d);
    let specs_arg = if env.dynamic { ", specs" } else { "" };
    scope.body.line(format!(
        "unmarshal_{index}(dec, {}{specs_arg})?;",
        target.borrow_mut()
    ));
    Ok(())
}

/// Inline walk for a body owner (method root or helper root). Children go
/// through [`child`].
fn node(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    target: &ValExpr,
    depth: usize,
) -> EmitResult<()> {
    match d.kind {
        TypeKind::Bool => {
            scope
                .body
                .line(format!("{} = dec.read_bool()?;", target.lvalue()));
        }
        TypeKind::Uint8 => {
            scope
                .body
                .line(format!("{} = dec.read_u8()?;", target.lvalue()));
        }
        TypeKind::Uint16 => {
            scope
                .body
                .line(format!("{} = dec.read_u16()?;", target.lvalue()));
        }
        TypeKind::Uint32 => {
            scope
                .body
                .line(format!("{} = dec.read_u32()?;", target.lvalue()));
        }
        TypeKind::Uint64 => {
            if d.flags.is_time {
                scope.body.line(format!(
                    "{} = {RT}::time_from_unix(dec.read_u64()?);",
                    target.lvalue()
                ));
            } else {
                scope
                    .body
                    .line(format!("{} = dec.read_u64()?;", target.lvalue()));
            }
        }
        TypeKind::Uint128 => {
            scope.body.line(format!(
                "{}.copy_from_slice(dec.read_bytes(16usize)?);",
                target.path
            ));
        }
        TypeKind::Uint256 => {
            scope.body.line(format!(
                "{}.copy_from_slice(dec.read_bytes(32usize)?);",
                target.path
            ));
        }
        TypeKind::Wrapper => {
            let elem = require_elem(d)?;
            child(env, scope, elem, &target.unwrapped(), depth + 1)?;
        }
        TypeKind::Container | TypeKind::ProgressiveContainer => {
            container(env, scope, d, target, depth)?;
        }
        TypeKind::Vector => vector(env, scope, d, target, depth)?,
        TypeKind::Bitvector => bitvector(env, scope, d, target, depth)?,
        TypeKind::List | TypeKind::ProgressiveList => list(env, scope, d, target, depth)?,
        TypeKind::Bitlist | TypeKind::ProgressiveBitlist => bitlist(env, scope, d, target, depth)?,
        TypeKind::Union => union(env, scope, d, target, depth)?,
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

fn container(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    target: &ValExpr,
    depth: usize,
) -> EmitResult<()> {
    let total = format!("total{depth}");
    let fix = format!("fix{depth}");
    let base = format!("base{depth}");
    scope.body.line(format!("let {total} = dec.remaining();"));
    let fixed = fixed_portion_expr(scope, d, env.dynamic)?;
    scope.body.line(format!("let {fix}: usize = {fixed};"));
    scope.body.open(format!("if {total} < {fix} {{"));
    scope
        .body
        .line(format!("return Err({RT}::SszError::unexpected_eof());"));
    scope.body.close("}");
    let has_dynamic = d.fields.iter().any(|f| f.elem.flags.is_ssz_dynamic);
    if has_dynamic {
        scope.body.line(format!("let {base} = dec.position();"));
    }

    // Static section: fixed fields inline, one offset read per dynamic
    // field, validated strictly in declaration order.
    let mut prev_dynamic: Option<usize> = None;
    for (j, field) in d.fields.iter().enumerate() {
        if field.elem.flags.is_ssz_dynamic {
            let off = format!("off{depth}_{j}");
            scope
                .body
                .line(format!("let {off} = dec.read_offset()? as usize;"));
            match prev_dynamic {
                None => {
                    // The first dynamic offset points at the end of the
                    // fixed portion, exactly.
                    scope.body.open(format!("if {off} != {fix} {{"));
                    scope
                        .body
                        .line(format!("return Err({RT}::SszError::offset_violation());"));
                    scope.body.close("}");
                }
                Some(p) => {
                    scope
                        .body
                        .open(format!("if {off} < off{depth}_{p} {{"));
                    scope
                        .body
                        .line(format!("return Err({RT}::SszError::offset_violation());"));
                    scope.body.close("}");
                }
            }
            scope.body.open(format!("if {off} > {total} {{"));
            scope
                .body
                .line(format!("return Err({RT}::SszError::offset_violation());"));
            scope.body.close("}");
            prev_dynamic = Some(j);
        } else {
            child(env, scope, &field.elem, &target.field(&field.name), depth + 1)?;
        }
    }

    // Dynamic section: each field reads exactly its announced span.
    let dynamic_fields: Vec<usize> = d
        .fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.elem.flags.is_ssz_dynamic)
        .map(|(j, _)| j)
        .collect();
    for (pos, &j) in dynamic_fields.iter().enumerate() {
        let off = format!("off{depth}_{j}");
        let end = match dynamic_fields.get(pos + 1) {
            Some(next) => format!("off{depth}_{next}"),
            None => total.clone(),
        };
        scope
            .body
            .open(format!("if dec.position() - {base} != {off} {{"));
        scope
            .body
            .line(format!("return Err({RT}::SszError::offset_violation());"));
        scope.body.close("}");
        scope.body.line(format!("dec.push_limit({end} - {off});"));
        let field = &d.fields[j];
        child(env, scope, &field.elem, &target.field(&field.name), depth + 1)?;
        scope.body.line("dec.pop_limit()?;");
    }
    Ok(())
}

fn vector(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    target: &ValExpr,
    depth: usize,
) -> EmitResult<()> {
    let len = format!("len{depth}");
    let len_expr = resolve_len(scope, d, env.dynamic);
    scope.body.line(format!("let {len}: usize = {len_expr};"));

    if d.flags.is_byte_array || d.flags.is_string {
        if d.flags.is_string {
            scope.body.line(format!(
                "{} = {RT}::bytes_to_string(dec.read_bytes({len})?);",
                target.lvalue()
            ));
        } else {
            scope.body.line(format!(
                "{} = dec.read_bytes({len})?.to_vec();",
                target.lvalue()
            ));
        }
        return Ok(());
    }

    let elem = require_elem(d)?;
    if !elem.flags.is_ssz_dynamic {
        let elem_size = static_size_term(scope, elem, env.dynamic)?;
        scope.body.open(format!(
            "if dec.remaining() < {len} * {} {{",
            elem_size.expr()
        ));
        scope
            .body
            .line(format!("return Err({RT}::SszError::unexpected_eof());"));
        scope.body.close("}");
        fixed_elements(env, scope, elem, target, &len, &elem_size.expr(), depth)?;
    } else {
        scope.body.line(format!("{}.clear();", target.path));
        scope.body.open(format!("if {len} > 0usize {{"));
        dynamic_elements(env, scope, elem, target, &len, depth, true)?;
        scope.body.close("}");
    }
    Ok(())
}

/// Loop reading `count` fixed-width elements into a cleared receiver,
/// checking the cursor advances exactly one element per iteration.
fn fixed_elements(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    elem: &TypeDescriptor,
    target: &ValExpr,
    count: &str,
    elem_size: &str,
    depth: usize,
) -> EmitResult<()> {
    scope.body.line(format!("{}.clear();", target.path));
    scope.body.line(format!("{}.reserve({count});", target.path));
    if let Some(read) = scalar_read(elem) {
        scope.body.open(format!("for _ in 0usize..{count} {{"));
        scope.body.line(format!("{}.push({read});", target.path));
        scope.body.close("}");
        return Ok(());
    }
    let start = format!("start{depth}");
    let item = format!("item{depth}");
    let elem_ty = env.printer.rust_type(elem)?;
    scope.body.open(format!("for _ in 0usize..{count} {{"));
    scope.body.line(format!("let {start} = dec.position();"));
    scope
        .body
        .line(format!("let mut {item}: {elem_ty} = Default::default();"));
    child(env, scope, elem, &ValExpr::local(&item), depth + 1)?;
    scope
        .body
        .open(format!("if dec.position() - {start} != {elem_size} {{"));
    scope
        .body
        .line(format!("return Err({RT}::SszError::offset_violation());"));
    scope.body.close("}");
    scope.body.line(format!("{}.push({item});", target.path));
    scope.body.close("}");
    Ok(())
}

/// Plain scalar read expression for the kinds where the per-iteration
/// advance is exact by construction.
fn scalar_read(d: &TypeDescriptor) -> Option<String> {
    if d.flags.is_pointer || d.flags.is_time {
        return None;
    }
    let call = match d.kind {
        TypeKind::Bool => "dec.read_bool()?",
        TypeKind::Uint8 => "dec.read_u8()?",
        TypeKind::Uint16 => "dec.read_u16()?",
        TypeKind::Uint32 => "dec.read_u32()?",
        TypeKind::Uint64 => "dec.read_u64()?",
        _ => return None,
    };
    Some(call.to_string())
}

/// Offset-table read for a collection of variable-width elements. With
/// `exact_count`, `count` elements are required on the wire (vectors);
/// otherwise the count is derived from the first offset (lists) and `count`
/// is the enforced bound.
fn dynamic_elements(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    elem: &TypeDescriptor,
    target: &ValExpr,
    count: &str,
    depth: usize,
    exact_count: bool,
) -> EmitResult<()> {
    let pool_level = scope.enter_pool();
    let offs = format!("offs{pool_level}");
    let total = format!("total{depth}");
    let first = format!("first{depth}");
    let cnt = format!("cnt{depth}");
    let prev = format!("prev{depth}");
    let o = format!("o{depth}");
    let i = format!("i{depth}");
    let end = format!("end{depth}");

    scope.body.line(format!("let {total} = dec.remaining();"));
    scope
        .body
        .line(format!("let {first} = dec.read_offset()? as usize;"));
    if exact_count {
        scope.body.open(format!("if {first} != 4usize * {count} {{"));
        scope
            .body
            .line(format!("return Err({RT}::SszError::offset_violation());"));
        scope.body.close("}");
        scope.body.line(format!("let {cnt} = {count};"));
    } else {
        scope.body.open(format!(
            "if {first} == 0usize || {first} % 4usize != 0usize {{"
        ));
        scope
            .body
            .line(format!("return Err({RT}::SszError::offset_violation());"));
        scope.body.close("}");
        scope.body.line(format!("let {cnt} = {first} / 4usize;"));
        scope.body.open(format!("if {cnt} > {count} {{"));
        scope
            .body
            .line(format!("return Err({RT}::SszError::list_limit_exceeded());"));
        scope.body.close("}");
    }
    scope.body.open(format!("if {first} > {total} {{"));
    scope
        .body
        .line(format!("return Err({RT}::SszError::offset_violation());"));
    scope.body.close("}");

    scope.body.line(format!("{offs}.clear();"));
    scope.body.line(format!("{offs}.push({first} as u32);"));
    scope.body.line(format!("let mut {prev} = {first} as u32;"));
    scope.body.open(format!("for _ in 1usize..{cnt} {{"));
    scope.body.line(format!("let {o} = dec.read_offset()?;"));
    scope.body.open(format!(
        "if {o} < {prev} || {o} as usize > {total} {{"
    ));
    scope
        .body
        .line(format!("return Err({RT}::SszError::offset_violation());"));
    scope.body.close("}");
    scope.body.line(format!("{offs}.push({o});"));
    scope.body.line(format!("{prev} = {o};"));
    scope.body.close("}");

    scope
        .body
        .line(format!("{}.resize_with({cnt}, Default::default);", target.path));
    scope.body.open(format!("for {i} in 0usize..{cnt} {{"));
    scope.body.line(format!(
        "let {end} = if {i} + 1usize < {cnt} {{ {offs}[{i} + 1usize] as usize }} else {{ {total} }};"
    ));
    scope
        .body
        .line(format!("dec.push_limit({end} - {offs}[{i}] as usize);"));
    child(env, scope, elem, &target.index(&i), depth + 1)?;
    scope.body.line("dec.pop_limit()?;");
    scope.body.close("}");
    scope.leave_pool();
    Ok(())
}

fn bitvector(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    target: &ValExpr,
    depth: usize,
) -> EmitResult<()> {
    let bits = format!("bits{depth}");
    let blen = format!("blen{depth}");
    let b = format!("b{depth}");
    let bits_expr = resolve_bits(scope, d, env.dynamic);
    scope.body.line(format!("let {bits}: usize = {bits_expr};"));
    scope
        .body
        .line(format!("let {blen}: usize = ({bits} + 7usize) / 8usize;"));
    scope
        .body
        .line(format!("let {b} = dec.read_bytes({blen})?;"));
    // Padding bits above the declared width must be clear.
    scope.body.open(format!(
        "if {bits} % 8usize != 0usize && {b}[{blen} - 1usize] & (0xffu8 << ({bits} % 8usize)) != 0u8 {{"
    ));
    scope
        .body
        .line(format!("return Err({RT}::SszError::vector_length_mismatch());"));
    scope.body.close("}");
    scope
        .body
        .line(format!("{} = {b}.to_vec();", target.lvalue()));
    Ok(())
}

fn list(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    target: &ValExpr,
    depth: usize,
) -> EmitResult<()> {
    let max = format!("max{depth}");
    let n = format!("n{depth}");
    let max_expr = resolve_limit(scope, d, env.dynamic);
    scope.body.line(format!("let {max}: usize = {max_expr};"));

    if d.flags.is_byte_array || d.flags.is_string {
        scope.body.line(format!("let {n} = dec.remaining();"));
        scope.body.open(format!("if {n} > {max} {{"));
        scope
            .body
            .line(format!("return Err({RT}::SszError::list_limit_exceeded());"));
        scope.body.close("}");
        if d.flags.is_string {
            scope.body.line(format!(
                "{} = {RT}::bytes_to_string(dec.read_bytes({n})?);",
                target.lvalue()
            ));
        } else {
            scope.body.line(format!(
                "{} = dec.read_bytes({n})?.to_vec();",
                target.lvalue()
            ));
        }
        return Ok(());
    }

    let elem = require_elem(d)?;
    if !elem.flags.is_ssz_dynamic {
        let elem_size = static_size_term(scope, elem, env.dynamic)?;
        let cnt = format!("cnt{depth}");
        scope.body.line(format!("let {n} = dec.remaining();"));
        scope
            .body
            .open(format!("if {n} % {} != 0usize {{", elem_size.expr()));
        scope
            .body
            .line(format!("return Err({RT}::SszError::unexpected_eof());"));
        scope.body.close("}");
        scope
            .body
            .line(format!("let {cnt} = {n} / {};", elem_size.expr()));
        scope.body.open(format!("if {cnt} > {max} {{"));
        scope
            .body
            .line(format!("return Err({RT}::SszError::list_limit_exceeded());"));
        scope.body.close("}");
        fixed_elements(env, scope, elem, target, &cnt, &elem_size.expr(), depth)?;
    } else {
        scope.body.line(format!("{}.clear();", target.path));
        scope.body.open("if dec.remaining() > 0usize {");
        dynamic_elements(env, scope, elem, target, &max, depth, false)?;
        scope.body.close("}");
    }
    Ok(())
}

fn bitlist(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    target: &ValExpr,
    depth: usize,
) -> EmitResult<()> {
    let max = format!("max{depth}");
    let n = format!("n{depth}");
    let b = format!("b{depth}");
    let max_expr = resolve_limit(scope, d, env.dynamic);
    scope.body.line(format!("let {max}: usize = {max_expr};"));
    scope.body.line(format!("let {n} = dec.remaining();"));
    // The terminator bit makes even the empty bitlist one byte long.
    scope.body.open(format!("if {n} == 0usize {{"));
    scope
        .body
        .line(format!("return Err({RT}::SszError::bitlist_not_terminated());"));
    scope.body.close("}");
    scope.body.line(format!("let {b} = dec.read_bytes({n})?;"));
    scope.body.open(format!("if {b}[{n} - 1usize] == 0u8 {{"));
    scope
        .body
        .line(format!("return Err({RT}::SszError::bitlist_not_terminated());"));
    scope.body.close("}");
    scope.body.open(format!("if {RT}::bitlist_len({b}) > {max} {{"));
    scope
        .body
        .line(format!("return Err({RT}::SszError::list_limit_exceeded());"));
    scope.body.close("}");
    scope
        .body
        .line(format!("{} = {b}.to_vec();", target.lvalue()));
    Ok(())
}

fn union(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    target: &ValExpr,
    depth: usize,
) -> EmitResult<()> {
    let tag = format!("tag{depth}");
    scope.body.line(format!("let {tag} = dec.read_u8()?;"));
    scope.body.open(format!("match {tag} {{"));
    for variant in &d.variants {
        let variant_ty = env.printer.rust_type(&variant.elem)?;
        let v = format!("v{depth}");
        scope.body.open(format!("{}u8 => {{", variant.tag));
        scope
            .body
            .line(format!("let mut {v}: {variant_ty} = Default::default();"));
        child(env, scope, &variant.elem, &ValExpr::local(&v), depth + 1)?;
        scope.body.line(format!(
            "{} = {RT}::SszUnion {{ selector: {}u8, value: Box::new({v}) }};",
            target.lvalue(),
            variant.tag
        ));
        scope.body.close("}");
    }
    scope.body.line(format!(
        "_ => return Err({RT}::SszError::invalid_union_variant()),"
    ));
    scope.body.close("}");
    Ok(())
}

//! Hash-tree-root emitter.
//!
//! Emits a routine computing the SSZ Merkle root of a value through the
//! support crate's chunk hasher: primitive leaves pack into 32-byte chunks,
//! collections chunkify and Merkleize (mixing in the length for lists),
//! containers Merkleize their field roots, progressive shapes use
//! progressive Merkleization with an active-fields mixin, and unions mix in
//! the discriminator.

use dynssz_descriptor::{TypeDescriptor, TypeKind};

use crate::delegate::Delegation;
use crate::error::{EmitError, EmitResult};
use crate::names::RT;

use super::{
    check_root_kind, deref_shape, drain_helpers, render_fn, resolve_bits, resolve_len,
    resolve_limit, static_size_term, EmitEnv, EmittedBody, FnScope, ValExpr,
};

pub(crate) fn emit_hash_body(env: &mut EmitEnv<'_>, d: &TypeDescriptor) -> EmitResult<EmittedBody> {
    check_root_kind(d)?;
    let mut scope = FnScope::new();
    if d.kind == TypeKind::Custom {
        scope
            .body
            .line(format!("Err({RT}::SszError::not_implemented())"));
    } else {
        scope.body.line(format!("let mut h = {RT}::Hasher::new();"));
        node(env, &mut scope, d, &ValExpr::receiver(), 0, true)?;
        scope.body.line("Ok(h.finalize_root())");
    }
    let (helpers, helpers_used_specs) = drain_helpers(env)?;
    let mut body = render_fn(scope, &helpers);
    body.used_specs |= helpers_used_specs;
    Ok(body)
}

/// Packed-append method and zero literal for scalar element kinds.
fn packed_scalar(d: &TypeDescriptor) -> Option<(&'static str, &'static str)> {
    if d.flags.is_time {
        return None;
    }
    match d.kind {
        TypeKind::Bool => Some(("bool", "false")),
        TypeKind::Uint8 => Some(("u8", "0u8")),
        TypeKind::Uint16 => Some(("u16", "0u16")),
        TypeKind::Uint32 => Some(("u32", "0u32")),
        TypeKind::Uint64 => Some(("u64", "0u64")),
        _ => None,
    }
}

fn node(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    is_root: bool,
) -> EmitResult<()> {
    if d.flags.is_pointer && !is_root {
        let ptr = format!("ptr{depth}");
        scope
            .body
            .line(format!("let {ptr} = {}.clone().unwrap_or_default();", val.path));
        let inner = deref_shape(d);
        return node(env, scope, &inner, &ValExpr::local(ptr), depth, false);
    }

    match Delegation::choose(d, is_root, env.policy(false)) {
        Delegation::DynamicStream | Delegation::DynamicBuffered => {
            scope.used_specs = true;
            let root = format!("root{depth}");
            scope.body.line(format!(
                "let {root} = {}.ssz_hash_root_dyn(specs)?;",
                val.path
            ));
            scope.body.line(format!("h.put_bytes(&{root});"));
            return Ok(());
        }
        Delegation::FastPathBuffered => {
            let root = format!("root{depth}");
            scope
                .body
                .line(format!("let {root} = {}.ssz_hash_root()?;", val.path));
            scope.body.line(format!("h.put_bytes(&{root});"));
            return Ok(());
        }
        Delegation::None => {}
    }

    match d.kind {
        TypeKind::Bool => scope.body.line(format!("h.put_bool({});", val.scalar())),
        TypeKind::Uint8 => scope.body.line(format!("h.put_u8({});", val.scalar())),
        TypeKind::Uint16 => scope.body.line(format!("h.put_u16({});", val.scalar())),
        TypeKind::Uint32 => scope.body.line(format!("h.put_u32({});", val.scalar())),
        TypeKind::Uint64 => {
            if d.flags.is_time {
                scope.body.line(format!(
                    "h.put_u64({RT}::time_to_unix({}));",
                    val.borrow()
                ));
            } else {
                scope.body.line(format!("h.put_u64({});", val.scalar()));
            }
        }
        TypeKind::Uint128 | TypeKind::Uint256 => {
            scope.body.line(format!("h.put_bytes({});", val.borrow()));
        }
        TypeKind::Wrapper => {
            let elem = require_elem(d)?;
            node(env, scope, elem, &val.unwrapped(), depth + 1, false)?;
        }
        TypeKind::Container => {
            let idx = format!("idx{depth}");
            scope.body.line(format!("let {idx} = h.index();"));
            for field in &d.fields {
                node(env, scope, &field.elem, &val.field(&field.name), depth + 1, false)?;
            }
            scope.body.line(format!("h.merkleize({idx});"));
        }
        TypeKind::ProgressiveContainer => {
            let idx = format!("idx{depth}");
            scope.body.line(format!("let {idx} = h.index();"));
            for field in &d.fields {
                node(env, scope, &field.elem, &val.field(&field.name), depth + 1, false)?;
            }
            scope.body.line(format!("h.merkleize_progressive({idx});"));
            let active = active_fields_literal(d);
            scope
                .body
                .line(format!("h.mix_in_active_fields({idx}, &{active});"));
        }
        TypeKind::Vector => vector(env, scope, d, val, depth)?,
        TypeKind::Bitvector => {
            let bits = format!("bits{depth}");
            let idx = format!("idx{depth}");
            let bits_expr = resolve_bits(scope, d, env.dynamic);
            scope.body.line(format!("let {bits}: usize = {bits_expr};"));
            scope.body.line(format!("let {idx} = h.index();"));
            scope.body.line(format!(
                "h.put_padded_bytes({}, ({bits} + 7usize) / 8usize);",
                val.borrow()
            ));
            scope.body.line(format!("h.merkleize({idx});"));
        }
        TypeKind::List => list(env, scope, d, val, depth, false)?,
        TypeKind::ProgressiveList => list(env, scope, d, val, depth, true)?,
        TypeKind::Bitlist => {
            let max = format!("max{depth}");
            let max_expr = resolve_limit(scope, d, env.dynamic);
            scope.body.line(format!("let {max}: usize = {max_expr};"));
            scope
                .body
                .line(format!("h.put_bitlist({}, {max})?;", val.borrow()));
        }
        TypeKind::ProgressiveBitlist => {
            let max = format!("max{depth}");
            let max_expr = resolve_limit(scope, d, env.dynamic);
            scope.body.line(format!("let {max}: usize = {max_expr};"));
            scope.body.line(format!(
                "h.put_bitlist_progressive({}, {max})?;",
                val.borrow()
            ));
        }
        TypeKind::Union => {
            let idx = format!("idx{depth}");
            scope.body.line(format!("let {idx} = h.index();"));
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
                node(env, scope, &variant.elem, &ValExpr::local_ref(&v), depth + 1, false)?;
                scope.body.close("}");
            }
            scope.body.line(format!(
                "_ => return Err({RT}::SszError::invalid_union_variant()),"
            ));
            scope.body.close("}");
            scope
                .body
                .line(format!("h.mix_in_selector({idx}, {}.selector);", val.path));
        }
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

/// Byte literal for the active-fields bitvector of a progressive container,
/// bits set at each declared `ssz_index`.
fn active_fields_literal(d: &TypeDescriptor) -> String {
    let max_index = d.fields.iter().map(|f| f.ssz_index).max().unwrap_or(0);
    let mut bytes = vec![0u8; (max_index as usize / 8) + 1];
    for field in &d.fields {
        bytes[field.ssz_index as usize / 8] |= 1 << (field.ssz_index % 8);
    }
    let rendered: Vec<String> = bytes.iter().map(|b| format!("{b:#04x}u8")).collect();
    format!("[{}]", rendered.join(", "))
}

fn vector(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
) -> EmitResult<()> {
    let len = format!("len{depth}");
    let idx = format!("idx{depth}");
    let len_expr = resolve_len(scope, d, env.dynamic);
    scope.body.line(format!("let {len}: usize = {len_expr};"));
    scope.body.line(format!("let {idx} = h.index();"));

    if d.flags.is_byte_array || d.flags.is_string {
        // Mirrors serialization: over-long host bytes truncate, short ones
        // pad with zeros.
        let bytes = if d.flags.is_string {
            format!("{}.as_bytes()", val.path)
        } else {
            val.borrow()
        };
        scope
            .body
            .line(format!("h.put_padded_bytes({bytes}, {len});"));
        scope.body.line(format!("h.merkleize({idx});"));
        return Ok(());
    }

    let elem = require_elem(d)?;
    scope.body.open(format!("if {}.len() > {len} {{", val.path));
    scope
        .body
        .line(format!("return Err({RT}::SszError::vector_length_mismatch());"));
    scope.body.close("}");

    if let Some((method, zero)) = packed_scalar(elem) {
        let item = format!("item{depth}");
        scope
            .body
            .open(format!("for {item} in {}.iter() {{", val.path));
        scope
            .body
            .line(format!("h.append_{method}({});", ValExpr::local_ref(&item).scalar()));
        scope.body.close("}");
        scope
            .body
            .open(format!("for _ in {}.len()..{len} {{", val.path));
        scope.body.line(format!("h.append_{method}({zero});"));
        scope.body.close("}");
        scope.body.line("h.fill_chunk();");
    } else if let Some(width) = elem.kind.blob_size() {
        // Wide integers pack too, at their full byte width.
        let item = format!("item{depth}");
        scope
            .body
            .open(format!("for {item} in {}.iter() {{", val.path));
        scope.body.line(format!("h.append_bytes({item});"));
        scope.body.close("}");
        scope
            .body
            .open(format!("for _ in {}.len()..{len} {{", val.path));
        scope
            .body
            .line(format!("h.append_bytes(&[0u8; {width}]);"));
        scope.body.close("}");
        scope.body.line("h.fill_chunk();");
    } else {
        // Composite elements: one root chunk per element, defaults filling
        // the missing tail.
        let item = format!("item{depth}");
        scope
            .body
            .open(format!("for {item} in {}.iter() {{", val.path));
        node(env, scope, elem, &ValExpr::local_ref(&item), depth + 1, false)?;
        scope.body.close("}");
        let pad = format!("pad{depth}");
        scope
            .body
            .open(format!("if {}.len() < {len} {{", val.path));
        let elem_ty = env.printer.rust_type(elem)?;
        scope
            .body
            .line(format!("let {pad}: {elem_ty} = Default::default();"));
        scope
            .body
            .open(format!("for _ in {}.len()..{len} {{", val.path));
        node(env, scope, elem, &ValExpr::local(&pad), depth + 1, false)?;
        scope.body.close("}");
        scope.body.close("}");
    }
    scope.body.line(format!("h.merkleize({idx});"));
    Ok(())
}

fn list(
    env: &mut EmitEnv<'_>,
    scope: &mut FnScope,
    d: &TypeDescriptor,
    val: &ValExpr,
    depth: usize,
    progressive: bool,
) -> EmitResult<()> {
    let max = format!("max{depth}");
    let idx = format!("idx{depth}");
    let max_expr = resolve_limit(scope, d, env.dynamic);
    scope.body.line(format!("let {max}: usize = {max_expr};"));
    scope.body.open(format!("if {}.len() > {max} {{", val.path));
    scope
        .body
        .line(format!("return Err({RT}::SszError::list_limit_exceeded());"));
    scope.body.close("}");
    scope.body.line(format!("let {idx} = h.index();"));

    let mixin_len = format!("{}.len() as u64", val.path);
    if d.flags.is_byte_array || d.flags.is_string {
        let bytes = if d.flags.is_string {
            format!("{}.as_bytes()", val.path)
        } else {
            val.borrow()
        };
        scope.body.line(format!("h.append_bytes({bytes});"));
        scope.body.line("h.fill_chunk();");
        finish_list(scope, &idx, &mixin_len, &format!("(({max} + 31usize) / 32usize) as u64"), progressive);
        return Ok(());
    }

    let elem = require_elem(d)?;
    let packed_append = if let Some((method, _)) = packed_scalar(elem) {
        let item = format!("item{depth}");
        Some((
            item.clone(),
            format!("h.append_{method}({});", ValExpr::local_ref(&item).scalar()),
        ))
    } else if elem.kind.blob_size().is_some() {
        let item = format!("item{depth}");
        Some((item.clone(), format!("h.append_bytes({item});")))
    } else {
        None
    };
    if let Some((item, append)) = packed_append {
        scope
            .body
            .open(format!("for {item} in {}.iter() {{", val.path));
        scope.body.line(append);
        scope.body.close("}");
        scope.body.line("h.fill_chunk();");
        let elem_size = static_size_term(scope, elem, env.dynamic)?;
        let chunk_limit = format!(
            "(({max} * {} + 31usize) / 32usize) as u64",
            elem_size.expr()
        );
        finish_list(scope, &idx, &mixin_len, &chunk_limit, progressive);
    } else {
        let item = format!("item{depth}");
        scope
            .body
            .open(format!("for {item} in {}.iter() {{", val.path));
        node(env, scope, elem, &ValExpr::local_ref(&item), depth + 1, false)?;
        scope.body.close("}");
        finish_list(scope, &idx, &mixin_len, &format!("{max} as u64"), progressive);
    }
    Ok(())
}

fn finish_list(scope: &mut FnScope, idx: &str, len: &str, chunk_limit: &str, progressive: bool) {
    if progressive {
        scope
            .body
            .line(format!("h.merkleize_progressive_with_mixin({idx}, {len});"));
    } else {
        scope
            .body
            .line(format!("h.merkleize_with_mixin({idx}, {len}, {chunk_limit});"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::TypePrinter;
    use dynssz_descriptor::TypeRef;

    fn emit(d: &TypeDescriptor, dynamic: bool) -> EmittedBody {
        let mut printer = TypePrinter::new("types");
        let mut env = EmitEnv::new(&mut printer, dynamic, false);
        emit_hash_body(&mut env, d).unwrap()
    }

    fn container(name: &'static str, fields: Vec<(&'static str, TypeDescriptor)>) -> TypeDescriptor {
        TypeDescriptor::container(TypeRef::new("types", name), fields)
    }

    #[test]
    fn test_only_named_roots_are_accepted() {
        let mut printer = TypePrinter::new("types");
        let mut env = EmitEnv::new(&mut printer, false, false);
        let err = emit_hash_body(&mut env, &TypeDescriptor::uint64()).unwrap_err();
        assert!(matches!(err, EmitError::UnknownKind(_)));
    }

    #[test]
    fn test_container_merkleizes_field_roots() {
        let d = container(
            "Checkpoint",
            vec![
                ("epoch", TypeDescriptor::uint64()),
                ("root", TypeDescriptor::byte_vector(32)),
            ],
        );
        let body = emit(&d, false);
        assert!(body.code.contains("let mut h = dynssz_rt::Hasher::new();"));
        assert!(body.code.contains("let idx0 = h.index();"));
        assert!(body.code.contains("h.put_u64(self.epoch);"));
        assert!(body.code.contains("h.merkleize(idx0);"));
        assert!(body.code.contains("Ok(h.finalize_root())"));
    }

    #[test]
    fn test_byte_vector_hash_truncates_and_pads() {
        // 48 bytes spans two chunks; the hasher sees exactly the resolved
        // width regardless of the host length.
        let d = container("Root", vec![("root", TypeDescriptor::byte_vector(48))]);
        let body = emit(&d, false);
        assert!(body.code.contains("let len1: usize = 48usize;"));
        assert!(body.code.contains("h.put_padded_bytes(&self.root, len1);"));
        assert!(body.code.contains("h.merkleize(idx1);"));
    }

    #[test]
    fn test_bitvector_hash_pads_to_byte_width() {
        let d = container("Committee", vec![("bits", TypeDescriptor::bitvector(10))]);
        let body = emit(&d, false);
        assert!(body.code.contains("let bits1: usize = 10usize;"));
        assert!(body
            .code
            .contains("h.put_padded_bytes(&self.bits, (bits1 + 7usize) / 8usize);"));
        assert!(body.code.contains("h.merkleize(idx1);"));
    }

    #[test]
    fn test_bitlist_hash_packs_bits_under_the_limit() {
        let d = container("Flags", vec![("bits", TypeDescriptor::bitlist(64))]);
        let body = emit(&d, false);
        assert!(body.code.contains("let max1: usize = 64usize;"));
        assert!(body.code.contains("h.put_bitlist(&self.bits, max1)?;"));
    }

    #[test]
    fn test_progressive_bitlist_uses_progressive_packing() {
        let d = container(
            "Flags",
            vec![("bits", TypeDescriptor::progressive_bitlist(64))],
        );
        let body = emit(&d, false);
        assert!(body.code.contains("h.put_bitlist_progressive(&self.bits, max1)?;"));
    }

    #[test]
    fn test_string_list_hash_mixes_byte_length() {
        let d = container("Meta", vec![("name", TypeDescriptor::string(64))]);
        let body = emit(&d, false);
        assert!(body.code.contains("h.append_bytes(self.name.as_bytes());"));
        assert!(body.code.contains("h.fill_chunk();"));
        assert!(body.code.contains(
            "h.merkleize_with_mixin(idx1, self.name.len() as u64, ((max1 + 31usize) / 32usize) as u64);"
        ));
    }

    #[test]
    fn test_union_mixes_in_the_selector() {
        let d = container(
            "Payload",
            vec![(
                "u",
                TypeDescriptor::union_of(vec![
                    (0, TypeDescriptor::uint8()),
                    (1, TypeDescriptor::uint32()),
                ]),
            )],
        );
        let body = emit(&d, false);
        assert!(body.code.contains("let idx1 = h.index();"));
        assert!(body.code.contains("match self.u.selector {"));
        assert!(body
            .code
            .contains("let v1 = match self.u.value.downcast_ref::<u8>() {"));
        assert!(body.code.contains("h.put_u32(*v1);"));
        assert!(body.code.contains("h.mix_in_selector(idx1, self.u.selector);"));
        assert!(body
            .code
            .contains("_ => return Err(dynssz_rt::SszError::invalid_union_variant()),"));
    }

    #[test]
    fn test_wide_integers_pack_in_collections() {
        let d = container(
            "Balances",
            vec![("xs", TypeDescriptor::vector_of(TypeDescriptor::uint128(), 4))],
        );
        let body = emit(&d, false);
        assert!(body.code.contains("h.append_bytes(item1);"));
        assert!(body.code.contains("h.append_bytes(&[0u8; 16]);"));
        assert!(body.code.contains("h.fill_chunk();"));
    }

    #[test]
    fn test_delegated_roots_become_leaf_chunks() {
        let inner = container("Inner", vec![("v", TypeDescriptor::uint64())]).with_fast_path();
        let d = container("Outer", vec![("inner", inner)]);
        let body = emit(&d, false);
        assert!(body.code.contains("let root1 = self.inner.ssz_hash_root()?;"));
        assert!(body.code.contains("h.put_bytes(&root1);"));
    }

    #[test]
    fn test_custom_root_is_not_implemented() {
        let body = emit(&TypeDescriptor::custom(TypeRef::new("types", "Opaque")), false);
        assert!(body.code.contains("Err(dynssz_rt::SszError::not_implemented())"));
    }
}

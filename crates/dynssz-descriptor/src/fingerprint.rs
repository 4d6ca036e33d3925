//! Structural shape fingerprints.
//!
//! The function-cache layer shares emitted helper functions between
//! descriptors of the same shape. Two descriptors are shape-equivalent when
//! their kinds, sizes, limits, dynamic expressions, flags, child shapes,
//! union variants, and container field shapes all match. Named types
//! (containers, wrappers, customs) additionally fold in their type reference:
//! emitted helpers are typed against the concrete host type, so distinct host
//! types never unify even when their field shapes do.

use std::hash::Hasher;

use fnv::FnvHasher;

use crate::descriptor::TypeDescriptor;

/// Compute the shape fingerprint of a descriptor subtree.
pub fn shape_fingerprint(d: &TypeDescriptor) -> u64 {
    let mut hasher = FnvHasher::default();
    hash_descriptor(d, &mut hasher);
    hasher.finish()
}

fn hash_descriptor(d: &TypeDescriptor, h: &mut FnvHasher) {
    h.write_u8(d.kind as u8);
    h.write_u64(d.size);
    h.write_u64(d.bit_size);
    h.write_u64(d.len);
    h.write_u64(d.limit);
    hash_opt_str(d.size_expr.as_deref(), h);
    hash_opt_str(d.max_expr.as_deref(), h);
    h.write_u8(flag_bits(d));
    if let Some(r) = &d.type_ref {
        h.write(r.package.as_bytes());
        h.write_u8(0xfe);
        h.write(r.name.as_bytes());
    }
    h.write_u8(0xff);
    if let Some(elem) = d.elem() {
        hash_descriptor(elem, h);
    }
    for field in &d.fields {
        h.write(field.name.as_bytes());
        h.write_u64(field.ssz_index);
        hash_descriptor(&field.elem, h);
    }
    for variant in &d.variants {
        h.write_u8(variant.tag);
        hash_descriptor(&variant.elem, h);
    }
}

fn hash_opt_str(s: Option<&str>, h: &mut FnvHasher) {
    match s {
        Some(s) => {
            h.write_u8(1);
            h.write(s.as_bytes());
        }
        None => h.write_u8(0),
    }
}

fn flag_bits(d: &TypeDescriptor) -> u8 {
    let f = d.flags;
    u8::from(f.is_pointer)
        | u8::from(f.is_byte_array) << 1
        | u8::from(f.is_string) << 2
        | u8::from(f.is_time) << 3
        | u8::from(f.has_fast_path) << 4
        | u8::from(f.has_dynamic_method) << 5
        | u8::from(f.has_dynamic_size_expr) << 6
        | u8::from(f.is_ssz_dynamic) << 7
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{TypeDescriptor, TypeRef};

    #[test]
    fn test_equal_shapes_share_a_fingerprint() {
        let a = TypeDescriptor::list_of(TypeDescriptor::uint16(), 4);
        let b = TypeDescriptor::list_of(TypeDescriptor::uint16(), 4);
        assert_eq!(shape_fingerprint(&a), shape_fingerprint(&b));
    }

    #[test]
    fn test_limit_changes_the_fingerprint() {
        let a = TypeDescriptor::list_of(TypeDescriptor::uint16(), 4);
        let b = TypeDescriptor::list_of(TypeDescriptor::uint16(), 8);
        assert_ne!(shape_fingerprint(&a), shape_fingerprint(&b));
    }

    #[test]
    fn test_expression_changes_the_fingerprint() {
        let a = TypeDescriptor::list_of(TypeDescriptor::uint16(), 4);
        let b = TypeDescriptor::list_expr(TypeDescriptor::uint16(), "MAX", 4);
        assert_ne!(shape_fingerprint(&a), shape_fingerprint(&b));
    }

    #[test]
    fn test_element_kind_changes_the_fingerprint() {
        let a = TypeDescriptor::list_of(TypeDescriptor::uint16(), 4);
        let b = TypeDescriptor::list_of(TypeDescriptor::uint32(), 4);
        assert_ne!(shape_fingerprint(&a), shape_fingerprint(&b));
    }

    #[test]
    fn test_named_types_never_unify() {
        let fields = |name: &'static str| {
            TypeDescriptor::container(TypeRef::new("types", name), vec![("a", TypeDescriptor::uint64())])
        };
        let a = fields("Foo");
        let b = fields("Bar");
        assert_ne!(shape_fingerprint(&a), shape_fingerprint(&b));
    }

    #[test]
    fn test_flags_participate() {
        let a = TypeDescriptor::byte_list(32);
        let b = TypeDescriptor::string(32);
        assert_ne!(shape_fingerprint(&a), shape_fingerprint(&b));
    }

    mod props {
        use proptest::prelude::*;

        use super::super::shape_fingerprint;
        use crate::descriptor::{TypeDescriptor, TypeRef};

        fn leaf() -> impl Strategy<Value = TypeDescriptor> {
            prop_oneof![
                Just(TypeDescriptor::bool_()),
                Just(TypeDescriptor::uint8()),
                Just(TypeDescriptor::uint32()),
                Just(TypeDescriptor::uint64()),
                Just(TypeDescriptor::uint256()),
                (1u64..64).prop_map(TypeDescriptor::byte_vector),
                (1u64..256).prop_map(TypeDescriptor::bitvector),
                (1u64..64).prop_map(TypeDescriptor::byte_list),
                (1u64..256).prop_map(TypeDescriptor::bitlist),
            ]
        }

        fn arb_descriptor() -> impl Strategy<Value = TypeDescriptor> {
            leaf().prop_recursive(3, 16, 3, |inner| {
                prop_oneof![
                    (inner.clone(), 1u64..8)
                        .prop_map(|(e, n)| TypeDescriptor::vector_of(e, n)),
                    (inner.clone(), 1u64..8).prop_map(|(e, n)| TypeDescriptor::list_of(e, n)),
                    inner.prop_map(|e| {
                        TypeDescriptor::container(TypeRef::new("types", "Node"), vec![("f0", e)])
                    }),
                ]
            })
        }

        proptest! {
            // The fingerprint is a pure function of the descriptor data:
            // a structurally identical rebuild always collides.
            #[test]
            fn prop_fingerprint_depends_only_on_shape(d in arb_descriptor()) {
                let json = serde_json::to_string(&d).unwrap();
                let rebuilt: TypeDescriptor = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(shape_fingerprint(&d), shape_fingerprint(&rebuilt));
            }

            #[test]
            fn prop_bound_perturbation_changes_the_fingerprint(d in arb_descriptor()) {
                let mut bumped = d.clone();
                if bumped.len > 0 {
                    bumped.len += 1;
                } else if bumped.limit > 0 {
                    bumped.limit += 1;
                } else {
                    bumped.size += 1;
                }
                prop_assert_ne!(shape_fingerprint(&d), shape_fingerprint(&bumped));
            }

            #[test]
            fn prop_pointer_flag_changes_the_fingerprint(d in arb_descriptor()) {
                let pointered = d.clone().pointer();
                prop_assert_ne!(shape_fingerprint(&d), shape_fingerprint(&pointered));
            }
        }
    }
}

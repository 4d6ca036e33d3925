//! Descriptor tree: the typed data the emission engine walks.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::OFFSET_BYTES;

/// SSZ shape classification of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uint128,
    Uint256,
    Vector,
    Bitvector,
    List,
    Bitlist,
    ProgressiveList,
    ProgressiveBitlist,
    Container,
    ProgressiveContainer,
    Union,
    Wrapper,
    Custom,
}

impl TypeKind {
    /// Width in bytes for the little-endian scalar kinds, `None` otherwise.
    ///
    /// `Uint128`/`Uint256` are not scalars on the host side (they are byte
    /// blobs) and report their width through [`TypeKind::blob_size`].
    pub fn scalar_size(self) -> Option<u64> {
        match self {
            TypeKind::Bool | TypeKind::Uint8 => Some(1),
            TypeKind::Uint16 => Some(2),
            TypeKind::Uint32 => Some(4),
            TypeKind::Uint64 => Some(8),
            _ => None,
        }
    }

    /// Width in bytes for the wide-integer blob kinds.
    pub fn blob_size(self) -> Option<u64> {
        match self {
            TypeKind::Uint128 => Some(16),
            TypeKind::Uint256 => Some(32),
            _ => None,
        }
    }

    /// True for kinds whose encoded form is a bare little-endian primitive.
    pub fn is_primitive(self) -> bool {
        self.scalar_size().is_some() || self.blob_size().is_some()
    }

    /// True for the list-like kinds (length derived from the byte count).
    pub fn is_list_like(self) -> bool {
        matches!(
            self,
            TypeKind::List | TypeKind::Bitlist | TypeKind::ProgressiveList | TypeKind::ProgressiveBitlist
        )
    }

    /// True for the bit-packed kinds.
    pub fn is_bit_packed(self) -> bool {
        matches!(
            self,
            TypeKind::Bitvector | TypeKind::Bitlist | TypeKind::ProgressiveBitlist
        )
    }
}

/// Capability and representation flags carried by a descriptor.
///
/// The `has_*` flags describe methods implemented outside the generated code;
/// the emitters turn them into an ordered delegation decision. The `is_*`
/// flags describe the host-side representation of the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeFlags {
    /// Host value is an indirection; emitted code null-checks and allocates.
    pub is_pointer: bool,
    /// Element kind is byte and the container is byte-addressable.
    pub is_byte_array: bool,
    /// Host string type (read-only byte sequence).
    pub is_string: bool,
    /// `Uint64` storing a wall-clock instant, converted to/from unix seconds.
    pub is_time: bool,
    /// Externally implemented static fast-path methods exist on the type.
    pub has_fast_path: bool,
    /// Externally implemented dynamic-spec-aware methods exist on the type.
    pub has_dynamic_method: bool,
    /// The descriptor or a descendant references a spec expression that
    /// affects its encoded size.
    pub has_dynamic_size_expr: bool,
    /// SSZ-variable-width: needs an offset slot in its enclosing container.
    pub is_ssz_dynamic: bool,
}

/// Qualified reference to a named host type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeRef {
    pub package: String,
    pub name: String,
}

impl TypeRef {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            name: name.into(),
        }
    }
}

/// One container field: declaration name, logical SSZ index, element shape.
///
/// `ssz_index` is meaningful only for progressive containers, where indices
/// may be sparse; plain containers number fields densely in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerField {
    pub name: String,
    pub ssz_index: u64,
    pub elem: Box<TypeDescriptor>,
}

/// One union variant keyed by its discriminator tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionVariant {
    pub tag: u8,
    pub elem: Box<TypeDescriptor>,
}

/// The central descriptor node.
///
/// `size` is the static byte size computed from the declared fallbacks
/// (`len`, `limit` play no part in it for list-like kinds, which are always
/// variable-width and report 0). For expression-parameterized fixed-width
/// shapes, `size` is the fallback-based size and `has_dynamic_size_expr` is
/// set; the static-size variable generator recomputes the runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub kind: TypeKind,
    /// Fixed byte size if SSZ-fixed-width (computed from fallbacks), else 0.
    pub size: u64,
    /// Valid bit count for bitvector/bitlist kinds.
    pub bit_size: u64,
    /// Static element count for Vector/Bitvector (fallback when an
    /// expression applies).
    pub len: u64,
    /// Static element bound for List/Bitlist (fallback when an expression
    /// applies).
    pub limit: u64,
    /// Spec expression overriding `len` at runtime.
    pub size_expr: Option<String>,
    /// Spec expression overriding `limit` at runtime.
    pub max_expr: Option<String>,
    /// Element type for collections and wrappers.
    pub elem: Option<Box<TypeDescriptor>>,
    /// Ordered field list for container kinds.
    pub fields: SmallVec<[ContainerField; 8]>,
    /// Variant list for unions, kept sorted by tag.
    pub variants: Vec<UnionVariant>,
    /// Host type reference for named types (containers, wrappers, customs).
    pub type_ref: Option<TypeRef>,
    pub flags: TypeFlags,
}

/// Invariant violations detected by [`TypeDescriptor::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("{0:?} requires an element descriptor")]
    MissingElement(TypeKind),
    #[error("vector requires a static length or a size expression")]
    UnsizedVector,
    #[error("bitvector requires a static bit length or a size expression")]
    UnsizedBitvector,
    #[error("list requires a static limit or a max expression")]
    UnboundedList,
    #[error("bitlist requires a static bit limit or a max expression")]
    UnboundedBitlist,
    #[error("container {0:?} declares no fields")]
    EmptyContainer(Option<TypeRef>),
    #[error("progressive container indices must be strictly increasing (field `{0}`)")]
    UnorderedIndices(String),
    #[error("union declares no variants")]
    EmptyUnion,
    #[error("union tags must be strictly increasing (tag {0})")]
    UnorderedVariants(u8),
    #[error("named kind {0:?} is missing its type reference")]
    MissingTypeRef(TypeKind),
    #[error("descriptor with a dynamic size expression cannot claim a fast path")]
    FastPathWithDynamicExpr,
    #[error("{0:?} does not take fields")]
    UnexpectedFields(TypeKind),
}

impl TypeDescriptor {
    fn leaf(kind: TypeKind, size: u64) -> Self {
        Self {
            kind,
            size,
            bit_size: 0,
            len: 0,
            limit: 0,
            size_expr: None,
            max_expr: None,
            elem: None,
            fields: SmallVec::new(),
            variants: Vec::new(),
            type_ref: None,
            flags: TypeFlags::default(),
        }
    }

    pub fn bool_() -> Self {
        Self::leaf(TypeKind::Bool, 1)
    }

    pub fn uint8() -> Self {
        Self::leaf(TypeKind::Uint8, 1)
    }

    pub fn uint16() -> Self {
        Self::leaf(TypeKind::Uint16, 2)
    }

    pub fn uint32() -> Self {
        Self::leaf(TypeKind::Uint32, 4)
    }

    pub fn uint64() -> Self {
        Self::leaf(TypeKind::Uint64, 8)
    }

    /// A `Uint64` holding a wall-clock instant.
    pub fn uint64_time() -> Self {
        let mut d = Self::leaf(TypeKind::Uint64, 8);
        d.flags.is_time = true;
        d
    }

    pub fn uint128() -> Self {
        Self::leaf(TypeKind::Uint128, 16)
    }

    pub fn uint256() -> Self {
        Self::leaf(TypeKind::Uint256, 32)
    }

    /// Fixed-length vector of `len` elements.
    pub fn vector_of(elem: TypeDescriptor, len: u64) -> Self {
        let mut d = Self::leaf(TypeKind::Vector, 0);
        d.len = len;
        d.flags.is_ssz_dynamic = elem.flags.is_ssz_dynamic;
        d.flags.has_dynamic_size_expr = elem.flags.has_dynamic_size_expr;
        d.size = if d.flags.is_ssz_dynamic { 0 } else { len * elem.size };
        d.elem = Some(Box::new(elem));
        d
    }

    /// Vector whose length is a spec expression with `fallback` as default.
    pub fn vector_expr(elem: TypeDescriptor, expr: impl Into<String>, fallback: u64) -> Self {
        let mut d = Self::vector_of(elem, fallback);
        d.size_expr = Some(expr.into());
        d.flags.has_dynamic_size_expr = true;
        d
    }

    /// Byte vector fast path (`[u8; len]`-shaped host values).
    pub fn byte_vector(len: u64) -> Self {
        let mut d = Self::vector_of(Self::uint8(), len);
        d.flags.is_byte_array = true;
        d
    }

    /// Bitvector of `bits` valid bits, byte-backed on the host side.
    pub fn bitvector(bits: u64) -> Self {
        let mut d = Self::leaf(TypeKind::Bitvector, bits.div_ceil(8));
        d.bit_size = bits;
        d.len = bits;
        d.flags.is_byte_array = true;
        d
    }

    /// Bitvector whose bit length is a spec expression.
    pub fn bitvector_expr(expr: impl Into<String>, fallback_bits: u64) -> Self {
        let mut d = Self::bitvector(fallback_bits);
        d.size_expr = Some(expr.into());
        d.flags.has_dynamic_size_expr = true;
        d
    }

    /// List bounded by `limit` elements.
    pub fn list_of(elem: TypeDescriptor, limit: u64) -> Self {
        let mut d = Self::leaf(TypeKind::List, 0);
        d.limit = limit;
        d.flags.is_ssz_dynamic = true;
        d.flags.has_dynamic_size_expr = elem.flags.has_dynamic_size_expr;
        d.elem = Some(Box::new(elem));
        d
    }

    /// List whose limit is a spec expression with `fallback` as default.
    pub fn list_expr(elem: TypeDescriptor, expr: impl Into<String>, fallback: u64) -> Self {
        let mut d = Self::list_of(elem, fallback);
        d.max_expr = Some(expr.into());
        d
    }

    /// Byte list fast path.
    pub fn byte_list(limit: u64) -> Self {
        let mut d = Self::list_of(Self::uint8(), limit);
        d.flags.is_byte_array = true;
        d
    }

    /// Host string type: a byte list with read-only string semantics.
    pub fn string(limit: u64) -> Self {
        let mut d = Self::byte_list(limit);
        d.flags.is_string = true;
        d
    }

    /// Bitlist bounded by `max_bits` data bits.
    pub fn bitlist(max_bits: u64) -> Self {
        let mut d = Self::leaf(TypeKind::Bitlist, 0);
        d.bit_size = max_bits;
        d.limit = max_bits;
        d.flags.is_byte_array = true;
        d.flags.is_ssz_dynamic = true;
        d
    }

    /// Progressive list (sparse logical indices, progressive Merkleization).
    pub fn progressive_list_of(elem: TypeDescriptor, limit: u64) -> Self {
        let mut d = Self::list_of(elem, limit);
        d.kind = TypeKind::ProgressiveList;
        d
    }

    /// Progressive bitlist.
    pub fn progressive_bitlist(max_bits: u64) -> Self {
        let mut d = Self::bitlist(max_bits);
        d.kind = TypeKind::ProgressiveBitlist;
        d
    }

    /// Container with densely numbered fields in declaration order.
    pub fn container(
        type_ref: TypeRef,
        fields: impl IntoIterator<Item = (&'static str, TypeDescriptor)>,
    ) -> Self {
        let fields: SmallVec<[ContainerField; 8]> = fields
            .into_iter()
            .enumerate()
            .map(|(i, (name, elem))| ContainerField {
                name: name.to_string(),
                ssz_index: i as u64,
                elem: Box::new(elem),
            })
            .collect();
        Self::container_from_fields(TypeKind::Container, type_ref, fields)
    }

    /// Progressive container with caller-declared sparse indices.
    pub fn progressive_container(
        type_ref: TypeRef,
        fields: impl IntoIterator<Item = (&'static str, u64, TypeDescriptor)>,
    ) -> Self {
        let fields: SmallVec<[ContainerField; 8]> = fields
            .into_iter()
            .map(|(name, ssz_index, elem)| ContainerField {
                name: name.to_string(),
                ssz_index,
                elem: Box::new(elem),
            })
            .collect();
        Self::container_from_fields(TypeKind::ProgressiveContainer, type_ref, fields)
    }

    fn container_from_fields(
        kind: TypeKind,
        type_ref: TypeRef,
        fields: SmallVec<[ContainerField; 8]>,
    ) -> Self {
        let mut d = Self::leaf(kind, 0);
        d.flags.is_ssz_dynamic = fields.iter().any(|f| f.elem.flags.is_ssz_dynamic);
        d.flags.has_dynamic_size_expr = fields.iter().any(|f| f.elem.flags.has_dynamic_size_expr);
        d.size = if d.flags.is_ssz_dynamic {
            0
        } else {
            fields.iter().map(|f| f.elem.size).sum()
        };
        d.fields = fields;
        d.type_ref = Some(type_ref);
        d
    }

    /// Union over `variants`, sorted by tag on construction.
    pub fn union_of(variants: impl IntoIterator<Item = (u8, TypeDescriptor)>) -> Self {
        let mut variants: Vec<UnionVariant> = variants
            .into_iter()
            .map(|(tag, elem)| UnionVariant {
                tag,
                elem: Box::new(elem),
            })
            .collect();
        variants.sort_by_key(|v| v.tag);
        let mut d = Self::leaf(TypeKind::Union, 0);
        d.flags.is_ssz_dynamic = true;
        d.flags.has_dynamic_size_expr =
            variants.iter().any(|v| v.elem.flags.has_dynamic_size_expr);
        d.variants = variants;
        d
    }

    /// Newtype wrapper forwarding to `elem` through the host `.0` field.
    pub fn wrapper(type_ref: TypeRef, elem: TypeDescriptor) -> Self {
        let mut d = Self::leaf(TypeKind::Wrapper, elem.size);
        d.flags.is_ssz_dynamic = elem.flags.is_ssz_dynamic;
        d.flags.has_dynamic_size_expr = elem.flags.has_dynamic_size_expr;
        d.elem = Some(Box::new(elem));
        d.type_ref = Some(type_ref);
        d
    }

    /// Opaque host type the generator cannot emit bodies for.
    pub fn custom(type_ref: TypeRef) -> Self {
        let mut d = Self::leaf(TypeKind::Custom, 0);
        d.type_ref = Some(type_ref);
        d
    }

    /// Mark the host representation as an indirection.
    pub fn pointer(mut self) -> Self {
        self.flags.is_pointer = true;
        self
    }

    /// Declare externally implemented static fast-path methods.
    pub fn with_fast_path(mut self) -> Self {
        self.flags.has_fast_path = true;
        self
    }

    /// Declare externally implemented dynamic-spec-aware methods.
    pub fn with_dynamic_method(mut self) -> Self {
        self.flags.has_dynamic_method = true;
        self
    }

    /// Element descriptor, for kinds that carry one.
    pub fn elem(&self) -> Option<&TypeDescriptor> {
        self.elem.as_deref()
    }

    /// True when no spec expression anywhere in the subtree affects size.
    pub fn is_statically_sized(&self) -> bool {
        !self.flags.is_ssz_dynamic && !self.flags.has_dynamic_size_expr
    }

    /// Static byte size of the fixed portion a container contributes per
    /// field: the field's own size for fixed fields, one offset slot for
    /// variable-width fields.
    pub fn static_field_size(&self) -> u64 {
        if self.flags.is_ssz_dynamic {
            OFFSET_BYTES
        } else {
            self.size
        }
    }

    /// Check the descriptor contract. Called once after parsing; the
    /// emission engine assumes it holds.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        match self.kind {
            TypeKind::Vector => {
                if self.elem.is_none() {
                    return Err(DescriptorError::MissingElement(self.kind));
                }
                if self.len == 0 && self.size_expr.is_none() {
                    return Err(DescriptorError::UnsizedVector);
                }
            }
            TypeKind::Bitvector => {
                if self.bit_size == 0 && self.size_expr.is_none() {
                    return Err(DescriptorError::UnsizedBitvector);
                }
            }
            TypeKind::List | TypeKind::ProgressiveList => {
                if self.elem.is_none() {
                    return Err(DescriptorError::MissingElement(self.kind));
                }
                if self.limit == 0 && self.max_expr.is_none() {
                    return Err(DescriptorError::UnboundedList);
                }
            }
            TypeKind::Bitlist | TypeKind::ProgressiveBitlist => {
                if self.limit == 0 && self.max_expr.is_none() {
                    return Err(DescriptorError::UnboundedBitlist);
                }
            }
            TypeKind::Container | TypeKind::ProgressiveContainer => {
                if self.type_ref.is_none() {
                    return Err(DescriptorError::MissingTypeRef(self.kind));
                }
                if self.fields.is_empty() {
                    return Err(DescriptorError::EmptyContainer(self.type_ref.clone()));
                }
                if self.kind == TypeKind::ProgressiveContainer {
                    for pair in self.fields.windows(2) {
                        if pair[1].ssz_index <= pair[0].ssz_index {
                            return Err(DescriptorError::UnorderedIndices(pair[1].name.clone()));
                        }
                    }
                }
            }
            TypeKind::Union => {
                if self.variants.is_empty() {
                    return Err(DescriptorError::EmptyUnion);
                }
                for pair in self.variants.windows(2) {
                    if pair[1].tag <= pair[0].tag {
                        return Err(DescriptorError::UnorderedVariants(pair[1].tag));
                    }
                }
            }
            TypeKind::Wrapper => {
                if self.elem.is_none() {
                    return Err(DescriptorError::MissingElement(self.kind));
                }
                if self.type_ref.is_none() {
                    return Err(DescriptorError::MissingTypeRef(self.kind));
                }
            }
            TypeKind::Custom => {
                if self.type_ref.is_none() {
                    return Err(DescriptorError::MissingTypeRef(self.kind));
                }
            }
            _ => {
                if !self.fields.is_empty() {
                    return Err(DescriptorError::UnexpectedFields(self.kind));
                }
            }
        }

        // A fast path assumes static sizes; a subtree touching spec
        // expressions disqualifies it.
        if self.flags.has_fast_path && self.flags.has_dynamic_size_expr {
            return Err(DescriptorError::FastPathWithDynamicExpr);
        }

        if let Some(elem) = self.elem() {
            elem.validate()?;
        }
        for field in &self.fields {
            field.elem.validate()?;
        }
        for variant in &self.variants {
            variant.elem.validate()?;
        }
        Ok(())
    }
}

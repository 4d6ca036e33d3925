//! # dynssz-descriptor - SSZ type descriptors
//!
//! The descriptor model consumed by the dynssz emission engine. A
//! [`TypeDescriptor`] captures the SSZ shape of one host type: primitive
//! widths, collection lengths and limits, dynamic spec expressions, container
//! fields, union variants, and the capability flags that drive external-method
//! delegation.
//!
//! Descriptors are produced by an external type parser, validated once with
//! [`TypeDescriptor::validate`], and treated as immutable by everything
//! downstream. The emission engine only ever reads them.
//!
//! ## Example
//!
//! ```rust
//! use dynssz_descriptor::{TypeDescriptor, TypeRef};
//!
//! let desc = TypeDescriptor::container(
//!     TypeRef::new("types", "Checkpoint"),
//!     vec![
//!         ("epoch", TypeDescriptor::uint64()),
//!         ("root", TypeDescriptor::byte_vector(32)),
//!     ],
//! );
//! assert!(desc.validate().is_ok());
//! assert_eq!(desc.size, 40);
//! ```

pub mod descriptor;
pub mod fingerprint;

pub use descriptor::{
    ContainerField, DescriptorError, TypeDescriptor, TypeFlags, TypeKind, TypeRef, UnionVariant,
};
pub use fingerprint::shape_fingerprint;

/// Number of bytes in one SSZ offset slot.
pub const OFFSET_BYTES: u64 = 4;

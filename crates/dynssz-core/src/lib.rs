//! # dynssz-core - SSZ code-generation engine
//!
//! Core emission engine for the dynssz code generator: given immutable type
//! descriptors (see `dynssz-descriptor`), it emits Rust methods implementing
//! the SSZ wire format (serialization, deserialization, size computation,
//! and Merkle hash-tree-root), including dynamic size/limit expressions
//! resolved at runtime against a spec dictionary.
//!
//! ## Overview
//!
//! The engine is a family of type-directed, mutually recursive walkers over
//! the descriptor tree. Emitted code references an external runtime support
//! crate (`dynssz_rt`) by name: byte encoders, a limit-tracking decoder, an
//! offset-slice pool, a chunk hasher, and the error sentinels. The engine
//! itself performs no I/O and never executes the code it emits; host types
//! are assumed to implement `Default` and `Clone`.
//!
//! ## Architecture
//!
//! 1. **Descriptors** (`dynssz-descriptor`): the input model.
//! 2. **Variable generators** ([`specvar`], [`sizevar`]): deduplicated
//!    header blocks for spec lookups and static sizes.
//! 3. **Operation emitters** (`emit`): serialize, deserialize, size,
//!    hash-tree-root walkers sharing helper functions through a
//!    fingerprint-keyed cache ([`funcache`]).
//! 4. **Assembly**: signature matrix (static / dynamic / legacy variants)
//!    and final file composition with import tracking ([`names`]).
//!
//! ## Example
//!
//! ```rust
//! use dynssz_core::{FileRequest, SszGenPipeline, TypeRequest};
//! use dynssz_descriptor::{TypeDescriptor, TypeRef};
//!
//! let descriptor = TypeDescriptor::container(
//!     TypeRef::new("types", "Checkpoint"),
//!     vec![
//!         ("epoch", TypeDescriptor::uint64()),
//!         ("root", TypeDescriptor::byte_vector(32)),
//!     ],
//! );
//! let request = FileRequest {
//!     package: "types".to_string(),
//!     types: vec![TypeRequest {
//!         descriptor,
//!         options: Default::default(),
//!     }],
//! };
//!
//! let pipeline = SszGenPipeline::new();
//! let code = pipeline.emit_file(&request).unwrap();
//! assert!(code.contains("impl Checkpoint {"));
//! assert!(code.contains("pub fn ssz_append"));
//! ```

mod assembler;
pub mod builder;
pub mod delegate;
mod emit;
pub mod error;
pub mod funcache;
pub mod names;
pub mod sizevar;
pub mod specvar;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use dynssz_descriptor::TypeDescriptor;

pub use error::{EmitError, EmitResult};

/// Per-type generation flags carried by a [`TypeRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeGenOptions {
    pub omit_serialize: bool,
    pub omit_deserialize: bool,
    pub omit_size: bool,
    pub omit_hash: bool,
    /// Also emit parameterless `*_legacy` shims delegating to the
    /// process-wide default spec dictionary.
    pub emit_legacy_shim: bool,
    /// Force the static variants only: spec expressions fall back to their
    /// declared static values and no dictionary parameter is emitted.
    pub without_dynamic_expressions: bool,
    /// Never reference externally implemented fast-path methods.
    pub no_fast_path: bool,
}

/// One top-level type to generate methods for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRequest {
    pub descriptor: TypeDescriptor,
    pub options: TypeGenOptions,
}

impl TypeRequest {
    pub fn new(descriptor: TypeDescriptor) -> Self {
        Self {
            descriptor,
            options: TypeGenOptions::default(),
        }
    }
}

/// A file-emission request: one target package, an ordered set of types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRequest {
    pub package: String,
    pub types: Vec<TypeRequest>,
}

/// The emission pipeline. Holds file-level defaults that are folded into
/// each type's options; all real state is per emission, so one pipeline may
/// serve concurrent file tasks over disjoint requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SszGenPipeline {
    legacy_shims: bool,
    without_dynamic_expressions: bool,
    no_fast_path: bool,
}

impl SszGenPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `*_legacy` shims for every type in every request.
    pub fn with_legacy_shims(mut self) -> Self {
        self.legacy_shims = true;
        self
    }

    /// Generate static variants only, for all types.
    pub fn without_dynamic_expressions(mut self) -> Self {
        self.without_dynamic_expressions = true;
        self
    }

    /// Ignore fast-path capability flags, for all types.
    pub fn without_fast_paths(mut self) -> Self {
        self.no_fast_path = true;
        self
    }

    /// Emit the complete source text for one file request.
    ///
    /// The request either produces a whole artifact or fails; there is no
    /// partial output and nothing is retried.
    pub fn emit_file(&self, request: &FileRequest) -> anyhow::Result<String> {
        Ok(self.emit_file_inner(request)?)
    }

    fn emit_file_inner(&self, request: &FileRequest) -> EmitResult<String> {
        debug!(
            package = %request.package,
            types = request.types.len(),
            "emitting ssz file"
        );

        for t in &request.types {
            t.descriptor.validate()?;
            if let Some(r) = &t.descriptor.type_ref {
                if !r.package.is_empty() && r.package != request.package {
                    return Err(EmitError::MixedPackages {
                        first: request.package.clone(),
                        second: r.package.clone(),
                    });
                }
            }
        }

        let mut printer = names::TypePrinter::new(&request.package);
        let mut blocks = Vec::new();
        for t in &request.types {
            let name = t
                .descriptor
                .type_ref
                .as_ref()
                .map(|r| r.name.as_str())
                .unwrap_or("<unnamed>");
            trace!(%name, "emitting type");
            let options = self.effective_options(&t.options);
            blocks.push(assembler::emit_type_impl(&mut printer, &t.descriptor, &options)?);
        }
        Ok(assembler::assemble_file(&request.package, &printer, &blocks))
    }

    fn effective_options(&self, per_type: &TypeGenOptions) -> TypeGenOptions {
        let mut options = per_type.clone();
        options.emit_legacy_shim |= self.legacy_shims;
        options.without_dynamic_expressions |= self.without_dynamic_expressions;
        options.no_fast_path |= self.no_fast_path;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynssz_descriptor::TypeRef;

    fn checkpoint() -> TypeDescriptor {
        TypeDescriptor::container(
            TypeRef::new("types", "Checkpoint"),
            vec![
                ("epoch", TypeDescriptor::uint64()),
                ("root", TypeDescriptor::byte_vector(32)),
            ],
        )
    }

    fn request(descriptor: TypeDescriptor) -> FileRequest {
        FileRequest {
            package: "types".to_string(),
            types: vec![TypeRequest::new(descriptor)],
        }
    }

    #[test]
    fn test_emit_file_produces_all_four_operations() {
        let code = SszGenPipeline::new().emit_file(&request(checkpoint())).unwrap();
        assert!(code.contains("pub fn ssz_append(&self, buf: &mut Vec<u8>)"));
        assert!(code.contains("pub fn ssz_write(&self, w: &mut dyn dynssz_rt::SszWriter)"));
        assert!(code.contains("pub fn ssz_read(&mut self, dec: &mut dynssz_rt::Decoder<'_>)"));
        assert!(code.contains("pub fn ssz_size(&self)"));
        assert!(code.contains("pub fn ssz_hash_root(&self)"));
    }

    #[test]
    fn test_omit_flags_drop_operations() {
        let mut req = request(checkpoint());
        req.types[0].options.omit_hash = true;
        req.types[0].options.omit_serialize = true;
        let code = SszGenPipeline::new().emit_file(&req).unwrap();
        assert!(!code.contains("ssz_hash_root"));
        assert!(!code.contains("ssz_append"));
        assert!(code.contains("ssz_read"));
        assert!(code.contains("ssz_size"));
    }

    #[test]
    fn test_mixed_packages_are_rejected() {
        let mut req = request(checkpoint());
        req.types.push(TypeRequest::new(TypeDescriptor::container(
            TypeRef::new("altair", "Other"),
            vec![("a", TypeDescriptor::uint8())],
        )));
        let err = SszGenPipeline::new()
            .emit_file(&req)
            .unwrap_err()
            .downcast::<EmitError>()
            .unwrap();
        assert!(matches!(err, EmitError::MixedPackages { .. }));
    }

    #[test]
    fn test_invalid_descriptor_is_rejected() {
        let bad = TypeDescriptor::container(
            TypeRef::new("types", "Bad"),
            vec![("u", TypeDescriptor::union_of(Vec::<(u8, TypeDescriptor)>::new()))],
        );
        let err = SszGenPipeline::new().emit_file(&request(bad)).unwrap_err();
        assert!(err.downcast::<EmitError>().is_ok());
    }

    #[test]
    fn test_pipeline_defaults_fold_into_type_options() {
        let code = SszGenPipeline::new()
            .with_legacy_shims()
            .emit_file(&request(checkpoint()))
            .unwrap();
        assert!(code.contains("pub fn ssz_append_legacy"));
        assert!(code.contains("dynssz_rt::default_specs()"));
    }

    #[test]
    fn test_file_request_serde_round_trip() {
        let req = request(checkpoint());
        let json = serde_json::to_string(&req).unwrap();
        let back: FileRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn test_without_dynamic_expressions_elides_spec_parameter() {
        let d = TypeDescriptor::container(
            TypeRef::new("types", "Registry"),
            vec![(
                "validators",
                TypeDescriptor::list_expr(TypeDescriptor::uint64(), "VALIDATOR_REGISTRY_LIMIT", 1024),
            )],
        );
        let code = SszGenPipeline::new()
            .without_dynamic_expressions()
            .emit_file(&request(d))
            .unwrap();
        assert!(!code.contains("specs"));
        assert!(code.contains("1024usize"));
    }
}

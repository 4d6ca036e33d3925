//! Emission-time errors.
//!
//! These are the errors the generator itself can produce. The sentinels the
//! *emitted* code returns at its own runtime (`unexpected_eof`,
//! `offset_violation`, ...) belong to the support crate the emitted code
//! links against and never appear here.

use dynssz_descriptor::DescriptorError;
use thiserror::Error;

/// Fatal errors for the current file emission. None of these are retried;
/// a file request either yields a complete artifact or fails.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("descriptor kind not supported here: {0}")]
    UnknownKind(String),

    #[error("dynamic not supported for static size")]
    DynamicNotSupportedForStaticSize,

    #[error("mixed package types in one file: `{first}` vs `{second}`")]
    MixedPackages { first: String, second: String },

    #[error("unresolvable external type `{0}`")]
    UnresolvableExternalType(String),

    #[error("descriptor contract violation: {0}")]
    InvalidDescriptor(#[from] DescriptorError),
}

/// Result type alias for emission operations.
pub type EmitResult<T> = Result<T, EmitError>;

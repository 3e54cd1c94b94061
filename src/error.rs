//! Error types for the codec core.
//!
//! Every fallible operation in this crate surfaces one of [`J2kError`]'s variants,
//! matching the error-kind taxonomy of ISO/IEC 15444-1 conformance tooling rather
//! than exposing internal implementation details (MQ underflow, tag-tree parity,
//! etc. are folded into the variant of the stage that owns them).

use thiserror::Error;

/// Errors produced by encoding, decoding, or configuring the codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum J2kError {
    /// Encoder parameters are out of range or mutually inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Pixel buffer too small, dimension mismatch, unsupported component count.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Marker missing/ordered wrong, segment length mismatch, or a declared
    /// dimension exceeds a configured limit.
    #[error("invalid codestream at {context}: {detail}")]
    InvalidCodestream { context: String, detail: String },

    /// The MQ (or HT) entropy decoder ran past its segment's recoverable padding.
    #[error("entropy decode error in code-block {tile}/{component}/{x},{y}: {detail}")]
    EntropyDecodeError {
        tile: u32,
        component: u32,
        x: u32,
        y: u32,
        detail: String,
    },

    /// Parameter is syntactically valid but not implemented by this build.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The codestream ends mid-packet. Only returned when `tolerant_truncation`
    /// is false; otherwise the decoder recovers silently and logs a warning.
    #[error("codestream truncated at tile {tile}, layer {layer}: {detail}")]
    Truncated { tile: u32, layer: u32, detail: String },

    /// The host cancelled the operation via a [`crate::config::CancellationToken`].
    #[error("operation cancelled")]
    Cancelled,
}

impl J2kError {
    pub fn invalid_codestream(context: impl Into<String>, detail: impl Into<String>) -> Self {
        J2kError::InvalidCodestream {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, J2kError>;

use thiserror::Error;

/// Errors surfaced by the core read path.
///
/// Every variant here is fatal for the `read` call that triggers it: there
/// are no retries and a partially scattered output buffer is left as-is.
#[derive(Error, Debug, PartialEq)]
pub enum OmCoreError {
    #[error("cannot open file '{filename}': errno {errno}, error: {error}")]
    CannotOpenFile {
        filename: String,
        errno: i32,
        error: String,
    },
    #[error("bad metadata: {reason}")]
    BadMetadata { reason: String },
    #[error("out of bounds: {reason}")]
    OutOfBounds { reason: String },
    #[error("corrupt lookup table: {reason}")]
    CorruptLut { reason: String },
    #[error(
        "decode mismatch: codec consumed {consumed} bytes, planner expected {expected} bytes"
    )]
    DecodeMismatch { consumed: usize, expected: usize },
    #[error("codec failure: {reason}")]
    CodecFailure { reason: String },
    #[error("invalid compression type tag {0}")]
    InvalidCompressionType(u8),
}

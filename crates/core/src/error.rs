use thiserror::Error;

/// Errors raised by the image pipeline and the feature/token fusion path.
///
/// Every variant is raised synchronously at the point of detection and is
/// never retried internally; callers must fix their input and call again.
#[derive(Debug, Error)]
pub enum VisionError {
    /// Malformed sizes, non-positive image dimensions, bad scale factors.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Tensor shapes that cannot be reconciled (token/feature count
    /// mismatches, dimensions not divisible by a downsampling factor).
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// Image representations the pipeline does not recognize.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
}

use thiserror::Error;

/// Errors returned by faceid operations.
///
/// Both variants abort a clustering run immediately. There is no rollback:
/// assignments written before the failure remain persisted, and re-invoking
/// the run is safe (see crate docs).
#[derive(Debug, Error)]
pub enum FaceIdError {
    /// A read or write against the detection or cluster store failed.
    #[error("faceid: store error: {0}")]
    Store(String),

    /// Encoding or decoding a detection vector to/from its persisted
    /// representation failed.
    #[error("faceid: vector codec: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A vector did not have the expected number of components.
    #[error("faceid: dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },
}

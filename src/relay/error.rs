//! Admission errors for publish and play requests

use thiserror::Error;

/// Why a publish or play request was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Stream key did not match
    #[error("invalid stream key")]
    Auth,

    /// Another publisher holds the stream
    #[error("a stream is already being published")]
    AlreadyPublishing,

    /// Play requested while nothing is live
    #[error("no stream is live")]
    NoActiveStream,
}

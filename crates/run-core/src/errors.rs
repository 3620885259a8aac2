//! Errores específicos del core (simples por ahora).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CoreError {
    #[error("invalid artifact id: {0}")] InvalidArtifactId(String),
    #[error("unrecognized graph snapshot: {0}")] UnrecognizedSnapshot(String),
    #[error("checksum mismatch: expected {expected}, got {actual}")] ChecksumMismatch { expected: String, actual: String },
    #[error("io: {0}")] Io(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self { Self::Io(err.to_string()) }
}

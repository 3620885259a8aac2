//! Errores del cliente de build.
//!
//! Taxonomía:
//! - protocol-fatal: `Connection` (perdimos la red) y `Malformed`.
//! - build-fatal: `BuildFailed`, con el último error de artifact como contexto.
//! - `Cancelled` y `EventSink` son terminales pero ajenos al servicio remoto.

use run_pipeline::PipelineError;
use thiserror::Error;

use crate::session::ArtifactFailure;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,
    #[error("connection io: {0}")]
    Io(String),
    #[error("malformed message: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildLogError {
    #[error("lost connection to build log stream: {0}")]
    Connection(ConnectionError),
    #[error("malformed build log message: {0}")]
    Malformed(String),
    #[error("Build failed with error message: {message}.{}", context(.artifact_error))]
    BuildFailed {
        message: String,
        artifact_error: Option<String>,
        failures: Vec<ArtifactFailure>,
    },
    #[error("build log session cancelled")]
    Cancelled,
    #[error("event sink closed: {0}")]
    EventSink(#[from] PipelineError),
}

fn context(artifact_error: &Option<String>) -> String {
    artifact_error.as_ref().map(|e| format!(" {e}")).unwrap_or_default()
}

impl From<ConnectionError> for BuildLogError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Malformed(m) => Self::Malformed(m),
            other => Self::Connection(other),
        }
    }
}

impl BuildLogError {
    /// true si el error vino del servicio remoto (y no de la red o del llamador).
    pub fn is_build_failure(&self) -> bool { matches!(self, Self::BuildFailed { .. }) }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("http error fetching '{uri}': {message}")]
    Http { uri: String, message: String },
    #[error("log fetch cancelled")]
    Cancelled,
    #[error("log fetch pool already closed")]
    PoolClosed,
}

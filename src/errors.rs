//! Error de nivel superior de la orquestación.
use run_buildlog::{BuildLogError, FetchedLog};
use run_core::CoreError;
use run_persistence::PersistenceError;
use run_pipeline::PipelineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    /// Error fatal de protocolo (conexión perdida, mensaje ilegible) o cancelación.
    #[error(transparent)]
    BuildLog(BuildLogError),
    /// El servicio rechazó el build. `logs` trae los logs de los artifacts fallidos.
    #[error("{source}")]
    BuildFailed { #[source] source: BuildLogError, logs: Vec<FetchedLog> },
    #[error("event consumer is gone: {0}")]
    EventSink(#[from] PipelineError),
    #[error("artifact cache unavailable: {0}")]
    Cache(#[from] PersistenceError),
    #[error("{0}")]
    Core(#[from] CoreError),
    #[error("background task failed: {0}")]
    Task(String),
    #[error("setup cancelled")]
    Cancelled,
}

impl From<BuildLogError> for SetupError {
    fn from(e: BuildLogError) -> Self {
        match e {
            BuildLogError::Cancelled => Self::Cancelled,
            BuildLogError::EventSink(p) => Self::EventSink(p),
            other => Self::BuildLog(other),
        }
    }
}

/// Fallo de descarga o instalación de un artifact. Nunca es fatal para el setup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("download of {uri} failed: {message}")]
    Download { uri: String, message: String },
    #[error("{0}")]
    Checksum(String),
    #[error("installation failed: {0}")]
    Install(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ArtifactError {
    fn from(e: std::io::Error) -> Self { Self::Io(e.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_and_sink_errors_are_lifted() {
        assert!(matches!(SetupError::from(BuildLogError::Cancelled), SetupError::Cancelled));
        assert!(matches!(SetupError::from(BuildLogError::EventSink(PipelineError::Closed)), SetupError::EventSink(_)));
        let e = SetupError::from(BuildLogError::Malformed("x".into()));
        assert!(matches!(e, SetupError::BuildLog(BuildLogError::Malformed(_))));
    }

    #[test]
    fn build_failure_displays_remote_message() {
        let source = BuildLogError::BuildFailed { message: "oh no".into(), artifact_error: None, failures: vec![] };
        let e = SetupError::BuildFailed { source, logs: vec![] };
        assert!(e.to_string().contains("oh no"));
    }
}

//! Errores del pipeline de eventos.

use run_core::{ArtifactId, SetupStep};
use thiserror::Error;

/// Error devuelto por un digester.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("{0}")]
    Message(String),
    #[error("{} digester(s) failed: {}", .0.len(), join(.0))]
    Aggregate(Vec<DigestError>),
}

fn join(errors: &[DigestError]) -> String { errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ") }

impl DigestError {
    pub fn msg(m: impl Into<String>) -> Self { Self::Message(m.into()) }

    /// Agrega una lista de errores; vacía -> Ok, uno solo -> ese mismo.
    pub fn aggregate(mut errors: Vec<DigestError>) -> Result<(), DigestError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Aggregate(errors)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("total number of artifacts has not been set yet")]
    TotalNotSet,
    #[error("total number of artifacts was already set to {0}")]
    TotalAlreadySet(usize),
    #[error("{step} event for artifact {artifact_id} whose {step} step was never started")]
    StepNotStarted { step: SetupStep, artifact_id: ArtifactId },
    #[error("{step} of artifact {artifact_id} started before its download finished")]
    PhaseOutOfOrder { step: SetupStep, artifact_id: ArtifactId },
    #[error("event stream closed")]
    Closed,
    #[error(transparent)]
    Digest(#[from] DigestError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_collapses_and_joins() {
        assert_eq!(DigestError::aggregate(vec![]), Ok(()));
        assert_eq!(DigestError::aggregate(vec![DigestError::msg("a")]), Err(DigestError::msg("a")));
        let err = DigestError::aggregate(vec![DigestError::msg("a"), DigestError::msg("b")]).unwrap_err();
        assert_eq!(err.to_string(), "2 digester(s) failed: a; b");
    }
}

//! Traits que reciben los eventos ya digeridos por el consumidor.
//!
//! Los digesters son sincrónicos y no conocen el protocolo ni el orden de
//! emisión: el consumidor resuelve nombres, fases y agregados antes de
//! llamarlos.
use run_core::{ArtifactChangeset, ArtifactId, ArtifactMap, SetupStep};

use crate::errors::DigestError;

/// Línea de log fina de un build (modo verbose).
#[derive(Debug, Clone, Copy)]
pub struct BuildLogLine<'a> {
    pub timestamp: &'a str,
    pub message: &'a str,
    pub facility: &'a str,
    pub pipe_name: &'a str,
    pub source: &'a str,
}

pub trait ChangeSummaryDigester {
    fn change_summary(&mut self,
                      artifacts: &ArtifactMap,
                      requested: &ArtifactChangeset,
                      changed: &ArtifactChangeset)
                      -> Result<(), DigestError>;
}

/// Acciones de progreso del setup. Todas tienen implementación vacía por
/// defecto para que un digester sólo sobrescriba lo que le interesa.
#[allow(unused_variables)]
pub trait ProgressDigester {
    fn build_started(&mut self, total: usize) -> Result<(), DigestError> { Ok(()) }
    fn build_completed(&mut self, with_failures: bool) -> Result<(), DigestError> { Ok(()) }

    fn installation_started(&mut self, total: usize) -> Result<(), DigestError> { Ok(()) }
    fn installation_increment(&mut self) -> Result<(), DigestError> { Ok(()) }

    fn build_artifact_started(&mut self, id: ArtifactId, name: &str) -> Result<(), DigestError> { Ok(()) }
    fn build_artifact_completed(&mut self,
                                id: ArtifactId,
                                name: &str,
                                log_uri: Option<&str>,
                                cached: bool)
                                -> Result<(), DigestError> {
        Ok(())
    }
    fn build_artifact_failure(&mut self,
                              id: ArtifactId,
                              name: &str,
                              log_uri: Option<&str>,
                              error: &str,
                              cached: bool)
                              -> Result<(), DigestError> {
        Ok(())
    }
    fn build_artifact_progress(&mut self, id: ArtifactId, name: &str, line: BuildLogLine<'_>) -> Result<(), DigestError> {
        Ok(())
    }
    fn still_building(&mut self, completed: usize, total: usize) -> Result<(), DigestError> { Ok(()) }

    /// `counts_bytes` es false para Install (cuenta archivos, no bytes).
    fn artifact_step_started(&mut self,
                             id: ArtifactId,
                             name: &str,
                             step: SetupStep,
                             total: u64,
                             counts_bytes: bool)
                             -> Result<(), DigestError> {
        Ok(())
    }
    fn artifact_step_increment(&mut self, id: ArtifactId, name: &str, step: SetupStep, increment: u64) -> Result<(), DigestError> {
        Ok(())
    }
    fn artifact_step_completed(&mut self, id: ArtifactId, name: &str, step: SetupStep) -> Result<(), DigestError> { Ok(()) }
    fn artifact_step_failure(&mut self, id: ArtifactId, name: &str, step: SetupStep, error: &str) -> Result<(), DigestError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DigestError> { Ok(()) }
}

/// Digester que descarta todo.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDigester;

impl ProgressDigester for NoopDigester {}

impl ChangeSummaryDigester for NoopDigester {
    fn change_summary(&mut self, _: &ArtifactMap, _: &ArtifactChangeset, _: &ArtifactChangeset) -> Result<(), DigestError> {
        Ok(())
    }
}

impl<T: ProgressDigester + ?Sized> ProgressDigester for Box<T> {
    fn build_started(&mut self, total: usize) -> Result<(), DigestError> { (**self).build_started(total) }
    fn build_completed(&mut self, with_failures: bool) -> Result<(), DigestError> { (**self).build_completed(with_failures) }
    fn installation_started(&mut self, total: usize) -> Result<(), DigestError> { (**self).installation_started(total) }
    fn installation_increment(&mut self) -> Result<(), DigestError> { (**self).installation_increment() }
    fn build_artifact_started(&mut self, id: ArtifactId, name: &str) -> Result<(), DigestError> {
        (**self).build_artifact_started(id, name)
    }
    fn build_artifact_completed(&mut self,
                                id: ArtifactId,
                                name: &str,
                                log_uri: Option<&str>,
                                cached: bool)
                                -> Result<(), DigestError> {
        (**self).build_artifact_completed(id, name, log_uri, cached)
    }
    fn build_artifact_failure(&mut self,
                              id: ArtifactId,
                              name: &str,
                              log_uri: Option<&str>,
                              error: &str,
                              cached: bool)
                              -> Result<(), DigestError> {
        (**self).build_artifact_failure(id, name, log_uri, error, cached)
    }
    fn build_artifact_progress(&mut self, id: ArtifactId, name: &str, line: BuildLogLine<'_>) -> Result<(), DigestError> {
        (**self).build_artifact_progress(id, name, line)
    }
    fn still_building(&mut self, completed: usize, total: usize) -> Result<(), DigestError> {
        (**self).still_building(completed, total)
    }
    fn artifact_step_started(&mut self,
                             id: ArtifactId,
                             name: &str,
                             step: SetupStep,
                             total: u64,
                             counts_bytes: bool)
                             -> Result<(), DigestError> {
        (**self).artifact_step_started(id, name, step, total, counts_bytes)
    }
    fn artifact_step_increment(&mut self, id: ArtifactId, name: &str, step: SetupStep, increment: u64) -> Result<(), DigestError> {
        (**self).artifact_step_increment(id, name, step, increment)
    }
    fn artifact_step_completed(&mut self, id: ArtifactId, name: &str, step: SetupStep) -> Result<(), DigestError> {
        (**self).artifact_step_completed(id, name, step)
    }
    fn artifact_step_failure(&mut self, id: ArtifactId, name: &str, step: SetupStep, error: &str) -> Result<(), DigestError> {
        (**self).artifact_step_failure(id, name, step, error)
    }
    fn close(&mut self) -> Result<(), DigestError> { (**self).close() }
}

//! Reparto de un mismo evento a varios digesters.
//!
//! Un digester que falla no impide que los demás reciban el evento; los
//! errores se agregan en un único `DigestError`.
use run_core::{ArtifactId, SetupStep};

use crate::digester::{BuildLogLine, ProgressDigester};
use crate::errors::DigestError;

pub struct MultiplexedProgress {
    digesters: Vec<Box<dyn ProgressDigester + Send>>,
}

impl MultiplexedProgress {
    pub fn new(digesters: Vec<Box<dyn ProgressDigester + Send>>) -> Self { Self { digesters } }

    pub fn push(&mut self, digester: Box<dyn ProgressDigester + Send>) { self.digesters.push(digester); }

    pub fn len(&self) -> usize { self.digesters.len() }
    pub fn is_empty(&self) -> bool { self.digesters.is_empty() }
}

/// Llama `$method` en cada digester y agrega los errores.
macro_rules! fan_out {
    ($self:ident . $method:ident ( $($arg:expr),* )) => {{
        let mut errors = Vec::new();
        for d in $self.digesters.iter_mut() {
            if let Err(e) = d.$method($($arg),*) {
                errors.push(e);
            }
        }
        DigestError::aggregate(errors)
    }};
}

impl ProgressDigester for MultiplexedProgress {
    fn build_started(&mut self, total: usize) -> Result<(), DigestError> { fan_out!(self.build_started(total)) }
    fn build_completed(&mut self, with_failures: bool) -> Result<(), DigestError> { fan_out!(self.build_completed(with_failures)) }
    fn installation_started(&mut self, total: usize) -> Result<(), DigestError> { fan_out!(self.installation_started(total)) }
    fn installation_increment(&mut self) -> Result<(), DigestError> { fan_out!(self.installation_increment()) }
    fn build_artifact_started(&mut self, id: ArtifactId, name: &str) -> Result<(), DigestError> {
        fan_out!(self.build_artifact_started(id, name))
    }
    fn build_artifact_completed(&mut self,
                                id: ArtifactId,
                                name: &str,
                                log_uri: Option<&str>,
                                cached: bool)
                                -> Result<(), DigestError> {
        fan_out!(self.build_artifact_completed(id, name, log_uri, cached))
    }
    fn build_artifact_failure(&mut self,
                              id: ArtifactId,
                              name: &str,
                              log_uri: Option<&str>,
                              error: &str,
                              cached: bool)
                              -> Result<(), DigestError> {
        fan_out!(self.build_artifact_failure(id, name, log_uri, error, cached))
    }
    fn build_artifact_progress(&mut self, id: ArtifactId, name: &str, line: BuildLogLine<'_>) -> Result<(), DigestError> {
        fan_out!(self.build_artifact_progress(id, name, line))
    }
    fn still_building(&mut self, completed: usize, total: usize) -> Result<(), DigestError> {
        fan_out!(self.still_building(completed, total))
    }
    fn artifact_step_started(&mut self,
                             id: ArtifactId,
                             name: &str,
                             step: SetupStep,
                             total: u64,
                             counts_bytes: bool)
                             -> Result<(), DigestError> {
        fan_out!(self.artifact_step_started(id, name, step, total, counts_bytes))
    }
    fn artifact_step_increment(&mut self, id: ArtifactId, name: &str, step: SetupStep, increment: u64) -> Result<(), DigestError> {
        fan_out!(self.artifact_step_increment(id, name, step, increment))
    }
    fn artifact_step_completed(&mut self, id: ArtifactId, name: &str, step: SetupStep) -> Result<(), DigestError> {
        fan_out!(self.artifact_step_completed(id, name, step))
    }
    fn artifact_step_failure(&mut self, id: ArtifactId, name: &str, step: SetupStep, error: &str) -> Result<(), DigestError> {
        fan_out!(self.artifact_step_failure(id, name, step, error))
    }
    fn close(&mut self) -> Result<(), DigestError> { fan_out!(self.close()) }
}

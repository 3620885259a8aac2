//! Consumidor del stream de eventos de setup.
//!
//! Mantiene todo el estado (totales, fases por artifact, fallos) para que los
//! digesters reciban llamadas simples. Transiciones inconsistentes abortan
//! con error explícito, pero antes se vacía el stream para que el productor
//! nunca quede bloqueado sobre un handoff que nadie lee.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::debug;
use run_core::constants::STILL_BUILDING_AFTER;
use run_core::{ArtifactId, SetupEvent, SetupEventKind, SetupStep};

use crate::channel::EventStream;
use crate::digester::{BuildLogLine, ChangeSummaryDigester, ProgressDigester};
use crate::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhaseState {
    Started,
    Completed,
    Failed,
}

/// Resumen de una corrida completa del consumidor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub total_artifacts: usize,
    pub already_built: usize,
    pub builds_completed: usize,
    pub build_failures: usize,
    pub installs_completed: usize,
    pub install_failures: usize,
    pub installation_started: bool,
}

impl ConsumerReport {
    pub fn has_failures(&self) -> bool { self.build_failures > 0 || self.install_failures > 0 }
}

pub struct RuntimeEventConsumer<P, S> {
    progress: P,
    summary: S,
    names: IndexMap<ArtifactId, String>,
    total_artifacts: Option<usize>,
    already_built: usize,
    is_building: bool,
    builds_total: usize,
    last_build_event: Option<DateTime<Utc>>,
    builds_completed: usize,
    build_failures: usize,
    installs_completed: usize,
    install_failures: usize,
    installation_started: bool,
    phases: HashMap<(ArtifactId, SetupStep), PhaseState>,
}

impl<P: ProgressDigester, S: ChangeSummaryDigester> RuntimeEventConsumer<P, S> {
    pub fn new(progress: P, summary: S) -> Self {
        Self { progress,
               summary,
               names: IndexMap::new(),
               total_artifacts: None,
               already_built: 0,
               is_building: false,
               builds_total: 0,
               last_build_event: None,
               builds_completed: 0,
               build_failures: 0,
               installs_completed: 0,
               install_failures: 0,
               installation_started: false,
               phases: HashMap::new() }
    }

    pub fn progress(&self) -> &P { &self.progress }
    pub fn summary(&self) -> &S { &self.summary }
    pub fn into_parts(self) -> (P, S) { (self.progress, self.summary) }

    pub fn report(&self) -> ConsumerReport {
        ConsumerReport { total_artifacts: self.total_artifacts.unwrap_or(0),
                         already_built: self.already_built,
                         builds_completed: self.builds_completed,
                         build_failures: self.build_failures,
                         installs_completed: self.installs_completed,
                         install_failures: self.install_failures,
                         installation_started: self.installation_started }
    }

    /// Consume el stream completo. Ante el primer error sigue leyendo (y
    /// descartando) hasta que el productor cierre, y recién entonces lo devuelve.
    pub async fn run(&mut self, mut stream: EventStream) -> Result<ConsumerReport, PipelineError> {
        while let Some(ev) = stream.recv().await {
            if let Err(err) = self.consume(&ev) {
                debug!("consumer aborting at seq={} kind={}: {err}", ev.seq, ev.kind.name());
                let discarded = stream.drain().await;
                debug!("consumer drained {discarded} events after failure");
                let _ = self.progress.close();
                return Err(err);
            }
        }
        self.progress.close()?;
        Ok(self.report())
    }

    fn name_of(&self, id: ArtifactId) -> String {
        match self.names.get(&id) {
            Some(n) => n.clone(),
            None => {
                debug!("no name resolved for artifact {id}");
                id.to_string()
            }
        }
    }

    /// Digiere un único evento.
    pub fn consume(&mut self, ev: &SetupEvent) -> Result<(), PipelineError> {
        match &ev.kind {
            SetupEventKind::ChangeSummary { artifacts, requested, changed } => {
                self.summary.change_summary(artifacts, requested, changed)?;
            }
            SetupEventKind::ArtifactsResolved { names, already_built, failed } => {
                self.last_build_event = Some(ev.ts);
                self.names.extend(names.iter().map(|(k, v)| (*k, v.clone())));
                for a in already_built {
                    let name = self.name_of(a.artifact_id);
                    self.progress.build_artifact_completed(a.artifact_id, &name, a.log_uri.as_deref(), true)?;
                }
                self.already_built = already_built.len();
                for a in failed {
                    let name = self.name_of(a.artifact_id);
                    self.build_failures += 1;
                    let msg = a.error.as_deref().unwrap_or_default();
                    self.progress.build_artifact_failure(a.artifact_id, &name, a.log_uri.as_deref(), msg, true)?;
                }
            }
            SetupEventKind::ArtifactTotal { total } => {
                if let Some(prev) = self.total_artifacts {
                    return Err(PipelineError::TotalAlreadySet(prev));
                }
                self.total_artifacts = Some(*total);
            }
            SetupEventKind::BuildStarted { total } => {
                if self.total_artifacts.is_none() {
                    return Err(PipelineError::TotalNotSet);
                }
                self.builds_total = total.saturating_sub(self.already_built);
                self.last_build_event = Some(ev.ts);
                self.is_building = true;
                self.progress.build_started(self.builds_total)?;
            }
            SetupEventKind::BuildFinished { .. } => {
                self.is_building = false;
                self.progress.build_completed(self.build_failures > 0)?;
            }
            SetupEventKind::Heartbeat { at } => {
                let stale = self.last_build_event.map(|last| *at - last).and_then(|d| d.to_std().ok());
                if self.is_building && stale.is_some_and(|d| d > STILL_BUILDING_AFTER) {
                    self.last_build_event = Some(*at);
                    self.progress.still_building(self.builds_completed, self.builds_total)?;
                }
            }
            SetupEventKind::ArtifactBuildLog { artifact_id, timestamp, source, pipe_name, facility, message } => {
                self.last_build_event = Some(ev.ts);
                let name = self.name_of(*artifact_id);
                let line = BuildLogLine { timestamp, message, facility, pipe_name, source };
                self.progress.build_artifact_progress(*artifact_id, &name, line)?;
            }
            SetupEventKind::ArtifactStarted { step: SetupStep::Build, artifact_id, .. }
            | SetupEventKind::ArtifactProgress { step: SetupStep::Build, artifact_id, .. }
            | SetupEventKind::ArtifactCompleted { step: SetupStep::Build, artifact_id, .. }
            | SetupEventKind::ArtifactFailed { step: SetupStep::Build, artifact_id, .. } => {
                self.last_build_event = Some(ev.ts);
                let name = self.name_of(*artifact_id);
                self.handle_build_artifact(&ev.kind, *artifact_id, &name)?;
            }
            SetupEventKind::ArtifactStarted { .. }
            | SetupEventKind::ArtifactProgress { .. }
            | SetupEventKind::ArtifactCompleted { .. }
            | SetupEventKind::ArtifactFailed { .. } => self.handle_step_artifact(&ev.kind)?,
            SetupEventKind::Unknown => debug!("received unhandled event seq={}", ev.seq),
        }
        Ok(())
    }

    fn handle_build_artifact(&mut self, kind: &SetupEventKind, id: ArtifactId, name: &str) -> Result<(), PipelineError> {
        match kind {
            SetupEventKind::ArtifactStarted { .. } => {
                if self.total_artifacts.is_none() {
                    return Err(PipelineError::TotalNotSet);
                }
                self.phases.insert((id, SetupStep::Build), PhaseState::Started);
                self.progress.build_artifact_started(id, name)?;
            }
            SetupEventKind::ArtifactCompleted { log_uri, cached, .. } => {
                // los cache hits completan sin haber empezado
                self.phases.insert((id, SetupStep::Build), PhaseState::Completed);
                self.builds_completed += 1;
                self.progress.build_artifact_completed(id, name, log_uri.as_deref(), *cached)?;
            }
            SetupEventKind::ArtifactFailed { log_uri, error, .. } => {
                self.phases.insert((id, SetupStep::Build), PhaseState::Failed);
                self.build_failures += 1;
                self.progress.build_artifact_failure(id, name, log_uri.as_deref(), error, false)?;
            }
            // los builds no reportan progreso en bytes
            _ => debug!("unhandled build artifact event {}", kind.name()),
        }
        Ok(())
    }

    fn handle_step_artifact(&mut self, kind: &SetupEventKind) -> Result<(), PipelineError> {
        match kind {
            SetupEventKind::ArtifactStarted { step, artifact_id, total } => {
                self.ensure_installation_started()?;
                if let Some(prev) = previous_step(*step) {
                    if self.phases.get(&(*artifact_id, prev)) == Some(&PhaseState::Started) {
                        return Err(PipelineError::PhaseOutOfOrder { step: *step, artifact_id: *artifact_id });
                    }
                }
                self.phases.insert((*artifact_id, *step), PhaseState::Started);
                let name = self.name_of(*artifact_id);
                // Install cuenta archivos, no bytes
                let counts_bytes = *step != SetupStep::Install;
                self.progress
                    .artifact_step_started(*artifact_id, &name, *step, total.unwrap_or(0), counts_bytes)?;
            }
            SetupEventKind::ArtifactProgress { step, artifact_id, increment } => {
                self.require_started(*step, *artifact_id)?;
                let name = self.name_of(*artifact_id);
                self.progress.artifact_step_increment(*artifact_id, &name, *step, *increment)?;
            }
            SetupEventKind::ArtifactCompleted { step, artifact_id, .. } => {
                self.require_started(*step, *artifact_id)?;
                self.phases.insert((*artifact_id, *step), PhaseState::Completed);
                let name = self.name_of(*artifact_id);
                if *step == SetupStep::Install {
                    self.installs_completed += 1;
                    self.progress.installation_increment()?;
                }
                self.progress.artifact_step_completed(*artifact_id, &name, *step)?;
            }
            SetupEventKind::ArtifactFailed { step, artifact_id, error, .. } => {
                self.install_failures += 1;
                self.phases.insert((*artifact_id, *step), PhaseState::Failed);
                let name = self.name_of(*artifact_id);
                self.progress.artifact_step_failure(*artifact_id, &name, *step, error)?;
            }
            other => debug!("unhandled artifact event {}", other.name()),
        }
        Ok(())
    }

    fn require_started(&self, step: SetupStep, artifact_id: ArtifactId) -> Result<(), PipelineError> {
        match self.phases.get(&(artifact_id, step)) {
            Some(PhaseState::Started) => Ok(()),
            _ => Err(PipelineError::StepNotStarted { step, artifact_id }),
        }
    }

    fn ensure_installation_started(&mut self) -> Result<(), PipelineError> {
        if self.installation_started {
            return Ok(());
        }
        let total = self.total_artifacts.ok_or(PipelineError::TotalNotSet)?;
        self.progress.installation_started(total)?;
        self.installation_started = true;
        Ok(())
    }
}

/// Fase que debe haber terminado antes de que `step` empiece.
fn previous_step(step: SetupStep) -> Option<SetupStep> {
    match step {
        SetupStep::Build => None,
        SetupStep::Download => Some(SetupStep::Build),
        SetupStep::Install => Some(SetupStep::Download),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digester::NoopDigester;
    use chrono::Duration;

    #[derive(Default)]
    struct StillBuilding(usize);

    impl ProgressDigester for StillBuilding {
        fn still_building(&mut self, _: usize, _: usize) -> Result<(), crate::DigestError> {
            self.0 += 1;
            Ok(())
        }
    }

    fn at(kind: SetupEventKind, seq: u64, ts: DateTime<Utc>) -> SetupEvent { SetupEvent { seq, kind, ts } }

    #[test]
    fn heartbeat_only_reports_after_quiet_period() {
        let t0 = Utc::now();
        let mut c = RuntimeEventConsumer::new(StillBuilding::default(), NoopDigester);
        c.consume(&at(SetupEventKind::ArtifactTotal { total: 1 }, 0, t0)).unwrap();
        c.consume(&at(SetupEventKind::BuildStarted { total: 1 }, 1, t0)).unwrap();
        c.consume(&at(SetupEventKind::Heartbeat { at: t0 + Duration::seconds(5) }, 2, t0)).unwrap();
        assert_eq!(c.progress().0, 0);
        c.consume(&at(SetupEventKind::Heartbeat { at: t0 + Duration::seconds(16) }, 3, t0)).unwrap();
        assert_eq!(c.progress().0, 1);
        // el contador se reinicia con el aviso
        c.consume(&at(SetupEventKind::Heartbeat { at: t0 + Duration::seconds(20) }, 4, t0)).unwrap();
        assert_eq!(c.progress().0, 1);
    }

    #[test]
    fn second_total_is_inconsistent() {
        let mut c = RuntimeEventConsumer::new(NoopDigester, NoopDigester);
        let t = Utc::now();
        c.consume(&at(SetupEventKind::ArtifactTotal { total: 2 }, 0, t)).unwrap();
        assert_eq!(c.consume(&at(SetupEventKind::ArtifactTotal { total: 3 }, 1, t)),
                   Err(PipelineError::TotalAlreadySet(2)));
    }

    #[test]
    fn install_before_download_finished_is_out_of_order() {
        let mut c = RuntimeEventConsumer::new(NoopDigester, NoopDigester);
        let t = Utc::now();
        let id = ArtifactId::new_v4();
        c.consume(&at(SetupEventKind::ArtifactTotal { total: 1 }, 0, t)).unwrap();
        c.consume(&at(SetupEventKind::ArtifactStarted { step: SetupStep::Download, artifact_id: id, total: Some(10) }, 1, t))
         .unwrap();
        let err = c.consume(&at(SetupEventKind::ArtifactStarted { step: SetupStep::Install, artifact_id: id, total: None },
                                2,
                                t))
                   .unwrap_err();
        assert_eq!(err, PipelineError::PhaseOutOfOrder { step: SetupStep::Install, artifact_id: id });
    }

    #[test]
    fn download_before_build_completed_is_out_of_order() {
        let mut c = RuntimeEventConsumer::new(NoopDigester, NoopDigester);
        let t = Utc::now();
        let id = ArtifactId::new_v4();
        c.consume(&at(SetupEventKind::ArtifactTotal { total: 1 }, 0, t)).unwrap();
        c.consume(&at(SetupEventKind::ArtifactStarted { step: SetupStep::Build, artifact_id: id, total: None }, 1, t))
         .unwrap();
        let err = c.consume(&at(SetupEventKind::ArtifactStarted { step: SetupStep::Download, artifact_id: id, total: Some(4) },
                                2,
                                t))
                   .unwrap_err();
        assert_eq!(err, PipelineError::PhaseOutOfOrder { step: SetupStep::Download, artifact_id: id });
    }

    #[test]
    fn build_start_requires_total() {
        let mut c = RuntimeEventConsumer::new(NoopDigester, NoopDigester);
        let id = ArtifactId::new_v4();
        let err = c.consume(&at(SetupEventKind::ArtifactStarted { step: SetupStep::Build, artifact_id: id, total: None },
                                0,
                                Utc::now()))
                   .unwrap_err();
        assert_eq!(err, PipelineError::TotalNotSet);
    }
}

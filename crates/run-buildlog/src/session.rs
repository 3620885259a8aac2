//! Sesión de build: una conexión, un read loop, una máquina de estados.
//!
//! Estados del build: `AwaitingStart -> Building -> {Succeeded | Failed}`.
//! Estado por artifact: `Pending -> Started -> {Succeeded | Failed}`.
//!
//! Reglas del read loop:
//! - Mensajes repetidos (mismo tipo y mismo artifact) se ignoran.
//! - Mensajes sobre artifacts no monitoreados, o sobre el propio id del
//!   build (artifact final no-op), se ignoran.
//! - `artifact_failed` no termina la sesión; `build_failed` sí, adjuntando
//!   el último error de artifact.
//! - Cuando todos los artifacts monitoreados terminaron sin fallos la sesión
//!   termina sin esperar `build_succeeded`.
//! - Cada artifact exitoso que no fue cache-hit produce un descriptor de
//!   descarga por un canal acotado; el llamador debe drenarlo en paralelo.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use log::debug;
use run_core::{ArtifactDownload, ArtifactId, SetupEventKind, SetupStep};
use run_pipeline::EventProducer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connector::{BuildLogConnection, Connector};
use crate::error::{BuildLogError, ConnectionError};
use crate::message::{BuildLogMessage, SubscribeRequest};
use crate::supervisor::LogSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingStart,
    Building,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactState {
    Pending,
    Started,
    Succeeded,
    Failed,
}

impl ArtifactState {
    fn is_done(self) -> bool { matches!(self, Self::Succeeded | Self::Failed) }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Id remoto del build (se envía como `recipeID`).
    pub build_id: Uuid,
    /// Artifacts que esperamos del build, con su nombre para mensajes de error.
    pub monitored: IndexMap<ArtifactId, String>,
    /// Total anunciado en `BuildStarted`; incluye los artifacts ya construidos
    /// que el consumidor descuenta.
    pub total: usize,
    /// Abre una conexión extra por artifact para logs finos.
    pub verbose: bool,
    pub download_capacity: usize,
    /// Gracia para cerrar las suscripciones verbose al terminar.
    pub shutdown_grace: Duration,
}

impl SessionOptions {
    pub fn new(build_id: Uuid, monitored: IndexMap<ArtifactId, String>) -> Self {
        Self { build_id,
               total: monitored.len(),
               monitored,
               verbose: false,
               download_capacity: 8,
               shutdown_grace: Duration::from_secs(5) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFailure {
    pub artifact_id: ArtifactId,
    pub name: String,
    pub message: String,
    pub log_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub state: SessionState,
    /// Artifacts construidos en esta sesión (sin cache-hits).
    pub built: Vec<ArtifactId>,
    /// Cache-hits remotos que trajeron URI de descarga.
    pub cache_hits: Vec<ArtifactDownload>,
    /// Cache-hits sin URI: sólo pueden servirse desde la caché local.
    pub cache_hits_without_uri: Vec<ArtifactId>,
    pub failures: Vec<ArtifactFailure>,
    /// true si se cerró por haber terminado todos los artifacts monitoreados.
    pub ended_early: bool,
}

/// Extremo receptor de los descriptores de descarga.
pub struct DownloadStream {
    rx: mpsc::Receiver<ArtifactDownload>,
}

impl DownloadStream {
    pub async fn next(&mut self) -> Option<ArtifactDownload> { self.rx.recv().await }
}

pub struct BuildSession {
    handle: JoinHandle<Result<SessionOutcome, BuildLogError>>,
    cancel: CancellationToken,
}

impl BuildSession {
    /// Conecta, emite `BuildStarted`, envía la suscripción y lanza el read loop.
    pub async fn open<C: Connector>(connector: Arc<C>,
                                    opts: SessionOptions,
                                    producer: EventProducer,
                                    cancel: CancellationToken)
                                    -> Result<(Self, DownloadStream), BuildLogError> {
        let mut conn = connector.connect().await?;
        producer.emit(SetupEventKind::BuildStarted { total: opts.total }).await?;
        debug!("sending build log request for {}", opts.build_id);
        conn.send_request(&SubscribeRequest::Build { recipe_id: opts.build_id }).await?;

        let (tx, rx) = mpsc::channel(opts.download_capacity.max(1));
        let supervisor = opts.verbose
                             .then(|| LogSupervisor::new(connector.clone(), producer.clone(), cancel.child_token()));
        let read_loop = ReadLoop { artifacts: opts.monitored.keys().map(|id| (*id, ArtifactState::Pending)).collect(),
                                   opts,
                                   producer,
                                   cancel: cancel.clone(),
                                   supervisor,
                                   state: SessionState::AwaitingStart,
                                   observed: HashSet::new(),
                                   cache_hits: HashSet::new(),
                                   last_artifact_error: None,
                                   outcome: SessionOutcome { state: SessionState::AwaitingStart,
                                                             built: Vec::new(),
                                                             cache_hits: Vec::new(),
                                                             cache_hits_without_uri: Vec::new(),
                                                             failures: Vec::new(),
                                                             ended_early: false } };
        let handle = tokio::spawn(read_loop.run(conn, tx));
        Ok((Self { handle, cancel }, DownloadStream { rx }))
    }

    pub fn cancel(&self) { self.cancel.cancel(); }

    /// Espera el final del read loop.
    pub async fn wait(self) -> Result<SessionOutcome, BuildLogError> { join(self.handle).await }

    /// Cancela y espera hasta `grace`; si el read loop no termina, se aborta.
    pub async fn close(self, grace: Duration) -> Result<SessionOutcome, BuildLogError> {
        self.cancel.cancel();
        self.wait_with_grace(grace).await
    }

    /// Como `wait`, pero si el token se cancela concede `grace` al read loop
    /// antes de abortarlo.
    pub async fn wait_with_grace(self, grace: Duration) -> Result<SessionOutcome, BuildLogError> {
        let mut handle = self.handle;
        tokio::select! {
            joined = &mut handle => return flatten(joined),
            _ = self.cancel.cancelled() => {}
        }
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                handle.abort();
                Err(BuildLogError::Cancelled)
            }
        }
    }
}

async fn join(handle: JoinHandle<Result<SessionOutcome, BuildLogError>>) -> Result<SessionOutcome, BuildLogError> {
    flatten(handle.await)
}

fn flatten(joined: Result<Result<SessionOutcome, BuildLogError>, tokio::task::JoinError>)
           -> Result<SessionOutcome, BuildLogError> {
    match joined {
        Ok(r) => r,
        Err(e) if e.is_cancelled() => Err(BuildLogError::Cancelled),
        Err(e) => Err(BuildLogError::Connection(ConnectionError::Io(format!("read loop panicked: {e}")))),
    }
}

struct ReadLoop<C: Connector> {
    opts: SessionOptions,
    producer: EventProducer,
    cancel: CancellationToken,
    supervisor: Option<LogSupervisor<C>>,
    state: SessionState,
    artifacts: HashMap<ArtifactId, ArtifactState>,
    observed: HashSet<String>,
    cache_hits: HashSet<ArtifactId>,
    last_artifact_error: Option<String>,
    outcome: SessionOutcome,
}

impl<C: Connector> ReadLoop<C> {
    async fn run(mut self,
                 mut conn: C::Conn,
                 downloads: mpsc::Sender<ArtifactDownload>)
                 -> Result<SessionOutcome, BuildLogError> {
        let result = self.read_until_terminal(&mut conn, &downloads).await;
        drop(downloads);
        if let Some(sup) = &self.supervisor {
            sup.shutdown(self.opts.shutdown_grace).await;
        }
        if let Err(e) = conn.close().await {
            debug!("closing build log connection: {e}");
        }
        match result {
            Ok(()) => {
                self.outcome.state = self.state;
                Ok(self.outcome)
            }
            Err(e) => Err(e),
        }
    }

    async fn read_until_terminal(&mut self,
                                 conn: &mut C::Conn,
                                 downloads: &mpsc::Sender<ArtifactDownload>)
                                 -> Result<(), BuildLogError> {
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => return Err(BuildLogError::Cancelled),
                m = conn.read_message() => m,
            };
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    debug!("build log read error: {e}");
                    return Err(e.into());
                }
            };
            if self.handle(msg, downloads).await? {
                return Ok(());
            }
        }
    }

    /// true si el mensaje hace terminar la sesión.
    async fn handle(&mut self,
                    msg: BuildLogMessage,
                    downloads: &mpsc::Sender<ArtifactDownload>)
                    -> Result<bool, BuildLogError> {
        if let Some(id) = msg.artifact_id() {
            if id.as_uuid() == self.opts.build_id || !self.artifacts.contains_key(&id) {
                debug!("ignoring {} for {id}: not monitored", msg.type_name());
                return Ok(false);
            }
        }
        if self.is_repeat(&msg) {
            debug!("ignoring repeated {}", msg.type_name());
            return Ok(false);
        }

        match msg {
            BuildLogMessage::BuildStarted => {
                self.state = SessionState::Building;
            }
            BuildLogMessage::BuildSucceeded => {
                self.state = SessionState::Succeeded;
                self.emit(SetupEventKind::BuildFinished { failed: !self.outcome.failures.is_empty() }).await?;
                return Ok(true);
            }
            BuildLogMessage::BuildFailed { error_message } => {
                self.state = SessionState::Failed;
                self.emit(SetupEventKind::BuildFinished { failed: true }).await?;
                return Err(BuildLogError::BuildFailed { message: error_message,
                                                        artifact_error: self.last_artifact_error.take(),
                                                        failures: std::mem::take(&mut self.outcome.failures) });
            }
            BuildLogMessage::ArtifactStarted { artifact_id, cache_hit } => {
                self.state = SessionState::Building;
                self.artifacts.insert(artifact_id, ArtifactState::Started);
                if cache_hit {
                    self.cache_hits.insert(artifact_id);
                } else {
                    self.emit(SetupEventKind::ArtifactStarted { step: SetupStep::Build, artifact_id, total: None })
                        .await?;
                }
                if let Some(sup) = &self.supervisor {
                    sup.subscribe(artifact_id);
                }
            }
            BuildLogMessage::ArtifactSucceeded { artifact_id, artifact_uri, artifact_checksum, log_uri, cache_hit } => {
                let cached = cache_hit || self.cache_hits.contains(&artifact_id);
                if !cached && artifact_uri.is_empty() {
                    return Err(BuildLogError::Malformed(format!("artifact_succeeded for {artifact_id} without artifact URI")));
                }
                self.artifacts.insert(artifact_id, ArtifactState::Succeeded);
                // El descriptor sale después de ArtifactCompleted: quien descarga en paralelo
                // no puede adelantar la fase de descarga a la de build.
                self.unsubscribe(artifact_id).await;
                self.emit(SetupEventKind::ArtifactCompleted { step: SetupStep::Build,
                                                              artifact_id,
                                                              log_uri: non_empty(log_uri),
                                                              cached })
                    .await?;
                let download = ArtifactDownload { artifact_id, uri: artifact_uri, checksum: artifact_checksum };
                if !cached {
                    self.outcome.built.push(artifact_id);
                    self.send_download(download, downloads).await?;
                } else if download.uri.is_empty() {
                    self.outcome.cache_hits_without_uri.push(artifact_id);
                } else {
                    self.outcome.cache_hits.push(download);
                }
                if self.all_done() && self.outcome.failures.is_empty() {
                    debug!("all monitored artifacts finished; ending build log session early");
                    self.state = SessionState::Succeeded;
                    self.outcome.ended_early = true;
                    self.emit(SetupEventKind::BuildFinished { failed: false }).await?;
                    return Ok(true);
                }
            }
            BuildLogMessage::ArtifactFailed { artifact_id, error_message, log_uri } => {
                self.artifacts.insert(artifact_id, ArtifactState::Failed);
                let name = self.opts.monitored.get(&artifact_id).cloned().unwrap_or_else(|| artifact_id.to_string());
                self.last_artifact_error = Some(format!("Failed to build \"{name}\", error reported: {error_message}."));
                let log_uri = non_empty(log_uri);
                self.outcome.failures.push(ArtifactFailure { artifact_id,
                                                             name,
                                                             message: error_message.clone(),
                                                             log_uri: log_uri.clone() });
                self.unsubscribe(artifact_id).await;
                self.emit(SetupEventKind::ArtifactFailed { step: SetupStep::Build,
                                                           artifact_id,
                                                           log_uri,
                                                           error: error_message })
                    .await?;
            }
            BuildLogMessage::ArtifactProgress { artifact_id, timestamp, source, pipe_name, body } => {
                if self.artifacts.get(&artifact_id).is_some_and(|s| s.is_done()) {
                    return Ok(false);
                }
                self.emit(SetupEventKind::ArtifactBuildLog { artifact_id,
                                                             timestamp,
                                                             source,
                                                             pipe_name,
                                                             facility: body.facility,
                                                             message: body.msg })
                    .await?;
            }
            BuildLogMessage::Heartbeat => {
                self.emit(SetupEventKind::Heartbeat { at: Utc::now() }).await?;
            }
            BuildLogMessage::Unknown => debug!("ignoring unknown build log message"),
        }
        Ok(false)
    }

    /// Dedup de entregas repetidas. El progreso y los heartbeats no se deduplican.
    fn is_repeat(&mut self, msg: &BuildLogMessage) -> bool {
        if matches!(msg, BuildLogMessage::ArtifactProgress { .. } | BuildLogMessage::Heartbeat | BuildLogMessage::Unknown) {
            return false;
        }
        let key = match msg.artifact_id() {
            Some(id) => format!("{}.{id}", msg.type_name()),
            None => msg.type_name().to_string(),
        };
        !self.observed.insert(key)
    }

    fn all_done(&self) -> bool { self.artifacts.values().all(|s| s.is_done()) }

    async fn emit(&self, kind: SetupEventKind) -> Result<(), BuildLogError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(BuildLogError::Cancelled),
            r = self.producer.emit(kind) => r.map(|_| ()).map_err(BuildLogError::from),
        }
    }

    async fn send_download(&self,
                           download: ArtifactDownload,
                           downloads: &mpsc::Sender<ArtifactDownload>)
                           -> Result<(), BuildLogError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(BuildLogError::Cancelled),
            r = downloads.send(download) => {
                if r.is_err() {
                    debug!("download receiver dropped; descriptor discarded");
                }
                Ok(())
            }
        }
    }

    async fn unsubscribe(&self, artifact_id: ArtifactId) {
        if let Some(sup) = &self.supervisor {
            sup.unsubscribe(artifact_id).await;
        }
    }
}

fn non_empty(s: String) -> Option<String> { if s.is_empty() { None } else { Some(s) } }

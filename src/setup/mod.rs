//! Orquestación de un setup de runtime.
//!
//! Recorrido:
//! 1. Diff del grafo nuevo contra el anterior -> `ChangeSummary`.
//! 2. `ArtifactTotal` y `ArtifactsResolved` (nombres, ya construidos, fallidos).
//! 3. Artifacts ya construidos se descargan e instalan directo; el resto se
//!    sigue por una `BuildSession`, drenando sus descargas en paralelo.
//! 4. Cada descarga pasa por la caché local: hit -> sin fase Download; miss
//!    -> descarga, checksum, `store`. Luego la fase Install.
//! 5. Si hubo fallos de build, se bajan sus logs con el pool de workers.
//! 6. El índice de la caché se guarda al final; un fallo sólo se loguea.
//!
//! El checksum y las copias a la caché son IO bloqueante: corren en
//! `spawn_blocking` para no frenar la lectura de la sesión de build.
//!
//! Los fallos de un artifact se reportan como eventos y en `SetupReport`;
//! sólo los errores de protocolo, de build o de un consumidor caído cortan el setup.
mod download;
mod install;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use log::{debug, info, warn};
use run_buildlog::{ArtifactFailure, BuildLogError, BuildSession, Connector, FetchedLog, HttpLogFetcher, LogFetchPool,
                   LogFetcher, LogJob, SessionOptions, WebSocketConnector};
use run_core::hashing::verify_checksum;
use run_core::{diff, parse_graph, ArtifactDownload, ArtifactId, ArtifactMap, GraphSnapshot, ResolvedArtifact,
               SetupEventKind, SetupStep};
use run_persistence::{ArtifactCache, StoreOutcome};
use run_pipeline::{event_channel, ChangeSummaryDigester, ConsumerReport, EventProducer, ProgressDigester,
                   RuntimeEventConsumer, DEFAULT_CAPACITY};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use download::{DownloadBody, Downloader, HttpDownloader};
pub use install::ArtifactInstaller;

use crate::config::AppConfig;
use crate::errors::{ArtifactError, SetupError};

/// Subdirectorio de la caché donde se escriben las descargas en curso.
pub const STAGING_DIR: &str = ".staging";

pub struct SetupRequest {
    /// Id remoto del build a seguir.
    pub build_id: Uuid,
    /// Grafo del estado anterior; vacío en un proyecto nuevo.
    pub previous: ArtifactMap,
    pub snapshot: GraphSnapshot,
    /// Artifacts ya presentes en el entorno: no se reinstalan.
    pub installed: HashSet<ArtifactId>,
}

impl SetupRequest {
    pub fn new(build_id: Uuid, snapshot: GraphSnapshot) -> Self {
        Self { build_id, previous: ArtifactMap::new(), snapshot, installed: HashSet::new() }
    }
}

/// Fallo de descarga o instalación de un artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub artifact_id: ArtifactId,
    pub step: SetupStep,
    pub error: ArtifactError,
}

#[derive(Debug, Default)]
pub struct SetupReport {
    pub installed: Vec<ArtifactId>,
    pub step_failures: Vec<StepFailure>,
    /// Fallos de build reportados por el servicio (la sesión siguió igual).
    pub build_failures: Vec<ArtifactFailure>,
    pub build_logs: Vec<FetchedLog>,
    /// La sesión cerró al terminar todos los artifacts, sin esperar `build_succeeded`.
    pub ended_early: bool,
}

impl SetupReport {
    pub fn has_failures(&self) -> bool { !self.step_failures.is_empty() || !self.build_failures.is_empty() }
}

pub struct Setup<C, F> {
    config: AppConfig,
    cache: Arc<Mutex<ArtifactCache>>,
    connector: Arc<C>,
    fetcher: Arc<F>,
    downloader: Box<dyn Downloader>,
    installer: Box<dyn ArtifactInstaller>,
    cancel: CancellationToken,
}

impl Setup<WebSocketConnector, HttpLogFetcher> {
    /// Setup contra el servicio real: websocket para eventos, HTTP para
    /// archivos y logs, caché en el directorio configurado.
    pub fn from_config(config: AppConfig, installer: Box<dyn ArtifactInstaller>) -> Result<Self, SetupError> {
        let cache = ArtifactCache::from_config(&config.cache)?;
        let connector = Arc::new(WebSocketConnector::new(config.buildlog_url.clone()));
        Ok(Self::new(config,
                     cache,
                     connector,
                     Arc::new(HttpLogFetcher::default()),
                     Box::new(HttpDownloader::default()),
                     installer))
    }
}

impl<C: Connector, F: LogFetcher> Setup<C, F> {
    pub fn new(config: AppConfig,
               cache: ArtifactCache,
               connector: Arc<C>,
               fetcher: Arc<F>,
               downloader: Box<dyn Downloader>,
               installer: Box<dyn ArtifactInstaller>)
               -> Self {
        Self { config,
               cache: Arc::new(Mutex::new(cache)),
               connector,
               fetcher,
               downloader,
               installer,
               cancel: CancellationToken::new() }
    }

    /// Token raíz: cancelarlo abandona lecturas en curso y aborta las descargas de logs.
    pub fn cancel_token(&self) -> CancellationToken { self.cancel.clone() }

    /// No mantener el guard a través de un `.await`.
    pub fn cache(&self) -> MutexGuard<'_, ArtifactCache> { self.cache.lock().unwrap_or_else(PoisonError::into_inner) }

    /// `None` si todavía hay una copia a la caché en curso.
    pub fn into_cache(self) -> Option<ArtifactCache> {
        Arc::try_unwrap(self.cache).ok()
                                   .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner))
    }

    pub async fn run(&mut self, request: SetupRequest, producer: EventProducer) -> Result<SetupReport, SetupError> {
        let result = self.run_inner(request, &producer).await;
        let cache = self.cache.clone();
        let saved = tokio::task::spawn_blocking(move || {
                        let mut guard = cache.lock().unwrap_or_else(PoisonError::into_inner);
                        guard.save()
                    }).await;
        match saved {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("could not save artifact cache index: {e}"),
            Err(e) => warn!("artifact cache save task failed: {e}"),
        }
        result
    }

    async fn run_inner(&mut self, request: SetupRequest, producer: &EventProducer) -> Result<SetupReport, SetupError> {
        let artifacts = parse_graph(&request.snapshot);
        let requested = diff(&request.previous, &artifacts, true);
        let changed = diff(&request.previous, &artifacts, false);
        producer.emit(SetupEventKind::ChangeSummary { artifacts: artifacts.clone(), requested, changed }).await?;

        let names: IndexMap<ArtifactId, String> = artifacts.values()
                                                           .filter(|a| !request.installed.contains(&a.id))
                                                           .map(|a| (a.id, a.name_with_version()))
                                                           .collect();
        let built: IndexMap<ArtifactId, ArtifactDownload> = request.snapshot
                                                                   .built_artifacts()
                                                                   .into_iter()
                                                                   .filter(|d| names.contains_key(&d.artifact_id))
                                                                   .map(|d| (d.artifact_id, d))
                                                                   .collect();
        let failed: Vec<ResolvedArtifact> = request.snapshot
                                                   .failed_artifacts()
                                                   .into_iter()
                                                   .filter(|f| names.contains_key(&f.artifact_id))
                                                   .collect();
        let needs_build: IndexMap<ArtifactId, String> =
            names.iter()
                 .filter(|(id, _)| !built.contains_key(*id) && !failed.iter().any(|f| f.artifact_id == **id))
                 .map(|(id, n)| (*id, n.clone()))
                 .collect();
        info!("setup: {} artifact(s) to install, {} already built, {} to build, {} failed",
              names.len(),
              built.len(),
              needs_build.len(),
              failed.len());

        producer.emit(SetupEventKind::ArtifactTotal { total: names.len() }).await?;
        let already_built = built.keys()
                                 .map(|id| ResolvedArtifact { artifact_id: *id, log_uri: None, error: None })
                                 .collect();
        producer.emit(SetupEventKind::ArtifactsResolved { names, already_built, failed: failed.clone() }).await?;

        let mut report = SetupReport::default();
        for download in built.values() {
            self.deliver(download, &artifacts, producer, &mut report).await?;
        }

        let mut log_jobs: Vec<LogJob> = failed.iter()
                                              .filter_map(|f| {
                                                  f.log_uri
                                                   .clone()
                                                   .map(|log_uri| LogJob { artifact_id: f.artifact_id, log_uri })
                                              })
                                              .collect();
        if !needs_build.is_empty() {
            let total = needs_build.len() + built.len();
            match self.build(request.build_id, needs_build, total, &artifacts, producer, &mut report).await {
                Ok(()) => {}
                Err(SetupError::BuildLog(source @ BuildLogError::BuildFailed { .. })) => {
                    if let BuildLogError::BuildFailed { failures, .. } = &source {
                        log_jobs.extend(failure_jobs(failures));
                    }
                    let logs = self.fetch_logs(log_jobs).await;
                    return Err(SetupError::BuildFailed { source, logs });
                }
                Err(e) => return Err(e),
            }
        }
        log_jobs.extend(failure_jobs(&report.build_failures));
        report.build_logs = self.fetch_logs(log_jobs).await;
        Ok(report)
    }

    /// Sigue la sesión de build y drena sus descargas en paralelo.
    async fn build(&mut self,
                   build_id: Uuid,
                   monitored: IndexMap<ArtifactId, String>,
                   total: usize,
                   artifacts: &ArtifactMap,
                   producer: &EventProducer,
                   report: &mut SetupReport)
                   -> Result<(), SetupError> {
        let session_cancel = self.cancel.child_token();
        let mut opts = SessionOptions::new(build_id, monitored);
        opts.total = total;
        opts.verbose = self.config.verbose;
        opts.download_capacity = self.config.download_queue;
        opts.shutdown_grace = self.config.shutdown_grace;
        let (session, mut downloads) =
            BuildSession::open(self.connector.clone(), opts, producer.clone(), session_cancel.clone()).await?;

        let grace = self.config.shutdown_grace;
        let deliveries = async {
            while let Some(download) = downloads.next().await {
                if let Err(e) = self.deliver(&download, artifacts, producer, report).await {
                    session_cancel.cancel();
                    return Err(e);
                }
            }
            Ok(())
        };
        let (outcome, delivered) = tokio::join!(session.wait_with_grace(grace), deliveries);
        delivered?;
        let outcome = outcome?;

        report.ended_early = outcome.ended_early;
        for download in &outcome.cache_hits {
            self.deliver(download, artifacts, producer, report).await?;
        }
        for id in &outcome.cache_hits_without_uri {
            self.deliver_cached(*id, artifacts, producer, report).await?;
        }
        report.build_failures = outcome.failures;
        Ok(())
    }

    /// Caché local o descarga, y luego instalación.
    async fn deliver(&mut self,
                     download: &ArtifactDownload,
                     artifacts: &ArtifactMap,
                     producer: &EventProducer,
                     report: &mut SetupReport)
                     -> Result<(), SetupError> {
        let id = download.artifact_id;
        if self.cancel.is_cancelled() {
            return Err(SetupError::Cancelled);
        }
        let hit = self.cache().get(&id);
        if let Some(cached) = hit {
            debug!("artifact {id} served from local cache");
            return self.install(id, &cached, artifacts, producer, report).await;
        }

        let staged = match self.fetch(download, producer).await? {
            Ok(path) => path,
            Err(error) => {
                producer.emit(SetupEventKind::ArtifactFailed { step: SetupStep::Download,
                                                               artifact_id: id,
                                                               log_uri: None,
                                                               error: error.to_string() })
                        .await?;
                report.step_failures.push(StepFailure { artifact_id: id, step: SetupStep::Download, error });
                return Ok(());
            }
        };
        let (cache, source) = (self.cache.clone(), staged.clone());
        let stored = tokio::task::spawn_blocking(move || {
                         let mut guard = cache.lock().unwrap_or_else(PoisonError::into_inner);
                         guard.store(id, &source)
                     }).await;
        match stored {
            Ok(Ok(StoreOutcome::Stored)) => debug!("artifact {id} stored in cache"),
            Ok(Ok(other)) => debug!("artifact {id} not cached: {other:?}"),
            Ok(Err(e)) => warn!("could not cache artifact {id}: {e}"),
            Err(e) => warn!("cache store task for {id} failed: {e}"),
        }
        let result = self.install(id, &staged, artifacts, producer, report).await;
        remove_staged(&staged).await;
        result
    }

    /// Cache-hit remoto sin URI: sólo sirve si la caché local lo tiene.
    async fn deliver_cached(&mut self,
                            id: ArtifactId,
                            artifacts: &ArtifactMap,
                            producer: &EventProducer,
                            report: &mut SetupReport)
                            -> Result<(), SetupError> {
        let hit = self.cache().get(&id);
        match hit {
            Some(cached) => self.install(id, &cached, artifacts, producer, report).await,
            None => {
                let error = ArtifactError::Download { uri: String::new(),
                                                      message: format!("no download URI for artifact {id} and it is not cached locally") };
                producer.emit(SetupEventKind::ArtifactFailed { step: SetupStep::Download,
                                                               artifact_id: id,
                                                               log_uri: None,
                                                               error: error.to_string() })
                        .await?;
                report.step_failures.push(StepFailure { artifact_id: id, step: SetupStep::Download, error });
                Ok(())
            }
        }
    }

    /// Descarga al directorio de staging y verifica el checksum.
    /// El `Result` externo corta el setup; el interno es un fallo del artifact.
    async fn fetch(&self,
                   download: &ArtifactDownload,
                   producer: &EventProducer)
                   -> Result<Result<PathBuf, ArtifactError>, SetupError> {
        let id = download.artifact_id;
        let mut body = match self.downloader.open(&download.uri).await {
            Ok(b) => b,
            Err(e) => return Ok(Err(e)),
        };
        producer.emit(SetupEventKind::ArtifactStarted { step: SetupStep::Download, artifact_id: id, total: body.total() })
                .await?;

        let staging = self.cache().dir().join(STAGING_DIR);
        let dest = staging.join(format!("{id}.download"));
        let written = async {
            tokio::fs::create_dir_all(&staging).await?;
            tokio::fs::File::create(&dest).await
        };
        let mut file = match written.await {
            Ok(f) => f,
            Err(e) => return Ok(Err(e.into())),
        };
        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => {
                    remove_staged(&dest).await;
                    return Err(SetupError::Cancelled);
                }
                c = body.chunk() => c,
            };
            let bytes = match chunk {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    remove_staged(&dest).await;
                    return Ok(Err(e));
                }
            };
            if let Err(e) = file.write_all(&bytes).await {
                remove_staged(&dest).await;
                return Ok(Err(e.into()));
            }
            producer.emit(SetupEventKind::ArtifactProgress { step: SetupStep::Download,
                                                             artifact_id: id,
                                                             increment: bytes.len() as u64 })
                    .await?;
        }
        if let Err(e) = file.flush().await {
            remove_staged(&dest).await;
            return Ok(Err(e.into()));
        }
        drop(file);

        if !download.checksum.is_empty() {
            let (path, expected) = (dest.clone(), download.checksum.clone());
            let verified = match tokio::task::spawn_blocking(move || verify_checksum(&path, &expected)).await {
                Ok(r) => r.map_err(|e| ArtifactError::Checksum(e.to_string())),
                Err(e) => Err(ArtifactError::Io(format!("checksum task failed: {e}"))),
            };
            if let Err(e) = verified {
                remove_staged(&dest).await;
                return Ok(Err(e));
            }
        }
        producer.emit(SetupEventKind::ArtifactCompleted { step: SetupStep::Download,
                                                          artifact_id: id,
                                                          log_uri: None,
                                                          cached: false })
                .await?;
        Ok(Ok(dest))
    }

    async fn install(&self,
                     id: ArtifactId,
                     archive: &Path,
                     artifacts: &ArtifactMap,
                     producer: &EventProducer,
                     report: &mut SetupReport)
                     -> Result<(), SetupError> {
        let Some(artifact) = artifacts.get(&id) else {
            warn!("artifact {id} is not part of the graph; skipping install");
            return Ok(());
        };
        producer.emit(SetupEventKind::ArtifactStarted { step: SetupStep::Install, artifact_id: id, total: None })
                .await?;
        match self.installer.install(artifact, archive).await {
            Ok(files) => {
                if files > 0 {
                    producer.emit(SetupEventKind::ArtifactProgress { step: SetupStep::Install,
                                                                     artifact_id: id,
                                                                     increment: files })
                            .await?;
                }
                producer.emit(SetupEventKind::ArtifactCompleted { step: SetupStep::Install,
                                                                  artifact_id: id,
                                                                  log_uri: None,
                                                                  cached: false })
                        .await?;
                report.installed.push(id);
            }
            Err(error) => {
                warn!("installing {} failed: {error}", artifact.name_with_version());
                producer.emit(SetupEventKind::ArtifactFailed { step: SetupStep::Install,
                                                               artifact_id: id,
                                                               log_uri: None,
                                                               error: error.to_string() })
                        .await?;
                report.step_failures.push(StepFailure { artifact_id: id, step: SetupStep::Install, error });
            }
        }
        Ok(())
    }

    async fn fetch_logs(&self, jobs: Vec<LogJob>) -> Vec<FetchedLog> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let pool = LogFetchPool::new(self.fetcher.clone(), self.config.log_fetch_workers, self.cancel.child_token());
        for job in jobs {
            let artifact_id = job.artifact_id;
            if let Err(e) = pool.submit(job) {
                warn!("could not queue build log of {artifact_id}: {e}");
            }
        }
        pool.finish(self.config.shutdown_grace, self.config.shutdown_hard).await
    }
}

fn failure_jobs(failures: &[ArtifactFailure]) -> impl Iterator<Item = LogJob> + '_ {
    failures.iter()
            .filter_map(|f| f.log_uri.clone().map(|log_uri| LogJob { artifact_id: f.artifact_id, log_uri }))
}

async fn remove_staged(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("could not remove staged download {}: {e}", path.display());
    }
}

/// Corre el setup con un consumidor en su propia tarea.
/// Devuelve el resultado del setup y el del consumidor.
pub async fn run_with_consumer<C, F, P, S>(setup: &mut Setup<C, F>,
                                           request: SetupRequest,
                                           progress: P,
                                           summary: S)
                                           -> (Result<SetupReport, SetupError>, Result<ConsumerReport, SetupError>)
    where C: Connector,
          F: LogFetcher,
          P: ProgressDigester + Send + 'static,
          S: ChangeSummaryDigester + Send + 'static
{
    let (producer, stream) = event_channel(DEFAULT_CAPACITY);
    let consumer = tokio::spawn(async move {
        let mut consumer = RuntimeEventConsumer::new(progress, summary);
        consumer.run(stream).await
    });
    let result = setup.run(request, producer).await;
    let consumed = match consumer.await {
        Ok(r) => r.map_err(SetupError::from),
        Err(e) => Err(SetupError::Task(e.to_string())),
    };
    (result, consumed)
}

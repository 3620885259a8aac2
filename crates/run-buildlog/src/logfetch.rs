//! Pool fijo de workers que descarga logs históricos de build.
//!
//! Los trabajos se envían por un canal compartido; cada worker toma el
//! siguiente trabajo libre. La cancelación aborta las descargas en curso y
//! `finish` aplica un período de gracia seguido de un timeout duro.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use run_core::ArtifactId;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

pub const DEFAULT_WORKERS: usize = 5;

#[async_trait]
pub trait LogFetcher: Send + Sync + 'static {
    async fn fetch(&self, uri: &str) -> Result<String, FetchError>;
}

/// Descarga por HTTP con reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpLogFetcher {
    client: reqwest::Client,
}

impl HttpLogFetcher {
    pub fn new(client: reqwest::Client) -> Self { Self { client } }
}

#[async_trait]
impl LogFetcher for HttpLogFetcher {
    async fn fetch(&self, uri: &str) -> Result<String, FetchError> {
        let http = |e: reqwest::Error| FetchError::Http { uri: uri.to_string(), message: e.to_string() };
        let resp = self.client.get(uri).send().await.map_err(http)?.error_for_status().map_err(http)?;
        resp.text().await.map_err(http)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogJob {
    pub artifact_id: ArtifactId,
    pub log_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedLog {
    pub artifact_id: ArtifactId,
    pub log_uri: String,
    pub result: Result<String, FetchError>,
}

pub struct LogFetchPool {
    jobs: Option<mpsc::UnboundedSender<LogJob>>,
    results: mpsc::UnboundedReceiver<FetchedLog>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl LogFetchPool {
    pub fn new<F: LogFetcher>(fetcher: Arc<F>, workers: usize, cancel: CancellationToken) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel::<LogJob>();
        let (res_tx, res_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let workers = (0..workers.max(1)).map(|n| {
                                              tokio::spawn(worker(n,
                                                                  fetcher.clone(),
                                                                  job_rx.clone(),
                                                                  res_tx.clone(),
                                                                  cancel.clone()))
                                          })
                                          .collect();
        Self { jobs: Some(job_tx), results: res_rx, workers, cancel }
    }

    pub fn submit(&self, job: LogJob) -> Result<(), FetchError> {
        let tx = self.jobs.as_ref().ok_or(FetchError::PoolClosed)?;
        tx.send(job).map_err(|_| FetchError::PoolClosed)
    }

    pub fn cancel(&self) { self.cancel.cancel(); }

    /// Cierra la cola y espera a que los workers terminen. Si no terminan
    /// antes de `hard`, se cancelan; tras `grace` adicional, se abortan.
    pub async fn finish(mut self, grace: Duration, hard: Duration) -> Vec<FetchedLog> {
        self.jobs.take();
        let mut pending = std::mem::take(&mut self.workers);
        let deadline = tokio::time::Instant::now() + hard;
        let mut still_running = Vec::new();
        for mut h in pending.drain(..) {
            if tokio::time::timeout_at(deadline, &mut h).await.is_err() {
                still_running.push(h);
            }
        }
        if !still_running.is_empty() {
            debug!("log fetch workers exceeded {hard:?}; cancelling");
            self.cancel.cancel();
            let grace_deadline = tokio::time::Instant::now() + grace;
            for mut h in still_running {
                if tokio::time::timeout_at(grace_deadline, &mut h).await.is_err() {
                    warn!("log fetch worker did not observe cancellation; aborting");
                    h.abort();
                }
            }
        }
        let mut out = Vec::new();
        while let Ok(r) = self.results.try_recv() {
            out.push(r);
        }
        out
    }
}

async fn worker<F: LogFetcher>(n: usize,
                               fetcher: Arc<F>,
                               jobs: Arc<Mutex<mpsc::UnboundedReceiver<LogJob>>>,
                               results: mpsc::UnboundedSender<FetchedLog>,
                               cancel: CancellationToken) {
    loop {
        let job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                j = rx.recv() => j,
            }
        };
        let Some(job) = job else { break };
        debug!("log worker {n} fetching {}", job.log_uri);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            r = fetcher.fetch(&job.log_uri) => r,
        };
        let _ = results.send(FetchedLog { artifact_id: job.artifact_id, log_uri: job.log_uri, result });
    }
}

//! Descarga de archivos de artifacts.
//!
//! El orquestador lee el cuerpo por chunks para poder emitir progreso en
//! bytes; `Downloader` sólo abre la transferencia.
use async_trait::async_trait;

use crate::errors::ArtifactError;

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn open(&self, uri: &str) -> Result<Box<dyn DownloadBody>, ArtifactError>;
}

#[async_trait]
pub trait DownloadBody: Send {
    /// Tamaño total si el servidor lo informa.
    fn total(&self) -> Option<u64>;
    /// Próximo chunk; `None` al terminar.
    async fn chunk(&mut self) -> Result<Option<Vec<u8>>, ArtifactError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(client: reqwest::Client) -> Self { Self { client } }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn open(&self, uri: &str) -> Result<Box<dyn DownloadBody>, ArtifactError> {
        let fail = |e: reqwest::Error| ArtifactError::Download { uri: uri.to_string(), message: e.to_string() };
        let response = self.client.get(uri).send().await.map_err(fail)?.error_for_status().map_err(fail)?;
        Ok(Box::new(HttpBody { uri: uri.to_string(), response }))
    }
}

struct HttpBody {
    uri: String,
    response: reqwest::Response,
}

#[async_trait]
impl DownloadBody for HttpBody {
    fn total(&self) -> Option<u64> { self.response.content_length() }

    async fn chunk(&mut self) -> Result<Option<Vec<u8>>, ArtifactError> {
        match self.response.chunk().await {
            Ok(c) => Ok(c.map(|b| b.to_vec())),
            Err(e) => Err(ArtifactError::Download { uri: self.uri.clone(), message: e.to_string() }),
        }
    }
}

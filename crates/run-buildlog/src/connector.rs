//! Costuras de conexión: el read loop no conoce el transporte.
use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::message::{BuildLogMessage, SubscribeRequest};

/// Una conexión duplex del stream de build.
#[async_trait]
pub trait BuildLogConnection: Send {
    /// Siguiente mensaje decodificado. Suspende hasta que llega uno.
    async fn read_message(&mut self) -> Result<BuildLogMessage, ConnectionError>;
    async fn send_request(&mut self, request: &SubscribeRequest) -> Result<(), ConnectionError>;
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Abre conexiones nuevas (una por suscripción).
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: BuildLogConnection + 'static;
    async fn connect(&self) -> Result<Self::Conn, ConnectionError>;
}

//! run-buildlog: cliente del stream de eventos del servicio de build.
//!
//! Responsabilidades:
//! - `message`: mensajes JSON del protocolo (entrada y suscripción).
//! - `connector` / `websocket` / `memory`: conexiones duplex intercambiables.
//! - `session`: máquina de estados por build y por artifact; traduce el
//!   protocolo a eventos de setup y entrega descriptores de descarga.
//! - `supervisor`: suscripciones verbose por artifact como subtareas cancelables.
//! - `logfetch`: pool fijo de workers que descarga logs históricos.
pub mod connector;
pub mod error;
pub mod logfetch;
pub mod memory;
pub mod message;
pub mod session;
pub mod supervisor;
pub mod websocket;

pub use connector::{BuildLogConnection, Connector};
pub use error::{BuildLogError, ConnectionError, FetchError};
pub use logfetch::{FetchedLog, HttpLogFetcher, LogFetchPool, LogFetcher, LogJob};
pub use memory::{InMemoryConnection, InMemoryConnector, ScriptItem};
pub use message::{BuildLogMessage, ProgressBody, SubscribeRequest};
pub use session::{ArtifactFailure, BuildSession, DownloadStream, SessionOptions, SessionOutcome, SessionState};
pub use supervisor::LogSupervisor;
pub use websocket::{WebSocketConnection, WebSocketConnector};

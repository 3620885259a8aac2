//! run-pipeline: cola ordenada productor/consumidor de eventos de setup.
//!
//! - `event_channel` crea el par (`EventProducer`, `EventStream`).
//! - `RuntimeEventConsumer` digiere el stream en orden, mantiene agregados
//!   (totales, fallos, inicio de instalación) y los reenvía a digesters.
//! - `MultiplexedProgress` reparte el mismo evento a varios digesters.
mod channel;
mod consumer;
mod digester;
mod errors;
mod multiplex;

pub use channel::{event_channel, EventProducer, EventStream, DEFAULT_CAPACITY};
pub use consumer::{ConsumerReport, RuntimeEventConsumer};
pub use digester::{BuildLogLine, ChangeSummaryDigester, NoopDigester, ProgressDigester};
pub use errors::{DigestError, PipelineError};
pub use multiplex::MultiplexedProgress;

//! Runflow
//!
//! Núcleo de orquestación de builds de runtime:
//! - `setup` sigue el grafo de artifacts hasta tenerlos descargados,
//!   cacheados e instalados, emitiendo eventos de ciclo de vida ordenados.
//! - `summary` arma el resumen de cambios en texto plano.
//! - `config` y `logging` cubren el entorno de ejecución.
//!
//! Los crates del workspace se reexportan para que un cliente dependa sólo de éste.

pub mod config;
pub mod errors;
pub mod logging;
pub mod setup;
pub mod summary;

pub use config::AppConfig;
pub use errors::{ArtifactError, SetupError};
pub use setup::{run_with_consumer, ArtifactInstaller, DownloadBody, Downloader, HttpDownloader, Setup, SetupReport,
                SetupRequest, StepFailure};
pub use summary::{change_summary_lines, SummaryPrinter};

pub use run_buildlog as buildlog;
pub use run_core as core;
pub use run_persistence as persistence;
pub use run_pipeline as pipeline;

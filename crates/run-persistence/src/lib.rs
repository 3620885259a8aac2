//! run-persistence: caché en disco de artifacts descargados.
//!
//! Responsabilidades:
//! - Guardar archivos de artifacts bajo un presupuesto de tamaño, con
//!   desalojo LRU estricto.
//! - Persistir el índice (entradas + tamaño máximo) como un único JSON en el
//!   directorio de la caché, en checkpoints controlados por el llamador.
//! - Resolver configuración desde el entorno (`CacheConfig::from_env`).
//!
//! Limitación conocida: el índice no está pensado para mutación concurrente
//! desde varios procesos sobre el mismo directorio; el llamador debe
//! serializar el acceso externamente.
pub mod cache;
pub mod config;
pub mod error;

pub use cache::{ArtifactCache, CachedArtifact, StoreOutcome, INDEX_FILE_NAME};
pub use config::{init_dotenv, CacheConfig};
pub use error::PersistenceError;

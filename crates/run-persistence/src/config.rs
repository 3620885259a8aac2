//! Carga de configuración de la caché desde variables de entorno.
//! Usa convención `RUNFLOW_ARTIFACT_CACHE_*`.

use std::env;
use std::path::PathBuf;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

pub const MB: u64 = 1024 * 1024;
pub const DEFAULT_MAX_SIZE_MB: u64 = 500;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub dir: PathBuf,
    /// bytes
    pub max_size: u64,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let dir = env::var("RUNFLOW_ARTIFACT_CACHE_DIR").ok()
                                                         .filter(|v| !v.is_empty())
                                                         .map(PathBuf::from)
                                                         .unwrap_or_else(default_dir);
        // sólo un entero positivo reemplaza el default
        let size_mb = env::var("RUNFLOW_ARTIFACT_CACHE_SIZE_MB").ok()
                                                                 .and_then(|v| v.parse::<u64>().ok())
                                                                 .filter(|v| *v > 0)
                                                                 .unwrap_or(DEFAULT_MAX_SIZE_MB);
        Self { dir, max_size: size_mb * MB }
    }
}

fn default_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(env::temp_dir).join("runflow").join("artifacts")
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() { Lazy::force(&DOTENV_LOADED); }

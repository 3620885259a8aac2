//! Configuración central de la orquestación.
//! Carga variables de entorno (.env) una sola vez y arma `AppConfig`, que
//! luego se pasa explícitamente a `Setup`: no hay instancia global.
use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use run_persistence::CacheConfig;

pub const DEFAULT_BUILDLOG_URL: &str = "wss://platform.runflow.dev/sv/buildlog-streamer";
pub const DEFAULT_LOG_FETCH_WORKERS: usize = 5;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;
pub const DEFAULT_SHUTDOWN_HARD_SECS: u64 = 10;
pub const DEFAULT_DOWNLOAD_QUEUE: usize = 8;

static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

/// Configuración de una corrida de setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Endpoint websocket del stream de eventos de build.
    pub buildlog_url: String,
    /// Abre una suscripción de logs por artifact.
    pub verbose: bool,
    pub log_fetch_workers: usize,
    /// Tiempo que se concede a las tareas para observar la cancelación.
    pub shutdown_grace: Duration,
    /// Tope duro antes de abortar descargas de logs pendientes.
    pub shutdown_hard: Duration,
    /// Capacidad del handoff de descriptores de descarga.
    pub download_queue: usize,
    pub cache: CacheConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let buildlog_url = env::var("RUNFLOW_BUILDLOG_URL").ok()
                                                           .filter(|v| !v.is_empty())
                                                           .unwrap_or_else(|| DEFAULT_BUILDLOG_URL.to_string());
        let verbose = env::var("RUNFLOW_BUILD_VERBOSE").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);
        Self { buildlog_url,
               verbose,
               log_fetch_workers: positive("RUNFLOW_LOG_FETCH_WORKERS", DEFAULT_LOG_FETCH_WORKERS),
               shutdown_grace: Duration::from_secs(positive("RUNFLOW_SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS)),
               shutdown_hard: Duration::from_secs(positive("RUNFLOW_SHUTDOWN_HARD_SECS", DEFAULT_SHUTDOWN_HARD_SECS)),
               download_queue: positive("RUNFLOW_DOWNLOAD_QUEUE", DEFAULT_DOWNLOAD_QUEUE),
               cache: CacheConfig::from_env() }
    }

    /// Valores por defecto con la caché en `cache`. Útil en tests.
    pub fn with_cache(cache: CacheConfig) -> Self {
        Self { buildlog_url: DEFAULT_BUILDLOG_URL.to_string(),
               verbose: false,
               log_fetch_workers: DEFAULT_LOG_FETCH_WORKERS,
               shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
               shutdown_hard: Duration::from_secs(DEFAULT_SHUTDOWN_HARD_SECS),
               download_queue: DEFAULT_DOWNLOAD_QUEUE,
               cache }
    }
}

fn positive<T: std::str::FromStr + PartialOrd + Default>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok()).filter(|v| *v > T::default()).unwrap_or(default)
}

//! Formato persistido del índice de la caché.
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use run_core::ArtifactId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedArtifact {
    pub id: ArtifactId,
    pub archive_path: PathBuf,
    pub size: u64,
    /// Contador monotónico de accesos; define el orden LRU.
    pub last_access_time: u64,
    /// Reloj de pared del último acceso (sólo diagnóstico).
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CacheIndex {
    #[serde(default)]
    pub max_size: u64,
    #[serde(default)]
    pub artifacts: Vec<CachedArtifact>,
}

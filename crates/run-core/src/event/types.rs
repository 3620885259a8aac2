//! Tipos de evento del setup y estructura `SetupEvent`.
//!
//! Rol en el flujo:
//! - El productor (cliente de build + descargas + instalador) emite
//!   `SetupEventKind` en el orden exacto en que se conocen.
//! - El handle del pipeline los envuelve en `SetupEvent` asignando `seq`
//!   estrictamente creciente.
//! - El consumidor los digiere en orden; nunca se reordenan.
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{ArtifactChangeset, ArtifactId, ArtifactMap};

/// Fase de un artifact dentro del setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupStep {
    Build,
    Download,
    Install,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Build => "build",
            Self::Download => "download",
            Self::Install => "install",
        };
        f.write_str(s)
    }
}

/// Artifact cuyo resultado de build ya se conocía antes de abrir la sesión.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedArtifact {
    pub artifact_id: ArtifactId,
    pub log_uri: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SetupEventKind {
    /// Cantidad de artifacts a instalar. Se fija una única vez y antes de
    /// cualquier `BuildStarted`.
    ArtifactTotal { total: usize },
    /// Resumen de cambios: mapa nuevo, changeset pedido por el usuario y changeset completo.
    ChangeSummary { artifacts: ArtifactMap, requested: ArtifactChangeset, changed: ArtifactChangeset },
    /// Nombres resueltos de artifacts y los que ya estaban construidos (o fallidos) remotamente.
    ArtifactsResolved {
        names: IndexMap<ArtifactId, String>,
        already_built: Vec<ResolvedArtifact>,
        failed: Vec<ResolvedArtifact>,
    },
    BuildStarted { total: usize },
    BuildFinished { failed: bool },
    /// `total` es la cantidad de bytes (Download) o de archivos (Install); None en Build.
    ArtifactStarted { step: SetupStep, artifact_id: ArtifactId, total: Option<u64> },
    ArtifactProgress { step: SetupStep, artifact_id: ArtifactId, increment: u64 },
    /// Línea de log fina de un build (sólo en modo verbose).
    ArtifactBuildLog {
        artifact_id: ArtifactId,
        timestamp: String,
        source: String,
        pipe_name: String,
        facility: String,
        message: String,
    },
    ArtifactCompleted { step: SetupStep, artifact_id: ArtifactId, log_uri: Option<String>, cached: bool },
    ArtifactFailed { step: SetupStep, artifact_id: ArtifactId, log_uri: Option<String>, error: String },
    Heartbeat { at: DateTime<Utc> },
    /// Kind desconocido (productor más nuevo que el consumidor).
    #[serde(other)]
    Unknown,
}

impl SetupEventKind {
    /// Nombre estable del variant (útil en logs).
    pub fn name(&self) -> &'static str {
        match self {
            Self::ArtifactTotal { .. } => "artifact_total",
            Self::ChangeSummary { .. } => "change_summary",
            Self::ArtifactsResolved { .. } => "artifacts_resolved",
            Self::BuildStarted { .. } => "build_started",
            Self::BuildFinished { .. } => "build_finished",
            Self::ArtifactStarted { .. } => "artifact_started",
            Self::ArtifactProgress { .. } => "artifact_progress",
            Self::ArtifactBuildLog { .. } => "artifact_build_log",
            Self::ArtifactCompleted { .. } => "artifact_completed",
            Self::ArtifactFailed { .. } => "artifact_failed",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupEvent {
    pub seq: u64, // asignado por el productor (orden de emisión)
    pub kind: SetupEventKind,
    pub ts: DateTime<Utc>, // metadato
}

//! Parseo de snapshots del grafo de dependencias.
//!
//! Dos representaciones upstream se soportan:
//! - `BuildPlanSnapshot`: terminales -> artifacts -> steps -> sources.
//! - `RecipeSnapshot`: lista plana de ingredientes resueltos.
//!
//! El parseo es best-effort: un nodo malformado o no resoluble se descarta
//! con `warn!` y el resto del grafo sigue construyéndose.
mod buildplan;
mod recipe;

use serde::Deserialize;

pub use buildplan::{ArtifactStatus, BuildPlanSnapshot, Requirement};
pub use recipe::RecipeSnapshot;

use crate::errors::CoreError;
use crate::event::ResolvedArtifact;
use crate::model::{ArtifactDownload, ArtifactMap};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GraphSnapshot {
    BuildPlan(BuildPlanSnapshot),
    Recipe(RecipeSnapshot),
}

impl GraphSnapshot {
    /// Detecta la representación a partir del documento JSON.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        serde_json::from_str(raw).map_err(|e| CoreError::UnrecognizedSnapshot(e.to_string()))
    }

    /// Artifacts que el servicio remoto ya construyó y pueden descargarse sin build.
    pub fn built_artifacts(&self) -> Vec<ArtifactDownload> {
        match self {
            Self::BuildPlan(plan) => plan.built_artifacts(),
            Self::Recipe(_) => Vec::new(),
        }
    }

    /// Artifacts que el servicio ya reportó como fallidos. Sólo el build plan
    /// conoce estados; una receta no informa fallos.
    pub fn failed_artifacts(&self) -> Vec<ResolvedArtifact> {
        match self {
            Self::BuildPlan(plan) => plan.failed_artifacts(),
            Self::Recipe(_) => Vec::new(),
        }
    }
}

/// Construye el mapa uniforme de artifacts a partir de cualquiera de las representaciones.
pub fn parse_graph(snapshot: &GraphSnapshot) -> ArtifactMap {
    match snapshot {
        GraphSnapshot::BuildPlan(plan) => plan.artifact_map(),
        GraphSnapshot::Recipe(recipe) => recipe.artifact_map(),
    }
}

/// Decodifica un nodo individual; si falla, lo reporta y devuelve `None`.
pub(crate) fn decode_node<T: serde::de::DeserializeOwned>(what: &str, raw: &serde_json::Value) -> Option<T> {
    match serde_json::from_value(raw.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("skipping malformed {what} node: {e}");
            None
        }
    }
}

//! Mensajes del protocolo del stream de build.
//!
//! Entrantes: discriminados por el campo `type`. Un `type` desconocido se
//! decodifica como `Unknown` y se ignora (el protocolo agrega kinds con el
//! tiempo). Salientes: una única solicitud de suscripción por conexión.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConnectionError;
use run_core::ArtifactId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressBody {
    #[serde(default)]
    pub facility: String,
    #[serde(default)]
    pub msg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildLogMessage {
    BuildStarted,
    BuildSucceeded,
    BuildFailed {
        #[serde(default)]
        error_message: String,
    },
    ArtifactStarted {
        artifact_id: ArtifactId,
        #[serde(default)]
        cache_hit: bool,
    },
    ArtifactSucceeded {
        artifact_id: ArtifactId,
        #[serde(default)]
        artifact_uri: String,
        #[serde(default)]
        artifact_checksum: String,
        #[serde(default)]
        log_uri: String,
        #[serde(default)]
        cache_hit: bool,
    },
    ArtifactFailed {
        artifact_id: ArtifactId,
        #[serde(default)]
        error_message: String,
        #[serde(default)]
        log_uri: String,
    },
    ArtifactProgress {
        artifact_id: ArtifactId,
        #[serde(default)]
        timestamp: String,
        #[serde(default)]
        source: String,
        #[serde(default)]
        pipe_name: String,
        body: ProgressBody,
    },
    Heartbeat,
    #[serde(other)]
    Unknown,
}

impl BuildLogMessage {
    /// Decodifica un mensaje de texto. JSON inválido o un kind conocido con
    /// campos faltantes es `Malformed`.
    pub fn decode(raw: &str) -> Result<Self, ConnectionError> {
        serde_json::from_str(raw).map_err(|e| ConnectionError::Malformed(format!("{e}: {raw}")))
    }

    /// Valor del discriminador (para dedup y logs).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::BuildStarted => "build_started",
            Self::BuildSucceeded => "build_succeeded",
            Self::BuildFailed { .. } => "build_failed",
            Self::ArtifactStarted { .. } => "artifact_started",
            Self::ArtifactSucceeded { .. } => "artifact_succeeded",
            Self::ArtifactFailed { .. } => "artifact_failed",
            Self::ArtifactProgress { .. } => "artifact_progress",
            Self::Heartbeat => "heartbeat",
            Self::Unknown => "unknown",
        }
    }

    pub fn artifact_id(&self) -> Option<ArtifactId> {
        match self {
            Self::ArtifactStarted { artifact_id, .. }
            | Self::ArtifactSucceeded { artifact_id, .. }
            | Self::ArtifactFailed { artifact_id, .. }
            | Self::ArtifactProgress { artifact_id, .. } => Some(*artifact_id),
            _ => None,
        }
    }
}

/// Solicitud de suscripción: build completo o log de un artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubscribeRequest {
    Build {
        #[serde(rename = "recipeID")]
        recipe_id: Uuid,
    },
    Artifact {
        #[serde(rename = "artifactID")]
        artifact_id: ArtifactId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_known_and_unknown_kinds() {
        let id = ArtifactId::new_v4();
        let m = BuildLogMessage::decode(&json!({"type": "artifact_started", "artifact_id": id, "cache_hit": true}).to_string())
            .unwrap();
        assert_eq!(m, BuildLogMessage::ArtifactStarted { artifact_id: id, cache_hit: true });

        let m = BuildLogMessage::decode(r#"{"type": "artifact_teleported", "whatever": 1}"#).unwrap();
        assert_eq!(m, BuildLogMessage::Unknown);

        let m = BuildLogMessage::decode(&json!({
            "type": "artifact_progress", "artifact_id": id, "timestamp": "t", "source": "s",
            "pipe_name": "stdout", "body": {"facility": "INFO", "msg": "compiling"}
        }).to_string()).unwrap();
        assert_eq!(m.artifact_id(), Some(id));
        assert_eq!(m.type_name(), "artifact_progress");
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(BuildLogMessage::decode("not json"), Err(ConnectionError::Malformed(_))));
        assert!(matches!(BuildLogMessage::decode(r#"{"type": "artifact_started"}"#), Err(ConnectionError::Malformed(_))));
    }

    #[test]
    fn subscribe_requests_use_wire_field_names() {
        let rid = Uuid::new_v4();
        let aid = ArtifactId::new_v4();
        assert_eq!(serde_json::to_value(SubscribeRequest::Build { recipe_id: rid }).unwrap(), json!({"recipeID": rid}));
        assert_eq!(serde_json::to_value(SubscribeRequest::Artifact { artifact_id: aid }).unwrap(), json!({"artifactID": aid}));
    }
}

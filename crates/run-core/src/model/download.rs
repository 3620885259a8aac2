use serde::{Deserialize, Serialize};

use super::ArtifactId;

/// Artifact listo para descargarse: URI sin firmar y checksum sha256 (hex).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDownload {
    pub artifact_id: ArtifactId,
    pub uri: String,
    pub checksum: String,
}

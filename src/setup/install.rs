use std::path::Path;

use async_trait::async_trait;
use run_core::Artifact;

use crate::errors::ArtifactError;

/// Punto de extensión del instalador: desempaqueta `archive` en el entorno.
/// Devuelve la cantidad de archivos instalados (progreso de la fase Install).
#[async_trait]
pub trait ArtifactInstaller: Send + Sync {
    async fn install(&self, artifact: &Artifact, archive: &Path) -> Result<u64, ArtifactError>;
}

//! Modelo de artifacts: identidad, mapa de grafo, changesets y descriptores de descarga.

mod artifact;
mod changeset;
mod download;

pub use artifact::{named_map, recursive_dependencies_for, Artifact, ArtifactId, ArtifactMap, NamespaceKind};
pub use changeset::{diff, ArtifactChangeset, ArtifactUpdate};
pub use download::ArtifactDownload;

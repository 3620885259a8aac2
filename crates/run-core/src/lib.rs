//! run-core: modelo de grafo de artifacts, changesets y eventos de setup.
//!
//! Este crate no hace IO de red ni conoce la presentación; sólo define los
//! tipos que circulan entre el cliente de build, el pipeline de eventos y la
//! caché de artifacts.
pub mod constants;
pub mod errors;
pub mod event;
pub mod graph;
pub mod hashing;
pub mod model;

pub use errors::CoreError;
pub use event::{ResolvedArtifact, SetupEvent, SetupEventKind, SetupStep};
pub use graph::{parse_graph, GraphSnapshot};
pub use model::{diff, named_map, recursive_dependencies_for, Artifact, ArtifactChangeset, ArtifactDownload, ArtifactId,
                ArtifactMap, ArtifactUpdate, NamespaceKind};

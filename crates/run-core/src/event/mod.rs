//! Eventos de ciclo de vida del setup de un runtime.

mod types;

pub use types::{ResolvedArtifact, SetupEvent, SetupEventKind, SetupStep};

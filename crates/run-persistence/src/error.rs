//! Errores de persistencia.
//! Mapea errores de IO / JSON a variantes semánticas de la caché.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("'{0}' is not a directory; cannot use as artifact cache")]
    NotADirectory(PathBuf),
    #[error("io error on '{path}': {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("corrupt cache index: {0}")]
    CorruptIndex(String),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

//! Caché de artifacts en disco con desalojo LRU.
//!
//! Invariantes:
//! - `current_size` es siempre la suma de `size` de las entradas y nunca
//!   supera `max_size` tras un `store`.
//! - El orden de desalojo es estrictamente por `last_access_time` ascendente.
//!   Es un contador monotónico persistido, no un timestamp, así que el orden
//!   es exacto aunque dos accesos ocurran en el mismo segundo.
//! - Un artifact más grande que `max_size` nunca se guarda ni provoca desalojos.
mod index;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, warn};
use run_core::ArtifactId;

pub use index::CachedArtifact;
use index::CacheIndex;

use crate::config::{CacheConfig, MB};
use crate::error::PersistenceError;

pub const INDEX_FILE_NAME: &str = "artifact-cache.json";

/// Tiempo de copia acumulado a partir del cual `save` deja un diagnóstico.
const SLOW_COPY_THRESHOLD: Duration = Duration::from_secs(5);

/// Resultado de `ArtifactCache::store`. Ninguno de los rechazos es un error:
/// la caché es una optimización.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored,
    AlreadyCached,
    /// El artifact solo excede el tamaño máximo.
    TooLarge,
    /// No hubo entradas desalojables suficientes.
    NoRoom,
}

#[derive(Debug)]
pub struct ArtifactCache {
    dir: PathBuf,
    index_path: PathBuf,
    max_size: u64,
    current_size: u64,
    artifacts: HashMap<ArtifactId, CachedArtifact>,
    clock: u64,
    time_spent_copying: Duration,
    size_copied: u64,
}

impl ArtifactCache {
    pub fn from_config(cfg: &CacheConfig) -> Result<Self, PersistenceError> { Self::open(&cfg.dir, cfg.max_size) }

    /// Abre (o crea) la caché en `dir`. Si existe un índice se recarga; el
    /// `max_size` configurado prevalece sobre el persistido.
    pub fn open(dir: impl AsRef<Path>, max_size: u64) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        if dir.exists() && !dir.is_dir() {
            return Err(PersistenceError::NotADirectory(dir));
        }
        fs::create_dir_all(&dir).map_err(PersistenceError::io(&dir))?;

        let index_path = dir.join(INDEX_FILE_NAME);
        let index = if index_path.is_file() {
            let raw = fs::read(&index_path).map_err(PersistenceError::io(&index_path))?;
            serde_json::from_slice::<CacheIndex>(&raw).map_err(|e| PersistenceError::CorruptIndex(e.to_string()))?
        } else {
            CacheIndex::default()
        };
        if index.max_size != 0 && index.max_size != max_size {
            debug!("artifact cache max size changed from {} to {} bytes", index.max_size, max_size);
        }

        let clock = index.artifacts.iter().map(|a| a.last_access_time).max().unwrap_or(0);
        let current_size = index.artifacts.iter().map(|a| a.size).sum();
        let artifacts: HashMap<_, _> = index.artifacts.into_iter().map(|a| (a.id, a)).collect();
        debug!("opened artifact cache at '{}' containing {} artifacts occupying {:.1}/{:.1} MB",
               dir.display(),
               artifacts.len(),
               current_size as f64 / MB as f64,
               max_size as f64 / MB as f64);

        Ok(Self { dir,
                  index_path,
                  max_size,
                  current_size,
                  artifacts,
                  clock,
                  time_spent_copying: Duration::ZERO,
                  size_copied: 0 })
    }

    pub fn dir(&self) -> &Path { &self.dir }
    pub fn max_size(&self) -> u64 { self.max_size }
    pub fn current_size(&self) -> u64 { self.current_size }
    pub fn len(&self) -> usize { self.artifacts.len() }
    pub fn is_empty(&self) -> bool { self.artifacts.is_empty() }
    pub fn contains(&self, id: &ArtifactId) -> bool { self.artifacts.contains_key(id) }
    pub fn entry(&self, id: &ArtifactId) -> Option<&CachedArtifact> { self.artifacts.get(id) }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Ruta del artifact cacheado; en un hit actualiza su tiempo de acceso.
    pub fn get(&mut self, id: &ArtifactId) -> Option<PathBuf> {
        let now = self.tick();
        let entry = self.artifacts.get_mut(id)?;
        debug!("fetched cached artifact '{id}' as '{}'; updating access time", entry.archive_path.display());
        entry.last_access_time = now;
        entry.accessed_at = Utc::now();
        Some(entry.archive_path.clone())
    }

    /// Copia `source` a la caché bajo el nombre del id, desalojando por LRU
    /// lo necesario.
    pub fn store(&mut self, id: ArtifactId, source: &Path) -> Result<StoreOutcome, PersistenceError> {
        if let Some(existing) = self.artifacts.get(&id) {
            if existing.archive_path.is_file() {
                self.get(&id);
                return Ok(StoreOutcome::AlreadyCached);
            }
            warn!("cached artifact '{id}' lost its archive; storing again");
            if let Some(stale) = self.artifacts.remove(&id) {
                self.current_size -= stale.size;
            }
        }

        let size = fs::metadata(source).map_err(PersistenceError::io(source))?.len();
        if size > self.max_size {
            debug!("artifact '{id}' is {:.1}MB, which exceeds the cache size of {:.1}MB; not storing",
                   size as f64 / MB as f64,
                   self.max_size as f64 / MB as f64);
            return Ok(StoreOutcome::TooLarge);
        }

        while self.current_size + size > self.max_size {
            let Some(victim) = self.least_recently_used(&id) else {
                debug!("cannot make room for artifact '{id}'; not storing");
                return Ok(StoreOutcome::NoRoom);
            };
            self.evict(&victim)?;
        }

        let target = self.dir.join(id.to_string());
        let started = Instant::now();
        let copied = fs::copy(source, &target);
        self.time_spent_copying += started.elapsed();
        copied.map_err(PersistenceError::io(&target))?;
        self.size_copied += size;

        debug!("storing artifact '{}'", target.display());
        let last_access_time = self.tick();
        self.artifacts.insert(id,
                              CachedArtifact { id,
                                               archive_path: target,
                                               size,
                                               last_access_time,
                                               accessed_at: Utc::now() });
        self.current_size += size;
        Ok(StoreOutcome::Stored)
    }

    /// Entrada con menor tiempo de acceso, excluyendo `skip`.
    fn least_recently_used(&self, skip: &ArtifactId) -> Option<ArtifactId> {
        self.artifacts
            .values()
            .filter(|a| a.id != *skip)
            .min_by_key(|a| a.last_access_time)
            .map(|a| a.id)
    }

    fn evict(&mut self, id: &ArtifactId) -> Result<(), PersistenceError> {
        let Some(entry) = self.artifacts.get(id) else { return Ok(()) };
        debug!("removing cached artifact '{}' last accessed at {}", entry.archive_path.display(), entry.accessed_at);
        match fs::remove_file(&entry.archive_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PersistenceError::Io { path: entry.archive_path.clone(), source: e }),
        }
        if let Some(entry) = self.artifacts.remove(id) {
            self.current_size -= entry.size;
        }
        Ok(())
    }

    /// Escribe el índice completo (tmp + rename). Debe llamarse en
    /// checkpoints controlados; no hay flush implícito.
    pub fn save(&mut self) -> Result<(), PersistenceError> {
        let mut artifacts: Vec<CachedArtifact> = self.artifacts.values().cloned().collect();
        artifacts.sort_by_key(|a| a.id);
        let index = CacheIndex { max_size: self.max_size, artifacts };
        let data = serde_json::to_vec_pretty(&index).map_err(|e| PersistenceError::CorruptIndex(e.to_string()))?;

        debug!("saving artifact cache at '{}'", self.index_path.display());
        let tmp = self.index_path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(PersistenceError::io(&tmp))?;
        fs::rename(&tmp, &self.index_path).map_err(PersistenceError::io(&self.index_path))?;

        if self.time_spent_copying > SLOW_COPY_THRESHOLD {
            warn!("spent {:.1} seconds copying {:.1}MB of artifacts to cache",
                  self.time_spent_copying.as_secs_f64(),
                  self.size_copied as f64 / MB as f64);
        }
        self.time_spent_copying = Duration::ZERO;
        self.size_copied = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(dir: &TempDir, name: &str, size: usize) -> PathBuf {
        let p = dir.path().join(name);
        fs::write(&p, vec![b'x'; size]).unwrap();
        p
    }

    #[test]
    fn too_large_is_a_silent_noop() {
        let src_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let mut cache = ArtifactCache::open(cache_dir.path(), 10).unwrap();
        let small = ArtifactId::new_v4();
        cache.store(small, &source(&src_dir, "s", 4)).unwrap();

        let big = ArtifactId::new_v4();
        let out = cache.store(big, &source(&src_dir, "b", 11)).unwrap();
        assert_eq!(out, StoreOutcome::TooLarge);
        assert!(!cache.contains(&big));
        // nada desalojado
        assert!(cache.contains(&small));
        assert_eq!(cache.current_size(), 4);
    }

    #[test]
    fn storing_twice_is_idempotent() {
        let src_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let mut cache = ArtifactCache::open(cache_dir.path(), 10).unwrap();
        let id = ArtifactId::new_v4();
        let src = source(&src_dir, "a", 3);
        assert_eq!(cache.store(id, &src).unwrap(), StoreOutcome::Stored);
        assert_eq!(cache.store(id, &src).unwrap(), StoreOutcome::AlreadyCached);
        assert_eq!(cache.current_size(), 3);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn open_rejects_a_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = source(&dir, "not-a-dir", 1);
        assert!(matches!(ArtifactCache::open(&file, 10), Err(PersistenceError::NotADirectory(_))));
    }

    #[test]
    fn get_miss_returns_none() {
        let cache_dir = tempfile::tempdir().unwrap();
        let mut cache = ArtifactCache::open(cache_dir.path(), 10).unwrap();
        assert!(cache.get(&ArtifactId::new_v4()).is_none());
    }
}

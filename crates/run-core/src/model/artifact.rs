//! Artifact del runtime.
//!
//! Un `Artifact` es la unidad construible/descargable (paquete, lenguaje o
//! bundle). Es inmutable una vez parseado: un snapshot nuevo produce un
//! `ArtifactMap` completamente nuevo.
//! - `dependencies` guarda sólo dependencias directas; la clausura se calcula
//!   bajo demanda con `recursive_dependencies_for`.
//! - El nombre lógico (`namespace/name`) es la clave para comparar snapshots.
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::CoreError;

/// Identidad estable de un artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(pub Uuid);

impl ArtifactId {
    pub fn new_v4() -> Self { Self(Uuid::new_v4()) }
    pub fn as_uuid(&self) -> Uuid { self.0 }
}

impl From<Uuid> for ArtifactId {
    fn from(u: Uuid) -> Self { Self(u) }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

impl FromStr for ArtifactId {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self).map_err(|_| CoreError::InvalidArtifactId(s.to_string()))
    }
}

/// Clasificación del namespace de un ingrediente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamespaceKind {
    /// `language`
    Language,
    /// `language/<lang>`
    Package,
    /// `bundles/<lang>`
    Bundle,
    /// `shared`
    Shared,
    Other,
}

impl NamespaceKind {
    pub fn classify(namespace: &str) -> Self {
        let suffix_ok = |rest: &str| !rest.is_empty() && rest.chars().all(|c| c.is_alphanumeric() || c == '_');
        match namespace {
            "language" => Self::Language,
            "shared" => Self::Shared,
            ns => match ns.split_once('/') {
                Some(("language", rest)) if suffix_ok(rest) => Self::Package,
                Some(("bundles", rest)) if suffix_ok(rest) => Self::Bundle,
                _ => Self::Other,
            },
        }
    }

    /// Namespaces que producen artifacts de runtime.
    pub fn is_runtime(&self) -> bool { !matches!(self, Self::Other) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub name: String,
    pub namespace: String,
    pub version: Option<String>,
    /// true si el usuario pidió explícitamente este artifact (no es transitivo).
    pub requested_by_user: bool,
    /// Dependencias directas, deduplicadas y en orden de descubrimiento.
    pub dependencies: Vec<ArtifactId>,
}

impl Artifact {
    pub fn logical_name(&self) -> String { format!("{}/{}", self.namespace, self.name) }

    pub fn name_with_version(&self) -> String {
        match &self.version {
            Some(v) => format!("{}@{}", self.name, v),
            None => self.name.clone(),
        }
    }

    pub fn kind(&self) -> NamespaceKind { NamespaceKind::classify(&self.namespace) }
}

/// Mapa id -> artifact; conserva el orden en que el grafo fue recorrido.
pub type ArtifactMap = IndexMap<ArtifactId, Artifact>;

/// Índice por nombre lógico (`namespace/name`).
pub fn named_map(map: &ArtifactMap) -> IndexMap<String, &Artifact> {
    map.values().map(|a| (a.logical_name(), a)).collect()
}

/// Clausura BFS de dependencias de `id`, sin incluir `id`.
///
/// Ids desconocidos se saltan en silencio; una raíz desconocida devuelve un
/// conjunto vacío.
pub fn recursive_dependencies_for(id: ArtifactId, map: &ArtifactMap) -> IndexSet<ArtifactId> {
    let mut out = IndexSet::new();
    let Some(root) = map.get(&id) else { return out };
    let mut queue: VecDeque<ArtifactId> = root.dependencies.iter().copied().collect();
    while let Some(next) = queue.pop_front() {
        if next == id || out.contains(&next) {
            continue;
        }
        let Some(art) = map.get(&next) else { continue };
        out.insert(next);
        queue.extend(art.dependencies.iter().copied());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn art(name: &str, deps: &[ArtifactId]) -> Artifact {
        Artifact { id: ArtifactId::new_v4(),
                   name: name.to_string(),
                   namespace: "language/python".to_string(),
                   version: Some("1.0".to_string()),
                   requested_by_user: false,
                   dependencies: deps.to_vec() }
    }

    fn to_map(arts: Vec<Artifact>) -> ArtifactMap { arts.into_iter().map(|a| (a.id, a)).collect() }

    #[test]
    fn diamond_dependency_appears_once() {
        let d = art("d", &[]);
        let b = art("b", &[d.id]);
        let c = art("c", &[d.id]);
        let a = art("a", &[b.id, c.id]);
        let (aid, did) = (a.id, d.id);
        let map = to_map(vec![a, b, c, d]);

        let deps = recursive_dependencies_for(aid, &map);
        assert_eq!(deps.len(), 3);
        assert_eq!(deps.iter().filter(|i| **i == did).count(), 1);
        assert!(!deps.contains(&aid));
        // idempotente
        assert_eq!(deps, recursive_dependencies_for(aid, &map));
    }

    #[test]
    fn leaf_and_unknown_root_are_empty() {
        let leaf = art("leaf", &[]);
        let lid = leaf.id;
        let map = to_map(vec![leaf]);
        assert!(recursive_dependencies_for(lid, &map).is_empty());
        assert!(recursive_dependencies_for(ArtifactId::new_v4(), &map).is_empty());
    }

    #[test]
    fn unknown_dependencies_are_skipped_and_cycles_terminate() {
        let ghost = ArtifactId::new_v4();
        let mut a = art("a", &[]);
        let b = art("b", &[a.id, ghost]);
        a.dependencies = vec![b.id];
        let (aid, bid) = (a.id, b.id);
        let map = to_map(vec![a, b]);
        let deps = recursive_dependencies_for(aid, &map);
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec![bid]);
    }

    #[test]
    fn namespace_classification() {
        assert_eq!(NamespaceKind::classify("language"), NamespaceKind::Language);
        assert_eq!(NamespaceKind::classify("language/python"), NamespaceKind::Package);
        assert_eq!(NamespaceKind::classify("bundles/perl"), NamespaceKind::Bundle);
        assert_eq!(NamespaceKind::classify("shared"), NamespaceKind::Shared);
        assert_eq!(NamespaceKind::classify("builder"), NamespaceKind::Other);
        assert_eq!(NamespaceKind::classify("language/"), NamespaceKind::Other);
    }

    #[test]
    fn name_with_version_formats() {
        let mut a = art("requests", &[]);
        assert_eq!(a.name_with_version(), "requests@1.0");
        a.version = None;
        assert_eq!(a.name_with_version(), "requests");
        assert!("nope".parse::<ArtifactId>().is_err());
    }
}

//! Diferencia entre dos snapshots del grafo.
//!
//! Las tres listas son disjuntas por nombre lógico: un artifact cuyo id no
//! cambió no aparece en ninguna, y un artifact actualizado sólo aparece en
//! `updated` (ni en `added` ni en `removed`).
use serde::{Deserialize, Serialize};

use super::{named_map, Artifact, ArtifactMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactUpdate {
    pub from: Artifact,
    pub to: Artifact,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactChangeset {
    pub added: Vec<Artifact>,
    pub removed: Vec<Artifact>,
    pub updated: Vec<ArtifactUpdate>,
}

impl ArtifactChangeset {
    pub fn is_empty(&self) -> bool { self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty() }
}

/// Compara `old` con `new` por nombre lógico.
///
/// Con `requested_only` sólo se consideran (en ambos lados) los artifacts
/// pedidos explícitamente por el usuario.
pub fn diff(old: &ArtifactMap, new: &ArtifactMap, requested_only: bool) -> ArtifactChangeset {
    let keep = |a: &&Artifact| !requested_only || a.requested_by_user;
    let old_named = named_map(old);
    let new_named = named_map(new);

    let mut out = ArtifactChangeset::default();
    for (name, a) in new_named.iter().filter(|(_, a)| keep(a)) {
        match old_named.get(name).filter(|o| keep(o)) {
            None => out.added.push((*a).clone()),
            Some(o) if o.id != a.id => out.updated.push(ArtifactUpdate { from: (*o).clone(), to: (*a).clone() }),
            Some(_) => {}
        }
    }
    for (name, o) in old_named.iter().filter(|(_, o)| keep(o)) {
        if new_named.get(name).filter(|a| keep(a)).is_none() {
            out.removed.push((*o).clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactId;
    use std::collections::HashSet;

    fn art(name: &str, requested: bool) -> Artifact {
        Artifact { id: ArtifactId::new_v4(),
                   name: name.to_string(),
                   namespace: "language/python".to_string(),
                   version: Some("1".to_string()),
                   requested_by_user: requested,
                   dependencies: vec![] }
    }

    fn to_map(arts: &[Artifact]) -> ArtifactMap { arts.iter().cloned().map(|a| (a.id, a)).collect() }

    #[test]
    fn diff_of_identical_maps_is_empty() {
        let m = to_map(&[art("a", true), art("b", false)]);
        assert!(diff(&m, &m, false).is_empty());
        assert!(diff(&m, &m, true).is_empty());
    }

    #[test]
    fn diff_partitions_by_logical_name() {
        let kept = art("kept", true);
        let gone = art("gone", true);
        let old_ver = art("bumped", true);
        let mut new_ver = art("bumped", true);
        new_ver.version = Some("2".into());
        let fresh = art("fresh", false);

        let old = to_map(&[kept.clone(), gone.clone(), old_ver.clone()]);
        let new = to_map(&[kept.clone(), new_ver.clone(), fresh.clone()]);
        let cs = diff(&old, &new, false);

        assert_eq!(cs.added, vec![fresh]);
        assert_eq!(cs.removed, vec![gone]);
        assert_eq!(cs.updated, vec![ArtifactUpdate { from: old_ver, to: new_ver }]);

        let names = |v: Vec<String>| v.into_iter().collect::<HashSet<_>>();
        let added = names(cs.added.iter().map(|a| a.logical_name()).collect());
        let removed = names(cs.removed.iter().map(|a| a.logical_name()).collect());
        let updated = names(cs.updated.iter().map(|u| u.to.logical_name()).collect());
        assert!(added.is_disjoint(&removed) && added.is_disjoint(&updated) && removed.is_disjoint(&updated));
        assert!(!added.contains(&kept.logical_name()));
    }

    #[test]
    fn requested_only_ignores_transitive_changes() {
        let top = art("top", true);
        let old_dep = art("dep", false);
        let new_dep = art("dep", false);
        let added_dep = art("other", false);

        let old = to_map(&[top.clone(), old_dep]);
        let new = to_map(&[top, new_dep, added_dep]);
        assert!(diff(&old, &new, true).is_empty());
        let full = diff(&old, &new, false);
        assert_eq!(full.updated.len(), 1);
        assert_eq!(full.added.len(), 1);
    }
}

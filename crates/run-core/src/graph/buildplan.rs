//! Representación "build plan": terminales -> artifacts -> steps -> sources.
use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::decode_node;
use crate::constants::{TAG_ORPHAN, TAG_SOURCE};
use crate::event::ResolvedArtifact;
use crate::model::{Artifact, ArtifactDownload, ArtifactId, ArtifactMap};

/// Estado de un artifact según el servicio de build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactStatus {
    NotSubmitted,
    Ready,
    Doing,
    Started,
    Blocked,
    Skipped,
    Succeeded,
    FailedTransiently,
    FailedPermanently,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Terminal {
    pub tag: String,
    pub node_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Requirement {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPlanSnapshot {
    pub terminals: Vec<Terminal>,
    pub artifacts: Vec<Value>,
    pub steps: Vec<Value>,
    pub sources: Vec<Value>,
    /// Si está vacío, todo artifact se considera pedido por el usuario.
    #[serde(default)]
    pub requirements: Vec<Requirement>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanArtifact {
    node_id: Uuid,
    status: ArtifactStatus,
    generated_by: Option<Uuid>,
    #[serde(default)]
    runtime_dependencies: Vec<Uuid>,
    url: Option<String>,
    checksum: Option<String>,
    #[serde(rename = "logURL")]
    log_url: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepInput {
    tag: String,
    node_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanStep {
    step_id: Uuid,
    #[serde(default)]
    inputs: Vec<StepInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanSource {
    node_id: Uuid,
    name: String,
    namespace: String,
    version: Option<String>,
}

/// Nodos decodificados e indexados por id.
struct PlanIndex {
    artifacts: HashMap<Uuid, PlanArtifact>,
    steps: HashMap<Uuid, PlanStep>,
    sources: HashMap<Uuid, PlanSource>,
}

impl BuildPlanSnapshot {
    fn index(&self) -> PlanIndex {
        let artifacts = self.artifacts
                            .iter()
                            .filter_map(|raw| decode_node::<PlanArtifact>("artifact", raw))
                            .map(|a| (a.node_id, a))
                            .collect();
        let steps = self.steps
                        .iter()
                        .filter_map(|raw| decode_node::<PlanStep>("step", raw))
                        .map(|s| (s.step_id, s))
                        .collect();
        let sources = self.sources
                          .iter()
                          .filter_map(|raw| decode_node::<PlanSource>("source", raw))
                          .map(|s| (s.node_id, s))
                          .collect();
        PlanIndex { artifacts, steps, sources }
    }

    fn is_requested(&self, src: &PlanSource) -> bool {
        self.requirements.is_empty()
        || self.requirements.iter().any(|r| r.name == src.name && r.namespace == src.namespace)
    }

    pub(crate) fn artifact_map(&self) -> ArtifactMap {
        let idx = self.index();
        let mut queue: VecDeque<Uuid> = self.terminals
                                            .iter()
                                            .filter(|t| t.tag != TAG_ORPHAN)
                                            .flat_map(|t| t.node_ids.iter().copied())
                                            .collect();
        let mut visited = HashSet::new();
        let mut map = ArtifactMap::new();

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            let Some(plan_art) = idx.artifacts.get(&node_id) else {
                if !idx.sources.contains_key(&node_id) && !idx.steps.contains_key(&node_id) {
                    log::warn!("node {node_id} does not resolve to any known node type; skipped");
                }
                continue;
            };
            if plan_art.status == ArtifactStatus::NotSubmitted {
                continue;
            }
            queue.extend(plan_art.runtime_dependencies.iter().copied());
            let Some(src) = resolve_source(&idx, plan_art) else {
                log::warn!("artifact {node_id} has no resolvable source ingredient; dropped");
                continue;
            };
            let deps: IndexSet<ArtifactId> = plan_art.runtime_dependencies.iter().copied().map(ArtifactId).collect();
            map.insert(ArtifactId(node_id),
                       Artifact { id: ArtifactId(node_id),
                                  name: src.name.clone(),
                                  namespace: src.namespace.clone(),
                                  version: src.version.clone(),
                                  requested_by_user: self.is_requested(src),
                                  dependencies: deps.into_iter().collect() });
        }

        // aristas hacia artifacts descartados u omitidos no se conservan
        let known: HashSet<ArtifactId> = map.keys().copied().collect();
        for art in map.values_mut() {
            art.dependencies.retain(|d| known.contains(d));
        }
        map
    }

    pub(crate) fn built_artifacts(&self) -> Vec<ArtifactDownload> {
        let idx = self.index();
        let reachable = self.artifact_map();
        reachable.keys()
                 .filter_map(|id| idx.artifacts.get(&id.0))
                 .filter(|a| a.status == ArtifactStatus::Succeeded)
                 .filter_map(|a| match (&a.url, &a.checksum) {
                     (Some(uri), Some(checksum)) => Some(ArtifactDownload { artifact_id: ArtifactId(a.node_id),
                                                                           uri: uri.clone(),
                                                                           checksum: checksum.clone() }),
                     _ => None,
                 })
                 .collect()
    }

    /// Artifacts alcanzables que el servicio ya marcó como fallidos sin reintento.
    pub(crate) fn failed_artifacts(&self) -> Vec<ResolvedArtifact> {
        let idx = self.index();
        self.artifact_map()
            .keys()
            .filter_map(|id| idx.artifacts.get(&id.0))
            .filter(|a| a.status == ArtifactStatus::FailedPermanently)
            .map(|a| ResolvedArtifact { artifact_id: ArtifactId(a.node_id),
                                        log_uri: a.log_url.clone(),
                                        error: (!a.errors.is_empty()).then(|| a.errors.join("\n")) })
            .collect()
    }
}

/// Sigue `generatedBy -> step -> input "src"` hasta encontrar un source.
/// Un input que es a su vez un artifact se sigue a través de su propio step.
fn resolve_source<'a>(idx: &'a PlanIndex, art: &'a PlanArtifact) -> Option<&'a PlanSource> {
    let mut current = art;
    let mut seen = HashSet::new();
    loop {
        let step_id = current.generated_by?;
        if !seen.insert(step_id) {
            return None;
        }
        let step = idx.steps.get(&step_id)?;
        let mut next = None;
        for id in step.inputs.iter().filter(|i| i.tag == TAG_SOURCE).flat_map(|i| i.node_ids.iter()) {
            if let Some(src) = idx.sources.get(id) {
                return Some(src);
            }
            if next.is_none() {
                next = idx.artifacts.get(id);
            }
        }
        current = next?;
    }
}

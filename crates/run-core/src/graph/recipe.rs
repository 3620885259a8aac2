//! Representación "recipe": lista plana de ingredientes resueltos.
use std::collections::HashMap;

use indexmap::IndexSet;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::decode_node;
use crate::constants::DEPENDENCY_TYPE_RUNTIME;
use crate::model::{Artifact, ArtifactId, ArtifactMap, NamespaceKind};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeSnapshot {
    #[serde(default)]
    pub recipe_id: Option<Uuid>,
    pub resolved_ingredients: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ingredient {
    name: String,
    primary_namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngredientVersion {
    ingredient_version_id: Uuid,
    version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngredientDependency {
    ingredient_version_id: Uuid,
    #[serde(default)]
    dependency_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedIngredient {
    ingredient: Ingredient,
    ingredient_version: IngredientVersion,
    artifact_id: Uuid,
    #[serde(default)]
    resolved_requirements: Vec<Value>,
    #[serde(default)]
    dependencies: Vec<IngredientDependency>,
}

impl RecipeSnapshot {
    pub(crate) fn artifact_map(&self) -> ArtifactMap {
        let ingredients: Vec<ResolvedIngredient> =
            self.resolved_ingredients
                .iter()
                .filter_map(|raw| decode_node::<ResolvedIngredient>("ingredient", raw))
                .filter(|ri| NamespaceKind::classify(&ri.ingredient.primary_namespace).is_runtime())
                .collect();

        let by_version: HashMap<Uuid, ArtifactId> =
            ingredients.iter()
                       .map(|ri| (ri.ingredient_version.ingredient_version_id, ArtifactId(ri.artifact_id)))
                       .collect();

        let mut map = ArtifactMap::new();
        for ri in &ingredients {
            let is_bundle = NamespaceKind::classify(&ri.ingredient.primary_namespace) == NamespaceKind::Bundle;
            let mut deps = IndexSet::new();
            for dep in &ri.dependencies {
                if !is_bundle && !dep.dependency_types.iter().any(|t| t == DEPENDENCY_TYPE_RUNTIME) {
                    continue;
                }
                match by_version.get(&dep.ingredient_version_id) {
                    Some(aid) => {
                        deps.insert(*aid);
                    }
                    None => log::warn!("dependency {} of {} has no artifact; dropped",
                                       dep.ingredient_version_id, ri.ingredient.name),
                }
            }
            let id = ArtifactId(ri.artifact_id);
            map.insert(id,
                       Artifact { id,
                                  name: ri.ingredient.name.clone(),
                                  namespace: ri.ingredient.primary_namespace.clone(),
                                  version: ri.ingredient_version.version.clone(),
                                  requested_by_user: !ri.resolved_requirements.is_empty(),
                                  dependencies: deps.into_iter().collect() });
        }
        map
    }
}

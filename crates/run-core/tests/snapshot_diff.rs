use run_core::{diff, parse_graph, recursive_dependencies_for, ArtifactId, GraphSnapshot};
use serde_json::json;
use uuid::Uuid;

fn id(n: u8) -> Uuid { Uuid::from_bytes([n; 16]) }

fn recipe(requests_artifact: u8, requests_version: &str) -> GraphSnapshot {
    let doc = json!({
        "resolvedIngredients": [
            {"ingredient": {"name": "python", "primaryNamespace": "language"},
             "ingredientVersion": {"ingredientVersionId": id(101), "version": "3.10"},
             "artifactId": id(1), "resolvedRequirements": [{"n": 1}], "dependencies": []},
            {"ingredient": {"name": "requests", "primaryNamespace": "language/python"},
             "ingredientVersion": {"ingredientVersionId": id(102), "version": requests_version},
             "artifactId": id(requests_artifact), "resolvedRequirements": [{"n": 1}],
             "dependencies": [{"ingredientVersionId": id(101), "dependencyTypes": ["runtime"]}]}
        ]
    });
    GraphSnapshot::from_json(&doc.to_string()).expect("recipe snapshot")
}

#[test]
fn version_bump_between_commits_is_an_update() {
    let old = parse_graph(&recipe(2, "2.0"));
    let new = parse_graph(&recipe(3, "2.1"));

    let requested = diff(&old, &new, true);
    assert!(requested.added.is_empty() && requested.removed.is_empty());
    assert_eq!(requested.updated.len(), 1);
    assert_eq!(requested.updated[0].from.name_with_version(), "requests@2.0");
    assert_eq!(requested.updated[0].to.name_with_version(), "requests@2.1");

    let deps = recursive_dependencies_for(ArtifactId(id(3)), &new);
    assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec![ArtifactId(id(1))]);
}

#[test]
fn identical_commits_produce_no_changes() {
    let a = parse_graph(&recipe(2, "2.0"));
    assert!(diff(&a, &a, false).is_empty());
}

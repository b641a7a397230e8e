use std::fs;
use std::sync::Arc;

use atsync::model::{Value, Variant};
use atsync::server::SessionScope;
use atsync::sync::{run_pull, PullOptions, RENAME_PLACEHOLDER};
use atsync::types::{reference_type, ArrayType, DataType};
use serde_json::json;
use tempfile::TempDir;

use crate::support::{local_fs, project_config, snapshot, ListingOrder, MemoryServer};

fn siblings() -> MemoryServer {
    MemoryServer::new()
        .object("AGENT")
        .string_variable("AGENT.Foo", "upper")
        .string_variable("AGENT.foo", "lower")
}

fn sort_order(names: &[&str]) -> Variant {
    Variant {
        data_type: DataType::QualifiedName,
        array_type: ArrayType::Array,
        value: Value::Array(
            names
                .iter()
                .map(|name| Value::Structured(json!({ "namespaceIndex": 1, "name": name })))
                .collect(),
        ),
    }
}

fn displays(order: ListingOrder, sorting: &[&str]) -> MemoryServer {
    MemoryServer::new()
        .with_order(order)
        .object("AGENT")
        .object("AGENT.DISPLAYS")
        .string_variable("AGENT.DISPLAYS.Title", "Overview")
        .int_variable("AGENT.DISPLAYS.Refresh", 500)
        .variable("AGENT.DISPLAYS.SortOrder", sort_order(sorting))
        .object("AGENT.EVENTS")
        .object("AGENT.EVENTS.Alarm")
        .object("AGENT.EVENTS.Warning")
        .reference("AGENT.DISPLAYS", reference_type::GENERATES_EVENT, "AGENT.EVENTS.Alarm")
        .reference("AGENT.DISPLAYS", reference_type::GENERATES_EVENT, "AGENT.EVENTS.Warning")
}

#[tokio::test]
async fn test_case_conflict_is_recorded_once_and_resolved_by_rename() {
    let temp = TempDir::new().unwrap();
    let mut config = project_config(&temp);
    config.concurrency = 1;
    let scope = SessionScope::Pooled(Arc::new(siblings()));
    let agent = temp.path().join("src/AGENT");
    let rename_path = temp.path().join("atsync/rename.json");

    let report = run_pull(&config, &scope, local_fs(), PullOptions::default()).await.unwrap();
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.browse.processed, 3);
    assert_eq!(fs::read_to_string(agent.join("Foo.string")).unwrap(), "upper");
    assert!(!agent.join("foo.string").exists());
    assert!(!agent.join(".foo.string.json").exists());
    let expected = format!("{{\n  \"AGENT.foo\": \"{}\"\n}}\n", RENAME_PLACEHOLDER);
    assert_eq!(fs::read_to_string(&rename_path).unwrap(), expected);

    // Pulling again before the operator edited the file changes nothing.
    let report = run_pull(&config, &scope, local_fs(), PullOptions::default()).await.unwrap();
    assert_eq!(report.conflicts, 1);
    assert_eq!(fs::read_to_string(&rename_path).unwrap(), expected);

    fs::write(&rename_path, "{\n  \"AGENT.foo\": \"foo-2.string\"\n}\n").unwrap();
    let report = run_pull(&config, &scope, local_fs(), PullOptions { clean: true })
        .await
        .unwrap();
    assert_eq!(report.conflicts, 0);
    assert_eq!(fs::read_to_string(agent.join("foo-2.string")).unwrap(), "lower");
    let definition = fs::read_to_string(agent.join(".foo-2.string.json")).unwrap();
    assert!(definition.contains("\"nodeId\": \"AGENT.foo\""), "{}", definition);
    assert_eq!(
        fs::read_to_string(&rename_path).unwrap(),
        "{\n  \"AGENT.foo\": \"foo-2.string\"\n}\n"
    );
}

#[tokio::test]
async fn test_repeated_pulls_are_byte_identical() {
    let temp = TempDir::new().unwrap();
    let mut config = project_config(&temp);
    config.checksums = true;

    let first = SessionScope::Pooled(Arc::new(displays(ListingOrder::Insertion, &["Title", "Refresh"])));
    let report = run_pull(&config, &first, local_fs(), PullOptions::default()).await.unwrap();
    assert!(report.files.files_written > 0);
    let before = snapshot(&config.source_dir);
    assert!(before.keys().all(|path| !path.to_string_lossy().contains("SortOrder")));

    let second = SessionScope::Pooled(Arc::new(displays(ListingOrder::Reversed, &["Refresh", "Title"])));
    let report = run_pull(&config, &second, local_fs(), PullOptions::default()).await.unwrap();
    assert_eq!(report.files.files_written, 0);
    assert_eq!(report.files.files_unchanged, before.len());
    assert_eq!(snapshot(&config.source_dir), before);

    let other = TempDir::new().unwrap();
    let fresh = project_config(&other);
    run_pull(&fresh, &second, local_fs(), PullOptions::default()).await.unwrap();
    assert_eq!(snapshot(&fresh.source_dir), before);
}

#[tokio::test]
async fn test_preserved_sort_order_is_pulled() {
    let temp = TempDir::new().unwrap();
    let mut config = project_config(&temp);
    config.preserve_sort_order_nodes = true;
    let scope = SessionScope::Pooled(Arc::new(displays(ListingOrder::Insertion, &["Title", "Gone"])));

    run_pull(&config, &scope, local_fs(), PullOptions::default()).await.unwrap();
    let files = snapshot(&config.source_dir);
    let (_, value) = files
        .iter()
        .find(|(path, _)| path.ends_with("SortOrder.name.array"))
        .expect("sort order value file");
    let names: serde_json::Value = serde_json::from_slice(value).unwrap();
    assert_eq!(names, json!([{ "namespaceIndex": 1, "name": "Title" }]));
}

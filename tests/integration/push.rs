use std::path::Path;
use std::sync::Arc;

use atsync::model::Variant;
use atsync::server::SessionScope;
use atsync::sync::run_push;
use atsync::types::DataType;
use atsync::SyncError;
use tempfile::TempDir;

use crate::support::{local_fs, project_config, write_file, MemoryServer};

const OBJECT: &str = r#"{"nodeClass":"Object","references":{"HasTypeDefinition":[61],"toParent":[35]}}"#;

fn string_definition() -> &'static str {
    r#"{"dataType":"String","arrayType":"Scalar","references":{"HasTypeDefinition":[63],"toParent":[47]}}"#
}

fn agent_folder(src: &Path) {
    write_file(src, "AGENT/.Object.json", OBJECT);
}

#[tokio::test]
async fn test_not_writable_node_is_skipped_and_siblings_continue() {
    let temp = TempDir::new().unwrap();
    let config = project_config(&temp);
    agent_folder(&config.source_dir);
    write_file(&config.source_dir, "AGENT/.X.string.json", string_definition());
    write_file(&config.source_dir, "AGENT/X.string", "locked");
    write_file(&config.source_dir, "AGENT/.Y.string.json", string_definition());
    write_file(&config.source_dir, "AGENT/Y.string", "free");

    let server = Arc::new(
        MemoryServer::new()
            .object("AGENT")
            .string_variable("AGENT.X", "old")
            .string_variable("AGENT.Y", "old")
            .not_writable("AGENT.X"),
    );
    let scope = SessionScope::Pooled(server.clone());

    let report = run_push(&config, &scope, local_fs()).await.unwrap();
    assert_eq!(report.browse.processed, 3);
    assert!(report.browse.failures.is_empty());
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(server.value("AGENT.X"), Some(Variant::string("old")));
    assert_eq!(server.value("AGENT.Y"), Some(Variant::string("free")));
    assert_eq!(server.written().keys().collect::<Vec<_>>(), vec!["AGENT.Y"]);
}

#[tokio::test]
async fn test_two_files_for_one_node_are_rejected() {
    let temp = TempDir::new().unwrap();
    let config = project_config(&temp);
    agent_folder(&config.source_dir);
    write_file(
        &config.source_dir,
        "AGENT/.Count.int32.json",
        r#"{"dataType":"Int32","arrayType":"Scalar","references":{"toParent":[47]}}"#,
    );
    write_file(&config.source_dir, "AGENT/Count.int32", "3");
    write_file(&config.source_dir, "AGENT/.Count.string.json", string_definition());
    write_file(&config.source_dir, "AGENT/Count.string", "three");

    let server = Arc::new(MemoryServer::new().object("AGENT").int_variable("AGENT.Count", 0));
    let scope = SessionScope::Pooled(server.clone());

    match run_push(&config, &scope, local_fs()).await {
        Err(SyncError::Invariant(message)) => {
            assert_eq!(message, "Prevented duplicate handling of AGENT.Count")
        }
        other => panic!("expected an invariant violation, got {:?}", other),
    }
    let writes = server.log().iter().filter(|id| id.as_str() == "AGENT.Count").count();
    assert!(writes <= 1, "{:?}", server.log());
}

#[tokio::test]
async fn test_unknown_nodes_are_created_below_their_parent() {
    let temp = TempDir::new().unwrap();
    let config = project_config(&temp);
    agent_folder(&config.source_dir);
    write_file(
        &config.source_dir,
        "AGENT/Tank/.Object.json",
        r#"{"nodeClass":"Object","references":{"HasTypeDefinition":[61],"toParent":[47]}}"#,
    );
    write_file(
        &config.source_dir,
        "AGENT/Tank/.Level.double.json",
        r#"{"dataType":"Double","arrayType":"Scalar","references":{"HasTypeDefinition":[63],"toParent":[46]}}"#,
    );
    write_file(&config.source_dir, "AGENT/Tank/Level.double", "2.5");

    let server = Arc::new(MemoryServer::new().object("AGENT"));
    let scope = SessionScope::Pooled(server.clone());

    let report = run_push(&config, &scope, local_fs()).await.unwrap();
    assert_eq!(report.browse.processed, 3);
    assert_eq!(report.stats.created, 2);
    assert_eq!(server.log(), vec!["AGENT", "AGENT.Tank", "AGENT.Tank.Level"]);

    let created = server.created();
    let tank = &created[1];
    assert_eq!(tank["parentNodeId"], "ns=1;s=AGENT");
    assert_eq!(tank["typeDefinition"], "ns=0;i=61");
    assert_eq!(tank["reference"], "HasComponent");

    let level = &created[2];
    assert_eq!(level["browseName"], "Level");
    assert_eq!(level["parentNodeId"], "ns=1;s=AGENT.Tank");
    assert_eq!(level["reference"], "HasProperty");
    assert_eq!(level["dataType"], DataType::Double.value());
    assert_eq!(level["valueRank"], -1);
    assert_eq!(level["value"], 2.5);
    assert!(server.written().is_empty());
}

#[tokio::test]
async fn test_broken_display_is_a_branch_failure() {
    let temp = TempDir::new().unwrap();
    let mut config = project_config(&temp);
    agent_folder(&config.source_dir);
    write_file(
        &config.source_dir,
        "AGENT/.Broken.display.json",
        r#"{"dataType":"String","arrayType":"Scalar","references":{"HasTypeDefinition":["VariableTypes.ATVISE.Display"],"toParent":[47]}}"#,
    );
    write_file(&config.source_dir, "AGENT/Broken.display/Broken.js", "run();");
    write_file(&config.source_dir, "AGENT/.Y.string.json", string_definition());
    write_file(&config.source_dir, "AGENT/Y.string", "free");

    let server = || {
        SessionScope::Pooled(Arc::new(
            MemoryServer::new()
                .object("AGENT")
                .string_variable("AGENT.Broken", "")
                .string_variable("AGENT.Y", "old"),
        ))
    };

    match run_push(&config, &server(), local_fs()).await {
        Err(SyncError::PartialFailure { processed, failures }) => {
            assert_eq!(processed, 2);
            assert_eq!(failures.len(), 1);
        }
        other => panic!("expected a partial failure, got {:?}", other),
    }

    config.continue_on_failure = true;
    let report = run_push(&config, &server(), local_fs()).await.unwrap();
    assert_eq!(report.browse.processed, 2);
    assert_eq!(report.browse.failures.len(), 1);
    assert!(report.browse.failures[0].message.contains("No display SVG for AGENT.Broken"));
}

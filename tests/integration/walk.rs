use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use atsync::browse::{HandleOptions, NodeBrowser, NodeHandler};
use atsync::model::{Node, NodeId};
use atsync::server::SessionScope;
use atsync::sync::{run_pull, PullOptions};
use atsync::types::reference_type;
use atsync::SyncError;
use parking_lot::Mutex;
use proptest::prelude::*;
use tempfile::TempDir;

use crate::support::{local_fs, project_config, ListingOrder, MemoryServer};

#[derive(Default)]
struct Recorder {
    handled: Mutex<Vec<String>>,
}

#[async_trait]
impl NodeHandler for Recorder {
    async fn handle_node(&self, node: Node, _options: HandleOptions) -> Result<Node, SyncError> {
        self.handled.lock().push(node.key());
        Ok(node)
    }
}

fn plant(order: ListingOrder) -> MemoryServer {
    MemoryServer::new()
        .with_order(order)
        .object("AGENT")
        .object("AGENT.OBJECTS")
        .object("AGENT.OBJECTS.Pump")
        .int_variable("AGENT.OBJECTS.Pump.Speed", 1450)
        .object("AGENT.OBJECTS.Valve")
        .object("AGENT.TYPES")
        .object_type("AGENT.TYPES.PumpType")
        .object_type("AGENT.TYPES.ValveType")
        .reference("AGENT.OBJECTS.Pump", reference_type::HAS_TYPE_DEFINITION, "AGENT.TYPES.PumpType")
        .reference("AGENT.OBJECTS.Valve", reference_type::HAS_TYPE_DEFINITION, "AGENT.TYPES.ValveType")
        .reference("AGENT.TYPES.ValveType", reference_type::GENERATES_EVENT, "AGENT.OBJECTS.Pump")
}

fn position(handled: &[String], key: &str) -> usize {
    handled
        .iter()
        .position(|k| k == key)
        .unwrap_or_else(|| panic!("{} was not handled", key))
}

async fn browse_plant(order: ListingOrder) -> Vec<String> {
    let recorder = Arc::new(Recorder::default());
    let report = NodeBrowser::new(Arc::new(plant(order)), recorder.clone())
        .browse(&[NodeId::string("AGENT")])
        .await
        .unwrap();
    assert_eq!(report.processed, 8);
    let handled = recorder.handled.lock().clone();
    handled
}

fn assert_emission_order(handled: &[String]) {
    assert_eq!(handled.len(), 8);
    assert_eq!(handled.iter().collect::<HashSet<_>>().len(), 8, "{:?}", handled);

    for key in handled.iter().filter(|k| k.as_str() != "AGENT") {
        let (parent, _) = key.rsplit_once('.').unwrap();
        assert!(position(handled, parent) < position(handled, key), "{:?}", handled);
    }
    assert!(position(handled, "AGENT.TYPES.PumpType") < position(handled, "AGENT.OBJECTS.Pump"));
    assert!(position(handled, "AGENT.TYPES.ValveType") < position(handled, "AGENT.OBJECTS.Valve"));
    assert!(position(handled, "AGENT.OBJECTS.Pump") < position(handled, "AGENT.TYPES.ValveType"));
}

#[tokio::test]
async fn test_emission_follows_parents_and_references_in_any_listing_order() {
    for order in [ListingOrder::Insertion, ListingOrder::Reversed] {
        assert_emission_order(&browse_plant(order).await);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_emission_order_holds_for_shuffled_listings(seed in any::<u64>()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let handled = runtime.block_on(browse_plant(ListingOrder::Shuffled(seed)));
        assert_emission_order(&handled);
    }
}

#[tokio::test]
async fn test_pull_rejects_with_the_one_unresolved_edge() {
    let temp = TempDir::new().unwrap();
    let server = MemoryServer::new()
        .object("AGENT")
        .object("AGENT.A")
        .object("AGENT.B")
        .reference("AGENT.A", reference_type::HAS_TYPE_DEFINITION, "OTHER.C");
    let scope = SessionScope::Pooled(Arc::new(server));

    let result = run_pull(&project_config(&temp), &scope, local_fs(), PullOptions::default()).await;
    match result {
        Err(SyncError::UnresolvedReferences(edges)) => {
            assert_eq!(edges.len(), 1);
            assert_eq!(edges[0].from, "AGENT.A");
            assert_eq!(edges[0].reference_type, "HasTypeDefinition");
            assert_eq!(edges[0].to, "OTHER.C");
        }
        other => panic!("expected unresolved references, got {:?}", other),
    }
    assert!(!temp.path().join("atsync/rename.json").exists());
}

#[tokio::test]
async fn test_ignored_reference_target_does_not_block() {
    let temp = TempDir::new().unwrap();
    let server = MemoryServer::new()
        .object("AGENT")
        .object("AGENT.A")
        .object("AGENT.HISTORY")
        .object("AGENT.HISTORY.Archive")
        .reference("AGENT.A", reference_type::GENERATES_EVENT, "AGENT.HISTORY.Archive");
    let scope = SessionScope::Pooled(Arc::new(server));

    let report = run_pull(&project_config(&temp), &scope, local_fs(), PullOptions::default())
        .await
        .unwrap();
    assert_eq!(report.browse.processed, 2);
    assert!(temp.path().join("src/AGENT/A/.Object.json").exists());
    assert!(!temp.path().join("src/AGENT/HISTORY").exists());
}

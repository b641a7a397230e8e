use std::sync::Arc;

use atsync::model::{Value, Variant};
use atsync::server::SessionScope;
use atsync::sync::{run_pull, run_push, PullOptions};
use atsync::types::{reference_type, ArrayType, DataType};
use tempfile::TempDir;

use crate::support::{local_fs, project_config, MemoryServer};

const DISPLAY: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\"><script type=\"text/ecmascript\"><![CDATA[run();]]></script></svg>";

fn flags() -> Variant {
    Variant {
        data_type: DataType::Boolean,
        array_type: ArrayType::Array,
        value: Value::Array(vec![Value::Boolean(true), Value::Boolean(false)]),
    }
}

fn plant() -> MemoryServer {
    MemoryServer::new()
        .object("AGENT")
        .object("AGENT.OBJECTS")
        .object("AGENT.OBJECTS.Pump")
        .int_variable("AGENT.OBJECTS.Pump.Speed", 1450)
        .string_variable("AGENT.OBJECTS.Pump.Name", "Feed pump")
        .variable("AGENT.OBJECTS.Pump.Flags", flags())
        .object("AGENT.TYPES")
        .object_type("AGENT.TYPES.PumpType")
        .object("AGENT.DISPLAYS")
        .string_variable("AGENT.DISPLAYS.Main", DISPLAY)
        .reference("AGENT.OBJECTS.Pump", reference_type::HAS_TYPE_DEFINITION, "AGENT.TYPES.PumpType")
        .reference(
            "AGENT.DISPLAYS.Main",
            reference_type::HAS_TYPE_DEFINITION,
            "VariableTypes.ATVISE.Display",
        )
}

#[tokio::test]
async fn test_pulled_tree_pushes_back_the_same_values() {
    let temp = TempDir::new().unwrap();
    let config = project_config(&temp);
    let server = Arc::new(plant());
    let scope = SessionScope::Pooled(server.clone());

    let pulled = run_pull(&config, &scope, local_fs(), PullOptions::default()).await.unwrap();
    assert_eq!(pulled.browse.processed, 10);
    let display = config.source_dir.join("AGENT/DISPLAYS/Main.display");
    assert_eq!(std::fs::read_to_string(display.join("Main.js")).unwrap(), "run();");

    let pushed = run_push(&config, &scope, local_fs()).await.unwrap();
    assert_eq!(pushed.browse.processed, 10);
    assert_eq!(pushed.stats.created, 0);

    let written = server.written();
    assert_eq!(
        written.keys().collect::<Vec<_>>(),
        vec![
            "AGENT.DISPLAYS.Main",
            "AGENT.OBJECTS.Pump.Flags",
            "AGENT.OBJECTS.Pump.Name",
            "AGENT.OBJECTS.Pump.Speed",
        ]
    );
    assert_eq!(written["AGENT.OBJECTS.Pump.Flags"], flags());
    assert_eq!(written["AGENT.OBJECTS.Pump.Name"], Variant::string("Feed pump"));
    assert_eq!(
        written["AGENT.OBJECTS.Pump.Speed"],
        Variant::scalar(DataType::Int32, Value::Integer(1450))
    );
    let main = written["AGENT.DISPLAYS.Main"].value.as_text().unwrap_or_default().to_string();
    assert!(main.contains("<svg"), "{}", main);
    assert!(main.contains("run();"), "{}", main);

    let log = server.log();
    let position = |id: &str| log.iter().position(|entry| entry == id).unwrap();
    assert!(position("AGENT.TYPES.PumpType") < position("AGENT.OBJECTS.Pump"));
    assert!(position("AGENT.OBJECTS.Pump") < position("AGENT.OBJECTS.Pump.Speed"));
}

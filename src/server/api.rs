//! Server-side scripts used to create nodes and attach references.
//!
//! Both calls go through the generic `callScript` method. Script outputs are
//! `[status, error message, _, results]`, where `results` is an array whose shape depends on the
//! script.

use super::{MethodResult, Session};
use crate::error::SyncError;
use crate::model::{NodeId, Value, Variant};
use crate::types::{reference_type, ArrayType, DataType, NodeClass};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

pub const CALL_SCRIPT_METHOD: &str = "AGENT.SCRIPT.METHODS.callScript";
pub const CREATE_NODE_SCRIPT: &str = "SYSTEM.LIBRARY.ATVISE.SERVERSCRIPTS.atscm.CreateNode";
pub const ADD_REFERENCES_SCRIPT: &str = "SYSTEM.LIBRARY.ATVISE.SERVERSCRIPTS.atscm.AddReferences";

/// Everything the create script needs to build a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodeRequest {
    pub node_id: String,
    pub browse_name: String,
    pub parent_node_id: String,
    pub node_class: u32,
    pub type_definition: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modelling_rule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_rank: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateNodeOutcome {
    pub created: bool,
    pub failed: bool,
}

impl CreateNodeRequest {
    pub fn new(node_id: &NodeId, browse_name: &str, parent: &NodeId, node_class: NodeClass) -> Self {
        Self {
            node_id: node_id.to_protocol_string(),
            browse_name: browse_name.to_string(),
            parent_node_id: parent.to_protocol_string(),
            node_class: node_class.value(),
            type_definition: NodeId::Numeric(62).to_protocol_string(),
            modelling_rule: None,
            reference: None,
            data_type: None,
            value_rank: None,
            value: None,
        }
    }

    pub fn with_value(mut self, variant: &Variant) -> Self {
        self.data_type = Some(variant.data_type.value());
        self.value_rank = Some(match variant.array_type {
            ArrayType::Scalar => -1,
            ArrayType::Array => 1,
            ArrayType::Matrix => 2,
        });
        self.value = Some(crate::coding::value_to_json(&variant.value));
        self
    }
}

pub async fn call_script(
    session: &dyn Session,
    script: &str,
    parameters: serde_json::Value,
) -> Result<MethodResult, SyncError> {
    let script_id = NodeId::string(script);
    let parent = script_id.parent().unwrap_or(NodeId::Numeric(85));
    let args = vec![
        Variant::scalar(DataType::NodeId, Value::Text(script_id.to_protocol_string())),
        Variant::scalar(DataType::NodeId, Value::Text(parent.to_protocol_string())),
        Variant {
            data_type: DataType::String,
            array_type: ArrayType::Array,
            value: Value::Array(vec![Value::Text("paramObjString".to_string())]),
        },
        Variant {
            data_type: DataType::Variant,
            array_type: ArrayType::Array,
            value: Value::Array(vec![Value::Text(parameters.to_string())]),
        },
    ];
    let result = session
        .call_method(&NodeId::string(CALL_SCRIPT_METHOD), args)
        .await?;

    let status = match result.outputs.first().map(|o| &o.value) {
        Some(Value::Unsigned(code)) => *code,
        Some(Value::Integer(code)) => *code as u64,
        _ => 0,
    };
    if status != 0 || !result.status.is_good() {
        let detail = result
            .outputs
            .get(1)
            .and_then(|o| o.value.as_text())
            .unwrap_or_default();
        return Err(SyncError::Transport {
            node_id: Some(script.to_string()),
            status: Some(result.status),
            message: format!("Script failed: {}\n{}", status, detail),
        });
    }
    Ok(result)
}

fn results(result: &MethodResult) -> &[Value] {
    match result.outputs.get(3).map(|o| &o.value) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

pub async fn create_node(
    session: &dyn Session,
    request: &CreateNodeRequest,
) -> Result<CreateNodeOutcome, SyncError> {
    let parameters = serde_json::to_value(request)
        .map_err(|e| SyncError::transform(request.node_id.clone(), e.to_string()))?;
    let result = call_script(session, CREATE_NODE_SCRIPT, parameters).await?;
    let flag = |index: usize| matches!(results(&result).get(index), Some(Value::Boolean(true)));
    Ok(CreateNodeOutcome {
        created: flag(0),
        failed: flag(1),
    })
}

/// Attaches references and returns the targets the server refused.
pub async fn add_references(
    session: &dyn Session,
    node_id: &NodeId,
    references: &BTreeMap<i32, Vec<String>>,
) -> Result<Vec<String>, SyncError> {
    let items: Vec<_> = references
        .iter()
        .map(|(kind, targets)| json!({ "referenceIdValue": kind, "items": targets }))
        .collect();
    let parameters = json!({ "nodeId": node_id.to_protocol_string(), "references": items });
    let result = call_script(session, ADD_REFERENCES_SCRIPT, parameters).await?;

    let failures = match results(&result).first() {
        Some(Value::Array(failed)) => failed
            .iter()
            .filter_map(|f| f.as_text().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    Ok(failures)
}

/// References sent to the server after creation: everything but the parent link and the type
/// definition, with string targets in full protocol notation.
pub fn attachable_references(node: &crate::model::Node) -> BTreeMap<i32, Vec<String>> {
    let mut attach: BTreeMap<i32, Vec<String>> = BTreeMap::new();
    for (kind, target) in node.references.iter() {
        if kind == reference_type::TO_PARENT || kind == reference_type::HAS_TYPE_DEFINITION {
            continue;
        }
        let target = match target {
            NodeId::String(value) => format!("ns=1;s={}", value),
            NodeId::Numeric(value) => format!("ns=0;i={}", value),
        };
        attach.entry(kind).or_default().push(target);
    }
    attach
}

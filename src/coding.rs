//! On-disk encoding of variable values
//!
//! Scalars are stored as plain text (strings and XML verbatim, numbers in decimal, booleans as
//! `true`/`false`, byte strings as raw bytes). Arrays and structured scalars are stored as
//! pretty-printed JSON.

use crate::error::SyncError;
use crate::model::variant::{Value, Variant};
use crate::types::{ArrayType, DataType};
use serde_json::Value as Json;

pub fn encode_variant(node_id: &str, variant: &Variant) -> Result<Vec<u8>, SyncError> {
    if variant.array_type != ArrayType::Scalar {
        return to_json_bytes(node_id, &value_to_json(&variant.value));
    }
    Ok(match &variant.value {
        Value::Null => Vec::new(),
        Value::Boolean(b) => b.to_string().into_bytes(),
        Value::Integer(i) => i.to_string().into_bytes(),
        Value::Unsigned(u) => u.to_string().into_bytes(),
        Value::Float(f) => f.to_string().into_bytes(),
        Value::Text(text) => text.clone().into_bytes(),
        Value::Bytes(bytes) => bytes.clone(),
        Value::Structured(json) => return to_json_bytes(node_id, json),
        Value::Array(_) => return to_json_bytes(node_id, &value_to_json(&variant.value)),
    })
}

pub fn decode_variant(
    node_id: &str,
    raw: &[u8],
    data_type: DataType,
    array_type: ArrayType,
) -> Result<Variant, SyncError> {
    Ok(Variant {
        data_type,
        array_type,
        value: decode_value(node_id, raw, data_type, array_type)?,
    })
}

pub fn decode_value(
    node_id: &str,
    raw: &[u8],
    data_type: DataType,
    array_type: ArrayType,
) -> Result<Value, SyncError> {
    let fail = |message: String| {
        SyncError::transform(node_id, format!("Error decoding {:?}: {}", data_type, message))
    };

    if array_type != ArrayType::Scalar {
        let json: Json = serde_json::from_slice(raw).map_err(|e| fail(e.to_string()))?;
        return value_from_json(data_type, &json).map_err(fail);
    }

    if data_type == DataType::ByteString {
        return Ok(Value::Bytes(raw.to_vec()));
    }
    let text = std::str::from_utf8(raw).map_err(|e| fail(e.to_string()))?;
    match data_type {
        DataType::Null => Ok(Value::Null),
        DataType::Boolean => match text.trim() {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            other => Err(fail(format!("'{}' is not a boolean", other))),
        },
        DataType::SByte | DataType::Int16 | DataType::Int32 | DataType::Int64 => text
            .trim()
            .parse()
            .map(Value::Integer)
            .map_err(|e| fail(e.to_string())),
        DataType::Byte
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::StatusCode => text
            .trim()
            .parse()
            .map(Value::Unsigned)
            .map_err(|e| fail(e.to_string())),
        DataType::Float | DataType::Double => text
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|e| fail(e.to_string())),
        DataType::String
        | DataType::XmlElement
        | DataType::DateTime
        | DataType::Guid
        | DataType::NodeId
        | DataType::ExpandedNodeId => Ok(Value::Text(text.to_string())),
        _ => {
            let json: Json = serde_json::from_str(text).map_err(|e| fail(e.to_string()))?;
            Ok(Value::Structured(json))
        }
    }
}

fn to_json_bytes(node_id: &str, json: &Json) -> Result<Vec<u8>, SyncError> {
    serde_json::to_vec_pretty(json)
        .map_err(|e| SyncError::transform(node_id, format!("Error encoding value: {}", e)))
}

pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Unsigned(u) => Json::from(*u),
        Value::Float(f) => Json::from(*f),
        Value::Text(text) => Json::String(text.clone()),
        Value::Bytes(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
        Value::Structured(json) => json.clone(),
        Value::Array(items) => Json::Array(items.iter().map(value_to_json).collect()),
    }
}

pub fn value_from_json(data_type: DataType, json: &Json) -> Result<Value, String> {
    if let Json::Array(items) = json {
        if data_type != DataType::ByteString {
            return items
                .iter()
                .map(|item| value_from_json(data_type, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array);
        }
    }
    let mismatch = || format!("unexpected JSON value {}", json);
    match data_type {
        _ if json.is_null() => Ok(Value::Null),
        DataType::Boolean => json.as_bool().map(Value::Boolean).ok_or_else(mismatch),
        DataType::SByte | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            json.as_i64().map(Value::Integer).ok_or_else(mismatch)
        }
        DataType::Byte
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::StatusCode => json.as_u64().map(Value::Unsigned).ok_or_else(mismatch),
        DataType::Float | DataType::Double => json.as_f64().map(Value::Float).ok_or_else(mismatch),
        DataType::ByteString => match json {
            Json::Array(items) => items
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .map(Value::Bytes)
                .ok_or_else(mismatch),
            Json::String(text) => Ok(Value::Bytes(text.as_bytes().to_vec())),
            _ => Err(mismatch()),
        },
        DataType::String
        | DataType::XmlElement
        | DataType::DateTime
        | DataType::Guid
        | DataType::NodeId
        | DataType::ExpandedNodeId => json
            .as_str()
            .map(|s| Value::Text(s.to_string()))
            .ok_or_else(mismatch),
        _ => Ok(Value::Structured(json.clone())),
    }
}

//! Typed variable values

use crate::coding;
use crate::error::SyncError;
use crate::types::{ArrayType, DataType};

/// A decoded value. Structured scalars keep their JSON shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Structured(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(text) => text.is_empty(),
            Value::Bytes(bytes) => bytes.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub data_type: DataType,
    pub array_type: ArrayType,
    pub value: Value,
}

impl Variant {
    pub fn scalar(data_type: DataType, value: Value) -> Self {
        Self {
            data_type,
            array_type: ArrayType::Scalar,
            value,
        }
    }

    pub fn string(text: impl Into<String>) -> Self {
        Self::scalar(DataType::String, Value::Text(text.into()))
    }
}

/// A variable's value as it is assembled during a run.
///
/// Server reads fill `value` directly; file reads attach `raw` bytes that are decoded on demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueSlot {
    pub data_type: Option<DataType>,
    pub array_type: Option<ArrayType>,
    pub value: Option<Value>,
    pub raw: Option<Vec<u8>>,
    /// Only the definition file is written, the value lives in split parts.
    pub no_write: bool,
}

impl ValueSlot {
    pub fn from_variant(variant: Variant) -> Self {
        let mut slot = ValueSlot::default();
        slot.set(variant);
        slot
    }

    pub fn set(&mut self, variant: Variant) {
        self.data_type = Some(variant.data_type);
        self.array_type = Some(variant.array_type);
        self.value = Some(variant.value);
        self.raw = None;
    }

    pub fn is_complete(&self) -> bool {
        self.data_type.is_some() && self.array_type.is_some()
    }

    /// The full variant. Missing type tags are an invariant violation.
    pub fn variant(&self, node_id: &str) -> Result<Variant, SyncError> {
        let data_type = self
            .data_type
            .ok_or_else(|| SyncError::Invariant(format!("{} has no data type", node_id)))?;
        let array_type = self
            .array_type
            .ok_or_else(|| SyncError::Invariant(format!("{} has no array type", node_id)))?;
        let value = match (&self.value, &self.raw) {
            (Some(value), _) => value.clone(),
            (None, Some(raw)) => coding::decode_value(node_id, raw, data_type, array_type)?,
            (None, None) => Value::Null,
        };
        Ok(Variant {
            data_type,
            array_type,
            value,
        })
    }

    /// Text view used by document transformers.
    pub fn text(&self, node_id: &str) -> Result<String, SyncError> {
        if let Some(raw) = &self.raw {
            return String::from_utf8(raw.clone())
                .map_err(|e| SyncError::transform(node_id, format!("Invalid UTF-8 content: {}", e)));
        }
        match &self.value {
            Some(Value::Text(text)) => Ok(text.clone()),
            Some(Value::Bytes(bytes)) => String::from_utf8(bytes.clone())
                .map_err(|e| SyncError::transform(node_id, format!("Invalid UTF-8 content: {}", e))),
            Some(Value::Null) | None => Ok(String::new()),
            Some(_) => Err(SyncError::transform(node_id, "Expected a text value")),
        }
    }
}

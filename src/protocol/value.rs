use super::types::RespValue;
use crate::error::{AikvError, Result};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};

/// Typed result handed back to callers
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Bool(bool),
    Double(f64),
    /// Binary-safe payload
    Data(Bytes),
    /// Status text such as the reply of TYPE
    Status(String),
    Array(Vec<Value>),
    /// Unordered members, deduplicated
    Set(BTreeSet<Bytes>),
    Map(Vec<(Value, Value)>),
    /// Per-node results of a fan-out keyed by node address
    Nodes(BTreeMap<String, Value>),
    /// Failure annotation inside [`Value::Nodes`]
    Error(String),
}

impl Value {
    /// Structural conversion of a wire frame.
    ///
    /// Error frames are turned into [`AikvError::Response`]; callers that need
    /// redirect classification do it before reaching this point.
    pub fn from_resp(raw: RespValue) -> Result<Self> {
        let value = match raw {
            RespValue::SimpleString(s) => Value::Status(s),
            RespValue::Error(msg) | RespValue::BulkError(msg) => {
                return Err(AikvError::Response(msg))
            }
            RespValue::Integer(i) => Value::Int(i),
            RespValue::BulkString(Some(data)) => Value::Data(data),
            RespValue::BulkString(None) | RespValue::Array(None) | RespValue::Null => Value::Nil,
            RespValue::Array(Some(items)) | RespValue::Push(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::from_resp)
                    .collect::<Result<Vec<_>>>()?,
            ),
            RespValue::Boolean(b) => Value::Bool(b),
            RespValue::Double(d) => Value::Double(d),
            RespValue::BigNumber(n) => Value::Status(n),
            RespValue::VerbatimString { data, .. } => Value::Data(data),
            RespValue::Map(pairs) => Value::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| Ok((Value::from_resp(k)?, Value::from_resp(v)?)))
                    .collect::<Result<Vec<_>>>()?,
            ),
            RespValue::Set(items) => {
                let mut set = BTreeSet::new();
                for item in items {
                    set.insert(Value::from_resp(item)?.into_bytes()?);
                }
                Value::Set(set)
            }
            RespValue::Attribute { data, .. } => Value::from_resp(*data)?,
            RespValue::StreamedString(chunks) => Value::Data(Bytes::from(chunks.concat())),
        };
        Ok(value)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Data(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| unexpected("integer", self)),
            other => Err(unexpected("integer", other)),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            Value::Nil => Ok(false),
            other => Err(unexpected("boolean", other)),
        }
    }

    /// Payload of a bulk reply; nil becomes `None`
    pub fn into_optional_bytes(self) -> Result<Option<Bytes>> {
        match self {
            Value::Nil => Ok(None),
            other => other.into_bytes().map(Some),
        }
    }

    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Value::Data(data) => Ok(data),
            Value::Status(s) => Ok(Bytes::from(s)),
            Value::Int(i) => Ok(Bytes::from(i.to_string())),
            Value::Double(d) => Ok(Bytes::from(d.to_string())),
            other => Err(unexpected("bulk string", &other)),
        }
    }

    /// Array items; nil is an empty array
    pub fn into_array(self) -> Result<Vec<Value>> {
        match self {
            Value::Array(items) => Ok(items),
            Value::Set(members) => Ok(members.into_iter().map(Value::Data).collect()),
            Value::Nil => Ok(Vec::new()),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Set members; arrays are deduplicated, nil is the empty set
    pub fn into_set(self) -> Result<BTreeSet<Bytes>> {
        match self {
            Value::Set(members) => Ok(members),
            Value::Array(items) => items.into_iter().map(Value::into_bytes).collect(),
            Value::Nil => Ok(BTreeSet::new()),
            other => Err(unexpected("set", &other)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "integer",
            Value::Bool(_) => "boolean",
            Value::Double(_) => "double",
            Value::Data(_) => "bulk string",
            Value::Status(_) => "status",
            Value::Array(_) => "array",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Nodes(_) => "per-node map",
            Value::Error(_) => "error",
        }
    }

    /// JSON rendering for tooling output. Binary payloads are shown lossily.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Nil => Json::Null,
            Value::Int(i) => Json::from(*i),
            Value::Bool(b) => Json::from(*b),
            Value::Double(d) => Json::from(*d),
            Value::Data(data) => Json::from(String::from_utf8_lossy(data).into_owned()),
            Value::Status(s) => Json::from(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Set(members) => Json::Array(
                members
                    .iter()
                    .map(|m| Json::from(String::from_utf8_lossy(m).into_owned()))
                    .collect(),
            ),
            Value::Map(pairs) => Json::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.display_key(), v.to_json()))
                    .collect(),
            ),
            Value::Nodes(nodes) => Json::Object(
                nodes
                    .iter()
                    .map(|(addr, v)| (addr.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Error(msg) => serde_json::json!({ "error": msg }),
        }
    }

    fn display_key(&self) -> String {
        match self {
            Value::Data(data) => String::from_utf8_lossy(data).into_owned(),
            Value::Status(s) => s.clone(),
            other => other.to_json().to_string(),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value::Data(data)
    }
}

fn unexpected(expected: &str, got: &Value) -> AikvError {
    AikvError::Protocol(format!("expected {} reply, got {}", expected, got.kind()))
}

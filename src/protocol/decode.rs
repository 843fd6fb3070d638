//! Typing of raw replies per command.

use super::types::RespValue;
use super::value::Value;
use crate::command::descriptor::{CommandDescriptor, ReplyKind};
use crate::error::{AikvError, Result};

/// Turns a raw reply into the typed value callers see
pub trait ResponseDecoder: Send + Sync {
    fn decode(&self, descriptor: &CommandDescriptor, raw: RespValue) -> Result<Value>;
}

/// Decoding driven by the descriptor's [`ReplyKind`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

impl ResponseDecoder for DefaultDecoder {
    fn decode(&self, descriptor: &CommandDescriptor, raw: RespValue) -> Result<Value> {
        let value = Value::from_resp(raw)?;
        let mismatch = |value: &Value| {
            AikvError::Protocol(format!(
                "unexpected {} reply to {}",
                value.kind(),
                descriptor.name
            ))
        };

        match descriptor.reply {
            ReplyKind::Generic => Ok(value),
            ReplyKind::Int => match value {
                Value::Int(_) | Value::Nil => Ok(value),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                other => Err(mismatch(&other)),
            },
            ReplyKind::Bool => match value {
                Value::Int(i) => Ok(Value::Bool(i != 0)),
                Value::Bool(_) => Ok(value),
                Value::Nil => Ok(Value::Bool(false)),
                other => Err(mismatch(&other)),
            },
            ReplyKind::Ok => match value {
                Value::Status(_) | Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Nil | Value::Bool(false) => Ok(Value::Bool(false)),
                // SET ... GET hands back the previous value
                Value::Data(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            ReplyKind::Pong => match value {
                Value::Status(s) => Ok(Value::Bool(s.eq_ignore_ascii_case("PONG"))),
                // PING with a message echoes it back
                Value::Data(_) => Ok(Value::Bool(true)),
                other => Err(mismatch(&other)),
            },
            ReplyKind::Float => match value {
                Value::Nil | Value::Double(_) => Ok(value),
                Value::Data(ref data) => std::str::from_utf8(data)
                    .ok()
                    .and_then(parse_float)
                    .map(Value::Double)
                    .ok_or_else(|| mismatch(&value)),
                Value::Int(i) => Ok(Value::Double(i as f64)),
                other => Err(mismatch(&other)),
            },
            ReplyKind::Set => match value {
                Value::Set(_) => Ok(value),
                Value::Array(_) | Value::Nil => value.into_set().map(Value::Set),
                other => Err(mismatch(&other)),
            },
        }
    }
}

fn parse_float(s: &str) -> Option<f64> {
    match s {
        "inf" | "+inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => s.parse().ok(),
    }
}

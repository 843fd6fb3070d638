use super::types::RespValue;
use crate::error::{AikvError, Result};
use bytes::{Buf, Bytes, BytesMut};
use std::io::Cursor;

/// Outcome of a parse attempt that did not yield a frame
enum Incomplete {
    /// Need more bytes before the frame can be decoded
    More,
    /// The stream is corrupt; the connection must be dropped
    Invalid(String),
}

type Step<T> = std::result::Result<T, Incomplete>;

fn invalid<T>(msg: String) -> Step<T> {
    Err(Incomplete::Invalid(msg))
}

/// Incremental RESP reply parser
pub struct RespParser {
    buffer: BytesMut,
}

impl RespParser {
    /// Create a new parser with a given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Add data to the parser buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Get a mutable reference to the buffer
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Try to parse a complete RESP value from the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a frame.
    pub fn parse(&mut self) -> Result<Option<RespValue>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buffer[..]);
        match parse_value(&mut cursor) {
            Ok(value) => {
                let pos = cursor.position() as usize;
                self.buffer.advance(pos);
                Ok(Some(value))
            }
            Err(Incomplete::More) => Ok(None),
            Err(Incomplete::Invalid(msg)) => Err(AikvError::Protocol(msg)),
        }
    }
}

fn parse_value(cursor: &mut Cursor<&[u8]>) -> Step<RespValue> {
    let pos = cursor.position() as usize;
    let Some(&byte) = cursor.get_ref().get(pos) else {
        return Err(Incomplete::More);
    };
    cursor.set_position(pos as u64 + 1);

    match byte {
        // RESP2 types
        b'+' => Ok(RespValue::SimpleString(read_line(cursor)?)),
        b'-' => Ok(RespValue::Error(read_line(cursor)?)),
        b':' => Ok(RespValue::Integer(read_number(cursor, "integer")?)),
        b'$' => parse_bulk_string(cursor),
        b'*' => parse_array(cursor),
        // RESP3 types
        b'_' => {
            read_line(cursor)?;
            Ok(RespValue::Null)
        }
        b'#' => match read_line(cursor)?.as_str() {
            "t" => Ok(RespValue::Boolean(true)),
            "f" => Ok(RespValue::Boolean(false)),
            other => invalid(format!("Invalid boolean: {}", other)),
        },
        b',' => parse_double(cursor),
        b'(' => Ok(RespValue::BigNumber(read_line(cursor)?)),
        b'!' => {
            let data = read_sized(cursor, "bulk error")?;
            Ok(RespValue::BulkError(String::from_utf8_lossy(&data).to_string()))
        }
        b'=' => parse_verbatim_string(cursor),
        b'%' => Ok(RespValue::Map(read_pairs(cursor, "map")?)),
        b'~' => Ok(RespValue::Set(read_items(cursor, "set")?)),
        b'>' => Ok(RespValue::Push(read_items(cursor, "push")?)),
        b'|' => {
            let attributes = read_pairs(cursor, "attribute")?;
            let data = parse_value(cursor)?;
            Ok(RespValue::Attribute {
                attributes,
                data: Box::new(data),
            })
        }
        _ => invalid(format!("Invalid RESP type marker: {}", byte as char)),
    }
}

fn read_line(cursor: &mut Cursor<&[u8]>) -> Step<String> {
    let start = cursor.position() as usize;
    let data = *cursor.get_ref();

    let end = data[start.min(data.len())..]
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(Incomplete::More)?;

    let line = String::from_utf8_lossy(&data[start..start + end]).to_string();
    cursor.set_position((start + end + 2) as u64);
    Ok(line)
}

fn read_number(cursor: &mut Cursor<&[u8]>, what: &str) -> Step<i64> {
    let line = read_line(cursor)?;
    match line.parse::<i64>() {
        Ok(n) => Ok(n),
        Err(_) => invalid(format!("Invalid {}: {}", what, line)),
    }
}

fn read_len(cursor: &mut Cursor<&[u8]>, what: &str) -> Step<usize> {
    let len = read_number(cursor, what)?;
    if len < 0 {
        return invalid(format!("Invalid {} length: {}", what, len));
    }
    Ok(len as usize)
}

/// Read `len` payload bytes plus the trailing CRLF
fn read_payload(cursor: &mut Cursor<&[u8]>, len: usize) -> Step<Bytes> {
    let pos = cursor.position() as usize;
    let data = *cursor.get_ref();

    if pos + len + 2 > data.len() {
        return Err(Incomplete::More);
    }

    let bytes = Bytes::copy_from_slice(&data[pos..pos + len]);
    cursor.set_position((pos + len + 2) as u64);
    Ok(bytes)
}

fn read_sized(cursor: &mut Cursor<&[u8]>, what: &str) -> Step<Bytes> {
    let len = read_len(cursor, what)?;
    read_payload(cursor, len)
}

fn parse_bulk_string(cursor: &mut Cursor<&[u8]>) -> Step<RespValue> {
    let line = read_line(cursor)?;

    if line == "?" {
        return parse_streamed_string_body(cursor);
    }

    let len = match line.parse::<i64>() {
        Ok(len) => len,
        Err(_) => return invalid(format!("Invalid bulk string length: {}", line)),
    };

    match len {
        -1 => Ok(RespValue::BulkString(None)),
        len if len < 0 => invalid(format!("Invalid bulk string length: {}", len)),
        len => Ok(RespValue::BulkString(Some(read_payload(cursor, len as usize)?))),
    }
}

fn parse_array(cursor: &mut Cursor<&[u8]>) -> Step<RespValue> {
    let len = read_number(cursor, "array length")?;

    match len {
        -1 => Ok(RespValue::Array(None)),
        len if len < 0 => invalid(format!("Invalid array length: {}", len)),
        len => {
            let mut array = Vec::with_capacity(len as usize);
            for _ in 0..len {
                array.push(parse_value(cursor)?);
            }
            Ok(RespValue::Array(Some(array)))
        }
    }
}

fn read_items(cursor: &mut Cursor<&[u8]>, what: &str) -> Step<Vec<RespValue>> {
    let len = read_len(cursor, what)?;
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(parse_value(cursor)?);
    }
    Ok(items)
}

fn read_pairs(cursor: &mut Cursor<&[u8]>, what: &str) -> Step<Vec<(RespValue, RespValue)>> {
    let len = read_len(cursor, what)?;
    let mut pairs = Vec::with_capacity(len);
    for _ in 0..len {
        let key = parse_value(cursor)?;
        let value = parse_value(cursor)?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

fn parse_double(cursor: &mut Cursor<&[u8]>) -> Step<RespValue> {
    let line = read_line(cursor)?;
    let num = match line.as_str() {
        "inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        _ => match line.parse::<f64>() {
            Ok(n) => n,
            Err(_) => return invalid(format!("Invalid double: {}", line)),
        },
    };
    Ok(RespValue::Double(num))
}

fn parse_verbatim_string(cursor: &mut Cursor<&[u8]>) -> Step<RespValue> {
    let content = read_sized(cursor, "verbatim string")?;

    let Some(colon_pos) = content.iter().position(|&b| b == b':') else {
        return invalid("Invalid verbatim string format".to_string());
    };

    Ok(RespValue::VerbatimString {
        format: String::from_utf8_lossy(&content[..colon_pos]).to_string(),
        data: content.slice(colon_pos + 1..),
    })
}

fn parse_streamed_string_body(cursor: &mut Cursor<&[u8]>) -> Step<RespValue> {
    let mut chunks = Vec::new();

    loop {
        let pos = cursor.position() as usize;
        let next = cursor.get_ref().get(pos).copied();
        match next {
            None => return Err(Incomplete::More),
            Some(b';') => cursor.set_position(pos as u64 + 1),
            Some(other) => {
                return invalid(format!(
                    "Expected ';' in streamed string, got {}",
                    other as char
                ))
            }
        }

        // Length 0 terminates the stream
        let len = read_len(cursor, "streamed chunk")?;
        if len == 0 {
            break;
        }
        chunks.push(read_payload(cursor, len)?);
    }

    Ok(RespValue::StreamedString(chunks))
}

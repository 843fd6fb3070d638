use bytes::{BufMut, Bytes, BytesMut};

/// RESP (REdis Serialization Protocol) frames as read off the wire
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String: +OK\r\n
    SimpleString(String),

    /// Error: -Error message\r\n
    Error(String),

    /// Integer: :1000\r\n
    Integer(i64),

    /// Bulk String: $6\r\nfoobar\r\n or $-1\r\n for null
    BulkString(Option<Bytes>),

    /// Array: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n or *-1\r\n for null
    Array(Option<Vec<RespValue>>),

    /// RESP3 Null: _\r\n
    Null,

    /// RESP3 Boolean: #t\r\n
    Boolean(bool),

    /// RESP3 Double: ,1.23\r\n
    Double(f64),

    /// RESP3 Big number, kept as its decimal text
    BigNumber(String),

    /// RESP3 Bulk error: !21\r\nSYNTAX invalid syntax\r\n
    BulkError(String),

    /// RESP3 Verbatim string: =15\r\ntxt:Some string\r\n
    VerbatimString { format: String, data: Bytes },

    /// RESP3 Map: %2\r\n...
    Map(Vec<(RespValue, RespValue)>),

    /// RESP3 Set: ~2\r\n...
    Set(Vec<RespValue>),

    /// RESP3 Push: >3\r\n...
    Push(Vec<RespValue>),

    /// RESP3 Attribute followed by the value it annotates
    Attribute {
        attributes: Vec<(RespValue, RespValue)>,
        data: Box<RespValue>,
    },

    /// RESP3 streamed string chunks
    StreamedString(Vec<Bytes>),
}

impl RespValue {
    /// Create a simple string value
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Create an error value
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    /// Create an integer value
    pub fn integer(i: i64) -> Self {
        RespValue::Integer(i)
    }

    /// Create a bulk string value
    pub fn bulk_string(s: impl Into<Bytes>) -> Self {
        RespValue::BulkString(Some(s.into()))
    }

    /// Create a null bulk string value
    pub fn null_bulk_string() -> Self {
        RespValue::BulkString(None)
    }

    /// Create an array value
    pub fn array(arr: Vec<RespValue>) -> Self {
        RespValue::Array(Some(arr))
    }

    /// Create OK value
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// The error text if this frame is an error reply
    pub fn as_error(&self) -> Option<&str> {
        match self {
            RespValue::Error(e) | RespValue::BulkError(e) => Some(e),
            _ => None,
        }
    }

    /// Serialize to RESP format bytes (RESP2 subset; RESP3 frames are only ever read)
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => {
                buf.put_slice(format!("+{}\r\n", s).as_bytes());
            }
            RespValue::Error(e) | RespValue::BulkError(e) => {
                buf.put_slice(format!("-{}\r\n", e).as_bytes());
            }
            RespValue::Integer(i) => {
                buf.put_slice(format!(":{}\r\n", i).as_bytes());
            }
            RespValue::BulkString(None) | RespValue::Null => {
                buf.put_slice(b"$-1\r\n");
            }
            RespValue::BulkString(Some(s)) => write_bulk(buf, s),
            RespValue::Array(None) => {
                buf.put_slice(b"*-1\r\n");
            }
            RespValue::Array(Some(arr)) | RespValue::Set(arr) | RespValue::Push(arr) => {
                buf.put_slice(format!("*{}\r\n", arr.len()).as_bytes());
                for item in arr {
                    item.write_to(buf);
                }
            }
            RespValue::Boolean(b) => {
                buf.put_slice(format!(":{}\r\n", i64::from(*b)).as_bytes());
            }
            RespValue::Double(d) => write_bulk(buf, d.to_string().as_bytes()),
            RespValue::BigNumber(n) => write_bulk(buf, n.as_bytes()),
            RespValue::VerbatimString { data, .. } => write_bulk(buf, data),
            RespValue::Map(pairs) => {
                buf.put_slice(format!("*{}\r\n", pairs.len() * 2).as_bytes());
                for (k, v) in pairs {
                    k.write_to(buf);
                    v.write_to(buf);
                }
            }
            RespValue::Attribute { data, .. } => data.write_to(buf),
            RespValue::StreamedString(chunks) => write_bulk(buf, &chunks.concat()),
        }
    }
}

fn write_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.put_slice(format!("${}\r\n", data.len()).as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

/// Encode a request as a RESP array of bulk strings.
///
/// `command` may carry a container subcommand ("CONFIG GET"); each word becomes
/// its own bulk string.
pub fn encode_command(command: &str, args: &[Bytes]) -> Bytes {
    let words: Vec<&str> = command.split_whitespace().collect();
    let mut buf = BytesMut::with_capacity(64 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    buf.put_slice(format!("*{}\r\n", words.len() + args.len()).as_bytes());
    for word in words {
        write_bulk(&mut buf, word.as_bytes());
    }
    for arg in args {
        write_bulk(&mut buf, arg);
    }
    buf.freeze()
}

pub mod decode;
pub mod parser;
pub mod types;
pub mod value;

pub use decode::{DefaultDecoder, ResponseDecoder};
pub use parser::RespParser;
pub use types::{encode_command, RespValue};
pub use value::Value;

//! Protocol Module
//!
//! RESP wire protocol: command encoding and incremental reply decoding.
//!
//! ## Command Format
//! ```text
//! *<argc>\r\n $<len>\r\n<arg>\r\n ...
//! ```
//!
//! ## Reply Types
//! - `+` simple string
//! - `-` error (returned as a value, never thrown by the parser)
//! - `:` integer
//! - `$` bulk string (`$-1` = nil)
//! - `*` array (`*-1` = nil), arbitrarily nested

mod codec;
mod command;
mod parser;
mod value;

pub use codec::{
    encode_command, encode_value, pack_commands, write_command, write_value, CRLF, MAX_BULK_SIZE,
};
pub use command::{cmd, Cmd, ToArg};
pub use parser::Parser;
pub use value::{Encoding, ReplyError, Value};

//! Reply values
//!
//! Represents decoded server replies.

use std::fmt;

use bytes::Bytes;

use crate::error::{CorvidError, Result};

/// Error codes that mean "the server cannot answer right now".
const RETRYABLE_CODES: &[&str] = &["BUSY", "LOADING", "TRYAGAIN", "MASTERDOWN"];

/// A decoded reply
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `$-1` or `*-1`
    Nil,

    /// `:123`
    Integer(i64),

    /// `+OK`
    SimpleString(String),

    /// `-ERR ...`, kept as a value so pipelines can return it inline
    Error(ReplyError),

    /// `$5\r\nhello`
    BulkString(Bytes),

    /// `*2\r\n...`, may nest
    Array(Vec<Value>),
}

impl Value {
    /// Shorthand for a bulk string reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::BulkString(data.into())
    }

    /// Shorthand for a simple string reply.
    pub fn simple(text: impl Into<String>) -> Self {
        Value::SimpleString(text.into())
    }

    /// Shorthand for `+OK`.
    pub fn okay() -> Self {
        Value::SimpleString("OK".to_string())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Raw bytes of a bulk or simple string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::BulkString(data) => Some(data),
            Value::SimpleString(text) => Some(text.as_bytes()),
            _ => None,
        }
    }

    /// Integer value, parsing bulk strings that hold a decimal number.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::BulkString(data) => std::str::from_utf8(data).ok()?.parse().ok(),
            Value::SimpleString(text) => text.parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Converts an `Error` value into `Err(CorvidError::Reply)`.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Value::Error(err) => Err(CorvidError::Reply(err)),
            other => Ok(other),
        }
    }

    /// Consumes an array reply; `Nil` becomes an empty list.
    pub fn into_array(self) -> Result<Vec<Value>> {
        match self {
            Value::Array(items) => Ok(items),
            Value::Nil => Ok(Vec::new()),
            Value::Error(err) => Err(CorvidError::Reply(err)),
            other => Err(CorvidError::Protocol(format!(
                "expected array reply, got {}",
                other.kind()
            ))),
        }
    }

    /// Short type name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Integer(_) => "integer",
            Value::SimpleString(_) => "simple-string",
            Value::Error(_) => "error",
            Value::BulkString(_) => "bulk-string",
            Value::Array(_) => "array",
        }
    }
}

/// An error reply from the server.
///
/// The full line is kept verbatim; the leading word is the error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyError {
    line: String,
}

impl ReplyError {
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    /// First word of the error line, e.g. `ERR`, `NOSCRIPT`, `WRONGTYPE`.
    pub fn code(&self) -> &str {
        self.line.split(' ').next().unwrap_or("")
    }

    /// Error text without the code.
    pub fn message(&self) -> &str {
        match self.line.split_once(' ') {
            Some((_, rest)) => rest,
            None => "",
        }
    }

    /// The full error line as received.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Server busy or still loading its dataset.
    pub fn is_retryable(&self) -> bool {
        RETRYABLE_CODES.contains(&self.code())
    }

    /// The script cache no longer holds the requested digest.
    pub fn is_no_script(&self) -> bool {
        self.code() == "NOSCRIPT"
    }

    pub fn is_exec_abort(&self) -> bool {
        self.code() == "EXECABORT"
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

impl std::error::Error for ReplyError {}

/// Text encoding used to turn byte replies into strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

impl Encoding {
    /// Parses an encoding label such as `utf-8` or `latin-1`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Some(Encoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Some(Encoding::Latin1),
            _ => None,
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(data.to_vec())
                .map_err(|e| CorvidError::Protocol(format!("reply is not valid UTF-8: {}", e))),
            Encoding::Latin1 => Ok(data.iter().map(|&b| b as char).collect()),
        }
    }
}

//! Protocol codec
//!
//! Encoding functions for the wire protocol. Decoding lives in
//! [`Parser`](super::Parser) because replies arrive incrementally.
//!
//! ## Wire Format
//!
//! ### Command Frame
//! ```text
//! *<argc>\r\n
//! $<len>\r\n<arg bytes>\r\n      (repeated argc times)
//! ```
//!
//! ### Reply Frames
//! ```text
//! +<text>\r\n                  simple string
//! -<text>\r\n                  error
//! :<integer>\r\n               integer
//! $<len>\r\n<bytes>\r\n        bulk string ($-1 = nil)
//! *<count>\r\n<items...>       array (*-1 = nil), items may nest
//! ```

use std::io::Write;

use bytes::{BufMut, BytesMut};

use crate::error::Result;
use super::{Cmd, Value};

/// Line terminator
pub const CRLF: &[u8] = b"\r\n";

/// Maximum bulk string length accepted from the server (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

// =============================================================================
// Command Encoding
// =============================================================================

/// Encode one command into the buffer
///
/// Format: `*argc` header followed by one length-prefixed bulk per argument
pub fn encode_command<A: AsRef<[u8]>>(args: &[A], out: &mut BytesMut) {
    write_header(out, b'*', args.len() as i64);
    for arg in args {
        let arg = arg.as_ref();
        write_header(out, b'$', arg.len() as i64);
        out.extend_from_slice(arg);
        out.extend_from_slice(CRLF);
    }
}

/// Pack several commands into one contiguous buffer
pub fn pack_commands<'a>(commands: impl IntoIterator<Item = &'a Cmd>) -> BytesMut {
    let mut out = BytesMut::with_capacity(256);
    for command in commands {
        encode_command(command.as_args(), &mut out);
    }
    out
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Cmd) -> Result<()> {
    let mut buf = BytesMut::new();
    encode_command(command.as_args(), &mut buf);
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Reply Encoding
// =============================================================================

/// Encode a reply value
///
/// The client never sends replies; this is the inverse of the parser and is
/// used by servers and test doubles.
pub fn encode_value(value: &Value, out: &mut BytesMut) {
    match value {
        Value::Nil => out.extend_from_slice(b"$-1\r\n"),
        Value::Integer(n) => write_header(out, b':', *n),
        Value::SimpleString(text) => write_line(out, b'+', text.as_bytes()),
        Value::Error(err) => write_line(out, b'-', err.line().as_bytes()),
        Value::BulkString(data) => {
            write_header(out, b'$', data.len() as i64);
            out.extend_from_slice(data);
            out.extend_from_slice(CRLF);
        }
        Value::Array(items) => {
            write_header(out, b'*', items.len() as i64);
            for item in items {
                encode_value(item, out);
            }
        }
    }
}

/// Write a reply to a stream
pub fn write_value<W: Write>(writer: &mut W, value: &Value) -> Result<()> {
    let mut buf = BytesMut::new();
    encode_value(value, &mut buf);
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn write_header(out: &mut BytesMut, tag: u8, n: i64) {
    out.put_u8(tag);
    out.extend_from_slice(n.to_string().as_bytes());
    out.extend_from_slice(CRLF);
}

fn write_line(out: &mut BytesMut, tag: u8, text: &[u8]) {
    out.put_u8(tag);
    out.extend_from_slice(text);
    out.extend_from_slice(CRLF);
}

//! Incremental reply parser
//!
//! Bytes are fed in whatever chunks the socket delivers. `decode()` either
//! yields one complete reply, reports that more bytes are needed, or fails
//! on malformed input.
//!
//! Arrays are built without recursion: an array header pushes a partial
//! aggregate onto `stack`, each decoded element is appended to the top, and
//! a drained top is popped and appended to its parent. When the buffer runs
//! dry mid-value nothing is consumed for that value and the stack is kept,
//! so the next `decode()` resumes exactly where this one stopped.

use bytes::{Buf, BytesMut};

use crate::error::{CorvidError, Result};
use super::codec::MAX_BULK_SIZE;
use super::{ReplyError, Value};

/// Longest header line accepted before a CRLF must appear (64 KB)
const MAX_LINE_SIZE: usize = 64 * 1024;

/// An array whose elements are still arriving
#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<Value>,
}

/// Outcome of decoding one frame at the head of the buffer
enum Frame {
    Value(Value),
    ArrayHeader(usize),
}

/// Incremental RESP decoder
#[derive(Debug, Default)]
pub struct Parser {
    buffer: BytesMut,
    stack: Vec<PartialArray>,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            stack: Vec::new(),
        }
    }

    /// Append raw bytes received from the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// True when a reply has been partially decoded.
    pub fn in_progress(&self) -> bool {
        !self.stack.is_empty() || !self.buffer.is_empty()
    }

    /// Drop all buffered bytes and partial aggregates.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.stack.clear();
    }

    /// Decode the next complete reply.
    ///
    /// Returns `Ok(None)` when the buffer holds only part of a reply.
    pub fn decode(&mut self) -> Result<Option<Value>> {
        'frames: loop {
            let mut value = match self.next_frame()? {
                None => return Ok(None),
                Some(Frame::Value(value)) => value,
                Some(Frame::ArrayHeader(0)) => Value::Array(Vec::new()),
                Some(Frame::ArrayHeader(len)) => {
                    self.stack.push(PartialArray {
                        remaining: len,
                        items: Vec::with_capacity(len.min(1024)),
                    });
                    continue;
                }
            };

            while let Some(top) = self.stack.last_mut() {
                top.items.push(value);
                top.remaining -= 1;
                if top.remaining > 0 {
                    continue 'frames;
                }
                value = Value::Array(std::mem::take(&mut top.items));
                self.stack.pop();
            }

            return Ok(Some(value));
        }
    }

    /// Decode the frame at the head of the buffer, consuming it only if complete.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(line_end) = find_crlf(&self.buffer)? else {
            return Ok(None);
        };
        if line_end == 0 {
            return Err(CorvidError::Protocol("empty reply line".to_string()));
        }

        let tag = self.buffer[0];
        let frame = match tag {
            b'+' => Frame::Value(parse_simple(&self.buffer[1..line_end])),
            b'-' => Frame::Value(parse_error(&self.buffer[1..line_end])),
            b':' => Frame::Value(Value::Integer(parse_int(&self.buffer[1..line_end])?)),
            b'$' => {
                let len = parse_int(&self.buffer[1..line_end])?;
                match parse_bulk(&self.buffer, line_end, len)? {
                    Some((value, consumed)) => {
                        self.buffer.advance(consumed);
                        return Ok(Some(Frame::Value(value)));
                    }
                    None => return Ok(None),
                }
            }
            b'*' => match parse_int(&self.buffer[1..line_end])? {
                -1 => Frame::Value(Value::Nil),
                n if n < 0 => {
                    return Err(CorvidError::Protocol(format!("invalid array length {}", n)))
                }
                n => Frame::ArrayHeader(n as usize),
            },
            other => {
                return Err(CorvidError::Protocol(format!(
                    "unknown reply type byte 0x{:02x}",
                    other
                )))
            }
        };

        self.buffer.advance(line_end + 2);
        Ok(Some(frame))
    }
}

// =============================================================================
// Frame decoders
// =============================================================================

fn parse_simple(line: &[u8]) -> Value {
    Value::SimpleString(String::from_utf8_lossy(line).into_owned())
}

fn parse_error(line: &[u8]) -> Value {
    Value::Error(ReplyError::new(String::from_utf8_lossy(line).into_owned()))
}

/// Returns the bulk value and the bytes it spans, or `None` if incomplete.
fn parse_bulk(buffer: &BytesMut, line_end: usize, len: i64) -> Result<Option<(Value, usize)>> {
    let header = line_end + 2;
    if len == -1 {
        return Ok(Some((Value::Nil, header)));
    }
    if len < 0 || len as usize > MAX_BULK_SIZE {
        return Err(CorvidError::Protocol(format!("invalid bulk length {}", len)));
    }

    let len = len as usize;
    let total = header + len + 2;
    if buffer.len() < total {
        return Ok(None);
    }
    if &buffer[header + len..total] != b"\r\n" {
        return Err(CorvidError::Protocol("bulk string not terminated by CRLF".to_string()));
    }

    let data = bytes::Bytes::copy_from_slice(&buffer[header..header + len]);
    Ok(Some((Value::BulkString(data), total)))
}

fn parse_int(digits: &[u8]) -> Result<i64> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            CorvidError::Protocol(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(digits)
            ))
        })
}

/// Position of the first CRLF, or `None` if the line is not complete yet.
fn find_crlf(buffer: &[u8]) -> Result<Option<usize>> {
    let pos = buffer.windows(2).position(|w| w == b"\r\n");
    if pos.is_none() && buffer.len() > MAX_LINE_SIZE {
        return Err(CorvidError::Protocol("reply line too long".to_string()));
    }
    Ok(pos)
}

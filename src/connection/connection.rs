//! Connection
//!
//! One socket to the server: handshake, framing, reply decoding, and the set
//! of scripts known to be cached server-side for this socket.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;

use crate::config::Config;
use crate::error::{CorvidError, Result};
use crate::protocol::{encode_command, Cmd, Parser, Value};
use super::transport::{Connector, ProbeResult, Transport};

/// Size of each socket read
const READ_CHUNK: usize = 16 * 1024;

/// Extra read time granted on top of a blocking command's own timeout
const BLOCK_TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// A single server connection
///
/// Owned by at most one request at a time. Once any send, receive or parse
/// fails the connection disconnects itself; the next `connect()` opens a
/// fresh socket.
pub struct Connection {
    /// Pool-assigned id for logging
    id: u64,

    /// Shared client configuration
    config: Arc<Config>,

    /// Opens the underlying transport
    connector: Arc<dyn Connector>,

    /// Live socket, `None` while disconnected
    transport: Option<Box<dyn Transport>>,

    /// Incremental reply decoder
    parser: Parser,

    /// Reused outgoing frame buffer
    write_buf: BytesMut,

    /// Reused socket read buffer
    read_buf: Vec<u8>,

    /// Replies sent for but not yet read
    outstanding: usize,

    /// Scripts loaded server-side through this socket
    loaded_scripts: HashSet<String>,

    /// Script-flush epoch the loaded set belongs to
    script_epoch: u64,

    /// Successful connects, including reconnects
    connects: u64,
}

impl Connection {
    /// Create a disconnected connection
    pub fn new(id: u64, config: Arc<Config>, connector: Arc<dyn Connector>) -> Self {
        Self {
            id,
            config,
            connector,
            transport: None,
            parser: Parser::new(),
            write_buf: BytesMut::with_capacity(256),
            read_buf: vec![0u8; READ_CHUNK],
            outstanding: 0,
            loaded_scripts: HashSet::new(),
            script_epoch: 0,
            connects: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Number of times this connection has (re)connected
    pub fn connect_count(&self) -> u64 {
        self.connects
    }

    /// True when a request was abandoned before its replies were read
    pub fn has_outstanding_replies(&self) -> bool {
        self.outstanding > 0
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the socket and run the handshake; a no-op when already connected
    pub fn connect(&mut self) -> Result<()> {
        if self.transport.is_some() {
            return Ok(());
        }

        let transport = self.connector.connect(&self.config).map_err(|e| {
            tracing::debug!("Connection {} to {} failed: {}", self.id, self.config.address, e);
            CorvidError::Io(e)
        })?;

        self.transport = Some(transport);
        self.parser.reset();
        self.outstanding = 0;
        self.loaded_scripts.clear();

        if let Err(e) = self.on_connect() {
            tracing::warn!("Handshake on connection {} failed: {}", self.id, e);
            self.disconnect();
            return Err(e);
        }

        self.connects += 1;
        tracing::debug!("Connection {} established to {}", self.id, self.config.address);
        Ok(())
    }

    /// Handshake: AUTH, then SELECT, then CLIENT SETNAME, each awaited in turn
    fn on_connect(&mut self) -> Result<()> {
        if let Some(password) = self.config.password.clone() {
            let mut auth = Cmd::new("AUTH");
            if let Some(username) = &self.config.username {
                auth.push_arg(username);
            }
            auth.push_arg(&password);
            if let Value::Error(err) = self.roundtrip(&auth)? {
                return Err(CorvidError::AuthenticationFailed(err.to_string()));
            }
        }

        if self.config.db != 0 {
            let select = Cmd::new("SELECT").arg(self.config.db);
            if let Value::Error(err) = self.roundtrip(&select)? {
                return Err(CorvidError::InvalidDatabase(err.to_string()));
            }
        }

        if let Some(name) = self.config.client_name.clone() {
            let setname = Cmd::new("CLIENT").arg("SETNAME").arg(&name);
            self.roundtrip(&setname)?.into_result()?;
        }

        Ok(())
    }

    /// Close the socket and forget per-socket state
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown();
            tracing::debug!("Connection {} closed", self.id);
        }
        self.parser.reset();
        self.outstanding = 0;
        self.loaded_scripts.clear();
    }

    /// Validate an idle connection before reuse
    ///
    /// A socket the peer has closed, one with unsolicited bytes waiting, or
    /// one abandoned mid-request is disconnected so the next use reconnects.
    pub fn ensure_healthy(&mut self) {
        if self.outstanding > 0 || self.parser.in_progress() {
            tracing::warn!("Connection {} abandoned mid-reply, discarding socket", self.id);
            self.disconnect();
            return;
        }

        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        match transport.probe() {
            Ok(ProbeResult::Idle) => {}
            Ok(state) => {
                tracing::debug!("Connection {} stale ({:?}), reconnecting on next use", self.id, state);
                self.disconnect();
            }
            Err(e) => {
                tracing::debug!("Connection {} probe failed: {}", self.id, e);
                self.disconnect();
            }
        }
    }

    // =========================================================================
    // Framing
    // =========================================================================

    /// Write one command; the connection must be connected
    pub fn send_command(&mut self, command: &Cmd) -> Result<()> {
        self.write_buf.clear();
        encode_command(command.as_args(), &mut self.write_buf);
        let packed = self.write_buf.split().freeze();
        self.send_packed(&packed, 1)
    }

    /// Write pre-encoded commands expecting `replies` replies
    pub fn send_packed(&mut self, bytes: &[u8], replies: usize) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(CorvidError::ConnectionClosed);
        };

        tracing::trace!("Connection {} sending {} bytes ({} commands)", self.id, bytes.len(), replies);
        if let Err(e) = transport.send(bytes) {
            tracing::warn!("Error writing to {}: {}", self.config.address, e);
            self.disconnect();
            return Err(CorvidError::Io(e));
        }

        self.outstanding += replies;
        Ok(())
    }

    /// Block until one complete reply has been decoded
    pub fn read_reply(&mut self) -> Result<Value> {
        loop {
            match self.parser.decode() {
                Ok(Some(value)) => {
                    self.outstanding = self.outstanding.saturating_sub(1);
                    tracing::trace!("Connection {} received {} reply", self.id, value.kind());
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Malformed reply from {}: {}", self.config.address, e);
                    self.disconnect();
                    return Err(e);
                }
            }

            let Some(transport) = self.transport.as_mut() else {
                return Err(CorvidError::ConnectionClosed);
            };

            match transport.recv(&mut self.read_buf) {
                Ok(0) => {
                    tracing::debug!("Server {} closed connection {}", self.config.address, self.id);
                    self.disconnect();
                    return Err(CorvidError::ConnectionClosed);
                }
                Ok(n) => self.parser.feed(&self.read_buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    // Windows reports TimedOut where Unix reports WouldBlock
                    tracing::warn!("Read timeout on connection {}", self.id);
                    self.disconnect();
                    return Err(CorvidError::Timeout);
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.config.address, e);
                    self.disconnect();
                    return Err(CorvidError::Io(e));
                }
            }
        }
    }

    /// Send one command and read its reply on an already connected socket
    fn roundtrip(&mut self, command: &Cmd) -> Result<Value> {
        self.send_command(command)?;
        self.read_reply()
    }

    /// Connect if needed, then send one command and read its reply
    pub fn execute(&mut self, command: &Cmd) -> Result<Value> {
        self.connect()?;
        self.roundtrip(command)
    }

    /// Run a blocking command whose server-side wait is `block`
    ///
    /// The read timeout is raised so it never expires before the server's
    /// own timeout; a zero `block` waits forever.
    pub fn execute_with_block_timeout(&mut self, command: &Cmd, block: Duration) -> Result<Value> {
        self.connect()?;

        let configured = self.config.socket_timeout;
        let needed = if block.is_zero() {
            None
        } else {
            Some(block + BLOCK_TIMEOUT_MARGIN)
        };
        let widen = match (configured, needed) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(current), Some(needed)) => needed > current,
        };

        if widen {
            self.set_read_timeout(needed)?;
        }
        let reply = self.roundtrip(command);
        if widen && self.is_connected() {
            if let Err(e) = self.set_read_timeout(configured) {
                // A socket left on the widened timeout must not be reused
                tracing::warn!("Restoring read timeout on connection {} failed: {}", self.id, e);
                self.disconnect();
            }
        }
        reply
    }

    /// Change the socket read timeout
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if let Some(transport) = self.transport.as_mut() {
            transport.set_read_timeout(timeout)?;
        }
        Ok(())
    }

    // =========================================================================
    // Script cache bookkeeping
    // =========================================================================

    /// Scripts known to be loaded through this socket
    pub fn loaded_scripts(&self) -> &HashSet<String> {
        &self.loaded_scripts
    }

    pub fn is_script_loaded(&self, name: &str) -> bool {
        self.loaded_scripts.contains(name)
    }

    pub fn mark_script_loaded(&mut self, name: &str) {
        self.loaded_scripts.insert(name.to_string());
    }

    pub fn clear_loaded_scripts(&mut self) {
        self.loaded_scripts.clear();
    }

    /// Forget loaded scripts if a cache flush happened since they were loaded
    pub fn sync_script_epoch(&mut self, epoch: u64) {
        if self.script_epoch != epoch {
            self.loaded_scripts.clear();
            self.script_epoch = epoch;
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.config.address)
            .field("connected", &self.transport.is_some())
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

//! Client
//!
//! The entry point used by higher layers: runs single commands, pipelines,
//! transactions and script calls against a pooled set of connections.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::config::Config;
use crate::connection::{Connection, ConnectionPool, Connector, PoolStats, PooledConnection, StdConnector};
use crate::error::{CorvidError, Result};
use crate::prefix::{KeyPrefixer, Rewrite, ScopedCommand};
use crate::protocol::{Cmd, ToArg, Value};
use crate::script::ScriptRegistry;
use super::pipeline::Pipeline;
use super::request::Request;

/// Keys requested per SCAN round trip when emulating scoped commands
const SCAN_BATCH: usize = 500;

/// State shared by a client and every prefixed view of it
struct ClientInner {
    pool: ConnectionPool,
    scripts: Arc<ScriptRegistry>,

    /// Reconnect-and-retry attempts across all requests
    retries: AtomicU64,

    /// Bumped on every SCRIPT FLUSH; connections with an older epoch forget
    /// their loaded scripts at checkout
    script_epoch: AtomicU64,
}

/// A handle to the server (cheap to clone)
///
/// ## Concurrency Model
///
/// Any number of threads may share a client. Each operation checks out its
/// own connection, so requests never interleave on a socket.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,

    /// Key namespace applied to every command, if any
    prefixer: Option<KeyPrefixer>,
}

impl Client {
    /// Connect lazily using a connection URL
    ///
    /// No socket is opened until the first command runs.
    pub fn open(url: &str) -> Result<Self> {
        Ok(Self::with_config(Config::from_url(url)?))
    }

    pub fn with_config(config: Config) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> ClientBuilder {
        ClientBuilder {
            config,
            scripts: None,
            connector: None,
        }
    }

    pub fn config(&self) -> &Config {
        self.inner.pool.config()
    }

    pub fn scripts(&self) -> &ScriptRegistry {
        &self.inner.scripts
    }

    /// The key prefix applied by this client
    pub fn prefix(&self) -> Option<&[u8]> {
        self.prefixer.as_ref().map(KeyPrefixer::prefix)
    }

    /// A client sharing this one's pool and scripts, with keys under `prefix`
    ///
    /// Prefixing an already prefixed client nests the namespaces.
    pub fn prefixed(&self, prefix: impl AsRef<[u8]>) -> Client {
        let prefix = prefix.as_ref();
        let prefixer = match &self.prefixer {
            Some(outer) => outer.nested(prefix),
            None => KeyPrefixer::new(prefix),
        };
        Client {
            inner: Arc::clone(&self.inner),
            prefixer: Some(prefixer),
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Run one command and return its reply
    ///
    /// A failure to connect or send is retried once on a fresh socket. A
    /// server error reply is returned as `Err(CorvidError::Reply)`.
    pub fn execute(&self, command: Cmd) -> Result<Value> {
        let name = command.name();
        let command = match self.rewrite(&command)? {
            Rewrite::Command(command) => command,
            Rewrite::Scoped { command, pattern } => return self.run_scoped(command, &pattern),
        };

        let mut conn = self.checkout()?;
        let reply = self.request(&mut conn, command.clone())?;
        self.observe(&mut conn, &command, &reply);
        self.strip(&name, reply).into_result()
    }

    /// Run a command that blocks server-side for up to `timeout`
    ///
    /// The socket read timeout is widened for the duration so the wait is
    /// not mistaken for a dead server. Zero waits indefinitely. Not retried.
    pub fn execute_blocking(&self, command: Cmd, timeout: Duration) -> Result<Value> {
        let name = command.name();
        let command = match self.rewrite(&command)? {
            Rewrite::Command(command) => command,
            Rewrite::Scoped { command, pattern } => return self.run_scoped(command, &pattern),
        };

        let mut conn = self.checkout()?;
        let reply = conn.execute_with_block_timeout(&command, timeout)?;
        self.strip(&name, reply).into_result()
    }

    /// Call a registered script
    ///
    /// Keys are prefixed like any other key argument.
    pub fn script_call<K: ToArg, A: ToArg>(&self, name: &str, keys: &[K], args: &[A]) -> Result<Value> {
        let keys = self.prefix_keys(keys);
        let mut conn = self.checkout()?;
        self.inner.scripts.call(&mut conn, name, &keys, args)?.into_result()
    }

    /// Start a pipeline
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.clone())
    }

    /// Start a MULTI/EXEC transaction
    pub fn transaction(&self) -> Pipeline {
        let mut pipeline = self.pipeline();
        pipeline.atomic();
        pipeline
    }

    // =========================================================================
    // Conveniences
    // =========================================================================

    pub fn ping(&self) -> Result<()> {
        match self.execute(Cmd::new("PING"))? {
            Value::SimpleString(ref s) if s == "PONG" => Ok(()),
            other => Err(CorvidError::Protocol(format!("unexpected PING reply: {:?}", other))),
        }
    }

    pub fn get<K: ToArg>(&self, key: K) -> Result<Option<Bytes>> {
        match self.execute(Cmd::new("GET").arg(key))? {
            Value::Nil => Ok(None),
            Value::BulkString(data) => Ok(Some(data)),
            other => Err(CorvidError::Protocol(format!("unexpected GET reply: {}", other.kind()))),
        }
    }

    pub fn set<K: ToArg, V: ToArg>(&self, key: K, value: V) -> Result<()> {
        self.execute(Cmd::new("SET").arg(key).arg(value)).map(|_| ())
    }

    /// Delete keys, returning how many existed
    pub fn del<K: ToArg>(&self, keys: &[K]) -> Result<i64> {
        let reply = self.execute(Cmd::new("DEL").args(keys))?;
        reply
            .as_int()
            .ok_or_else(|| CorvidError::Protocol(format!("unexpected DEL reply: {}", reply.kind())))
    }

    /// Keys matching a glob pattern
    pub fn keys(&self, pattern: impl ToArg) -> Result<Vec<Bytes>> {
        self.execute(Cmd::new("KEYS").arg(pattern))?
            .into_array()?
            .into_iter()
            .map(|v| match v {
                Value::BulkString(data) => Ok(data),
                other => Err(CorvidError::Protocol(format!("unexpected KEYS element: {}", other.kind()))),
            })
            .collect()
    }

    /// Decode a string reply using the configured encoding
    pub fn decode_string(&self, value: &Value) -> Result<Option<String>> {
        match value {
            Value::Nil => Ok(None),
            other => match other.as_bytes() {
                Some(bytes) => self.config().encoding.decode(bytes).map(Some),
                None => Err(CorvidError::Protocol(format!("cannot decode {} as a string", other.kind()))),
            },
        }
    }

    // =========================================================================
    // Pool
    // =========================================================================

    /// Close every pooled connection
    pub fn disconnect(&self) {
        self.inner.pool.disconnect();
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    /// Total reconnect-and-retry attempts made by single commands
    pub fn retry_count(&self) -> u64 {
        self.inner.retries.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Internals shared with Pipeline
    // =========================================================================

    /// Check out a connection and validate it for reuse
    pub(crate) fn checkout(&self) -> Result<PooledConnection> {
        let mut conn = self.inner.pool.get_connection()?;
        conn.ensure_healthy();
        conn.sync_script_epoch(self.inner.script_epoch.load(Ordering::Acquire));
        Ok(conn)
    }

    pub(crate) fn rewrite(&self, command: &Cmd) -> Result<Rewrite> {
        match &self.prefixer {
            Some(prefixer) => prefixer.rewrite(command),
            None => Ok(Rewrite::Command(command.clone())),
        }
    }

    pub(crate) fn strip(&self, name: &str, reply: Value) -> Value {
        match &self.prefixer {
            Some(prefixer) => prefixer.strip_reply(name, reply),
            None => reply,
        }
    }

    pub(crate) fn prefix_keys<K: ToArg>(&self, keys: &[K]) -> Vec<Vec<u8>> {
        keys.iter()
            .map(|k| {
                let key = k.to_arg();
                match &self.prefixer {
                    Some(prefixer) => prefixer.prefix_key(&key),
                    None => key,
                }
            })
            .collect()
    }

    pub(crate) fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.inner.scripts
    }

    /// Track side effects of a completed command on connection state
    pub(crate) fn observe(&self, conn: &mut Connection, command: &Cmd, reply: &Value) {
        let flushed = command.name() == "SCRIPT"
            && command.subcommand().as_deref() == Some("FLUSH")
            && !reply.is_error();
        if flushed {
            let epoch = self.inner.script_epoch.fetch_add(1, Ordering::AcqRel) + 1;
            conn.sync_script_epoch(epoch);
            tracing::debug!("Script cache flushed, epoch now {}", epoch);
        }
    }

    /// Run one command through the retrying state machine
    fn request(&self, conn: &mut Connection, command: Cmd) -> Result<Value> {
        let mut request = Request::new(command, self.config().retry);
        let result = request.run(conn);
        if request.retries() > 0 {
            self.inner
                .retries
                .fetch_add(u64::from(request.retries()), Ordering::Relaxed);
        }
        result
    }

    /// Emulate FLUSHDB / DBSIZE over keys matching `pattern`
    fn run_scoped(&self, command: ScopedCommand, pattern: &[u8]) -> Result<Value> {
        let mut conn = self.checkout()?;
        let mut cursor = b"0".to_vec();
        let mut deleted = 0i64;
        let mut seen: HashSet<Bytes> = HashSet::new();

        loop {
            let scan = Cmd::new("SCAN")
                .arg(&cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let mut page = self.request(&mut conn, scan)?.into_array()?.into_iter();
            let next = page
                .next()
                .and_then(|c| c.as_bytes().map(<[u8]>::to_vec))
                .ok_or_else(|| CorvidError::Protocol("SCAN reply without cursor".to_string()))?;
            let keys = match page.next() {
                Some(keys) => keys.into_array()?,
                None => Vec::new(),
            };

            match command {
                ScopedCommand::Flush => {
                    if !keys.is_empty() {
                        let del = Cmd::new("DEL").args(keys.iter().filter_map(Value::as_bytes));
                        deleted += self.request(&mut conn, del)?.into_result()?.as_int().unwrap_or(0);
                    }
                }
                ScopedCommand::DbSize => {
                    seen.extend(keys.into_iter().filter_map(|k| match k {
                        Value::BulkString(data) => Some(data),
                        _ => None,
                    }));
                }
            }

            if next == b"0" {
                break;
            }
            cursor = next;
        }

        match command {
            ScopedCommand::Flush => {
                tracing::debug!(
                    "Flushed {} keys matching {}",
                    deleted,
                    String::from_utf8_lossy(pattern)
                );
                Ok(Value::okay())
            }
            ScopedCommand::DbSize => Ok(Value::Integer(seen.len() as i64)),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.config().address)
            .field("prefix", &self.prefix().map(String::from_utf8_lossy))
            .field("pool", &self.pool_stats())
            .finish()
    }
}

/// Builder for a client with a script registry or custom transport
pub struct ClientBuilder {
    config: Config,
    scripts: Option<Arc<ScriptRegistry>>,
    connector: Option<Arc<dyn Connector>>,
}

impl ClientBuilder {
    /// Scripts callable through `Client::script_call`
    pub fn scripts(mut self, registry: impl Into<Arc<ScriptRegistry>>) -> Self {
        self.scripts = Some(registry.into());
        self
    }

    /// Replace the socket connector
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn build(self) -> Client {
        let connector: Arc<dyn Connector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(StdConnector),
        };
        let pool = ConnectionPool::with_connector(self.config, connector);
        tracing::debug!(
            "Client for {} (max {} connections)",
            pool.config().address,
            pool.config().max_connections
        );
        Client {
            inner: Arc::new(ClientInner {
                pool,
                scripts: self.scripts.unwrap_or_else(|| Arc::new(ScriptRegistry::empty())),
                retries: AtomicU64::new(0),
                script_epoch: AtomicU64::new(0),
            }),
            prefixer: None,
        }
    }
}

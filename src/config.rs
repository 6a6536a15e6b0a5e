//! Configuration for Corvid
//!
//! Centralized client configuration with sensible defaults, a builder, and
//! connection-string parsing.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CorvidError, Result};
use crate::protocol::Encoding;

/// Default server port
pub const DEFAULT_PORT: u16 = 6379;

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Address {
    /// TCP host and port
    Tcp { host: String, port: u16 },

    /// Local domain socket path
    Unix(PathBuf),
}

impl Default for Address {
    fn default() -> Self {
        Address::Tcp {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp { host, port } => write!(f, "{}:{}", host, port),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// How often a single command is re-sent after a connect/send failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 disables retrying)
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1 }
    }
}

/// Main configuration for a client and its pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Server
    // -------------------------------------------------------------------------
    /// Server address
    pub address: Address,

    /// Database index selected on connect (0 skips SELECT)
    pub db: i64,

    /// ACL user name sent with AUTH
    pub username: Option<String>,

    /// Password sent with AUTH on connect
    pub password: Option<String>,

    /// Name registered with CLIENT SETNAME on connect
    pub client_name: Option<String>,

    // -------------------------------------------------------------------------
    // Socket
    // -------------------------------------------------------------------------
    /// Read/write timeout (None blocks forever)
    pub socket_timeout: Option<Duration>,

    /// Connect timeout (None uses the OS default)
    pub connect_timeout: Option<Duration>,

    // -------------------------------------------------------------------------
    // Pool
    // -------------------------------------------------------------------------
    /// Max connections the pool will create
    pub max_connections: usize,

    // -------------------------------------------------------------------------
    // Requests
    // -------------------------------------------------------------------------
    /// Encoding used to decode text replies
    pub encoding: Encoding,

    /// Retry budget for single commands
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: Address::default(),
            db: 0,
            username: None,
            password: None,
            client_name: None,
            socket_timeout: None,
            connect_timeout: None,
            max_connections: 64,
            encoding: Encoding::Utf8,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a connection string
    ///
    /// Format: `scheme://[[user]:password@][host][:port][/db][?param=value&...]`
    ///
    /// `unix://` (or `unix:` followed by a path) selects a domain socket.
    /// Recognized parameters: `db`, `password`, `username`, `socket_timeout`
    /// (alias `timeout`), `socket_connect_timeout`, `max_connections`,
    /// `encoding`, `client_name`. Timeouts are seconds; `0` means none.
    pub fn from_url(url: &str) -> Result<Self> {
        let (scheme, rest) = url
            .split_once(':')
            .ok_or_else(|| CorvidError::InvalidUrl(format!("missing scheme in {:?}", url)))?;
        if scheme.is_empty() {
            return Err(CorvidError::InvalidUrl(format!("missing scheme in {:?}", url)));
        }
        let rest = rest.strip_prefix("//").unwrap_or(rest);

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let mut config = Config::default();

        if scheme.eq_ignore_ascii_case("unix") {
            if location.is_empty() {
                return Err(CorvidError::InvalidUrl("unix socket path is empty".to_string()));
            }
            config.address = Address::Unix(PathBuf::from(location));
        } else {
            parse_tcp_location(location, &mut config)?;
        }

        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                apply_param(&mut config, key, value)?;
            }
        }

        Ok(config)
    }

    /// Server address as a display string
    pub fn address_string(&self) -> String {
        self.address.to_string()
    }
}

fn parse_tcp_location(location: &str, config: &mut Config) -> Result<()> {
    let (userinfo, hostpart) = match location.rsplit_once('@') {
        Some((userinfo, hostpart)) => (Some(userinfo), hostpart),
        None => (None, location),
    };

    if let Some(userinfo) = userinfo {
        let (user, password) = match userinfo.split_once(':') {
            Some((user, password)) => (user, Some(password)),
            None => (userinfo, None),
        };
        if !user.is_empty() {
            config.username = Some(user.to_string());
        }
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            config.password = Some(password.to_string());
        }
    }

    let (hostport, db) = match hostpart.split_once('/') {
        Some((hostport, db)) => (hostport, Some(db)),
        None => (hostpart, None),
    };

    let (host, port) = match hostport.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| CorvidError::InvalidUrl(format!("invalid port {:?}", port)))?;
            (host, port)
        }
        Some((host, _)) => (host, DEFAULT_PORT),
        None => (hostport, DEFAULT_PORT),
    };
    let host = if host.is_empty() { DEFAULT_HOST } else { host };
    config.address = Address::Tcp {
        host: host.to_string(),
        port,
    };

    if let Some(db) = db.filter(|d| !d.is_empty()) {
        config.db = parse_number(db, "db")?;
    }
    Ok(())
}

fn apply_param(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "db" => config.db = parse_number(value, key)?,
        "password" => config.password = Some(value.to_string()).filter(|v| !v.is_empty()),
        "username" => config.username = Some(value.to_string()).filter(|v| !v.is_empty()),
        "client_name" => config.client_name = Some(value.to_string()).filter(|v| !v.is_empty()),
        "socket_timeout" | "timeout" => config.socket_timeout = parse_timeout(value, key)?,
        "socket_connect_timeout" => config.connect_timeout = parse_timeout(value, key)?,
        "max_connections" => {
            let max: usize = parse_number(value, key)?;
            if max == 0 {
                return Err(CorvidError::InvalidUrl(
                    "max_connections must be at least 1".to_string(),
                ));
            }
            config.max_connections = max;
        }
        "encoding" => {
            config.encoding = Encoding::from_label(value)
                .ok_or_else(|| CorvidError::InvalidUrl(format!("unsupported encoding {:?}", value)))?
        }
        other => tracing::warn!("Ignoring unknown connection parameter {:?}", other),
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CorvidError::InvalidUrl(format!("invalid {} value {:?}", key, value)))
}

fn parse_timeout(value: &str, key: &str) -> Result<Option<Duration>> {
    let secs: f64 = parse_number(value, key)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(CorvidError::InvalidUrl(format!("invalid {} value {:?}", key, value)));
    }
    if secs == 0.0 {
        Ok(None)
    } else {
        Ok(Some(Duration::from_secs_f64(secs)))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Connect over TCP
    pub fn tcp(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.address = Address::Tcp {
            host: host.into(),
            port,
        };
        self
    }

    /// Connect over a local domain socket
    pub fn unix(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.address = Address::Unix(path.into());
        self
    }

    /// Set the database index
    pub fn db(mut self, db: i64) -> Self {
        self.config.db = db;
        self
    }

    /// Set the AUTH user name
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self
    }

    /// Set the AUTH password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = Some(password.into());
        self
    }

    /// Set the CLIENT SETNAME name
    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = Some(name.into());
        self
    }

    /// Set the socket read/write timeout
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout = Some(timeout);
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of pooled connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the reply text encoding
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.config.encoding = encoding;
        self
    }

    /// Set how many times a failed single command is retried
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

//! # Corvid
//!
//! A blocking client engine for RESP key-value servers with:
//! - Incremental, non-recursive reply decoding
//! - A bounded connection pool with lazy connect and handshake
//! - Single commands with one reconnect-and-retry, pipelines and MULTI/EXEC
//! - Content-addressed script caching with reload on `NOSCRIPT`
//! - Key prefixing for multi-tenant namespaces
//! - A local skiplist / ordered set
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Client                               │
//! │        execute · pipeline · transaction · script_call        │
//! └──────────┬───────────────────┬──────────────────┬───────────┘
//!            │                   │                  │
//!            ▼                   ▼                  ▼
//!   ┌────────────────┐  ┌────────────────┐  ┌────────────────┐
//!   │  KeyPrefixer   │  │ ScriptRegistry │  │ Request /      │
//!   │ (rule table)   │  │ (EVALSHA/LOAD) │  │ Pipeline       │
//!   └────────────────┘  └────────────────┘  └───────┬────────┘
//!                                                    │
//!                                  ┌─────────────────▼──────────┐
//!                                  │      ConnectionPool         │
//!                                  │   (Mutex, checkout/RAII)    │
//!                                  └─────────────────┬──────────┘
//!                                                    │
//!                                  ┌─────────────────▼──────────┐
//!                                  │  Connection  ─▶  Parser     │
//!                                  │  (handshake)     (codec)    │
//!                                  └─────────────────┬──────────┘
//!                                                    │
//!                                           TCP / Unix socket
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod connection;
pub mod client;
pub mod script;
pub mod prefix;
pub mod skiplist;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CorvidError, Result};
pub use config::{Address, Config, RetryPolicy};
pub use client::{Client, ClientBuilder, Pipeline};
pub use protocol::{cmd, Cmd, Value};
pub use script::ScriptRegistry;
pub use skiplist::{OrderedSet, SkipList};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Corvid
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Script Module
//!
//! Content-addressed cache of server-side procedures.
//!
//! ## Call Flow
//! 1. Connection already loaded every required script → `EVALSHA`
//! 2. Otherwise `SCRIPT LOAD` each missing one, record it, then `EVALSHA`
//! 3. `NOSCRIPT` reply → forget, reload once, retry once
//!
//! Script identity is the lower-case hex SHA-1 of the concatenated source
//! fragments.

mod registry;

pub use registry::{script_sha, Script, ScriptRegistry, ScriptRegistryBuilder};

//! Script Registry
//!
//! Named server-side procedures addressed by the SHA-1 of their source.
//!
//! A registry is built once, is immutable afterwards, and is shared by
//! reference (`Arc<ScriptRegistry>`) between clients. Which scripts are
//! already cached server-side is tracked per connection, not here.

use std::collections::{HashMap, HashSet};

use sha1::{Digest, Sha1};

use crate::client::Request;
use crate::connection::Connection;
use crate::error::{CorvidError, Result};
use crate::protocol::{Cmd, ToArg, Value};

/// Lower-case hex SHA-1 of a script source
pub fn script_sha(source: &str) -> String {
    hex::encode(Sha1::digest(source.as_bytes()))
}

/// A registered procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    name: String,
    source: String,
    sha: String,
    /// Scripts that must be loaded before this one runs, itself last
    requires: Vec<String>,
}

impl Script {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    /// `EVALSHA sha numkeys key... arg...`
    pub fn evalsha<K: ToArg, A: ToArg>(&self, keys: &[K], args: &[A]) -> Cmd {
        Cmd::new("EVALSHA")
            .arg(&self.sha)
            .arg(keys.len())
            .args(keys)
            .args(args)
    }

    /// `SCRIPT LOAD source`
    pub fn load_command(&self) -> Cmd {
        Cmd::new("SCRIPT").arg("LOAD").arg(&self.source)
    }
}

/// Immutable table of procedures
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    scripts: HashMap<String, Script>,
}

impl ScriptRegistry {
    pub fn builder() -> ScriptRegistryBuilder {
        ScriptRegistryBuilder::default()
    }

    /// Registry with no scripts
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<&Script> {
        self.scripts
            .get(name)
            .ok_or_else(|| CorvidError::UnknownScript(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.scripts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Load every script `name` requires that this connection has not loaded
    ///
    /// Returns how many SCRIPT LOAD commands were issued.
    pub fn ensure_loaded(&self, conn: &mut Connection, name: &str) -> Result<usize> {
        let script = self.get(name)?;
        let mut loads = 0;
        for required in script.requires() {
            if conn.is_script_loaded(required) {
                continue;
            }
            let dependency = self.get(required)?;
            let reply = send(conn, dependency.load_command())?.into_result()?;
            let sha = reply.as_bytes().map(|b| String::from_utf8_lossy(b).to_ascii_lowercase());
            if sha.as_deref() != Some(dependency.sha()) {
                return Err(CorvidError::Protocol(format!(
                    "SCRIPT LOAD of {:?} returned {:?}, expected {}",
                    required,
                    sha,
                    dependency.sha()
                )));
            }
            tracing::debug!("Loaded script {:?} ({}) on connection {}", required, dependency.sha(), conn.id());
            conn.mark_script_loaded(required);
            loads += 1;
        }
        Ok(loads)
    }

    /// Invoke a procedure on a connection
    ///
    /// Missing required scripts are loaded first. A `NOSCRIPT` reply (cache
    /// evicted server-side) triggers one reload and retry; a second
    /// `NOSCRIPT` is returned unmodified.
    pub fn call<K: ToArg, A: ToArg>(
        &self,
        conn: &mut Connection,
        name: &str,
        keys: &[K],
        args: &[A],
    ) -> Result<Value> {
        let script = self.get(name)?;
        self.ensure_loaded(conn, name)?;

        let command = script.evalsha(keys, args);
        let reply = send(conn, command.clone())?;
        match reply {
            Value::Error(ref err) if err.is_no_script() => {
                tracing::warn!("Script {:?} evicted server-side, reloading", name);
                conn.clear_loaded_scripts();
                self.ensure_loaded(conn, name)?;
                send(conn, command)
            }
            reply => Ok(reply),
        }
    }
}

fn send(conn: &mut Connection, command: Cmd) -> Result<Value> {
    let policy = conn.config().retry;
    Request::new(command, policy).run(conn)
}

/// Builder collecting fragments and script declarations
#[derive(Debug, Default)]
pub struct ScriptRegistryBuilder {
    fragments: HashMap<String, String>,
    declarations: Vec<Declaration>,
}

#[derive(Debug)]
struct Declaration {
    name: String,
    fragments: Vec<String>,
    requires: Vec<String>,
}

impl ScriptRegistryBuilder {
    /// Register a named source fragment
    pub fn fragment(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.fragments.insert(name.into(), text.into());
        self
    }

    /// Declare a script built from fragments, requiring other scripts
    ///
    /// The source is the fragments concatenated in the order given.
    pub fn script(mut self, name: impl Into<String>, fragments: &[&str], requires: &[&str]) -> Self {
        self.declarations.push(Declaration {
            name: name.into(),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            requires: requires.iter().map(|r| r.to_string()).collect(),
        });
        self
    }

    /// Declare a self-contained script from a single source text
    pub fn source(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        let name = name.into();
        let fragment = format!("{}.body", name);
        self.fragment(fragment.clone(), text)
            .script(name, &[fragment.as_str()], &[])
    }

    pub fn build(self) -> Result<ScriptRegistry> {
        let mut direct: HashMap<&str, &[String]> = HashMap::new();
        for decl in &self.declarations {
            if direct.insert(&decl.name, &decl.requires).is_some() {
                return Err(CorvidError::Config(format!("script {:?} declared twice", decl.name)));
            }
        }

        let mut scripts = HashMap::with_capacity(self.declarations.len());
        for decl in &self.declarations {
            let mut source = String::new();
            for fragment in &decl.fragments {
                let text = self.fragments.get(fragment).ok_or_else(|| {
                    CorvidError::Config(format!(
                        "script {:?} uses unknown fragment {:?}",
                        decl.name, fragment
                    ))
                })?;
                source.push_str(text);
            }

            let requires = required_closure(&decl.name, &direct)?;
            let script = Script {
                name: decl.name.clone(),
                sha: script_sha(&source),
                source,
                requires,
            };
            scripts.insert(decl.name.clone(), script);
        }

        Ok(ScriptRegistry { scripts })
    }
}

/// Transitive requirements of `name`, dependencies first and `name` last
fn required_closure(name: &str, direct: &HashMap<&str, &[String]>) -> Result<Vec<String>> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    visit(name, direct, &mut seen, &mut order)?;
    Ok(order)
}

fn visit(
    name: &str,
    direct: &HashMap<&str, &[String]>,
    seen: &mut HashSet<String>,
    order: &mut Vec<String>,
) -> Result<()> {
    if !seen.insert(name.to_string()) {
        return Ok(());
    }
    let requires = direct
        .get(name)
        .ok_or_else(|| CorvidError::Config(format!("required script {:?} is not declared", name)))?;
    for dependency in requires.iter() {
        visit(dependency, direct, seen, order)?;
    }
    order.push(name.to_string());
    Ok(())
}

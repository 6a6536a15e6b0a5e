//! Tests for the script registry against a live connection
//!
//! These tests verify:
//! - Each required script is loaded once per connection, then never again
//! - Server-side eviction triggers exactly one reload and retry
//! - A persistent NOSCRIPT is surfaced instead of looping
//! - SCRIPT FLUSH through the client invalidates every connection's cache

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::MockServer;
use corvid::connection::{Connection, StdConnector};
use corvid::script::script_sha;
use corvid::{cmd, Client, CorvidError, ScriptRegistry, Value};

// =============================================================================
// Helper Functions
// =============================================================================

/// `base` <- `mid` <- `top`, plus an unrelated `solo`
fn layered_registry() -> ScriptRegistry {
    ScriptRegistry::builder()
        .fragment("base", "local function base() return 1 end\n")
        .script("base", &["base"], &[])
        .fragment("mid", "local function mid() return base() + 1 end\n")
        .script("mid", &["mid"], &["base"])
        .fragment("top", "return {KEYS[1], ARGV[1]}")
        .script("top", &["top"], &["mid"])
        .source("solo", "return {KEYS[1]}")
        .build()
        .unwrap()
}

fn scripted_client(server: &MockServer) -> Client {
    Client::builder(server.config()).scripts(layered_registry()).build()
}

fn echo_reply(key: &str, arg: &str) -> Value {
    Value::Array(vec![Value::bulk(key.to_string()), Value::bulk(arg.to_string())])
}

// =============================================================================
// Loading Tests
// =============================================================================

#[test]
fn test_required_scripts_load_once_per_connection() {
    let server = MockServer::start();
    let registry = layered_registry();
    let mut conn = Connection::new(1, Arc::new(server.config()), Arc::new(StdConnector));
    conn.connect().unwrap();

    assert_eq!(registry.ensure_loaded(&mut conn, "top").unwrap(), 3);
    assert_eq!(registry.ensure_loaded(&mut conn, "top").unwrap(), 0);
    assert_eq!(registry.ensure_loaded(&mut conn, "mid").unwrap(), 0);
    assert_eq!(registry.ensure_loaded(&mut conn, "solo").unwrap(), 1);
    assert_eq!(server.script_loads(), 4);

    // Dependencies go first
    let loads: Vec<String> = server
        .commands()
        .into_iter()
        .filter(|c| c[0] == "SCRIPT")
        .map(|c| script_sha(&c[2]))
        .collect();
    let expected: Vec<String> = ["base", "mid", "top", "solo"]
        .iter()
        .map(|name| registry.get(name).unwrap().sha().to_string())
        .collect();
    assert_eq!(loads, expected);
}

#[test]
fn test_call_loads_then_uses_evalsha_only() {
    let server = MockServer::start();
    let client = scripted_client(&server);

    assert_eq!(client.script_call("top", &["k"], &["a"]).unwrap(), echo_reply("k", "a"));
    assert_eq!(server.script_loads(), 3);
    server.commands();

    assert_eq!(client.script_call("top", &["k2"], &["b"]).unwrap(), echo_reply("k2", "b"));
    assert_eq!(server.script_loads(), 3);
    assert_eq!(server.command_names(), vec!["EVALSHA"]);
}

#[test]
fn test_new_connection_loads_again() {
    let server = MockServer::start();
    let client = scripted_client(&server);
    client.script_call("solo", &["k"], &[] as &[&str]).unwrap();
    assert_eq!(server.script_loads(), 1);

    client.disconnect();
    client.script_call("solo", &["k"], &[] as &[&str]).unwrap();
    assert_eq!(server.script_loads(), 2);
}

#[test]
fn test_unknown_script_is_an_error() {
    let server = MockServer::start();
    let client = scripted_client(&server);
    let err = client.script_call("missing", &["k"], &["a"]).unwrap_err();
    assert!(matches!(err, CorvidError::UnknownScript(ref name) if name == "missing"));
    assert!(server.command_names().is_empty());
}

// =============================================================================
// Eviction Tests
// =============================================================================

#[test]
fn test_evicted_script_reloads_once() {
    let server = MockServer::start();
    let client = scripted_client(&server);
    client.script_call("top", &["k"], &["a"]).unwrap();
    server.commands();

    server.evict_scripts();
    assert_eq!(client.script_call("top", &["k"], &["b"]).unwrap(), echo_reply("k", "b"));

    // NOSCRIPT, reload of every required script, then the retry
    assert_eq!(
        server.command_names(),
        vec!["EVALSHA", "SCRIPT", "SCRIPT", "SCRIPT", "EVALSHA"]
    );
    assert_eq!(server.script_loads(), 6);
}

#[test]
fn test_persistent_noscript_is_returned() {
    let server = MockServer::start();
    let client = scripted_client(&server);
    server.set_always_noscript(true);

    let err = client.script_call("solo", &["k"], &[] as &[&str]).unwrap_err();
    assert!(err.reply().is_some_and(|r| r.is_no_script()), "{:?}", err);

    // One load, one call, one reload, one retry
    assert_eq!(
        server.command_names(),
        vec!["SCRIPT", "EVALSHA", "SCRIPT", "EVALSHA"]
    );
}

// =============================================================================
// Flush Tests
// =============================================================================

#[test]
fn test_script_flush_invalidates_other_connections() {
    let server = MockServer::start();
    let client = scripted_client(&server);

    // Connection X loads the script
    client.script_call("solo", &["a"], &[] as &[&str]).unwrap();
    assert_eq!(server.script_loads(), 1);

    // Hold X in a blocking pop while the flush runs on a second connection
    let blocker = client.clone();
    let held = thread::spawn(move || {
        blocker
            .execute_blocking(cmd("BLPOP").arg("idle").arg("0.4"), Duration::from_secs(1))
            .unwrap()
    });
    thread::sleep(Duration::from_millis(100));
    client.execute(cmd("SCRIPT").arg("FLUSH")).unwrap();
    assert_eq!(client.pool_stats().created, 2);

    // X is released last, so it is checked out next
    assert!(held.join().unwrap().is_nil());
    server.commands();

    // Without invalidation this would be EVALSHA, NOSCRIPT, reload, retry
    client.script_call("solo", &["b"], &[] as &[&str]).unwrap();
    assert_eq!(server.command_names(), vec!["SCRIPT", "EVALSHA"]);
    assert_eq!(server.script_loads(), 2);
}

#[test]
fn test_script_flush_inside_pipeline_is_observed() {
    let server = MockServer::start();
    let client = scripted_client(&server);
    client.script_call("solo", &["a"], &[] as &[&str]).unwrap();

    let mut pipeline = client.pipeline();
    pipeline.queue(cmd("SCRIPT").arg("FLUSH"));
    pipeline.execute().unwrap();
    server.commands();

    client.script_call("solo", &["b"], &[] as &[&str]).unwrap();
    assert_eq!(server.command_names(), vec!["SCRIPT", "EVALSHA"]);
}

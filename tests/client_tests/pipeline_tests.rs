//! Tests for Pipeline
//!
//! These tests verify:
//! - One result per command, in order, regardless of reply fragmentation
//! - Transactions return the same results as the equivalent plain pipeline
//! - Server errors are per command; EXECABORT and WATCH aborts are mapped
//! - A connection lost partway keeps the replies already read
//! - Script calls inside a pipeline load their scripts first

#[path = "../common/mod.rs"]
mod common;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use common::{wait_for, MockServer};
use corvid::connection::{Connector, ProbeResult, StdConnector, Transport};
use corvid::{cmd, Client, Config, CorvidError, Result, ScriptRegistry, Value};

// =============================================================================
// Helper Functions
// =============================================================================

fn error_code(result: &Result<Value>) -> Option<&str> {
    match result {
        Err(CorvidError::Reply(err)) => Some(err.code()),
        _ => None,
    }
}

/// Unwrap every slot of a batch that is expected to fully succeed
fn values(results: Vec<Result<Value>>) -> Vec<Value> {
    results.into_iter().map(|r| r.unwrap()).collect()
}

/// Opens real sockets that fail once `budget` reply bytes have been read
struct CutoffConnector {
    budget: usize,
}

impl Connector for CutoffConnector {
    fn connect(&self, config: &Config) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(CutoffTransport {
            inner: StdConnector.connect(config)?,
            remaining: self.budget,
        }))
    }
}

struct CutoffTransport {
    inner: Box<dyn Transport>,
    remaining: usize,
}

impl Transport for CutoffTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.send(bytes)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::from(io::ErrorKind::ConnectionReset));
        }
        let limit = buf.len().min(self.remaining);
        let n = self.inner.recv(&mut buf[..limit])?;
        self.remaining -= n;
        Ok(n)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }

    fn probe(&mut self) -> io::Result<ProbeResult> {
        self.inner.probe()
    }

    fn shutdown(&mut self) {
        self.inner.shutdown()
    }
}

fn cutoff_client(server: &MockServer, budget: usize) -> Client {
    Client::builder(server.config())
        .connector(Arc::new(CutoffConnector { budget }))
        .build()
}

fn queue_counter_ops(pipeline: &mut corvid::Pipeline) {
    pipeline
        .queue(cmd("SET").arg("a").arg("1"))
        .queue(cmd("INCR").arg("a"))
        .queue(cmd("GET").arg("a"))
        .queue(cmd("RPUSH").arg("l").arg("x").arg("y"))
        .queue(cmd("GET").arg("missing"));
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_results_match_queue_order() {
    let server = MockServer::start();
    let client = server.client();

    let mut pipeline = client.pipeline();
    for i in 0..100 {
        pipeline.queue(cmd("ECHO").arg(i));
    }
    assert_eq!(pipeline.len(), 100);

    let results = values(pipeline.execute().unwrap());
    assert_eq!(results.len(), 100);
    for (i, value) in results.iter().enumerate() {
        assert_eq!(value, &Value::bulk(i.to_string()));
    }
    assert!(pipeline.is_empty());
}

#[test]
fn test_fragmented_replies_keep_order() {
    let server = MockServer::start();
    server.set_dribble(true);
    let client = server.client();

    let mut pipeline = client.pipeline();
    queue_counter_ops(&mut pipeline);
    let results = values(pipeline.execute().unwrap());
    assert_eq!(
        results,
        vec![
            Value::okay(),
            Value::Integer(2),
            Value::bulk("2"),
            Value::Integer(2),
            Value::Nil,
        ]
    );
}

#[test]
fn test_pipeline_is_sent_in_one_batch() {
    let server = MockServer::start();
    let client = server.client();

    let mut pipeline = client.pipeline();
    pipeline.queue(cmd("SET").arg("k").arg("v")).queue(cmd("GET").arg("k"));
    pipeline.execute().unwrap();

    assert_eq!(server.command_names(), vec!["SET", "GET"]);
    assert_eq!(client.pool_stats().created, 1);
}

#[test]
fn test_empty_pipeline_touches_nothing() {
    let server = MockServer::start();
    let client = server.client();

    assert!(client.pipeline().execute().unwrap().is_empty());
    assert!(client.transaction().execute().unwrap().is_empty());
    assert_eq!(server.accepted(), 0);
    assert_eq!(client.pool_stats().created, 0);
}

#[test]
fn test_server_errors_do_not_fail_the_batch() {
    let server = MockServer::start();
    let client = server.client();
    client.set("text", "abc").unwrap();

    let mut pipeline = client.pipeline();
    pipeline
        .queue(cmd("INCR").arg("text"))
        .queue(cmd("NOSUCHCOMMAND"))
        .queue(cmd("GET").arg("text"));
    let results = pipeline.execute().unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(error_code(&results[0]), Some("ERR"));
    assert_eq!(error_code(&results[1]), Some("ERR"));
    assert_eq!(results[2].as_ref().unwrap(), &Value::bulk("abc"));
}

#[test]
fn test_clear_drops_queued_commands() {
    let server = MockServer::start();
    let client = server.client();

    let mut pipeline = client.pipeline();
    pipeline.queue(cmd("SET").arg("x").arg("1"));
    pipeline.clear();
    assert!(pipeline.execute().unwrap().is_empty());
    assert_eq!(server.raw_get(b"x"), None);
}

// =============================================================================
// Connection Failure Tests
// =============================================================================

#[test]
fn test_lost_connection_keeps_replies_already_read() {
    let server = MockServer::start();
    // Exactly the first "+OK\r\n" arrives before the socket fails
    let client = cutoff_client(&server, 5);

    let mut pipeline = client.pipeline();
    pipeline
        .queue(cmd("SET").arg("a").arg("1"))
        .queue(cmd("SET").arg("b").arg("2"))
        .queue(cmd("GET").arg("a"));
    let results = pipeline.execute().unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap(), &Value::okay());
    assert!(matches!(&results[1], Err(CorvidError::Io(e)) if e.kind() == io::ErrorKind::ConnectionReset));
    assert!(matches!(&results[2], Err(CorvidError::NoReply(_))));
    assert!(results[1].as_ref().unwrap_err().is_connection_error());
    assert!(results[2].as_ref().unwrap_err().is_connection_error());

    // The server ran the writes whose replies were lost
    assert!(wait_for(Duration::from_secs(2), || server.raw_get(b"b").is_some()));
    assert_eq!(server.raw_get(b"a"), Some(b"1".to_vec()));

    // The broken socket was discarded; the next command reconnects
    let stats = client.pool_stats();
    assert_eq!((stats.created, stats.in_use), (1, 0));
    client.set("c", "3").unwrap();
    assert_eq!(server.accepted(), 2);
}

#[test]
fn test_lost_connection_mid_transaction_fails_every_command() {
    let server = MockServer::start();
    // MULTI's "+OK\r\n" and one "+QUEUED\r\n", then the socket fails
    let client = cutoff_client(&server, 14);

    let mut tx = client.transaction();
    tx.queue(cmd("SET").arg("a").arg("1")).queue(cmd("SET").arg("b").arg("2"));
    let results = tx.execute().unwrap();

    assert_eq!(results.len(), 2);
    assert!(matches!(&results[0], Err(CorvidError::Io(_))));
    assert!(matches!(&results[1], Err(CorvidError::NoReply(_))));
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[test]
fn test_transaction_matches_plain_pipeline() {
    let plain_server = MockServer::start();
    let mut plain = plain_server.client().pipeline();
    queue_counter_ops(&mut plain);
    let expected = values(plain.execute().unwrap());

    let server = MockServer::start();
    let client = server.client();
    let mut tx = client.transaction();
    assert!(tx.is_atomic());
    queue_counter_ops(&mut tx);
    let results = values(tx.execute().unwrap());

    assert_eq!(results, expected);
    let names = server.command_names();
    assert_eq!(names.first().map(String::as_str), Some("MULTI"));
    assert_eq!(names.last().map(String::as_str), Some("EXEC"));
    assert_eq!(names.len(), 7);
}

#[test]
fn test_execabort_maps_to_per_command_errors() {
    let server = MockServer::start();
    let client = server.client();

    let mut tx = client.transaction();
    tx.queue(cmd("SET").arg("a").arg("1"))
        .queue(cmd("BOGUS").arg("x"))
        .queue(cmd("GET").arg("a"));
    let results = tx.execute().unwrap();

    assert_eq!(results.len(), 3);
    // The rejected command keeps its own error
    assert_eq!(error_code(&results[1]), Some("ERR"));
    // The others report the abort
    assert_eq!(error_code(&results[0]), Some("EXECABORT"));
    assert_eq!(error_code(&results[2]), Some("EXECABORT"));
    assert!(matches!(&results[0], Err(CorvidError::Reply(e)) if e.is_exec_abort()));

    // Nothing ran
    assert_eq!(server.raw_get(b"a"), None);
}

#[test]
fn test_runtime_errors_inside_exec_are_per_command() {
    let server = MockServer::start();
    let client = server.client();
    client.set("text", "abc").unwrap();

    let mut tx = client.transaction();
    tx.queue(cmd("INCR").arg("text")).queue(cmd("SET").arg("b").arg("2"));
    let results = tx.execute().unwrap();

    assert_eq!(error_code(&results[0]), Some("ERR"));
    assert_eq!(results[1].as_ref().unwrap(), &Value::okay());
    assert_eq!(server.raw_get(b"b"), Some(b"2".to_vec()));
}

#[test]
fn test_watched_key_change_aborts_transaction() {
    let server = MockServer::start();
    let client = server.client();
    client.set("balance", "10").unwrap();

    // WATCH, then a write to the watched key, on the pool's only socket
    let mut watch = client.pipeline();
    watch
        .queue(cmd("WATCH").arg("balance"))
        .queue(cmd("SET").arg("balance").arg("15"));
    watch.execute().unwrap();

    // LIFO reuse puts the transaction on the watching socket
    let mut tx = client.transaction();
    tx.queue(cmd("SET").arg("balance").arg("20"));
    let err = tx.execute().unwrap_err();
    assert!(matches!(err, CorvidError::TransactionAborted), "{:?}", err);
    assert_eq!(server.raw_get(b"balance"), Some(b"15".to_vec()));
}

// =============================================================================
// Queueing Error Tests
// =============================================================================

#[test]
fn test_scoped_command_rejected_in_prefixed_pipeline() {
    let server = MockServer::start();
    let client = server.client().prefixed("app:");

    let mut pipeline = client.pipeline();
    pipeline.queue(cmd("SET").arg("k").arg("v")).queue(cmd("FLUSHDB"));
    let err = pipeline.execute().unwrap_err();
    assert!(matches!(err, CorvidError::CommandNotAllowed(ref name) if name == "FLUSHDB"));

    // Nothing was sent
    assert_eq!(server.accepted(), 0);
}

#[test]
fn test_unknown_script_rejected_at_execute() {
    let server = MockServer::start();
    let client = server.client();

    let mut pipeline = client.pipeline();
    pipeline.script("ghost", &["k"], &["a"]);
    assert!(matches!(pipeline.execute(), Err(CorvidError::UnknownScript(_))));
}

// =============================================================================
// Script Tests
// =============================================================================

#[test]
fn test_pipeline_script_loads_before_batch() {
    let server = MockServer::start();
    let registry = ScriptRegistry::builder()
        .source("echo", "return {KEYS[1], ARGV[1]}")
        .build()
        .unwrap();
    let client = Client::builder(server.config()).scripts(registry).build();

    let mut pipeline = client.pipeline();
    pipeline
        .script("echo", &["k1"], &["a1"])
        .queue(cmd("PING"))
        .script("echo", &["k2"], &["a2"]);
    let results = values(pipeline.execute().unwrap());

    assert_eq!(
        results,
        vec![
            Value::Array(vec![Value::bulk("k1"), Value::bulk("a1")]),
            Value::simple("PONG"),
            Value::Array(vec![Value::bulk("k2"), Value::bulk("a2")]),
        ]
    );
    assert_eq!(server.script_loads(), 1);
    assert_eq!(server.command_names(), vec!["SCRIPT", "EVALSHA", "PING", "EVALSHA"]);

    // Loaded scripts are remembered per connection
    let mut again = client.pipeline();
    again.script("echo", &["k3"], &["a3"]);
    again.execute().unwrap();
    assert_eq!(server.script_loads(), 1);
}

//! Tests for ConnectionPool
//!
//! These tests verify:
//! - Bounded checkout with immediate exhaustion errors
//! - LIFO reuse of released connections
//! - Counter invariants under concurrent checkout
//! - Teardown while connections are checked out
//! - Connections abandoned mid-request are never reused as-is

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use common::MockServer;
use corvid::connection::{ConnectionPool, PoolStats};
use corvid::{cmd, Config, CorvidError};

// =============================================================================
// Helper Functions
// =============================================================================

fn pool_of(max: usize) -> ConnectionPool {
    // Connections are created lazily, so no server is needed until one is used
    ConnectionPool::new(Config::builder().max_connections(max).build())
}

fn assert_invariant(stats: PoolStats) {
    assert_eq!(stats.created, stats.available + stats.in_use, "{:?}", stats);
    assert!(stats.created <= stats.max_connections, "{:?}", stats);
}

// =============================================================================
// Checkout Tests
// =============================================================================

#[test]
fn test_exhaustion_then_one_release_allows_one_more() {
    let pool = pool_of(3);
    let mut held: Vec<_> = (0..3).map(|_| pool.get_connection().unwrap()).collect();

    let err = pool.get_connection().unwrap_err();
    assert!(matches!(err, CorvidError::PoolExhausted { max: 3 }));

    pool.release(held.pop().unwrap());
    let again = pool.get_connection().unwrap();
    assert!(matches!(pool.get_connection(), Err(CorvidError::PoolExhausted { .. })));

    drop(again);
    drop(held);
    assert_invariant(pool.stats());
}

#[test]
fn test_released_connection_is_reused_lifo() {
    let pool = pool_of(4);
    let first = pool.get_connection().unwrap();
    let second = pool.get_connection().unwrap();
    let (first_id, second_id) = (first.id(), second.id());
    drop(first);
    drop(second);

    assert_eq!(pool.get_connection().unwrap().id(), second_id);
    let stats = pool.stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.available, 2);
    assert_ne!(first_id, second_id);
}

#[test]
fn test_stats_track_checkouts() {
    let pool = pool_of(5);
    assert_eq!(
        pool.stats(),
        PoolStats { created: 0, available: 0, in_use: 0, max_connections: 5 }
    );

    let a = pool.get_connection().unwrap();
    let b = pool.get_connection().unwrap();
    let stats = pool.stats();
    assert_eq!((stats.created, stats.in_use, stats.available), (2, 2, 0));

    drop(a);
    let stats = pool.stats();
    assert_eq!((stats.created, stats.in_use, stats.available), (2, 1, 1));
    drop(b);
    assert_invariant(pool.stats());
}

#[test]
fn test_concurrent_checkout_never_exceeds_limit() {
    let pool = pool_of(4);
    let exhausted = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..200 {
                    match pool.get_connection() {
                        Ok(conn) => {
                            assert_invariant(pool.stats());
                            drop(conn);
                        }
                        Err(CorvidError::PoolExhausted { .. }) => {
                            exhausted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            });
        }
    });

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert!(stats.created <= 4);
    assert_invariant(stats);
}

// =============================================================================
// Teardown Tests
// =============================================================================

#[test]
fn test_disconnect_keeps_outstanding_checkouts_counted() {
    let pool = pool_of(2);
    let held = pool.get_connection().unwrap();
    let idle = pool.get_connection().unwrap();
    drop(idle);

    pool.disconnect();
    let stats = pool.stats();
    assert_eq!((stats.created, stats.available, stats.in_use), (1, 0, 1));
    assert_invariant(stats);

    // Only the idle slot is free while the old checkout is out
    let fresh = pool.get_connection().unwrap();
    assert!(matches!(pool.get_connection(), Err(CorvidError::PoolExhausted { max: 2 })));
    assert_invariant(pool.stats());

    // The stale checkout is closed, not returned
    drop(held);
    let stats = pool.stats();
    assert_eq!((stats.created, stats.available, stats.in_use), (1, 0, 1));

    drop(fresh);
    let _a = pool.get_connection().unwrap();
    let _b = pool.get_connection().unwrap();
    assert_invariant(pool.stats());
}

#[test]
fn test_disconnect_with_single_slot_checked_out() {
    let server = MockServer::start();
    let mut config = server.config();
    config.max_connections = 1;
    let pool = ConnectionPool::new(config);

    let mut held = pool.get_connection().unwrap();
    held.execute(&cmd("PING")).unwrap();
    pool.disconnect();

    assert!(matches!(pool.get_connection(), Err(CorvidError::PoolExhausted { max: 1 })));
    let stats = pool.stats();
    assert_eq!((stats.created, stats.in_use), (1, 1));

    // The old socket is closed on its next use
    let err = held.send_command(&cmd("PING")).unwrap_err();
    assert!(matches!(err, CorvidError::ConnectionClosed), "{:?}", err);
    assert!(!held.is_connected());

    drop(held);
    let conn = pool.get_connection().unwrap();
    assert!(!conn.is_connected());
    assert_invariant(pool.stats());
}

#[test]
fn test_disconnect_closes_idle_sockets() {
    let server = MockServer::start();
    let pool = ConnectionPool::new(server.config());

    let mut conn = pool.get_connection().unwrap();
    conn.execute(&cmd("PING")).unwrap();
    assert!(conn.is_connected());
    drop(conn);

    pool.disconnect();
    let conn = pool.get_connection().unwrap();
    assert!(!conn.is_connected());
}

#[test]
fn test_release_does_not_validate() {
    let server = MockServer::start();
    let pool = ConnectionPool::new(server.config());

    let mut conn = pool.get_connection().unwrap();
    conn.execute(&cmd("PING")).unwrap();
    let id = conn.id();
    drop(conn);

    server.kill_connections();

    // Still handed out as connected; validation happens on next use
    let conn = pool.get_connection().unwrap();
    assert_eq!(conn.id(), id);
    assert!(conn.is_connected());
}

#[test]
fn test_abandoned_request_disconnects_on_release() {
    let server = MockServer::start();
    let pool = ConnectionPool::new(server.config());

    let mut conn = pool.get_connection().unwrap();
    conn.connect().unwrap();
    conn.send_command(&cmd("PING")).unwrap();
    assert!(conn.has_outstanding_replies());
    let id = conn.id();
    drop(conn);

    let mut conn = pool.get_connection().unwrap();
    assert_eq!(conn.id(), id);
    assert!(!conn.is_connected());

    // The reconnected socket answers its own request, not the abandoned one
    let reply = conn.execute(&cmd("ECHO").arg("fresh")).unwrap();
    assert_eq!(reply.as_bytes(), Some(&b"fresh"[..]));
    assert_eq!(server.accepted(), 2);
}

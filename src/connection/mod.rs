//! Connection Module
//!
//! Sockets to the server and the pool that hands them out.
//!
//! ## Architecture
//! - `Transport` / `Connector`: byte-level seam (TCP, Unix sockets, test doubles)
//! - `Connection`: handshake, framing, reply decoding on one socket
//! - `ConnectionPool`: bounded checkout/checkin under a mutex
//!
//! A connection is used by one request at a time; exclusivity comes from
//! pool checkout, not from locking the connection itself.

mod connection;
mod pool;
mod transport;

pub use connection::Connection;
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use transport::{Connector, ProbeResult, StdConnector, Transport};

//! Client Module
//!
//! Command execution on top of the connection pool.
//!
//! ## Components
//! - `Request`: one command, retried once on connect/send failure
//! - `Pipeline`: batched commands, optionally wrapped in MULTI/EXEC
//! - `Client`: shared handle tying the pool, scripts and key prefix together
//!
//! ## Error Surfacing
//! - `Client::execute` turns a server error reply into `Err(Reply)`
//! - `Pipeline::execute` returns one result per command; a failed command
//!   never discards the replies of the others

mod client;
mod pipeline;
mod request;

pub use client::{Client, ClientBuilder};
pub use pipeline::Pipeline;
pub use request::{Request, RequestState};

//! Client side of doctx
//!
//! - Client: a session-bound connection that submits through the workspace
//!   pipeline and keeps a local model current
//! - LiveQuery, QueryHandle: query results kept up to date from committed
//!   transactions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod live_query;

pub use client::{Client, TxListener};
pub use live_query::{LiveQuery, QueryCallback, QueryHandle};

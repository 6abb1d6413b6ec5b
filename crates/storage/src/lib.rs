//! Storage layer for doctx
//!
//! This crate defines the storage contracts and their reference
//! implementations:
//! - DbAdapter: per-domain document storage; InMemoryAdapter implements it
//! - TxAdapter: the ordered transaction log; InMemoryTxLog and FileTxLog
//! - FullTextAdapter: search engine contract; InMemoryFullTextAdapter, plus
//!   FullTextIndex to keep it in step with committed transactions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod fulltext;
pub mod memory;
pub mod tx_log;

pub use adapter::{CommittedTx, DbAdapter, TxAdapter};
pub use fulltext::{FullTextAdapter, FullTextIndex, InMemoryFullTextAdapter, IndexedDoc, SearchHit};
pub use memory::InMemoryAdapter;
pub use tx_log::{Durability, FileTxLog, InMemoryTxLog};

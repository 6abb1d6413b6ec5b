//! Core types for doctx
//!
//! This crate defines the document model and everything that can be computed
//! from a transaction log without I/O:
//! - Ref, Domain, Timestamp: identifiers and time
//! - Doc, Attributes: the universal document envelope
//! - Tx: the transaction kinds and their wire form
//! - Hierarchy: class graph with closure tables
//! - Query, Predicate, FindOptions: the query language
//! - TxProcessor, MemDb, ModelDb: folding transactions into documents
//! - Builder, TxFactory, TxOperations: constructing transactions
//! - Storage: the contract every client and server surface implements
//! - DocError: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod classes;
pub mod client;
pub mod doc;
pub mod error;
pub mod hierarchy;
pub mod memdb;
pub mod operations;
pub mod predicate;
pub mod processor;
pub mod query;
pub mod schema;
pub mod tx;
pub mod types;

pub use builder::{core_model, Builder, ClassBuilder};
pub use client::Storage;
pub use doc::{Attributes, Doc};
pub use error::{DocError, Result};
pub use hierarchy::Hierarchy;
pub use memdb::{MemDb, ModelDb};
pub use operations::{ApplyOperations, TxFactory, TxOperations};
pub use processor::TxProcessor;
pub use query::{FindOptions, FindResult, Query, SortingOrder};
pub use schema::{AttributeDef, AttributeType, ClassDef, ClassifierKind};
pub use tx::{
    MatchCondition, Tx, TxApplyIf, TxCollectionCud, TxCreateDoc, TxHeader, TxKind, TxMixin,
    TxPutBag, TxRemoveDoc, TxResult, TxUpdateDoc,
};
pub use types::{now, Account, Class, Domain, Ref, Space, Timestamp};

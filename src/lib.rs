//! doctx - event-sourced document transaction engine
//!
//! Every change to the document graph is a transaction (`Tx`). Transactions
//! are applied to a class-hierarchy-aware store, pass through a middleware
//! pipeline, are persisted per storage domain and in an append-only log,
//! fan out through triggers into derived transactions and reach clients in
//! commit order.
//!
//! # Quick Start
//!
//! ```ignore
//! use doctx::{Client, EngineConfig, Storage, TxOperations, WorkspaceBuilder};
//!
//! let workspace = WorkspaceBuilder::new(EngineConfig::in_memory())
//!     .with_model(|b| { /* classes */ })
//!     .open()?;
//! let client = Client::connect(Arc::new(workspace), Ref::new("alice"))?;
//! let ops = TxOperations::new(&client, Ref::new("alice"));
//! ops.create_doc(TASK, space, attributes, None)?;
//! ```
//!
//! # Crates
//!
//! - `doctx-core`: documents, transactions, hierarchy, queries
//! - `doctx-concurrency`: per-object locks and sequences
//! - `doctx-storage`: adapters, transaction logs, full-text index
//! - `doctx-engine`: server storage, pipeline, triggers, workspace
//! - `doctx-client`: client connection and live queries

pub use doctx_client::{Client, LiveQuery, QueryCallback, QueryHandle, TxListener};
pub use doctx_core::*;
pub use doctx_engine::{
    init_tracing, track_activity, Broadcaster, EngineConfig, Middleware, Pipeline, ServerStorage, SessionContext,
    Subscription, TriggerControl, TriggerDef, TriggerRegistry, TxLogKind, TxOutcome, Workspace, WorkspaceBuilder,
    CLASS_DOC_UPDATE_MESSAGE,
};
pub use doctx_storage::{DbAdapter, Durability, FullTextAdapter, SearchHit, TxAdapter};

/// Engine internals: middlewares, triggers and activity
pub mod engine {
    pub use doctx_engine::*;
}

/// Storage contracts and reference implementations
pub mod storage {
    pub use doctx_storage::*;
}

//! Server engine for doctx
//!
//! This crate turns the core model and the storage contracts into a running
//! workspace:
//! - ServerStorage: domain routing, commit, rollback and log replay
//! - Pipeline, Middleware: the request chain (modified stamps, space
//!   security, query optimization, triggers, broadcast, storage)
//! - Triggers, TriggerRegistry: derived transactions, including activity
//! - Broadcaster: sequence-ordered fan-out of committed transactions
//! - Workspace, WorkspaceBuilder: assembly from an EngineConfig
//! - init_tracing: the `tracing` subscriber

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broadcaster;
pub mod config;
pub mod context;
pub mod logging;
pub mod pipeline;
pub mod server_storage;
pub mod triggers;
pub mod workspace;

pub use broadcaster::{Broadcaster, Subscription};
pub use config::{EngineConfig, TxLogKind};
pub use context::SessionContext;
pub use logging::init_tracing;
pub use pipeline::{
    BroadcastMiddleware, Middleware, MiddlewareCreator, ModifiedMiddleware, OptimizeQueryMiddleware, Pipeline,
    SpaceSecurityMiddleware, StorageMiddleware, TriggersMiddleware,
};
pub use server_storage::{in_memory_adapters, AdapterFactory, ServerStorage, TxOutcome};
pub use triggers::activity::{
    activity_model, generate_doc_update_messages, register_activity, track_activity, ACTIVITY_DOC,
    CLASS_DOC_UPDATE_MESSAGE, DOC_UPDATE_MESSAGES, DOMAIN_ACTIVITY,
};
pub use triggers::{
    declare_trigger, trigger_model, TriggerControl, TriggerDef, TriggerFn, TriggerRegistry, Triggers, CLASS_TRIGGER,
};
pub use workspace::{Workspace, WorkspaceBuilder};

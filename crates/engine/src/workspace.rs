//! Workspace assembly
//!
//! [`WorkspaceBuilder`] wires configuration, storage, triggers, the
//! broadcaster and the middleware pipeline into a [`Workspace`]:
//!
//! ```text
//! let workspace = WorkspaceBuilder::new(EngineConfig::in_memory())
//!     .with_model(|b| { /* classes */ })
//!     .open()?;
//! ```
//!
//! A fresh transaction log is seeded with the core model, the trigger and
//! activity models and every model function passed to the builder. An
//! existing log is replayed as-is.

use crate::broadcaster::{Broadcaster, Subscription};
use crate::config::{EngineConfig, TxLogKind, CONFIG_FILE_NAME};
use crate::context::SessionContext;
use crate::logging::init_tracing;
use crate::pipeline::{
    forbidden_spaces, BroadcastMiddleware, Middleware, MiddlewareCreator, ModifiedMiddleware,
    OptimizeQueryMiddleware, Pipeline, SpaceSecurityMiddleware, StorageMiddleware,
    TriggersMiddleware,
};
use crate::server_storage::{in_memory_adapters, AdapterFactory, ServerStorage, TxOutcome};
use crate::triggers::activity::{activity_model, register_activity};
use crate::triggers::{trigger_model, TriggerControl, TriggerRegistry, Triggers};
use doctx_core::{core_model, Builder, Class, Doc, DocError, FindOptions, FindResult, Query, Ref, Result, Tx};
use doctx_storage::{
    CommittedTx, FileTxLog, FullTextAdapter, FullTextIndex, InMemoryFullTextAdapter, InMemoryTxLog,
    SearchHit, TxAdapter,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

type ModelFn = Box<dyn FnOnce(&mut Builder)>;

/// Configures and opens a [`Workspace`]
pub struct WorkspaceBuilder {
    config: EngineConfig,
    models: Vec<ModelFn>,
    registry: TriggerRegistry,
    fulltext: Option<Arc<dyn FullTextAdapter>>,
    tx_log: Option<Arc<dyn TxAdapter>>,
    adapters: Option<AdapterFactory>,
    tracing: bool,
}

impl WorkspaceBuilder {
    /// Builder with `config`
    pub fn new(config: EngineConfig) -> Self {
        WorkspaceBuilder {
            config,
            models: Vec::new(),
            registry: TriggerRegistry::new(),
            fulltext: None,
            tx_log: None,
            adapters: None,
            tracing: false,
        }
    }

    /// Builder configured from `dir/doctx.toml`, written with defaults when
    /// missing. A relative `data_dir` is resolved against `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE_NAME);
        EngineConfig::write_default_if_missing(&path)?;
        let mut config = EngineConfig::from_file(&path)?;
        if config.data_dir.is_relative() {
            config.data_dir = dir.join(&config.data_dir);
        }
        Ok(Self::new(config))
    }

    /// Add model declarations for a fresh workspace
    pub fn with_model(mut self, model: impl FnOnce(&mut Builder) + 'static) -> Self {
        self.models.push(Box::new(model));
        self
    }

    /// Bind a trigger function
    pub fn with_trigger<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Tx, &TriggerControl<'_>) -> Result<Vec<Tx>> + Send + Sync + 'static,
    {
        self.registry.register(name, function);
        self
    }

    /// Use `adapter` for full-text search instead of the in-memory index
    pub fn with_fulltext_adapter(mut self, adapter: Arc<dyn FullTextAdapter>) -> Self {
        self.fulltext = Some(adapter);
        self
    }

    /// Use `tx_log` instead of the configured log
    pub fn with_tx_log(mut self, tx_log: Arc<dyn TxAdapter>) -> Self {
        self.tx_log = Some(tx_log);
        self
    }

    /// Create domain adapters with `factory`
    pub fn with_adapters(mut self, factory: AdapterFactory) -> Self {
        self.adapters = Some(factory);
        self
    }

    /// Install the `tracing` subscriber from `log_filter` on open
    pub fn with_tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    fn open_tx_log(config: &EngineConfig) -> Result<Arc<dyn TxAdapter>> {
        match config.tx_log {
            TxLogKind::Memory => Ok(Arc::new(InMemoryTxLog::new())),
            TxLogKind::File => {
                std::fs::create_dir_all(&config.data_dir)?;
                Ok(Arc::new(FileTxLog::open(config.tx_log_path(), config.durability)?))
            }
        }
    }

    /// Open storage, seed or replay the log and assemble the pipeline
    pub fn open(self) -> Result<Workspace> {
        let WorkspaceBuilder {
            config,
            models,
            mut registry,
            fulltext,
            tx_log,
            adapters,
            tracing,
        } = self;
        config.validate()?;
        if tracing {
            init_tracing(&config.log_filter);
        }

        let tx_log = match tx_log {
            Some(tx_log) => tx_log,
            None => Self::open_tx_log(&config)?,
        };
        let fulltext = config.fulltext.then(|| {
            FullTextIndex::new(fulltext.unwrap_or_else(|| Arc::new(InMemoryFullTextAdapter::new())))
        });
        let storage = Arc::new(ServerStorage::open(
            tx_log,
            adapters.unwrap_or_else(in_memory_adapters),
            fulltext,
        )?);

        if storage.load_model()?.is_empty() {
            let mut b = Builder::new();
            core_model(&mut b);
            trigger_model(&mut b);
            activity_model(&mut b);
            for model in models {
                model(&mut b);
            }
            let txes = b.into_txes();
            for tx in &txes {
                storage.tx(tx)?;
            }
            info!(target: "doctx::storage", count = txes.len(), "model initialized");
        } else if !models.is_empty() {
            debug!(target: "doctx::storage", "existing model kept, model functions ignored");
        }

        register_activity(&mut registry);
        let triggers = Arc::new(Triggers::new(registry));
        let broadcaster = Arc::new(Broadcaster::starting_after(storage.last_sequence()));

        let creators: Vec<MiddlewareCreator> = {
            let security_storage = Arc::clone(&storage);
            let trigger_storage = Arc::clone(&storage);
            let terminal_storage = Arc::clone(&storage);
            let broadcast = Arc::clone(&broadcaster);
            vec![
                Box::new(|next| Ok(Box::new(ModifiedMiddleware::new(next)) as Box<dyn Middleware>)),
                Box::new(move |next| {
                    Ok(Box::new(SpaceSecurityMiddleware::new(security_storage, next)) as Box<dyn Middleware>)
                }),
                Box::new(|next| Ok(Box::new(OptimizeQueryMiddleware::new(next)) as Box<dyn Middleware>)),
                Box::new(move |next| {
                    Ok(Box::new(TriggersMiddleware::new(triggers, trigger_storage, next)) as Box<dyn Middleware>)
                }),
                Box::new(move |next| {
                    Ok(Box::new(BroadcastMiddleware::new(broadcast, next)) as Box<dyn Middleware>)
                }),
                Box::new(move |_| Ok(Box::new(StorageMiddleware::new(terminal_storage)) as Box<dyn Middleware>)),
            ]
        };
        let pipeline = Pipeline::build(creators, config.max_derived_depth)?;
        info!(
            target: "doctx::pipeline",
            sequence = storage.last_sequence(),
            "workspace open"
        );

        Ok(Workspace {
            config,
            storage,
            broadcaster,
            pipeline,
        })
    }
}

/// An open workspace
pub struct Workspace {
    config: EngineConfig,
    storage: Arc<ServerStorage>,
    broadcaster: Arc<Broadcaster>,
    pipeline: Pipeline,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("storage", &self.storage)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl Workspace {
    /// Open with `config` and no additional model
    pub fn open(config: EngineConfig) -> Result<Self> {
        WorkspaceBuilder::new(config).open()
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying storage, for reads; commits go through [`Workspace::tx`]
    pub fn storage(&self) -> &Arc<ServerStorage> {
        &self.storage
    }

    /// Commit a transaction through the pipeline
    pub fn tx(&self, ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
        self.pipeline.tx(ctx, tx)
    }

    /// Find documents visible to the session
    pub fn find_all(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.pipeline.find_all(ctx, class, query, options)
    }

    /// Find with a query received as JSON
    pub fn find_all_json(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Value,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.pipeline.find_all_json(ctx, class, query, options)
    }

    /// First matching document visible to the session
    pub fn find_one(&self, ctx: &SessionContext, class: &Ref<Class>, query: &Query) -> Result<Option<Doc>> {
        self.pipeline.find_one(ctx, class, query, &FindOptions::default())
    }

    /// Receive every transaction committed from now on, in sequence order
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe()
    }

    /// Model transactions, for building a client-side model
    pub fn load_model(&self) -> Result<Vec<Tx>> {
        self.storage.load_model()
    }

    /// Logged transactions after `after`, for catching up
    pub fn load_txes(&self, after: u64) -> Result<Vec<CommittedTx>> {
        self.storage.load_txes(after)
    }

    /// Sequence of the last commit
    pub fn last_sequence(&self) -> u64 {
        self.storage.last_sequence()
    }

    /// Full-text search restricted to spaces the session may read
    pub fn search(&self, ctx: &SessionContext, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            return Err(DocError::invalid_input("search limit must be positive"));
        }
        if ctx.is_system() {
            return self.storage.search(query, limit);
        }
        let forbidden = forbidden_spaces(&self.storage, &ctx.account)?;
        // fetch more until enough visible hits remain or the index runs dry
        let mut fetch = limit;
        loop {
            let mut hits = self.storage.search(query, fetch)?;
            let exhausted = hits.len() < fetch;
            hits.retain(|hit| !forbidden.contains(&hit.space));
            if hits.len() >= limit || exhausted {
                hits.truncate(limit);
                return Ok(hits);
            }
            fetch = fetch.saturating_mul(2);
        }
    }

    /// Close the pipeline and flush storage
    pub fn close(&self) -> Result<()> {
        self.pipeline.close()
    }
}

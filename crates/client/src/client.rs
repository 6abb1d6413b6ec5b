//! Session-bound connection to a workspace
//!
//! A [`Client`] submits transactions through the workspace pipeline as one
//! account and keeps a local [`ModelDb`] in step with the committed model
//! transactions it receives from the broadcaster. Queries on model classes
//! are answered locally; everything else goes through the pipeline.
//!
//! Notifications are pumped, not pushed: every [`Client::tx`] drains the
//! subscription before returning, and [`Client::pump`] does the same on
//! demand. Listeners run on the pumping thread with no client lock held.

use doctx_core::classes::DOMAIN_MODEL;
use doctx_core::{
    Account, Class, FindOptions, FindResult, Hierarchy, ModelDb, Query, Ref, Result, Storage, Tx, TxResult,
};
use doctx_engine::{SessionContext, Subscription, Workspace};
use doctx_storage::CommittedTx;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Callback receiving every committed transaction seen by a client
pub type TxListener = Arc<dyn Fn(&Tx) + Send + Sync>;

/// Connection to a [`Workspace`] on behalf of one account
pub struct Client {
    workspace: Arc<Workspace>,
    ctx: SessionContext,
    model: RwLock<ModelDb>,
    model_sequence: u64,
    subscription: Mutex<Subscription>,
    listeners: RwLock<Vec<TxListener>>,
    pumping: AtomicBool,
    last_seen: AtomicU64,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("account", &self.ctx.account)
            .field("session", &self.ctx.session_id)
            .field("last_seen", &self.last_seen.load(Ordering::Relaxed))
            .finish()
    }
}

impl Client {
    /// Connect as `account`.
    ///
    /// The subscription is opened before the model is loaded, so no model
    /// change committed in between is missed.
    pub fn connect(workspace: Arc<Workspace>, account: Ref<Account>) -> Result<Self> {
        let subscription = workspace.subscribe();
        let model_sequence = workspace.last_sequence();
        let txes = workspace.load_model()?;
        let model = ModelDb::from_txes(txes.iter())?;
        debug!(
            target: "doctx::live",
            account = %account,
            model_txes = txes.len(),
            sequence = model_sequence,
            "client connected"
        );
        Ok(Client {
            workspace,
            ctx: SessionContext::new(account),
            model: RwLock::new(model),
            model_sequence,
            subscription: Mutex::new(subscription),
            listeners: RwLock::new(Vec::new()),
            pumping: AtomicBool::new(false),
            last_seen: AtomicU64::new(model_sequence),
        })
    }

    /// Account the client acts as
    pub fn account(&self) -> &Ref<Account> {
        &self.ctx.account
    }

    /// Session of this connection
    pub fn session(&self) -> &SessionContext {
        &self.ctx
    }

    /// Workspace the client is connected to
    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Sequence of the last notification processed
    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Acquire)
    }

    /// Run `f` against the local class hierarchy
    pub fn with_hierarchy<R>(&self, f: impl FnOnce(&Hierarchy) -> R) -> R {
        f(self.model.read().hierarchy())
    }

    /// Run `f` against the local model
    pub fn with_model<R>(&self, f: impl FnOnce(&ModelDb) -> R) -> R {
        f(&self.model.read())
    }

    /// Register a listener for committed transactions
    pub fn add_listener(&self, listener: TxListener) {
        self.listeners.write().push(listener);
    }

    fn is_model_class(&self, class: &Ref<Class>) -> bool {
        matches!(self.model.read().hierarchy().get_domain(class), Ok(domain) if domain == DOMAIN_MODEL)
    }

    /// Process every queued notification: model transactions update the
    /// local model, then listeners are called. Returns the number of
    /// transactions processed.
    ///
    /// A nested call from inside a listener returns immediately; the outer
    /// call keeps draining.
    pub fn pump(&self) -> usize {
        let mut processed = 0;
        loop {
            if self
                .pumping
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return processed;
            }
            loop {
                let batch = self.subscription.lock().drain();
                if batch.is_empty() {
                    break;
                }
                for entry in batch {
                    self.deliver(&entry);
                    processed += 1;
                }
            }
            self.pumping.store(false, Ordering::Release);
            // entries queued after the last drain but before the flag cleared
            let pending = self.subscription.lock().try_recv();
            match pending {
                Some(entry) => {
                    self.deliver(&entry);
                    processed += 1;
                }
                None => return processed,
            }
        }
    }

    fn deliver(&self, entry: &CommittedTx) {
        self.last_seen.fetch_max(entry.sequence, Ordering::AcqRel);
        if entry.sequence > self.model_sequence && entry.tx.touches_model() {
            if let Err(err) = self.model.write().tx(&entry.tx) {
                warn!(
                    target: "doctx::live",
                    tx = %entry.tx.id(),
                    sequence = entry.sequence,
                    error = %err,
                    "model update not applied locally"
                );
            }
        }
        let listeners: Vec<TxListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(&entry.tx);
        }
    }

    /// Close the connection; the subscription ends when the client drops
    pub fn close(&self) {
        self.listeners.write().clear();
    }
}

impl Storage for Client {
    fn find_all(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<FindResult> {
        if self.is_model_class(class) {
            return self.model.read().find_all(class, query, options);
        }
        self.workspace.find_all(&self.ctx, class, query, options)
    }

    fn tx(&self, tx: Tx) -> Result<TxResult> {
        let outcome = self.workspace.tx(&self.ctx, tx)?;
        self.pump();
        Ok(outcome.result)
    }
}

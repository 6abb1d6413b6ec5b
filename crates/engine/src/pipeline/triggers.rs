//! Runs triggers after each commit

use super::Middleware;
use crate::context::SessionContext;
use crate::server_storage::{ServerStorage, TxOutcome};
use crate::triggers::Triggers;
use doctx_core::{Result, Tx};
use std::sync::Arc;
use tracing::trace;

/// Collects trigger output for every applied transaction into
/// [`TxOutcome::derived`]
pub struct TriggersMiddleware {
    triggers: Arc<Triggers>,
    storage: Arc<ServerStorage>,
    next: Option<Box<dyn Middleware>>,
}

impl TriggersMiddleware {
    /// Dispatch `triggers` with read access to `storage`
    pub fn new(triggers: Arc<Triggers>, storage: Arc<ServerStorage>, next: Option<Box<dyn Middleware>>) -> Self {
        TriggersMiddleware {
            triggers,
            storage,
            next,
        }
    }
}

impl Middleware for TriggersMiddleware {
    fn name(&self) -> &'static str {
        "triggers"
    }

    fn next(&self) -> Option<&dyn Middleware> {
        self.next.as_deref()
    }

    fn tx(&self, ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
        let mut outcome = self.provide_tx(ctx, tx.clone())?;
        if outcome.result.applied && outcome.sequence.is_some() {
            let derived = self.triggers.apply(&self.storage, &tx);
            trace!(target: "doctx::triggers", tx = %tx.id(), derived = derived.len(), "triggers ran");
            outcome.derived.extend(derived);
        }
        Ok(outcome)
    }
}

//! Publishes committed transactions to subscribers

use super::Middleware;
use crate::broadcaster::Broadcaster;
use crate::context::SessionContext;
use crate::server_storage::TxOutcome;
use doctx_core::{Result, Tx};
use doctx_storage::CommittedTx;
use std::sync::Arc;

/// Forwards to storage and publishes every logged transaction
pub struct BroadcastMiddleware {
    broadcaster: Arc<Broadcaster>,
    next: Option<Box<dyn Middleware>>,
}

impl BroadcastMiddleware {
    /// Publish through `broadcaster`
    pub fn new(broadcaster: Arc<Broadcaster>, next: Option<Box<dyn Middleware>>) -> Self {
        BroadcastMiddleware { broadcaster, next }
    }
}

impl Middleware for BroadcastMiddleware {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn next(&self) -> Option<&dyn Middleware> {
        self.next.as_deref()
    }

    fn tx(&self, ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
        let outcome = self.provide_tx(ctx, tx.clone())?;
        if let Some(sequence) = outcome.sequence {
            self.broadcaster.publish(CommittedTx { sequence, tx });
        }
        Ok(outcome)
    }
}

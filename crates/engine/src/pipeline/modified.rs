//! Authoritative `modifiedOn` / `modifiedBy` stamping

use super::Middleware;
use crate::context::SessionContext;
use crate::server_storage::TxOutcome;
use doctx_core::{now, Result, Tx};

/// Stamps the server time and the session account on client transactions.
///
/// Whether a transaction is derived is decided by the session depth, never
/// by its header: a client transaction claiming the derived space is moved
/// back to the transaction space and stamped. Derived transactions keep the
/// stamp of the transaction that caused them.
pub struct ModifiedMiddleware {
    next: Option<Box<dyn Middleware>>,
}

impl ModifiedMiddleware {
    /// Wrap `next`
    pub fn new(next: Option<Box<dyn Middleware>>) -> Self {
        ModifiedMiddleware { next }
    }
}

impl Middleware for ModifiedMiddleware {
    fn name(&self) -> &'static str {
        "modified"
    }

    fn next(&self) -> Option<&dyn Middleware> {
        self.next.as_deref()
    }

    fn tx(&self, ctx: &SessionContext, mut tx: Tx) -> Result<TxOutcome> {
        if ctx.derived_depth == 0 {
            tx.clear_derived();
            tx.stamp(now(), &ctx.account);
        }
        self.provide_tx(ctx, tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctx_core::{Attributes, Ref, TxFactory};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Capture(Arc<Mutex<Vec<Tx>>>);

    impl Middleware for Capture {
        fn name(&self) -> &'static str {
            "capture"
        }

        fn next(&self) -> Option<&dyn Middleware> {
            None
        }

        fn tx(&self, _ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
            self.0.lock().push(tx);
            Ok(TxOutcome::committed(1))
        }
    }

    #[test]
    fn test_client_stamp_is_overwritten_derived_kept() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let middleware = ModifiedMiddleware::new(Some(Box::new(Capture(Arc::clone(&captured)))));
        let ctx = SessionContext::new(Ref::new("alice"));

        let forged = TxFactory::new(Ref::new("mallory")).create_tx_create_doc(
            Ref::new("test:class:Task"),
            Ref::new("sp"),
            Attributes::new(),
            None,
        );
        middleware.tx(&ctx, forged).unwrap();

        let derived = TxFactory::derived(Ref::new("bob"), 42).create_tx_remove_doc(
            Ref::new("test:class:Task"),
            Ref::new("sp"),
            Ref::new("t1"),
        );
        middleware.tx(&ctx.derived(), derived).unwrap();

        let captured = captured.lock();
        assert_eq!(captured[0].header().modified_by.as_str(), "alice");
        assert!(captured[0].header().modified_on > 0);
        assert_eq!(captured[1].header().modified_by.as_str(), "bob");
        assert_eq!(captured[1].header().modified_on, 42);
    }

    #[test]
    fn test_client_cannot_claim_derived_space() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let middleware = ModifiedMiddleware::new(Some(Box::new(Capture(Arc::clone(&captured)))));
        let ctx = SessionContext::new(Ref::new("alice"));

        let forged = TxFactory::derived(Ref::new("ceo"), 7).create_tx_remove_doc(
            Ref::new("test:class:Task"),
            Ref::new("sp"),
            Ref::new("t1"),
        );
        assert!(forged.is_derived());
        middleware.tx(&ctx, forged).unwrap();

        let captured = captured.lock();
        assert!(!captured[0].is_derived());
        assert_eq!(captured[0].header().modified_by.as_str(), "alice");
        assert_ne!(captured[0].header().modified_on, 7);
    }
}

//! Middleware pipeline
//!
//! Every request passes through a chain of [`Middleware`]s ending in the
//! storage middleware. A middleware either answers a request itself or
//! forwards it with the `provide_*` helpers. The chain is assembled once by
//! folding constructors right to left, so each middleware receives its
//! successor at construction.
//!
//! Default order:
//!
//! ```text
//! Modified -> SpaceSecurity -> OptimizeQuery -> Triggers -> Broadcast -> Storage
//! ```
//!
//! [`Pipeline::tx`] also drains trigger output: derived transactions are
//! re-submitted at the head of the chain, breadth first, up to the configured
//! depth.

mod broadcast;
mod modified;
mod optimize_query;
mod security;
mod storage;
mod triggers;

pub use broadcast::BroadcastMiddleware;
pub use modified::ModifiedMiddleware;
pub use optimize_query::OptimizeQueryMiddleware;
pub use security::{forbidden_spaces, SpaceSecurityMiddleware};
pub use storage::StorageMiddleware;
pub use triggers::TriggersMiddleware;

use crate::context::SessionContext;
use crate::server_storage::TxOutcome;
use doctx_core::query::parse_query;
use doctx_core::{Class, Doc, DocError, FindOptions, FindResult, Query, Ref, Result, Tx};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// One stage of the request pipeline
pub trait Middleware: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Successor in the chain; `None` for the terminal middleware
    fn next(&self) -> Option<&dyn Middleware>;

    /// Commit a transaction
    fn tx(&self, ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
        self.provide_tx(ctx, tx)
    }

    /// Find documents
    fn find_all(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.provide_find_all(ctx, class, query, options)
    }

    /// First matching document
    fn find_one(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<Option<Doc>> {
        let options = options.clone().limit(1);
        Ok(self.find_all(ctx, class, query, &options)?.into_docs().into_iter().next())
    }

    /// Release resources, front to back
    fn close(&self) -> Result<()> {
        match self.next() {
            Some(next) => next.close(),
            None => Ok(()),
        }
    }

    /// Forward a transaction to the successor
    fn provide_tx(&self, ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
        match self.next() {
            Some(next) => next.tx(ctx, tx),
            None => Err(DocError::internal(format!(
                "middleware {} has no successor for tx",
                self.name()
            ))),
        }
    }

    /// Forward a find to the successor
    fn provide_find_all(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        match self.next() {
            Some(next) => next.find_all(ctx, class, query, options),
            None => Err(DocError::internal(format!(
                "middleware {} has no successor for find_all",
                self.name()
            ))),
        }
    }
}

/// Builds a middleware around its successor
pub type MiddlewareCreator =
    Box<dyn FnOnce(Option<Box<dyn Middleware>>) -> Result<Box<dyn Middleware>>>;

/// An assembled middleware chain
pub struct Pipeline {
    head: Box<dyn Middleware>,
    max_derived_depth: usize,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = Vec::new();
        let mut current: Option<&dyn Middleware> = Some(self.head.as_ref());
        while let Some(middleware) = current {
            names.push(middleware.name());
            current = middleware.next();
        }
        f.debug_struct("Pipeline")
            .field("chain", &names)
            .field("max_derived_depth", &self.max_derived_depth)
            .finish()
    }
}

impl Pipeline {
    /// Fold `creators` right to left: the last one is the terminal
    /// middleware, the first one becomes the head.
    pub fn build(creators: Vec<MiddlewareCreator>, max_derived_depth: usize) -> Result<Self> {
        let mut next: Option<Box<dyn Middleware>> = None;
        for creator in creators.into_iter().rev() {
            next = Some(creator(next)?);
        }
        let head = next.ok_or_else(|| DocError::invalid_input("pipeline needs at least one middleware"))?;
        Ok(Pipeline {
            head,
            max_derived_depth,
        })
    }

    /// Head of the chain
    pub fn head(&self) -> &dyn Middleware {
        self.head.as_ref()
    }

    /// Commit `tx`, then submit trigger output until none is left or the
    /// depth limit is reached.
    ///
    /// Failures of derived transactions are logged; only the outcome of
    /// `tx` itself is returned.
    pub fn tx(&self, ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
        let outcome = self.head.tx(ctx, tx)?;

        let derived_ctx = ctx.derived();
        let mut queue: VecDeque<(SessionContext, Tx)> = outcome
            .derived
            .iter()
            .cloned()
            .map(|tx| (derived_ctx.clone(), tx))
            .collect();
        while let Some((ctx, tx)) = queue.pop_front() {
            if ctx.derived_depth > self.max_derived_depth {
                warn!(
                    target: "doctx::pipeline",
                    tx = %tx.id(),
                    depth = ctx.derived_depth,
                    "derived depth limit reached, transaction dropped"
                );
                continue;
            }
            match self.head.tx(&ctx, tx) {
                Ok(derived) => {
                    debug!(
                        target: "doctx::pipeline",
                        depth = ctx.derived_depth,
                        produced = derived.derived.len(),
                        "derived transaction committed"
                    );
                    let next_ctx = ctx.derived();
                    queue.extend(derived.derived.into_iter().map(|tx| (next_ctx.clone(), tx)));
                }
                Err(err) => {
                    warn!(
                        target: "doctx::pipeline",
                        depth = ctx.derived_depth,
                        error = %err,
                        "derived transaction failed"
                    );
                }
            }
        }
        Ok(outcome)
    }

    /// Find documents
    pub fn find_all(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.head.find_all(ctx, class, query, options)
    }

    /// Find with a query received as JSON; anything but an object yields an
    /// empty result
    pub fn find_all_json(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Value,
        options: &FindOptions,
    ) -> Result<FindResult> {
        match parse_query(query) {
            Some(query) => self.find_all(ctx, class, &query, options),
            None => {
                warn!(target: "doctx::pipeline", class = %class, query = %query, "query is not an object");
                Ok(FindResult::empty())
            }
        }
    }

    /// First matching document
    pub fn find_one(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<Option<Doc>> {
        self.head.find_one(ctx, class, query, options)
    }

    /// Close every middleware
    pub fn close(&self) -> Result<()> {
        self.head.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctx_core::{Attributes, TxFactory, TxResult};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Terminal stage that records what reached it and derives one child
    /// per transaction until `fan_out` runs out
    struct Recorder {
        seen: Arc<Mutex<Vec<(String, usize)>>>,
        fan_out: Arc<Mutex<usize>>,
    }

    impl Middleware for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn next(&self) -> Option<&dyn Middleware> {
            None
        }

        fn tx(&self, ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
            self.seen.lock().push((tx.object_id().to_string(), ctx.derived_depth));
            let mut outcome = TxOutcome::committed(1);
            let mut left = self.fan_out.lock();
            if *left > 0 {
                *left -= 1;
                outcome.derived.push(sample(&format!("{}+", tx.object_id())));
            }
            Ok(outcome)
        }

        fn find_all(
            &self,
            _ctx: &SessionContext,
            _class: &Ref<Class>,
            _query: &Query,
            _options: &FindOptions,
        ) -> Result<FindResult> {
            Ok(FindResult::empty())
        }
    }

    struct PassThrough {
        next: Option<Box<dyn Middleware>>,
    }

    impl Middleware for PassThrough {
        fn name(&self) -> &'static str {
            "pass"
        }

        fn next(&self) -> Option<&dyn Middleware> {
            self.next.as_deref()
        }
    }

    fn sample(id: &str) -> Tx {
        TxFactory::new(Ref::new("alice")).create_tx_create_doc(
            Ref::new("test:class:Task"),
            Ref::new("sp"),
            Attributes::new(),
            Some(Ref::new(id)),
        )
    }

    fn pipeline(fan_out: usize, depth: usize) -> (Pipeline, Arc<Mutex<Vec<(String, usize)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Recorder {
            seen: Arc::clone(&seen),
            fan_out: Arc::new(Mutex::new(fan_out)),
        };
        let creators: Vec<MiddlewareCreator> = vec![
            Box::new(|next| Ok(Box::new(PassThrough { next }) as Box<dyn Middleware>)),
            Box::new(|next| Ok(Box::new(PassThrough { next }) as Box<dyn Middleware>)),
            Box::new(move |_| Ok(Box::new(recorder) as Box<dyn Middleware>)),
        ];
        (Pipeline::build(creators, depth).unwrap(), seen)
    }

    #[test]
    fn test_chain_order_and_forwarding() {
        let (pipeline, seen) = pipeline(0, 3);
        let dbg = format!("{:?}", pipeline);
        assert!(dbg.contains("[\"pass\", \"pass\", \"recorder\"]"));
        let outcome = pipeline.tx(&SessionContext::system(), sample("a")).unwrap();
        assert_eq!(outcome.result, TxResult::APPLIED);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_derived_depth_is_bounded() {
        let (pipeline, seen) = pipeline(10, 2);
        pipeline.tx(&SessionContext::new(Ref::new("alice")), sample("a")).unwrap();
        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![("a".to_string(), 0), ("a+".to_string(), 1), ("a++".to_string(), 2)]
        );
    }

    #[test]
    fn test_non_object_query_is_empty() {
        let (pipeline, _) = pipeline(0, 1);
        let result = pipeline
            .find_all_json(
                &SessionContext::system(),
                &Ref::new("test:class:Task"),
                &serde_json::json!([1, 2]),
                &FindOptions::default(),
            )
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_terminal_without_successor_errors() {
        let lonely = PassThrough { next: None };
        let err = lonely.tx(&SessionContext::system(), sample("a")).unwrap_err();
        assert!(matches!(err, DocError::Internal(_)));
    }
}

//! Terminal middleware

use super::Middleware;
use crate::context::SessionContext;
use crate::server_storage::{ServerStorage, TxOutcome};
use doctx_core::{Class, FindOptions, FindResult, Query, Ref, Result, Tx};
use std::sync::Arc;

/// Hands requests to [`ServerStorage`]
pub struct StorageMiddleware {
    storage: Arc<ServerStorage>,
}

impl StorageMiddleware {
    /// Terminal middleware over `storage`
    pub fn new(storage: Arc<ServerStorage>) -> Self {
        StorageMiddleware { storage }
    }
}

impl Middleware for StorageMiddleware {
    fn name(&self) -> &'static str {
        "storage"
    }

    fn next(&self) -> Option<&dyn Middleware> {
        None
    }

    fn tx(&self, _ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
        self.storage.tx(&tx)
    }

    fn find_all(
        &self,
        _ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.storage.find_all(class, query, options)
    }

    fn close(&self) -> Result<()> {
        self.storage.close()
    }
}

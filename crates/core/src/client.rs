//! Storage contract shared by clients and server-side helpers

use crate::doc::Doc;
use crate::error::Result;
use crate::query::{FindOptions, FindResult, Query};
use crate::tx::{Tx, TxResult};
use crate::types::{Class, Ref};
use std::sync::Arc;

/// Something that answers queries and accepts transactions
pub trait Storage {
    /// Find documents of `class` (descendants included) matching `query`
    fn find_all(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<FindResult>;

    /// First matching document
    fn find_one(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<Option<Doc>> {
        let options = options.clone().limit(1);
        Ok(self.find_all(class, query, &options)?.docs.into_iter().next())
    }

    /// Submit a transaction
    fn tx(&self, tx: Tx) -> Result<TxResult>;
}

impl<T: Storage + ?Sized> Storage for Arc<T> {
    fn find_all(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<FindResult> {
        (**self).find_all(class, query, options)
    }

    fn find_one(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<Option<Doc>> {
        (**self).find_one(class, query, options)
    }

    fn tx(&self, tx: Tx) -> Result<TxResult> {
        (**self).tx(tx)
    }
}

impl<T: Storage + ?Sized> Storage for &T {
    fn find_all(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<FindResult> {
        (**self).find_all(class, query, options)
    }

    fn find_one(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<Option<Doc>> {
        (**self).find_one(class, query, options)
    }

    fn tx(&self, tx: Tx) -> Result<TxResult> {
        (**self).tx(tx)
    }
}

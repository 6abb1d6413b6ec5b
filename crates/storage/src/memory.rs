//! In-memory domain adapter
//!
//! Reference [`DbAdapter`] over a [`MemDb`] behind a read/write lock. Batches
//! snapshot every affected document first and restore the snapshot when any
//! transaction of the batch fails.

use crate::adapter::DbAdapter;
use doctx_core::{Class, Doc, Domain, FindOptions, FindResult, Hierarchy, MemDb, Query, Ref, Result, Tx, TxResult};
use parking_lot::RwLock;
use tracing::debug;

/// In-memory storage for one domain
#[derive(Debug)]
pub struct InMemoryAdapter {
    domain: Domain,
    db: RwLock<MemDb>,
}

impl InMemoryAdapter {
    /// Empty adapter for `domain`
    pub fn new(domain: Domain) -> Self {
        InMemoryAdapter {
            domain,
            db: RwLock::new(MemDb::new()),
        }
    }

    /// Domain served by this adapter
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.db.read().len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.db.read().is_empty()
    }
}

impl DbAdapter for InMemoryAdapter {
    fn find_all(
        &self,
        hierarchy: &Hierarchy,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.db.read().find_all(hierarchy, class, query, options)
    }

    fn tx(&self, hierarchy: &Hierarchy, tx: &Tx) -> Result<TxResult> {
        self.db.write().apply(hierarchy, tx)
    }

    fn apply_batch(&self, hierarchy: &Hierarchy, txes: &[Tx]) -> Result<Vec<TxResult>> {
        let mut db = self.db.write();
        let affected: Vec<Ref<Doc>> = txes.iter().flat_map(Tx::affected_ids).collect();
        let saved = db.snapshot(&affected);

        let mut results = Vec::with_capacity(txes.len());
        for tx in txes {
            match db.apply(hierarchy, tx) {
                Ok(result) => results.push(result),
                Err(err) => {
                    debug!(
                        target: "doctx::storage",
                        domain = %self.domain,
                        tx = %tx.id(),
                        error = %err,
                        "batch failed, restoring snapshot"
                    );
                    db.restore(saved);
                    return Err(err);
                }
            }
        }
        Ok(results)
    }

    fn load(&self, ids: &[Ref<Doc>]) -> Result<Vec<Doc>> {
        let db = self.db.read();
        Ok(ids.iter().filter_map(|id| db.get(id).cloned()).collect())
    }

    fn upload(&self, docs: Vec<Doc>) -> Result<()> {
        let mut db = self.db.write();
        for doc in docs {
            db.upsert(doc);
        }
        Ok(())
    }

    fn clean(&self, ids: &[Ref<Doc>]) -> Result<()> {
        let mut db = self.db.write();
        for id in ids {
            db.remove(id);
        }
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<Doc>> {
        Ok(self.db.read().docs().cloned().collect())
    }
}

//! Transaction log implementations
//!
//! Both logs keep every committed transaction in memory, indexed as documents
//! so the `tx` domain can be queried like any other. [`FileTxLog`] also
//! persists each entry as one checksummed line.

mod file;

pub use file::{Durability, FileTxLog};

use crate::adapter::{CommittedTx, TxAdapter};
use doctx_concurrency::Sequence;
use doctx_core::{Class, FindOptions, FindResult, Hierarchy, MemDb, Query, Ref, Result, Tx};
use parking_lot::RwLock;

/// In-memory view of a log: entries in sequence order plus their documents
#[derive(Debug, Default)]
pub(crate) struct LogState {
    entries: Vec<CommittedTx>,
    docs: MemDb,
}

impl LogState {
    pub(crate) fn push(&mut self, entry: CommittedTx) -> Result<()> {
        self.docs.upsert(entry.tx.to_doc()?);
        self.entries.push(entry);
        Ok(())
    }

    pub(crate) fn after(&self, sequence: u64) -> Vec<CommittedTx> {
        let start = self.entries.partition_point(|e| e.sequence <= sequence);
        self.entries[start..].to_vec()
    }

    pub(crate) fn model(&self) -> Vec<CommittedTx> {
        self.entries
            .iter()
            .filter(|e| e.tx.touches_model())
            .cloned()
            .collect()
    }

    pub(crate) fn find_all(
        &self,
        hierarchy: &Hierarchy,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.docs.find_all(hierarchy, class, query, options)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Log kept only in memory
#[derive(Debug, Default)]
pub struct InMemoryTxLog {
    state: RwLock<LogState>,
    sequence: Sequence,
}

impl InMemoryTxLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    /// True if nothing was appended
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TxAdapter for InMemoryTxLog {
    fn append(&self, tx: &Tx) -> Result<u64> {
        let mut state = self.state.write();
        let sequence = self.sequence.allocate();
        state.push(CommittedTx {
            sequence,
            tx: tx.clone(),
        })?;
        Ok(sequence)
    }

    fn load(&self, after: u64) -> Result<Vec<CommittedTx>> {
        Ok(self.state.read().after(after))
    }

    fn get_model(&self) -> Result<Vec<CommittedTx>> {
        Ok(self.state.read().model())
    }

    fn find_all(
        &self,
        hierarchy: &Hierarchy,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.state.read().find_all(hierarchy, class, query, options)
    }

    fn last_sequence(&self) -> u64 {
        self.sequence.current()
    }
}

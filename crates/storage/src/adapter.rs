//! Storage contracts
//!
//! A workspace keeps one [`DbAdapter`] per storage domain and a single
//! [`TxAdapter`] holding the ordered log. Adapters are plain synchronous
//! interfaces; callers serialize conflicting writes with object locks before
//! reaching them.

use doctx_core::{Class, Doc, FindOptions, FindResult, Hierarchy, Query, Ref, Result, Tx, TxResult};
use serde::{Deserialize, Serialize};

/// Storage for the documents of one domain
pub trait DbAdapter: Send + Sync {
    /// Find documents of `class` (descendants included)
    fn find_all(
        &self,
        hierarchy: &Hierarchy,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult>;

    /// Apply one transaction
    fn tx(&self, hierarchy: &Hierarchy, tx: &Tx) -> Result<TxResult>;

    /// Apply transactions in order, all or none
    fn apply_batch(&self, hierarchy: &Hierarchy, txes: &[Tx]) -> Result<Vec<TxResult>>;

    /// Current state of the given documents; missing ids are skipped
    fn load(&self, ids: &[Ref<Doc>]) -> Result<Vec<Doc>>;

    /// Insert or replace documents as-is
    fn upload(&self, docs: Vec<Doc>) -> Result<()>;

    /// Remove documents by id
    fn clean(&self, ids: &[Ref<Doc>]) -> Result<()>;

    /// Every stored document
    fn load_all(&self) -> Result<Vec<Doc>>;

    /// Release resources
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A transaction with its position in the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedTx {
    /// Commit sequence number, strictly increasing from 1
    pub sequence: u64,
    /// The transaction
    pub tx: Tx,
}

/// The ordered transaction log (`tx` domain)
pub trait TxAdapter: Send + Sync {
    /// Append a transaction and return its sequence number
    fn append(&self, tx: &Tx) -> Result<u64>;

    /// Entries with a sequence greater than `after`, in order
    fn load(&self, after: u64) -> Result<Vec<CommittedTx>>;

    /// Entries that touch the model space, in order
    fn get_model(&self) -> Result<Vec<CommittedTx>>;

    /// Query logged transactions as documents of the `tx` domain
    fn find_all(
        &self,
        hierarchy: &Hierarchy,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult>;

    /// Sequence of the last appended entry (0 when empty)
    fn last_sequence(&self) -> u64;

    /// Flush and release resources
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

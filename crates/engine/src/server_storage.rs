//! Server-side storage: domain routing, commit and rollback
//!
//! [`ServerStorage`] owns the model, one [`DbAdapter`] per storage domain and
//! the transaction log. A commit:
//!
//! 1. takes the scope lock (apply-if), then the object locks of every
//!    document the transaction may write, then the model lock
//! 2. applies model-space transactions to a copy of the model, swapped in on
//!    success
//! 3. expands other transactions into per-domain batches (collection CUDs
//!    become the attached-document transaction plus the parent counter
//!    update), applying each batch atomically and restoring earlier batches
//!    if a later one fails
//! 4. appends the transaction to the log, which assigns its sequence
//! 5. updates the full-text index
//!
//! Opening replays the log, so the state of every domain is the fold of the
//! logged transactions.

use doctx_concurrency::ObjectLocks;
use doctx_core::classes::{DOMAIN_MODEL, DOMAIN_TX, SPACE_MODEL};
use doctx_core::processor::{attach_inner, counter_updates, validate_attachment};
use doctx_core::query::{apply_lookup, apply_projection};
use doctx_core::{
    Class, Doc, DocError, Domain, FindOptions, FindResult, Hierarchy, ModelDb, Query, Ref, Result,
    Tx, TxApplyIf, TxResult,
};
use doctx_storage::{CommittedTx, DbAdapter, FullTextIndex, InMemoryAdapter, SearchHit, TxAdapter};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Creates the adapter of a domain on first use
pub type AdapterFactory = Box<dyn Fn(&Domain) -> Result<Arc<dyn DbAdapter>> + Send + Sync>;

/// Factory producing [`InMemoryAdapter`]s
pub fn in_memory_adapters() -> AdapterFactory {
    Box::new(|domain| Ok(Arc::new(InMemoryAdapter::new(domain.clone())) as Arc<dyn DbAdapter>))
}

/// Result of a commit
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutcome {
    /// Whether the transaction was applied
    pub result: TxResult,
    /// Log sequence, present when the transaction was applied and logged
    pub sequence: Option<u64>,
    /// Trigger output to submit after this commit
    pub derived: Vec<Tx>,
}

impl TxOutcome {
    /// Outcome of a transaction that was not applied
    pub fn not_applied() -> Self {
        TxOutcome {
            result: TxResult::NOT_APPLIED,
            sequence: None,
            derived: Vec::new(),
        }
    }

    /// Outcome of an applied and logged transaction
    pub fn committed(sequence: u64) -> Self {
        TxOutcome {
            result: TxResult::APPLIED,
            sequence: Some(sequence),
            derived: Vec::new(),
        }
    }
}

/// Model, domain adapters, transaction log and full-text index of one
/// workspace
pub struct ServerStorage {
    model: RwLock<ModelDb>,
    adapters: RwLock<FxHashMap<Domain, Arc<dyn DbAdapter>>>,
    adapter_factory: AdapterFactory,
    tx_log: Arc<dyn TxAdapter>,
    fulltext: Option<FullTextIndex>,
    object_locks: ObjectLocks,
    scope_locks: ObjectLocks,
}

impl std::fmt::Debug for ServerStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStorage")
            .field("domains", &self.adapters.read().keys().collect::<Vec<_>>())
            .field("last_sequence", &self.tx_log.last_sequence())
            .field("fulltext", &self.fulltext.is_some())
            .finish_non_exhaustive()
    }
}

impl ServerStorage {
    /// Open storage over `tx_log` and rebuild every domain from it.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read or a logged transaction no longer
    /// applies.
    pub fn open(
        tx_log: Arc<dyn TxAdapter>,
        adapter_factory: AdapterFactory,
        fulltext: Option<FullTextIndex>,
    ) -> Result<Self> {
        let storage = ServerStorage {
            model: RwLock::new(ModelDb::new()),
            adapters: RwLock::new(FxHashMap::default()),
            adapter_factory,
            tx_log,
            fulltext,
            object_locks: ObjectLocks::new(),
            scope_locks: ObjectLocks::new(),
        };
        storage.replay()?;
        Ok(storage)
    }

    fn replay(&self) -> Result<()> {
        let entries = self.tx_log.load(0)?;
        let count = entries.len();
        for entry in entries {
            self.replay_one(&entry).map_err(|e| {
                DocError::storage(format!(
                    "replay of tx {} (sequence {}) failed: {}",
                    entry.tx.id(),
                    entry.sequence,
                    e
                ))
            })?;
        }
        if count > 0 {
            info!(target: "doctx::storage", count, "replayed transaction log");
        }
        Ok(())
    }

    fn replay_one(&self, entry: &CommittedTx) -> Result<()> {
        if entry.tx.touches_model() {
            self.model.write().tx(&entry.tx)?;
            return Ok(());
        }
        let model = self.model.read();
        let mut commit = Commit::new(self, model.hierarchy());
        match commit.tx(&entry.tx) {
            Ok(_) => commit.flush()?,
            Err(err) => {
                commit.rollback();
                return Err(err);
            }
        }
        self.index(model.hierarchy(), &entry.tx);
        Ok(())
    }

    /// Adapter of `domain`, created on first use
    pub fn adapter(&self, domain: &Domain) -> Result<Arc<dyn DbAdapter>> {
        if let Some(adapter) = self.adapters.read().get(domain) {
            return Ok(Arc::clone(adapter));
        }
        let mut adapters = self.adapters.write();
        if let Some(adapter) = adapters.get(domain) {
            return Ok(Arc::clone(adapter));
        }
        let adapter = (self.adapter_factory)(domain)?;
        debug!(target: "doctx::storage", domain = %domain, "domain adapter created");
        adapters.insert(domain.clone(), Arc::clone(&adapter));
        Ok(adapter)
    }

    /// The transaction log
    pub fn tx_log(&self) -> &Arc<dyn TxAdapter> {
        &self.tx_log
    }

    /// Run `f` against the current model
    pub fn with_model<R>(&self, f: impl FnOnce(&ModelDb) -> R) -> R {
        f(&self.model.read())
    }

    /// Copy of the current model
    pub fn model(&self) -> ModelDb {
        self.model.read().clone()
    }

    /// Logged transactions that touch the model, in order
    pub fn load_model(&self) -> Result<Vec<Tx>> {
        Ok(self.tx_log.get_model()?.into_iter().map(|e| e.tx).collect())
    }

    /// Logged transactions after `after`
    pub fn load_txes(&self, after: u64) -> Result<Vec<CommittedTx>> {
        self.tx_log.load(after)
    }

    /// Sequence of the last commit
    pub fn last_sequence(&self) -> u64 {
        self.tx_log.last_sequence()
    }

    /// Full-text search; fails if the index is disabled
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        match &self.fulltext {
            Some(index) => index.search(query, limit),
            None => Err(DocError::invalid_input("full-text index is disabled")),
        }
    }

    /// Find documents of `class` in whichever domain stores it, then expand
    /// lookups and apply the projection
    pub fn find_all(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<FindResult> {
        let model = self.model.read();
        let hierarchy = model.hierarchy();
        let domain = hierarchy.get_domain(class)?;
        let mut result = self.find_in_domain(&model, &domain, class, query, &options.storage_part())?;
        apply_lookup(&mut result.docs, &options.lookup, |class, id| {
            self.load_doc(&model, class, id)
        })?;
        apply_projection(&mut result.docs, &options.projection);
        Ok(result)
    }

    fn find_in_domain(
        &self,
        model: &ModelDb,
        domain: &Domain,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        if *domain == DOMAIN_MODEL {
            model.find_all(class, query, options)
        } else if *domain == DOMAIN_TX {
            self.tx_log.find_all(model.hierarchy(), class, query, options)
        } else {
            self.adapter(domain)?
                .find_all(model.hierarchy(), class, query, options)
        }
    }

    fn load_doc(&self, model: &ModelDb, class: &Ref<Class>, id: &Ref<Doc>) -> Result<Option<Doc>> {
        let hierarchy = model.hierarchy();
        let domain = hierarchy.get_domain(class)?;
        let doc = if domain == DOMAIN_MODEL {
            model.get(id).cloned()
        } else if domain == DOMAIN_TX {
            let mut query = Query::new();
            query.insert("_id".to_string(), Value::String(id.to_string()));
            self.tx_log
                .find_all(hierarchy, class, &query, &FindOptions::default().limit(1))?
                .into_docs()
                .pop()
        } else {
            self.adapter(&domain)?.load(std::slice::from_ref(id))?.pop()
        };
        match doc {
            Some(doc) if hierarchy.is_derived(&doc.class, class)? => Ok(Some(doc)),
            _ => Ok(None),
        }
    }

    /// Commit one transaction.
    ///
    /// An apply-if whose conditions fail yields `applied: false` and is not
    /// logged. Any error leaves every domain as it was.
    ///
    /// Only the storage middleware and model seeding commit here: every
    /// sequence taken after the broadcaster starts must be published, or
    /// delivery stalls on the gap.
    pub(crate) fn tx(&self, tx: &Tx) -> Result<TxOutcome> {
        let _scope = match tx {
            Tx::ApplyIf(apply) => Some(self.scope_locks.lock(&apply.scope)),
            _ => None,
        };
        let ids = tx.affected_ids();
        let _objects = self.object_locks.lock_many(ids.iter().map(Ref::as_str));

        if tx.touches_model() {
            self.commit_model(&mut self.model.write(), tx)
        } else {
            self.commit_data(&self.model.read(), tx)
        }
    }

    fn commit_model(&self, model: &mut ModelDb, tx: &Tx) -> Result<TxOutcome> {
        if let Some(stray) = tx
            .extract()
            .into_iter()
            .find(|inner| !matches!(inner, Tx::ApplyIf(_)) && *inner.object_space() != SPACE_MODEL)
        {
            return Err(DocError::invalid_input(format!(
                "transaction {} mixes model and data changes ({} is in {})",
                tx.id(),
                stray.object_id(),
                stray.object_space()
            )));
        }

        let mut next = model.clone();
        let result = next.tx(tx)?;
        if !result.applied {
            debug!(target: "doctx::tx", tx = %tx.id(), "model apply-if not applied");
            return Ok(TxOutcome::not_applied());
        }
        let sequence = self.tx_log.append(tx)?;
        *model = next;
        info!(target: "doctx::tx", tx = %tx.id(), sequence, "model transaction committed");
        Ok(TxOutcome::committed(sequence))
    }

    fn commit_data(&self, model: &ModelDb, tx: &Tx) -> Result<TxOutcome> {
        let hierarchy = model.hierarchy();
        let mut commit = Commit::new(self, hierarchy);
        let result = match commit.tx(tx).and_then(|result| commit.flush().map(|_| result)) {
            Ok(result) => result,
            Err(err) => {
                debug!(target: "doctx::tx", tx = %tx.id(), error = %err, "commit failed, rolling back");
                commit.rollback();
                return Err(err);
            }
        };
        if !result.applied {
            debug!(target: "doctx::tx", tx = %tx.id(), "apply-if not applied");
            commit.rollback();
            return Ok(TxOutcome::not_applied());
        }

        let sequence = match self.tx_log.append(tx) {
            Ok(sequence) => sequence,
            Err(err) => {
                error!(target: "doctx::tx", tx = %tx.id(), error = %err, "log append failed, rolling back");
                commit.rollback();
                return Err(err);
            }
        };
        debug!(
            target: "doctx::tx",
            tx = %tx.id(),
            class = %tx.class(),
            object = %tx.object_id(),
            sequence,
            "committed"
        );
        self.index(hierarchy, tx);
        Ok(TxOutcome::committed(sequence))
    }

    fn index(&self, hierarchy: &Hierarchy, tx: &Tx) {
        let Some(fulltext) = &self.fulltext else {
            return;
        };
        let load = |class: &Ref<Class>, id: &Ref<Doc>| -> Result<Option<Doc>> {
            let domain = hierarchy.get_domain(class)?;
            Ok(self.adapter(&domain)?.load(std::slice::from_ref(id))?.pop())
        };
        if let Err(err) = fulltext.on_tx(hierarchy, tx, load) {
            warn!(target: "doctx::storage", tx = %tx.id(), error = %err, "full-text update failed");
        }
    }

    /// Flush the log and close every adapter
    pub fn close(&self) -> Result<()> {
        for (domain, adapter) in self.adapters.read().iter() {
            if let Err(err) = adapter.close() {
                warn!(target: "doctx::storage", domain = %domain, error = %err, "adapter close failed");
            }
        }
        self.tx_log.close()
    }
}

/// A write must name the space its target is actually stored in
fn check_space(stored: &Doc, claimed: &str) -> Result<()> {
    if stored.space.as_str() == claimed {
        return Ok(());
    }
    Err(DocError::invalid_input(format!(
        "{} is in space {}, not {}",
        stored.id, stored.space, claimed
    )))
}

/// A batch already applied to one adapter, with the before-image needed to
/// undo it
struct Applied {
    adapter: Arc<dyn DbAdapter>,
    domain: Domain,
    ids: Vec<Ref<Doc>>,
    before: Vec<Doc>,
}

/// One data commit in progress.
///
/// Leaf transactions are queued per domain; consecutive leaves of the same
/// domain form one batch. The queue is flushed whenever current state has to
/// be read, so reads observe earlier writes of the same commit.
struct Commit<'a> {
    storage: &'a ServerStorage,
    hierarchy: &'a Hierarchy,
    pending: Option<(Domain, Vec<Tx>)>,
    applied: Vec<Applied>,
}

impl<'a> Commit<'a> {
    fn new(storage: &'a ServerStorage, hierarchy: &'a Hierarchy) -> Self {
        Commit {
            storage,
            hierarchy,
            pending: None,
            applied: Vec::new(),
        }
    }

    fn domain_of(&self, class: &Ref<Class>) -> Result<Domain> {
        let domain = self.hierarchy.get_domain(class)?;
        if domain == DOMAIN_MODEL || domain == DOMAIN_TX {
            return Err(DocError::invalid_input(format!(
                "documents of {} belong to the {} domain and cannot be written here",
                class, domain
            )));
        }
        Ok(domain)
    }

    fn tx(&mut self, tx: &Tx) -> Result<TxResult> {
        match tx {
            Tx::CollectionCud(cud) => {
                let inner = attach_inner(cud);
                let parent_class = &cud.header.object_class;
                let parent = self.load(parent_class, &cud.header.object_id)?;
                if let Some(parent) = &parent {
                    check_space(parent, cud.header.object_space.as_str())?;
                }
                if matches!(inner, Tx::CreateDoc(_)) {
                    let parent = parent.as_ref().ok_or_else(|| {
                        DocError::InvalidAttachment(format!("parent {} not found", cud.header.object_id))
                    })?;
                    validate_attachment(self.hierarchy, parent, cud)?;
                }
                let before = match inner {
                    Tx::CreateDoc(_) => None,
                    _ => self.load(inner.object_class(), inner.object_id())?,
                };
                let counters = counter_updates(self.hierarchy, cud, before.as_ref())?;
                let result = self.tx(&inner)?;
                for mut update in counters {
                    let Some(target) = self.load(update.object_class(), update.object_id())? else {
                        continue;
                    };
                    update.header_mut().object_space = target.space.clone();
                    let domain = self.domain_of(update.object_class())?;
                    self.push(domain, update)?;
                }
                Ok(result)
            }
            Tx::ApplyIf(apply) => self.apply_if(apply),
            Tx::CreateDoc(_) => {
                let domain = self.domain_of(tx.object_class())?;
                self.push(domain, tx.clone())?;
                Ok(TxResult::APPLIED)
            }
            leaf => {
                if let Some(stored) = self.load(leaf.object_class(), leaf.object_id())? {
                    check_space(&stored, leaf.object_space().as_str())?;
                }
                let domain = self.domain_of(leaf.object_class())?;
                self.push(domain, leaf.clone())?;
                Ok(TxResult::APPLIED)
            }
        }
    }

    fn apply_if(&mut self, apply: &TxApplyIf) -> Result<TxResult> {
        self.flush()?;
        let options = FindOptions::default().limit(1);
        for condition in &apply.matches {
            if self.find(&condition.class, &condition.query, &options)?.is_empty() {
                return Ok(TxResult::NOT_APPLIED);
            }
        }
        for condition in &apply.not_matches {
            if !self.find(&condition.class, &condition.query, &options)?.is_empty() {
                return Ok(TxResult::NOT_APPLIED);
            }
        }
        for inner in &apply.txes {
            let result = self.tx(inner)?;
            if !result.applied {
                return Ok(result);
            }
        }
        Ok(TxResult::APPLIED)
    }

    fn find(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<FindResult> {
        let domain = self.hierarchy.get_domain(class)?;
        if domain == DOMAIN_MODEL || domain == DOMAIN_TX {
            return Err(DocError::invalid_input(format!(
                "apply-if conditions cannot query the {} domain",
                domain
            )));
        }
        self.storage
            .adapter(&domain)?
            .find_all(self.hierarchy, class, query, options)
    }

    fn load(&mut self, class: &Ref<Class>, id: &Ref<Doc>) -> Result<Option<Doc>> {
        self.flush()?;
        let domain = self.domain_of(class)?;
        Ok(self
            .storage
            .adapter(&domain)?
            .load(std::slice::from_ref(id))?
            .pop())
    }

    fn push(&mut self, domain: Domain, tx: Tx) -> Result<()> {
        match &mut self.pending {
            Some((current, txes)) if *current == domain => {
                txes.push(tx);
                Ok(())
            }
            _ => {
                self.flush()?;
                self.pending = Some((domain, vec![tx]));
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        let Some((domain, txes)) = self.pending.take() else {
            return Ok(());
        };
        let adapter = self.storage.adapter(&domain)?;
        let mut ids: Vec<Ref<Doc>> = Vec::new();
        for id in txes.iter().flat_map(Tx::affected_ids) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        let before = adapter.load(&ids)?;
        adapter.apply_batch(self.hierarchy, &txes)?;
        self.applied.push(Applied {
            adapter,
            domain,
            ids,
            before,
        });
        Ok(())
    }

    /// Undo every applied batch, newest first
    fn rollback(mut self) {
        self.pending = None;
        for applied in self.applied.drain(..).rev() {
            let restored = applied
                .adapter
                .clean(&applied.ids)
                .and_then(|_| applied.adapter.upload(applied.before));
            if let Err(err) = restored {
                error!(
                    target: "doctx::storage",
                    domain = %applied.domain,
                    error = %err,
                    "rollback failed, domain may be inconsistent"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctx_core::classes::{CLASS_ATTACHED_DOC, CLASS_DOC};
    use doctx_core::{core_model, Attributes, AttributeType, Builder, Space, TxFactory};
    use doctx_storage::{InMemoryFullTextAdapter, InMemoryTxLog};
    use serde_json::json;

    const ISSUE: Ref<Class> = Ref::from_static("test:class:Issue");
    const COMMENT: Ref<Class> = Ref::from_static("test:class:Comment");

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    fn storage_with(tx_log: Arc<dyn TxAdapter>) -> ServerStorage {
        let storage = ServerStorage::open(
            tx_log,
            in_memory_adapters(),
            Some(FullTextIndex::new(Arc::new(InMemoryFullTextAdapter::new()))),
        )
        .unwrap();
        if storage.last_sequence() == 0 {
            let mut b = Builder::new();
            core_model(&mut b);
            b.create_class(ISSUE, CLASS_DOC, Some(Domain::new("task")))
                .attribute("title", AttributeType::String)
                .attribute("comments", AttributeType::Collection { of: COMMENT });
            b.create_class(COMMENT, CLASS_ATTACHED_DOC, Some(Domain::new("chunter")))
                .attribute("message", AttributeType::Markup);
            for tx in b.txes() {
                storage.tx(tx).unwrap();
            }
        }
        storage
    }

    fn storage() -> ServerStorage {
        storage_with(Arc::new(InMemoryTxLog::new()))
    }

    fn sp() -> Ref<Space> {
        Ref::new("sp")
    }

    fn get(storage: &ServerStorage, class: &Ref<Class>, id: &str) -> Option<Doc> {
        let mut query = Query::new();
        query.insert("_id".to_string(), json!(id));
        storage
            .find_all(class, &query, &FindOptions::default())
            .unwrap()
            .into_docs()
            .pop()
    }

    #[test]
    fn test_collection_cud_routes_across_domains() {
        let storage = storage();
        let f = TxFactory::new(Ref::new("alice"));
        storage
            .tx(&f.create_tx_create_doc(ISSUE, sp(), attrs(json!({"title": "Crash"})), Some(Ref::new("i1"))))
            .unwrap();
        let comment = f.create_tx_create_doc(COMMENT, sp(), attrs(json!({"message": "seen"})), Some(Ref::new("c1")));
        let outcome = storage
            .tx(&f.create_tx_collection_cud(ISSUE, Ref::new("i1"), sp(), "comments", comment))
            .unwrap();
        assert!(outcome.result.applied);

        let issue = get(&storage, &ISSUE, "i1").unwrap();
        assert_eq!(issue.get("comments"), Some(&json!(1)));
        let comment = get(&storage, &COMMENT, "c1").unwrap();
        assert_eq!(comment.get_str("attachedTo"), Some("i1"));

        assert_eq!(storage.adapter(&Domain::new("task")).unwrap().load_all().unwrap().len(), 1);
        assert_eq!(storage.adapter(&Domain::new("chunter")).unwrap().load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_moving_an_attached_doc_moves_the_count() {
        let storage = storage();
        let f = TxFactory::new(Ref::new("alice"));
        for id in ["p1", "p2"] {
            storage
                .tx(&f.create_tx_create_doc(ISSUE, sp(), Attributes::new(), Some(Ref::new(id))))
                .unwrap();
        }
        let comment = f.create_tx_create_doc(COMMENT, sp(), Attributes::new(), Some(Ref::new("c1")));
        storage
            .tx(&f.create_tx_collection_cud(ISSUE, Ref::new("p1"), sp(), "comments", comment))
            .unwrap();

        let update = f.create_tx_update_doc(COMMENT, sp(), Ref::new("c1"), attrs(json!({"attachedTo": "p2"})));
        storage
            .tx(&f.create_tx_collection_cud(ISSUE, Ref::new("p1"), sp(), "comments", update))
            .unwrap();

        assert_eq!(get(&storage, &COMMENT, "c1").unwrap().get_str("attachedTo"), Some("p2"));
        assert_eq!(get(&storage, &ISSUE, "p1").unwrap().get("comments"), Some(&json!(0)));
        assert_eq!(get(&storage, &ISSUE, "p2").unwrap().get("comments"), Some(&json!(1)));
    }

    #[test]
    fn test_write_with_wrong_object_space_is_rejected() {
        let storage = storage();
        let f = TxFactory::new(Ref::new("alice"));
        storage
            .tx(&f.create_tx_create_doc(ISSUE, sp(), attrs(json!({"title": "a"})), Some(Ref::new("i1"))))
            .unwrap();
        let before = storage.last_sequence();

        let update = f.create_tx_update_doc(ISSUE, Ref::new("other"), Ref::new("i1"), attrs(json!({"title": "b"})));
        assert!(matches!(storage.tx(&update), Err(DocError::InvalidInput(_))));
        let comment = f.create_tx_create_doc(COMMENT, Ref::new("other"), Attributes::new(), None);
        let cud = f.create_tx_collection_cud(ISSUE, Ref::new("i1"), Ref::new("other"), "comments", comment);
        assert!(matches!(storage.tx(&cud), Err(DocError::InvalidInput(_))));

        assert_eq!(storage.last_sequence(), before);
        assert_eq!(get(&storage, &ISSUE, "i1").unwrap().get_str("title"), Some("a"));
    }

    #[test]
    fn test_attachment_to_missing_parent_is_rejected() {
        let storage = storage();
        let f = TxFactory::new(Ref::new("alice"));
        let before = storage.last_sequence();
        let comment = f.create_tx_create_doc(COMMENT, sp(), Attributes::new(), Some(Ref::new("c1")));
        let err = storage
            .tx(&f.create_tx_collection_cud(ISSUE, Ref::new("nope"), sp(), "comments", comment))
            .unwrap_err();
        assert!(matches!(err, DocError::InvalidAttachment(_)));
        assert_eq!(storage.last_sequence(), before);
        assert!(get(&storage, &COMMENT, "c1").is_none());
    }

    #[test]
    fn test_failed_later_domain_rolls_back_earlier() {
        let storage = storage();
        let f = TxFactory::new(Ref::new("alice"));
        let create = f.create_tx_create_doc(ISSUE, sp(), attrs(json!({"title": "a"})), Some(Ref::new("i1")));
        let bad = f.create_tx_update_doc(COMMENT, sp(), Ref::new("missing"), attrs(json!({"message": "x"})));
        let apply = f.create_tx_apply_if("s".to_string(), vec![], vec![], vec![create, bad]);
        let err = storage.tx(&apply).unwrap_err();
        assert!(matches!(err, DocError::DocumentNotFound(_)));
        assert!(get(&storage, &ISSUE, "i1").is_none());
    }

    #[test]
    fn test_apply_if_conditions() {
        let storage = storage();
        let f = TxFactory::new(Ref::new("alice"));
        let condition = doctx_core::MatchCondition {
            class: ISSUE,
            query: attrs(json!({"title": "unique"})),
        };
        let create = |id: &str| {
            f.create_tx_create_doc(ISSUE, sp(), attrs(json!({"title": "unique"})), Some(Ref::new(id)))
        };
        let first = f.create_tx_apply_if("titles".to_string(), vec![], vec![condition.clone()], vec![create("i1")]);
        assert!(storage.tx(&first).unwrap().result.applied);

        let before = storage.last_sequence();
        let second = f.create_tx_apply_if("titles".to_string(), vec![], vec![condition], vec![create("i2")]);
        let outcome = storage.tx(&second).unwrap();
        assert!(!outcome.result.applied);
        assert_eq!(outcome.sequence, None);
        assert_eq!(storage.last_sequence(), before);
        assert!(get(&storage, &ISSUE, "i2").is_none());
    }

    #[test]
    fn test_nested_guard_fails_the_outer_unit() {
        let storage = storage();
        let f = TxFactory::new(Ref::new("alice"));
        let before = storage.last_sequence();
        let nested = f.create_tx_apply_if(
            "inner".to_string(),
            vec![doctx_core::MatchCondition {
                class: ISSUE,
                query: attrs(json!({"title": "missing"})),
            }],
            vec![],
            vec![],
        );
        let create = f.create_tx_create_doc(ISSUE, sp(), attrs(json!({"title": "a"})), Some(Ref::new("i1")));
        let outer = f.create_tx_apply_if("outer".to_string(), vec![], vec![], vec![create, nested]);

        let outcome = storage.tx(&outer).unwrap();
        assert!(!outcome.result.applied);
        assert_eq!(storage.last_sequence(), before);
        assert!(get(&storage, &ISSUE, "i1").is_none());
    }

    #[test]
    fn test_model_and_tx_domains_are_queryable() {
        let storage = storage();
        let classes = storage
            .find_all(&doctx_core::classes::CLASS_CLASS, &Query::new(), &FindOptions::default())
            .unwrap();
        assert!(classes.iter().any(|doc| doc.id.as_str() == ISSUE.as_str()));

        let f = TxFactory::new(Ref::new("alice"));
        storage
            .tx(&f.create_tx_create_doc(ISSUE, sp(), Attributes::new(), Some(Ref::new("i1"))))
            .unwrap();
        let mut query = Query::new();
        query.insert("objectId".to_string(), json!("i1"));
        let logged = storage
            .find_all(&doctx_core::classes::CLASS_TX_CREATE_DOC, &query, &FindOptions::default())
            .unwrap();
        assert_eq!(logged.len(), 1);
    }

    #[test]
    fn test_lookup_crosses_domains() {
        let storage = storage();
        let f = TxFactory::new(Ref::new("alice"));
        storage
            .tx(&f.create_tx_create_doc(ISSUE, sp(), attrs(json!({"title": "Crash"})), Some(Ref::new("i1"))))
            .unwrap();
        let comment = f.create_tx_create_doc(COMMENT, sp(), Attributes::new(), Some(Ref::new("c1")));
        storage
            .tx(&f.create_tx_collection_cud(ISSUE, Ref::new("i1"), sp(), "comments", comment))
            .unwrap();

        let options = FindOptions::default()
            .lookup("attachedTo", ISSUE)
            .project(["attachedTo"]);
        let found = storage.find_all(&COMMENT, &Query::new(), &options).unwrap();
        let doc = found.first().unwrap();
        assert_eq!(doc.get("$lookup").and_then(|l| l.get("attachedTo")).and_then(|i| i.get("title")), Some(&json!("Crash")));
        assert!(doc.get("collection").is_none());
    }

    #[test]
    fn test_model_transactions_must_stay_in_model_space() {
        let storage = storage();
        let f = TxFactory::new(Ref::new("alice"));
        let class = f.create_tx_create_doc(
            doctx_core::classes::CLASS_CLASS,
            SPACE_MODEL,
            attrs(json!({"extends": "core:class:Doc"})),
            Some(Ref::new("test:class:Other")),
        );
        let data = f.create_tx_create_doc(ISSUE, sp(), Attributes::new(), None);
        let apply = f.create_tx_apply_if("m".to_string(), vec![], vec![], vec![class, data]);
        assert!(matches!(storage.tx(&apply), Err(DocError::InvalidInput(_))));
    }

    #[test]
    fn test_reopen_replays_log() {
        let log: Arc<dyn TxAdapter> = Arc::new(InMemoryTxLog::new());
        let storage = storage_with(Arc::clone(&log));
        let f = TxFactory::new(Ref::new("alice"));
        storage
            .tx(&f.create_tx_create_doc(ISSUE, sp(), attrs(json!({"title": "Crash"})), Some(Ref::new("i1"))))
            .unwrap();
        storage
            .tx(&f.create_tx_update_doc(ISSUE, sp(), Ref::new("i1"), attrs(json!({"title": "Crash on login"}))))
            .unwrap();
        let expected = get(&storage, &ISSUE, "i1");

        let reopened = storage_with(log);
        assert_eq!(get(&reopened, &ISSUE, "i1"), expected);
        assert_eq!(reopened.search("login", 10).unwrap().len(), 1);
    }
}

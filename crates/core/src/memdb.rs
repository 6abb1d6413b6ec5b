//! In-memory document store
//!
//! [`MemDb`] keeps documents by id with per-class buckets in insertion order.
//! [`Applier`] folds transactions into a `MemDb` against a hierarchy, and
//! [`ModelDb`] couples a `MemDb` with the `Hierarchy` it maintains.

use crate::doc::Doc;
use crate::error::{DocError, Result};
use crate::hierarchy::Hierarchy;
use crate::processor::{
    apply_mixin, attach_inner, counter_updates, create_doc_to_doc, put_bag, touch, update_doc,
    validate_attachment, TxProcessor,
};
use crate::query::{apply_lookup, apply_projection, finish_find, CompiledQuery, FindOptions, FindResult, Query};
use crate::tx::{
    MatchCondition, Tx, TxApplyIf, TxCollectionCud, TxCreateDoc, TxMixin, TxPutBag, TxRemoveDoc,
    TxResult, TxUpdateDoc,
};
use crate::types::{Class, Ref};
use rustc_hash::FxHashMap;
use tracing::trace;

/// Saved state of a set of documents (`None` = absent)
pub type Snapshot = Vec<(Ref<Doc>, Option<Doc>)>;

/// In-memory document store
#[derive(Debug, Clone, Default)]
pub struct MemDb {
    objects: FxHashMap<Ref<Doc>, Doc>,
    by_class: FxHashMap<Ref<Class>, Vec<Ref<Doc>>>,
}

impl MemDb {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Document by id
    pub fn get(&self, id: &Ref<Doc>) -> Option<&Doc> {
        self.objects.get(id)
    }

    /// Mutable document by id
    pub fn get_mut(&mut self, id: &Ref<Doc>) -> Option<&mut Doc> {
        self.objects.get_mut(id)
    }

    /// Insert a new document; fails with `DocumentExists` on a duplicate id
    pub fn insert(&mut self, doc: Doc) -> Result<()> {
        if self.objects.contains_key(&doc.id) {
            return Err(DocError::DocumentExists(doc.id.to_string()));
        }
        self.by_class
            .entry(doc.class.clone())
            .or_default()
            .push(doc.id.clone());
        self.objects.insert(doc.id.clone(), doc);
        Ok(())
    }

    /// Insert or replace a document
    pub fn upsert(&mut self, doc: Doc) {
        self.remove(&doc.id);
        // cannot fail: the id was just removed
        let _ = self.insert(doc);
    }

    /// Remove a document
    pub fn remove(&mut self, id: &Ref<Doc>) -> Option<Doc> {
        let doc = self.objects.remove(id)?;
        if let Some(bucket) = self.by_class.get_mut(&doc.class) {
            bucket.retain(|d| d != id);
        }
        Some(doc)
    }

    /// Remove everything
    pub fn clear(&mut self) {
        self.objects.clear();
        self.by_class.clear();
    }

    /// Every document, grouped by class in insertion order
    pub fn docs(&self) -> impl Iterator<Item = &Doc> {
        self.by_class
            .values()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.objects.get(id))
    }

    /// Save the current state of `ids`
    pub fn snapshot(&self, ids: &[Ref<Doc>]) -> Snapshot {
        ids.iter()
            .map(|id| (id.clone(), self.objects.get(id).cloned()))
            .collect()
    }

    /// Put back a saved state
    pub fn restore(&mut self, snapshot: Snapshot) {
        for (id, doc) in snapshot {
            self.remove(&id);
            if let Some(doc) = doc {
                self.upsert(doc);
            }
        }
    }

    /// Find documents of `class` (descendants included) matching `query`.
    ///
    /// For a mixin class the base class is scanned and only documents
    /// carrying the mixin are considered.
    pub fn find_all(
        &self,
        hierarchy: &Hierarchy,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        let compiled = CompiledQuery::compile(query)?;
        let (scan, mixin) = if hierarchy.is_mixin(class)? {
            (hierarchy.get_base_class(class)?, Some(class))
        } else {
            (class.clone(), None)
        };

        let mut matched = Vec::new();
        for descendant in hierarchy.get_descendants(&scan)? {
            let Some(ids) = self.by_class.get(descendant) else {
                continue;
            };
            for id in ids {
                let Some(doc) = self.objects.get(id) else {
                    continue;
                };
                if let Some(mixin) = mixin {
                    if !hierarchy.has_mixin(doc, mixin) {
                        continue;
                    }
                }
                if compiled.matches_doc(doc) {
                    matched.push(doc.clone());
                }
            }
        }

        let mut result = finish_find(matched, options);
        apply_lookup(&mut result.docs, &options.lookup, |class, id| {
            Ok(self
                .get(id)
                .filter(|doc| hierarchy.is_derived(&doc.class, class).unwrap_or(false))
                .cloned())
        })?;
        apply_projection(&mut result.docs, &options.projection);
        Ok(result)
    }

    /// True if any document matches the condition
    pub fn any_match(&self, hierarchy: &Hierarchy, condition: &MatchCondition) -> Result<bool> {
        let options = FindOptions::default().limit(1);
        Ok(!self
            .find_all(hierarchy, &condition.class, &condition.query, &options)?
            .is_empty())
    }

    /// Fold one transaction into the store
    pub fn apply(&mut self, hierarchy: &Hierarchy, tx: &Tx) -> Result<TxResult> {
        Applier::new(self, hierarchy).tx(tx)
    }
}

/// Folds transactions into a [`MemDb`]
pub struct Applier<'a> {
    db: &'a mut MemDb,
    hierarchy: &'a Hierarchy,
}

impl<'a> Applier<'a> {
    /// Applier over `db`
    pub fn new(db: &'a mut MemDb, hierarchy: &'a Hierarchy) -> Self {
        Applier { db, hierarchy }
    }

    fn doc_mut(&mut self, id: &Ref<Doc>) -> Result<&mut Doc> {
        self.db
            .get_mut(id)
            .ok_or_else(|| DocError::DocumentNotFound(id.to_string()))
    }

    fn bump_counters(&mut self, updates: Vec<Tx>) -> Result<()> {
        for mut update in updates {
            let Some(parent) = self.db.get(update.object_id()) else {
                continue;
            };
            update.header_mut().object_space = parent.space.clone();
            self.tx(&update)?;
        }
        Ok(())
    }
}

impl TxProcessor for Applier<'_> {
    fn tx_create_doc(&mut self, tx: &TxCreateDoc) -> Result<TxResult> {
        self.db.insert(create_doc_to_doc(tx))?;
        Ok(TxResult::APPLIED)
    }

    fn tx_update_doc(&mut self, tx: &TxUpdateDoc) -> Result<TxResult> {
        let doc = self.doc_mut(&tx.header.object_id)?;
        let mut updated = doc.clone();
        update_doc(&mut updated, &tx.operations)?;
        touch(&mut updated, &tx.header);
        *doc = updated;
        Ok(TxResult::APPLIED)
    }

    fn tx_remove_doc(&mut self, tx: &TxRemoveDoc) -> Result<TxResult> {
        if self.db.remove(&tx.header.object_id).is_none() {
            trace!(target: "doctx::tx", id = %tx.header.object_id, "remove of missing document");
        }
        Ok(TxResult::APPLIED)
    }

    fn tx_mixin(&mut self, tx: &TxMixin) -> Result<TxResult> {
        let doc = self.doc_mut(&tx.header.object_id)?;
        let mut updated = doc.clone();
        apply_mixin(&mut updated, &tx.mixin, &tx.attributes)?;
        touch(&mut updated, &tx.header);
        *doc = updated;
        Ok(TxResult::APPLIED)
    }

    fn tx_put_bag(&mut self, tx: &TxPutBag) -> Result<TxResult> {
        let doc = self.doc_mut(&tx.header.object_id)?;
        put_bag(doc, &tx.bag, &tx.key, tx.value.clone())?;
        touch(doc, &tx.header);
        Ok(TxResult::APPLIED)
    }

    fn tx_collection_cud(&mut self, tx: &TxCollectionCud) -> Result<TxResult> {
        let inner = attach_inner(tx);
        let before = self.db.get(inner.object_id()).cloned();
        if matches!(inner, Tx::CreateDoc(_)) {
            let parent = self.db.get(&tx.header.object_id).ok_or_else(|| {
                DocError::InvalidAttachment(format!("parent {} not found", tx.header.object_id))
            })?;
            validate_attachment(self.hierarchy, parent, tx)?;
        }
        let counters = counter_updates(self.hierarchy, tx, before.as_ref())?;

        let mut ids = vec![tx.header.object_id.clone(), inner.object_id().clone()];
        ids.extend(counters.iter().map(|update| update.object_id().clone()));
        let saved = self.db.snapshot(&ids);
        let result = match self.tx(&inner) {
            Ok(result) => self.bump_counters(counters).map(|_| result),
            Err(err) => Err(err),
        };
        if result.is_err() {
            self.db.restore(saved);
        }
        result
    }

    fn tx_apply_if(&mut self, tx: &TxApplyIf) -> Result<TxResult> {
        for condition in &tx.matches {
            if !self.db.any_match(self.hierarchy, condition)? {
                return Ok(TxResult::NOT_APPLIED);
            }
        }
        for condition in &tx.not_matches {
            if self.db.any_match(self.hierarchy, condition)? {
                return Ok(TxResult::NOT_APPLIED);
            }
        }

        let affected: Vec<Ref<Doc>> = tx.txes.iter().flat_map(Tx::affected_ids).collect();
        let saved = self.db.snapshot(&affected);
        for inner in &tx.txes {
            match self.tx(inner) {
                Ok(result) if result.applied => {}
                // a nested guard that fails fails the whole unit
                Ok(result) => {
                    self.db.restore(saved);
                    return Ok(result);
                }
                Err(err) => {
                    self.db.restore(saved);
                    return Err(err);
                }
            }
        }
        Ok(TxResult::APPLIED)
    }
}

/// Hierarchy plus the model documents it was built from
#[derive(Debug, Clone, Default)]
pub struct ModelDb {
    hierarchy: Hierarchy,
    db: MemDb,
}

impl ModelDb {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model by applying transactions in order
    pub fn from_txes<'t, I>(txes: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'t Tx>,
    {
        let mut model = ModelDb::new();
        for tx in txes {
            model.tx(tx)?;
        }
        Ok(model)
    }

    /// Class hierarchy
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Model documents
    pub fn db(&self) -> &MemDb {
        &self.db
    }

    /// Apply a model transaction: documents first, then the hierarchy
    pub fn tx(&mut self, tx: &Tx) -> Result<TxResult> {
        let result = Applier::new(&mut self.db, &self.hierarchy).tx(tx)?;
        if result.applied {
            self.hierarchy.tx(tx)?;
        }
        Ok(result)
    }

    /// Find model documents
    pub fn find_all(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<FindResult> {
        self.db.find_all(&self.hierarchy, class, query, options)
    }

    /// Model document by id
    pub fn get(&self, id: &Ref<Doc>) -> Option<&Doc> {
        self.db.get(id)
    }

    /// Read view of `doc` as `mixin`
    pub fn as_mixin(&self, doc: &Doc, mixin: &Ref<Class>) -> Result<Doc> {
        self.hierarchy.as_mixin(doc, mixin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{core_model, Builder};
    use crate::classes::{CLASS_ATTACHED_DOC, CLASS_DOC};
    use crate::doc::Attributes;
    use crate::operations::TxFactory;
    use crate::schema::AttributeType;
    use crate::types::{Account, Domain};
    use serde_json::{json, Value};

    const TASK: Ref<Class> = Ref::from_static("test:class:Task");
    const COMMENT: Ref<Class> = Ref::from_static("test:class:Comment");
    const ESTIMATE: Ref<Class> = Ref::from_static("test:mixin:Estimate");
    const ALICE: Ref<Account> = Ref::from_static("alice");

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    fn model() -> ModelDb {
        let mut b = Builder::new();
        core_model(&mut b);
        b.create_class(TASK, CLASS_DOC, Some(Domain::new("task")))
            .attribute("title", AttributeType::String)
            .attribute("comments", AttributeType::Collection { of: COMMENT });
        b.create_class(COMMENT, CLASS_ATTACHED_DOC, Some(Domain::new("chunter")));
        b.create_mixin(ESTIMATE, TASK);
        ModelDb::from_txes(b.txes()).unwrap()
    }

    fn factory() -> TxFactory {
        TxFactory::new(ALICE)
    }

    #[test]
    fn test_model_db_tracks_classes() {
        let m = model();
        assert!(m.hierarchy().contains(&TASK));
        let classes = m
            .find_all(&crate::classes::CLASS_CLASS, &attrs(json!({"_id": "test:class:Task"})), &FindOptions::default())
            .unwrap();
        assert_eq!(classes.len(), 1);
    }

    #[test]
    fn test_create_duplicate_fails() {
        let m = model();
        let mut db = MemDb::new();
        let tx = factory().create_tx_create_doc(TASK, Ref::new("sp"), attrs(json!({"title": "a"})), None);
        db.apply(m.hierarchy(), &tx).unwrap();
        assert!(matches!(db.apply(m.hierarchy(), &tx), Err(DocError::DocumentExists(_))));
    }

    #[test]
    fn test_update_missing_and_remove_missing() {
        let m = model();
        let mut db = MemDb::new();
        let f = factory();
        let update = f.create_tx_update_doc(TASK, Ref::new("sp"), Ref::new("nope"), attrs(json!({"title": "x"})));
        assert!(matches!(db.apply(m.hierarchy(), &update), Err(DocError::DocumentNotFound(_))));
        let remove = f.create_tx_remove_doc(TASK, Ref::new("sp"), Ref::new("nope"));
        assert_eq!(db.apply(m.hierarchy(), &remove).unwrap(), TxResult::APPLIED);
    }

    #[test]
    fn test_find_all_includes_descendants_and_mixins() {
        let m = model();
        let mut db = MemDb::new();
        let f = factory();
        let create = f.create_tx_create_doc(TASK, Ref::new("sp"), attrs(json!({"title": "a"})), None);
        let id = create.object_id().clone();
        db.apply(m.hierarchy(), &create).unwrap();
        db.apply(
            m.hierarchy(),
            &f.create_tx_create_doc(TASK, Ref::new("sp"), attrs(json!({"title": "b"})), None),
        )
        .unwrap();

        let all = db.find_all(m.hierarchy(), &CLASS_DOC, &Query::new(), &FindOptions::default()).unwrap();
        assert_eq!(all.len(), 2);

        db.apply(
            m.hierarchy(),
            &f.create_tx_mixin(id.clone(), TASK, Ref::new("sp"), ESTIMATE, attrs(json!({"points": 3}))),
        )
        .unwrap();
        let estimated = db.find_all(m.hierarchy(), &ESTIMATE, &Query::new(), &FindOptions::default()).unwrap();
        assert_eq!(estimated.len(), 1);
        assert_eq!(estimated.docs[0].id, id);
        let by_mixin_field = db
            .find_all(m.hierarchy(), &TASK, &attrs(json!({"test:mixin:Estimate.points": 3})), &FindOptions::default())
            .unwrap();
        assert_eq!(by_mixin_field.len(), 1);
    }

    #[test]
    fn test_collection_counter() {
        let m = model();
        let mut db = MemDb::new();
        let f = factory();
        let create = f.create_tx_create_doc(TASK, Ref::new("sp"), attrs(json!({"title": "a"})), None);
        let task = create.object_id().clone();
        db.apply(m.hierarchy(), &create).unwrap();

        let comment = f.create_tx_create_doc(COMMENT, Ref::new("sp"), attrs(json!({"text": "hi"})), None);
        let comment_id = comment.object_id().clone();
        db.apply(m.hierarchy(), &f.create_tx_collection_cud(TASK, task.clone(), Ref::new("sp"), "comments", comment))
            .unwrap();
        assert_eq!(db.get(&task).unwrap().get("comments"), Some(&json!(1)));
        assert_eq!(db.get(&comment_id).unwrap().attached_to(), Some(task.clone()));

        let remove = f.create_tx_remove_doc(COMMENT, Ref::new("sp"), comment_id.clone());
        let cud = f.create_tx_collection_cud(TASK, task.clone(), Ref::new("sp"), "comments", remove);
        db.apply(m.hierarchy(), &cud).unwrap();
        db.apply(m.hierarchy(), &cud).unwrap();
        assert_eq!(db.get(&task).unwrap().get("comments"), Some(&json!(0)));
    }

    #[test]
    fn test_moved_attachment_updates_both_counters() {
        let m = model();
        let mut db = MemDb::new();
        let f = factory();
        for id in ["p1", "p2"] {
            db.apply(m.hierarchy(), &f.create_tx_create_doc(TASK, Ref::new("sp"), attrs(json!({})), Some(Ref::new(id))))
                .unwrap();
        }
        let comment = f.create_tx_create_doc(COMMENT, Ref::new("sp"), attrs(json!({})), Some(Ref::new("c1")));
        db.apply(m.hierarchy(), &f.create_tx_collection_cud(TASK, Ref::new("p1"), Ref::new("sp"), "comments", comment))
            .unwrap();

        let update = f.create_tx_update_doc(COMMENT, Ref::new("sp"), Ref::new("c1"), attrs(json!({"attachedTo": "p2"})));
        let moved = f.create_tx_collection_cud(TASK, Ref::new("p1"), Ref::new("sp"), "comments", update);
        assert_eq!(moved.affected_ids().len(), 3);
        db.apply(m.hierarchy(), &moved).unwrap();

        assert_eq!(db.get(&Ref::new("p1")).unwrap().get("comments"), Some(&json!(0)));
        assert_eq!(db.get(&Ref::new("p2")).unwrap().get("comments"), Some(&json!(1)));
        assert_eq!(db.get(&Ref::new("c1")).unwrap().attached_to(), Some(Ref::new("p2")));
    }

    #[test]
    fn test_attachment_to_wrong_collection_fails() {
        let m = model();
        let mut db = MemDb::new();
        let f = factory();
        let create = f.create_tx_create_doc(TASK, Ref::new("sp"), attrs(json!({})), None);
        let task = create.object_id().clone();
        db.apply(m.hierarchy(), &create).unwrap();

        let comment = f.create_tx_create_doc(COMMENT, Ref::new("sp"), attrs(json!({})), None);
        let cud = f.create_tx_collection_cud(TASK, task, Ref::new("sp"), "title", comment);
        assert!(matches!(db.apply(m.hierarchy(), &cud), Err(DocError::InvalidAttachment(_))));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_failed_apply_if_leaves_state_unchanged() {
        let m = model();
        let mut db = MemDb::new();
        let f = factory();
        let create = f.create_tx_create_doc(TASK, Ref::new("sp"), attrs(json!({"title": "a"})), None);
        let task = create.object_id().clone();
        db.apply(m.hierarchy(), &create).unwrap();
        let before = db.get(&task).cloned();

        let guarded = f.create_tx_apply_if(
            "titles",
            vec![MatchCondition { class: TASK, query: attrs(json!({"title": "zzz"})) }],
            vec![],
            vec![f.create_tx_update_doc(TASK, Ref::new("sp"), task.clone(), attrs(json!({"title": "b"})))],
        );
        assert_eq!(db.apply(m.hierarchy(), &guarded).unwrap(), TxResult::NOT_APPLIED);
        assert_eq!(db.get(&task).cloned(), before);
    }

    #[test]
    fn test_nested_guard_fails_the_outer_unit() {
        let m = model();
        let mut db = MemDb::new();
        let f = factory();
        let create = f.create_tx_create_doc(TASK, Ref::new("sp"), attrs(json!({"title": "a"})), None);
        let task = create.object_id().clone();
        db.apply(m.hierarchy(), &create).unwrap();

        let nested = f.create_tx_apply_if(
            "inner",
            vec![MatchCondition { class: TASK, query: attrs(json!({"title": "zzz"})) }],
            vec![],
            vec![],
        );
        let outer = f.create_tx_apply_if(
            "outer",
            vec![],
            vec![],
            vec![
                f.create_tx_update_doc(TASK, Ref::new("sp"), task.clone(), attrs(json!({"title": "b"}))),
                nested,
            ],
        );
        assert_eq!(db.apply(m.hierarchy(), &outer).unwrap(), TxResult::NOT_APPLIED);
        assert_eq!(db.get(&task).unwrap().get_str("title"), Some("a"));
    }

    #[test]
    fn test_apply_if_rolls_back_on_inner_failure() {
        let m = model();
        let mut db = MemDb::new();
        let f = factory();
        let create = f.create_tx_create_doc(TASK, Ref::new("sp"), attrs(json!({"title": "a"})), None);
        let task = create.object_id().clone();
        db.apply(m.hierarchy(), &create).unwrap();

        let guarded = f.create_tx_apply_if(
            "titles",
            vec![],
            vec![MatchCondition { class: TASK, query: attrs(json!({"title": "b"})) }],
            vec![
                f.create_tx_update_doc(TASK, Ref::new("sp"), task.clone(), attrs(json!({"title": "b"}))),
                f.create_tx_update_doc(TASK, Ref::new("sp"), Ref::new("missing"), attrs(json!({"title": "c"}))),
            ],
        );
        assert!(db.apply(m.hierarchy(), &guarded).is_err());
        assert_eq!(db.get(&task).unwrap().get("title"), Some(&json!("a")));
    }
}

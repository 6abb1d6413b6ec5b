//! Full-text search
//!
//! [`FullTextAdapter`] is the contract of an external search engine.
//! [`FullTextIndex`] translates committed transactions into adapter calls:
//! it extracts the text attributes of every touched document and keeps the
//! index in step with the domain stores.
//!
//! Attached documents are indexed with their parent, so a search matching a
//! comment also ranks the issue it belongs to.

pub mod memory;
pub mod tokenizer;

pub use memory::InMemoryFullTextAdapter;

use doctx_core::classes::SPACE_MODEL;
use doctx_core::{AttributeType, Class, Doc, Hierarchy, Ref, Result, Space, Tx};
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

/// Text extracted from one document
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDoc {
    /// Document id
    pub id: Ref<Doc>,
    /// Document class
    pub class: Ref<Class>,
    /// Document space
    pub space: Ref<Space>,
    /// Parent for attached documents
    pub attached_to: Option<Ref<Doc>>,
    /// Concatenated text attributes
    pub content: String,
}

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Matching document
    pub id: Ref<Doc>,
    /// Its class
    pub class: Ref<Class>,
    /// Its space, for access filtering by the caller
    pub space: Ref<Space>,
    /// Relevance, higher is better
    pub score: f32,
}

/// External full-text engine
pub trait FullTextAdapter: Send + Sync {
    /// Add or replace a document
    fn index(&self, doc: IndexedDoc) -> Result<()>;

    /// Replace the content of an indexed document
    fn update(&self, doc: IndexedDoc) -> Result<()>;

    /// Drop documents from the index
    fn remove(&self, ids: &[Ref<Doc>]) -> Result<()>;

    /// Best matches for `query`, at most `limit`
    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

/// Keeps a [`FullTextAdapter`] in step with committed transactions
#[derive(Clone)]
pub struct FullTextIndex {
    adapter: Arc<dyn FullTextAdapter>,
}

impl std::fmt::Debug for FullTextIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullTextIndex").finish_non_exhaustive()
    }
}

impl FullTextIndex {
    /// Translator over `adapter`
    pub fn new(adapter: Arc<dyn FullTextAdapter>) -> Self {
        FullTextIndex { adapter }
    }

    /// Underlying adapter
    pub fn adapter(&self) -> &Arc<dyn FullTextAdapter> {
        &self.adapter
    }

    /// Search the index
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.adapter.search(query, limit)
    }

    /// Reflect an applied transaction
    ///
    /// `load` returns the current state of a document (by class and id)
    /// after the transaction.
    pub fn on_tx<F>(&self, hierarchy: &Hierarchy, tx: &Tx, mut load: F) -> Result<()>
    where
        F: FnMut(&Ref<Class>, &Ref<Doc>) -> Result<Option<Doc>>,
    {
        for inner in tx.extract() {
            if *inner.object_space() == SPACE_MODEL {
                continue;
            }
            match inner {
                Tx::CollectionCud(_) | Tx::ApplyIf(_) => {}
                Tx::RemoveDoc(remove) => {
                    self.adapter.remove(std::slice::from_ref(&remove.header.object_id))?;
                }
                Tx::CreateDoc(_) => {
                    if let Some(doc) = load(inner.object_class(), inner.object_id())? {
                        self.adapter.index(extract(hierarchy, &doc)?)?;
                    }
                }
                Tx::UpdateDoc(_) | Tx::Mixin(_) | Tx::PutBag(_) => {
                    if let Some(doc) = load(inner.object_class(), inner.object_id())? {
                        self.adapter.update(extract(hierarchy, &doc)?)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn push_text(content: &mut String, value: &Value) {
    match value {
        Value::String(s) if !s.is_empty() => {
            if !content.is_empty() {
                content.push(' ');
            }
            content.push_str(s);
        }
        Value::Array(items) => items.iter().for_each(|v| push_text(content, v)),
        _ => {}
    }
}

/// Text of `doc`: values of its `String` and `Markup` attributes, then the
/// string fields of its mixins
pub fn extract(hierarchy: &Hierarchy, doc: &Doc) -> Result<IndexedDoc> {
    let mut content = String::new();
    for (name, attr) in hierarchy.get_all_attributes(&doc.class)? {
        if matches!(attr.attr_type, AttributeType::String | AttributeType::Markup) {
            if let Some(value) = doc.get(&name) {
                push_text(&mut content, value);
            }
        }
    }
    for bag in doc.mixins.values() {
        for value in bag.values() {
            push_text(&mut content, value);
        }
    }
    trace!(target: "doctx::storage", id = %doc.id, len = content.len(), "extracted text");
    Ok(IndexedDoc {
        id: doc.id.clone(),
        class: doc.class.clone(),
        space: doc.space.clone(),
        attached_to: doc.attached_to(),
        content,
    })
}

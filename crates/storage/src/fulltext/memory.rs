//! In-memory inverted index
//!
//! Posting lists map a term to the documents containing it with their term
//! frequency. Scores are the sum of `tf / doc_len` over the query terms; an
//! attached document passes half of its score to its parent.

use super::tokenizer::{tokenize_markup, tokenize_unique};
use super::{FullTextAdapter, IndexedDoc, SearchHit};
use dashmap::DashMap;
use doctx_core::{Doc, DocError, Ref, Result};
use rustc_hash::FxHashMap;

const PARENT_SHARE: f32 = 0.5;

#[derive(Debug)]
struct Entry {
    doc: IndexedDoc,
    terms: FxHashMap<String, u32>,
    len: u32,
}

/// Inverted index kept in memory
#[derive(Debug, Default)]
pub struct InMemoryFullTextAdapter {
    docs: DashMap<Ref<Doc>, Entry>,
    postings: DashMap<String, FxHashMap<Ref<Doc>, u32>>,
}

impl InMemoryFullTextAdapter {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// True if nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn unlink(&self, id: &Ref<Doc>) {
        if let Some((_, entry)) = self.docs.remove(id) {
            for term in entry.terms.keys() {
                let empty = match self.postings.get_mut(term) {
                    Some(mut list) => {
                        list.remove(id);
                        list.is_empty()
                    }
                    None => false,
                };
                if empty {
                    self.postings.remove_if(term, |_, list| list.is_empty());
                }
            }
        }
    }

    fn link(&self, doc: IndexedDoc) {
        let tokens = tokenize_markup(&doc.content);
        let mut terms: FxHashMap<String, u32> = FxHashMap::default();
        for token in &tokens {
            *terms.entry(token.clone()).or_insert(0) += 1;
        }
        for (term, tf) in &terms {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(doc.id.clone(), *tf);
        }
        self.docs.insert(
            doc.id.clone(),
            Entry {
                doc,
                terms,
                len: tokens.len().max(1) as u32,
            },
        );
    }
}

impl FullTextAdapter for InMemoryFullTextAdapter {
    fn index(&self, doc: IndexedDoc) -> Result<()> {
        self.unlink(&doc.id);
        self.link(doc);
        Ok(())
    }

    fn update(&self, doc: IndexedDoc) -> Result<()> {
        if !self.docs.contains_key(&doc.id) {
            return Err(DocError::DocumentNotFound(doc.id.to_string()));
        }
        self.index(doc)
    }

    fn remove(&self, ids: &[Ref<Doc>]) -> Result<()> {
        for id in ids {
            self.unlink(id);
        }
        Ok(())
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let mut scores: FxHashMap<Ref<Doc>, f32> = FxHashMap::default();
        for term in tokenize_unique(query) {
            let Some(list) = self.postings.get(&term) else {
                continue;
            };
            for (id, tf) in list.iter() {
                if let Some(entry) = self.docs.get(id) {
                    *scores.entry(id.clone()).or_insert(0.0) += *tf as f32 / entry.len as f32;
                }
            }
        }

        let direct: Vec<(Ref<Doc>, f32)> = scores.iter().map(|(id, s)| (id.clone(), *s)).collect();
        for (id, score) in direct {
            let parent = self.docs.get(&id).and_then(|e| e.doc.attached_to.clone());
            if let Some(parent) = parent {
                if self.docs.contains_key(&parent) {
                    *scores.entry(parent).or_insert(0.0) += score * PARENT_SHARE;
                }
            }
        }

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .filter_map(|(id, score)| {
                self.docs.get(&id).map(|entry| SearchHit {
                    id,
                    class: entry.doc.class.clone(),
                    space: entry.doc.space.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }
}

//! Class hierarchy
//!
//! Tracks classifier and attribute documents from model transactions and keeps
//! precomputed closure tables, so `is_derived`, `get_domain` and attribute
//! lookups never walk `extends` chains at query time.
//!
//! The tables are rebuilt whenever a classifier changes. Model changes are rare
//! and the graph is small; instance transactions are no-ops here.

use crate::classes::CLASS_ATTRIBUTE;
use crate::doc::{Attributes, Doc};
use crate::error::{DocError, Result};
use crate::processor::{apply_mixin, create_doc_to_doc, update_doc};
use crate::schema::{AttributeDef, ClassDef, ClassifierKind};
use crate::tx::Tx;
use crate::types::{Class, Domain, Ref};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct Classifier {
    doc: Doc,
    def: ClassDef,
}

/// Class hierarchy with ancestor/descendant closure tables
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    classifiers: FxHashMap<Ref<Class>, Classifier>,
    /// attribute doc id -> definition
    attribute_docs: FxHashMap<Ref<Doc>, (Doc, AttributeDef)>,
    /// class -> declared attributes by name
    attributes: FxHashMap<Ref<Class>, BTreeMap<String, AttributeDef>>,
    /// class -> `extends` chain, self first
    chains: FxHashMap<Ref<Class>, Vec<Ref<Class>>>,
    /// class -> every ancestor including implemented interfaces and self
    ancestors: FxHashMap<Ref<Class>, FxHashSet<Ref<Class>>>,
    /// class -> every descendant including self
    descendants: FxHashMap<Ref<Class>, Vec<Ref<Class>>>,
}

impl Hierarchy {
    /// Create an empty hierarchy
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a transaction; only classifier and attribute documents matter
    pub fn tx(&mut self, tx: &Tx) -> Result<()> {
        match tx {
            Tx::CreateDoc(create) => {
                let class = &create.header.object_class;
                if ClassifierKind::from_model_class(class).is_some() {
                    let doc = create_doc_to_doc(create);
                    let def = ClassDef::from_doc(&doc)?;
                    debug!(target: "doctx::tx", class = %doc.id, kind = ?def.kind, "classifier created");
                    self.classifiers
                        .insert(doc.id.cast(), Classifier { doc, def });
                    self.rebuild();
                } else if *class == CLASS_ATTRIBUTE {
                    let doc = create_doc_to_doc(create);
                    self.add_attribute(doc)?;
                }
            }
            Tx::UpdateDoc(update) => {
                let id = &update.header.object_id;
                if let Some(classifier) = self.classifiers.get_mut(id.as_str()) {
                    update_doc(&mut classifier.doc, &update.operations)?;
                    classifier.def = ClassDef::from_doc(&classifier.doc)?;
                    self.rebuild();
                } else if let Some((mut doc, _)) = self.attribute_docs.remove(id) {
                    update_doc(&mut doc, &update.operations)?;
                    self.remove_attribute_entry(id);
                    self.add_attribute(doc)?;
                }
            }
            Tx::RemoveDoc(remove) => {
                let id = &remove.header.object_id;
                if self.classifiers.remove(id.as_str()).is_some() {
                    self.attributes.remove(id.as_str());
                    self.rebuild();
                } else if self.attribute_docs.remove(id).is_some() {
                    self.remove_attribute_entry(id);
                }
            }
            Tx::Mixin(mixin) => {
                if let Some(classifier) = self
                    .classifiers
                    .get_mut(mixin.header.object_id.as_str())
                {
                    apply_mixin(&mut classifier.doc, &mixin.mixin, &mixin.attributes)?;
                }
            }
            Tx::ApplyIf(apply) => {
                for inner in &apply.txes {
                    self.tx(inner)?;
                }
            }
            Tx::CollectionCud(_) | Tx::PutBag(_) => {}
        }
        Ok(())
    }

    fn add_attribute(&mut self, doc: Doc) -> Result<()> {
        let def = AttributeDef::from_doc(&doc)?;
        self.attributes
            .entry(def.attribute_of.clone())
            .or_default()
            .insert(def.name.clone(), def.clone());
        self.attribute_docs.insert(doc.id.clone(), (doc, def));
        Ok(())
    }

    // Drops the registry entry whose doc id is `id`; the doc map entry is
    // already gone.
    fn remove_attribute_entry(&mut self, id: &Ref<Doc>) {
        for attrs in self.attributes.values_mut() {
            attrs.retain(|_, def| def.doc_id() != *id);
        }
    }

    fn rebuild(&mut self) {
        self.chains.clear();
        self.ancestors.clear();
        self.descendants.clear();

        for id in self.classifiers.keys() {
            let mut chain = vec![id.clone()];
            let mut seen: FxHashSet<Ref<Class>> = FxHashSet::default();
            seen.insert(id.clone());
            let mut current = id.clone();
            while let Some(parent) = self
                .classifiers
                .get(&current)
                .and_then(|c| c.def.extends.clone())
            {
                if !seen.insert(parent.clone()) {
                    warn!(target: "doctx::tx", class = %id, "cycle in class hierarchy");
                    break;
                }
                chain.push(parent.clone());
                current = parent;
            }

            let mut all: FxHashSet<Ref<Class>> = chain.iter().cloned().collect();
            let mut pending: Vec<Ref<Class>> = chain
                .iter()
                .filter_map(|c| self.classifiers.get(c))
                .flat_map(|c| c.def.implements.iter().cloned())
                .collect();
            while let Some(interface) = pending.pop() {
                if all.insert(interface.clone()) {
                    if let Some(c) = self.classifiers.get(&interface) {
                        pending.extend(c.def.extends.iter().cloned());
                        pending.extend(c.def.implements.iter().cloned());
                    }
                }
            }

            self.chains.insert(id.clone(), chain);
            self.ancestors.insert(id.clone(), all);
        }

        for (id, ancestors) in &self.ancestors {
            for ancestor in ancestors {
                self.descendants
                    .entry(ancestor.clone())
                    .or_default()
                    .push(id.clone());
            }
        }
        for list in self.descendants.values_mut() {
            list.sort();
        }
    }

    fn classifier(&self, class: &Ref<Class>) -> Result<&Classifier> {
        self.classifiers
            .get(class)
            .ok_or_else(|| DocError::ClassNotFound(class.to_string()))
    }

    /// True if `class` is registered
    pub fn contains(&self, class: &Ref<Class>) -> bool {
        self.classifiers.contains_key(class)
    }

    /// Classifier definition
    pub fn get_class(&self, class: &Ref<Class>) -> Result<&ClassDef> {
        Ok(&self.classifier(class)?.def)
    }

    /// Classifier document (with class-level mixins)
    pub fn get_class_doc(&self, class: &Ref<Class>) -> Result<&Doc> {
        Ok(&self.classifier(class)?.doc)
    }

    /// Every registered classifier id
    pub fn classes(&self) -> impl Iterator<Item = &Ref<Class>> {
        self.classifiers.keys()
    }

    /// True iff `ancestor` equals `class` or is one of its ancestors
    /// (implemented interfaces included)
    pub fn is_derived(&self, class: &Ref<Class>, ancestor: &Ref<Class>) -> Result<bool> {
        self.ancestors
            .get(class)
            .map(|set| set.contains(ancestor))
            .ok_or_else(|| DocError::ClassNotFound(class.to_string()))
    }

    /// `extends` chain starting at `class` itself
    pub fn get_ancestors(&self, class: &Ref<Class>) -> Result<&[Ref<Class>]> {
        self.chains
            .get(class)
            .map(Vec::as_slice)
            .ok_or_else(|| DocError::ClassNotFound(class.to_string()))
    }

    /// Every class deriving from `class`, itself included
    pub fn get_descendants(&self, class: &Ref<Class>) -> Result<&[Ref<Class>]> {
        self.classifier(class)?;
        Ok(self
            .descendants
            .get(class)
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    /// Storage domain: declared by the nearest ancestor
    pub fn get_domain(&self, class: &Ref<Class>) -> Result<Domain> {
        for ancestor in self.get_ancestors(class)? {
            if let Some(domain) = self
                .classifiers
                .get(ancestor)
                .and_then(|c| c.def.domain.clone())
            {
                return Ok(domain);
            }
        }
        Err(DocError::DomainNotFound(class.to_string()))
    }

    /// True if `class` is a mixin
    pub fn is_mixin(&self, class: &Ref<Class>) -> Result<bool> {
        Ok(self.classifier(class)?.def.kind == ClassifierKind::Mixin)
    }

    /// True if `class` implements `interface`
    pub fn is_implements(&self, class: &Ref<Class>, interface: &Ref<Class>) -> Result<bool> {
        if self.classifier(interface)?.def.kind != ClassifierKind::Interface {
            return Ok(false);
        }
        self.is_derived(class, interface)
    }

    /// First non-mixin class of the chain (the class itself if not a mixin)
    pub fn get_base_class(&self, class: &Ref<Class>) -> Result<Ref<Class>> {
        for ancestor in self.get_ancestors(class)? {
            if !self.is_mixin(ancestor)? {
                return Ok(ancestor.clone());
            }
        }
        Err(DocError::ClassNotFound(format!("base class of {class}")))
    }

    /// Attributes declared on `class` and its ancestors; nearer declarations win
    pub fn get_all_attributes(&self, class: &Ref<Class>) -> Result<BTreeMap<String, AttributeDef>> {
        let mut merged = BTreeMap::new();
        for ancestor in self.get_ancestors(class)?.iter().rev() {
            if let Some(attrs) = self.attributes.get(ancestor) {
                merged.extend(attrs.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        Ok(merged)
    }

    /// Nearest declaration of `name` along the chain of `class`
    pub fn find_attribute(&self, class: &Ref<Class>, name: &str) -> Result<Option<&AttributeDef>> {
        for ancestor in self.get_ancestors(class)? {
            if let Some(attr) = self.attributes.get(ancestor).and_then(|a| a.get(name)) {
                return Ok(Some(attr));
            }
        }
        Ok(None)
    }

    /// Like `find_attribute`, failing with `AttributeNotFound`
    pub fn get_attribute(&self, class: &Ref<Class>, name: &str) -> Result<&AttributeDef> {
        self.find_attribute(class, name)?
            .ok_or_else(|| DocError::AttributeNotFound {
                class: class.to_string(),
                attribute: name.to_string(),
            })
    }

    /// True if the document carries a bag for `mixin`
    pub fn has_mixin(&self, doc: &Doc, mixin: &Ref<Class>) -> bool {
        doc.mixins.contains_key(mixin)
    }

    /// Read view of `doc` as `mixin`: the bags of `mixin` and of every mixin
    /// it extends are merged over the base attributes, nearest last.
    pub fn as_mixin(&self, doc: &Doc, mixin: &Ref<Class>) -> Result<Doc> {
        let mut view = doc.clone();
        for ancestor in self.get_ancestors(mixin)?.iter().rev() {
            if let Some(bag) = doc.mixins.get(ancestor) {
                for (key, value) in bag {
                    view.attributes.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(view)
    }

    /// Class-level mixin bag found on `class` or its nearest ancestor
    pub fn class_hierarchy_mixin(
        &self,
        class: &Ref<Class>,
        mixin: &Ref<Class>,
    ) -> Result<Option<&Attributes>> {
        for ancestor in self.get_ancestors(class)? {
            if let Some(bag) = self
                .classifiers
                .get(ancestor)
                .and_then(|c| c.doc.mixins.get(mixin))
            {
                return Ok(Some(bag));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{core_model, Builder};
    use crate::classes::{CLASS_ATTACHED_DOC, CLASS_DOC, DOMAIN_MODEL};
    use crate::schema::AttributeType;
    use serde_json::json;

    const ISSUE: Ref<Class> = Ref::from_static("tracker:class:Issue");
    const BUG: Ref<Class> = Ref::from_static("tracker:class:Bug");
    const COMMENT: Ref<Class> = Ref::from_static("chunter:class:Comment");
    const ESTIMATED: Ref<Class> = Ref::from_static("tracker:mixin:Estimated");
    const TRACKED: Ref<Class> = Ref::from_static("tracker:mixin:Tracked");
    const ASSIGNABLE: Ref<Class> = Ref::from_static("tracker:interface:Assignable");

    fn attrs(value: serde_json::Value) -> Attributes {
        value.as_object().cloned().unwrap_or_default()
    }

    fn hierarchy() -> Hierarchy {
        let mut b = Builder::new();
        core_model(&mut b);
        b.create_interface(ASSIGNABLE, vec![])
            .attribute("assignee", AttributeType::String);
        b.create_class(ISSUE, CLASS_DOC, Some(Domain::new("task")))
            .implements(vec![ASSIGNABLE])
            .attribute("title", AttributeType::String)
            .attribute("comments", AttributeType::Collection { of: COMMENT });
        b.create_class(BUG, ISSUE, None)
            .attribute("title", AttributeType::Markup);
        b.create_class(COMMENT, CLASS_ATTACHED_DOC, Some(Domain::new("chunter")));
        b.create_mixin(ESTIMATED, ISSUE)
            .attribute("estimation", AttributeType::Number);
        b.create_mixin(TRACKED, CLASS_DOC);
        b.mixin(
            ISSUE.cast(),
            crate::classes::CLASS_CLASS,
            TRACKED,
            attrs(json!({"level": 1})),
        );

        let mut h = Hierarchy::new();
        for tx in b.txes() {
            h.tx(tx).unwrap();
        }
        h
    }

    #[test]
    fn test_is_derived_closure() {
        let h = hierarchy();
        assert!(h.is_derived(&BUG, &BUG).unwrap());
        assert!(h.is_derived(&BUG, &ISSUE).unwrap());
        assert!(h.is_derived(&BUG, &CLASS_DOC).unwrap());
        assert!(!h.is_derived(&ISSUE, &BUG).unwrap());
        assert!(h.is_derived(&BUG, &ASSIGNABLE).unwrap());
        assert!(h.is_implements(&BUG, &ASSIGNABLE).unwrap());
        assert!(!h.is_implements(&BUG, &ISSUE).unwrap());
    }

    #[test]
    fn test_unknown_class_fails_loud() {
        let h = hierarchy();
        let unknown = Ref::new("nope:class:Missing");
        assert!(matches!(h.is_derived(&unknown, &CLASS_DOC), Err(DocError::ClassNotFound(_))));
        assert!(matches!(h.get_domain(&unknown), Err(DocError::ClassNotFound(_))));
    }

    #[test]
    fn test_domains() {
        let h = hierarchy();
        assert_eq!(h.get_domain(&BUG).unwrap(), Domain::new("task"));
        // mixins inherit the base class domain
        assert_eq!(h.get_domain(&ESTIMATED).unwrap(), Domain::new("task"));
        assert_eq!(h.get_domain(&crate::classes::CLASS_CLASS).unwrap(), DOMAIN_MODEL);
        assert!(matches!(h.get_domain(&TRACKED), Err(DocError::DomainNotFound(_))));
    }

    #[test]
    fn test_descendants_and_base_class() {
        let h = hierarchy();
        let desc = h.get_descendants(&ISSUE).unwrap();
        assert!(desc.contains(&ISSUE));
        assert!(desc.contains(&BUG));
        assert!(desc.contains(&ESTIMATED));
        assert!(h.is_mixin(&ESTIMATED).unwrap());
        assert_eq!(h.get_base_class(&ESTIMATED).unwrap(), ISSUE);
        assert_eq!(h.get_base_class(&BUG).unwrap(), BUG);
    }

    #[test]
    fn test_attribute_inheritance() {
        let h = hierarchy();
        let attrs = h.get_all_attributes(&BUG).unwrap();
        assert_eq!(attrs["title"].attr_type, AttributeType::Markup);
        assert!(attrs["comments"].attr_type.is_collection());
        assert!(!attrs.contains_key("estimation"));
        assert!(h.find_attribute(&BUG, "comments").unwrap().is_some());
        assert!(matches!(
            h.get_attribute(&BUG, "nope"),
            Err(DocError::AttributeNotFound { .. })
        ));
    }

    #[test]
    fn test_attribute_removal() {
        let mut h = hierarchy();
        let mut b = Builder::new();
        let attr = AttributeDef::new(BUG, "title", AttributeType::Markup);
        b.remove_doc(crate::classes::CLASS_ATTRIBUTE, attr.doc_id());
        for tx in b.txes() {
            h.tx(tx).unwrap();
        }
        assert_eq!(
            h.get_attribute(&BUG, "title").unwrap().attr_type,
            AttributeType::String
        );
    }

    #[test]
    fn test_mixin_view() {
        let h = hierarchy();
        let mut doc = Doc::new(Ref::new("i1"), ISSUE, Ref::new("sp")).with("title", json!("t"));
        assert!(!h.has_mixin(&doc, &ESTIMATED));
        let mut bag = Attributes::new();
        bag.insert("estimation".to_string(), json!(5));
        doc.mixins.insert(ESTIMATED, bag);

        let view = h.as_mixin(&doc, &ESTIMATED).unwrap();
        assert!(h.has_mixin(&doc, &ESTIMATED));
        assert_eq!(view.get("estimation"), Some(&json!(5)));
        assert_eq!(view.get("title"), Some(&json!("t")));
        assert_eq!(view.class, ISSUE);
    }

    #[test]
    fn test_class_hierarchy_mixin() {
        let h = hierarchy();
        let bag = h.class_hierarchy_mixin(&BUG, &TRACKED).unwrap().unwrap();
        assert_eq!(bag["level"], json!(1));
        assert!(h.class_hierarchy_mixin(&COMMENT, &TRACKED).unwrap().is_none());
    }
}

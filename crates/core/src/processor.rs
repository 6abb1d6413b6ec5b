//! Transaction application
//!
//! [`TxProcessor`] dispatches a [`Tx`] to one handler per kind. The pure
//! helpers in this module (`create_doc_to_doc`, `update_doc`, `apply_mixin`,
//! `put_bag`, `attach_inner`, `counter_updates`) hold the actual state
//! transition rules so every store folds transactions the same way.
//!
//! # Update operators
//!
//! Applied in a fixed order:
//! 1. plain keys assign (dots create nested objects, `space` moves the doc)
//! 2. `$push` appends, `{"$each": [...]}` appends several in order
//! 3. `$pull` removes items equal to a literal or matching a predicate
//! 4. `$inc` adds to a number, a missing field counts as 0
//! 5. `$unset` removes fields

use crate::doc::{
    without_reserved, Attributes, Doc, ATTACHED_TO, ATTACHED_TO_CLASS, COLLECTION,
};
use crate::error::{DocError, Result};
use crate::hierarchy::Hierarchy;
use crate::predicate::{is_predicate, loose_eq, Predicate};
use crate::query::CompiledQuery;
use crate::tx::{
    Tx, TxApplyIf, TxCollectionCud, TxCreateDoc, TxHeader, TxMixin, TxPutBag, TxRemoveDoc,
    TxResult, TxUpdateDoc,
};
use crate::types::{Class, Ref, Space};
use serde_json::{Map, Number, Value};

/// Per-kind transaction handlers
pub trait TxProcessor {
    /// Create a document
    fn tx_create_doc(&mut self, tx: &TxCreateDoc) -> Result<TxResult>;

    /// Update a document
    fn tx_update_doc(&mut self, tx: &TxUpdateDoc) -> Result<TxResult>;

    /// Remove a document
    fn tx_remove_doc(&mut self, tx: &TxRemoveDoc) -> Result<TxResult>;

    /// Merge mixin attributes
    fn tx_mixin(&mut self, tx: &TxMixin) -> Result<TxResult>;

    /// Bag write
    fn tx_put_bag(&mut self, tx: &TxPutBag) -> Result<TxResult>;

    /// Guarded compound transaction
    fn tx_apply_if(&mut self, tx: &TxApplyIf) -> Result<TxResult>;

    /// Attached document transaction; by default the inner transaction is
    /// applied with its attachment fields filled in
    fn tx_collection_cud(&mut self, tx: &TxCollectionCud) -> Result<TxResult> {
        let inner = attach_inner(tx);
        self.tx(&inner)
    }

    /// Dispatch by kind
    fn tx(&mut self, tx: &Tx) -> Result<TxResult> {
        match tx {
            Tx::CreateDoc(tx) => self.tx_create_doc(tx),
            Tx::UpdateDoc(tx) => self.tx_update_doc(tx),
            Tx::RemoveDoc(tx) => self.tx_remove_doc(tx),
            Tx::Mixin(tx) => self.tx_mixin(tx),
            Tx::CollectionCud(tx) => self.tx_collection_cud(tx),
            Tx::ApplyIf(tx) => self.tx_apply_if(tx),
            Tx::PutBag(tx) => self.tx_put_bag(tx),
        }
    }
}

/// Document resulting from a create transaction
pub fn create_doc_to_doc(tx: &TxCreateDoc) -> Doc {
    let header = &tx.header;
    Doc {
        id: header.object_id.clone(),
        class: header.object_class.clone(),
        space: header.object_space.clone(),
        modified_on: header.modified_on,
        modified_by: header.modified_by.clone(),
        created_on: Some(header.modified_on),
        mixins: Default::default(),
        attributes: without_reserved(&tx.attributes),
    }
}

/// Stamp the header of an applied transaction on the document
pub fn touch(doc: &mut Doc, header: &TxHeader) {
    doc.modified_on = header.modified_on;
    doc.modified_by = header.modified_by.clone();
}

/// Apply update operations in place
pub fn update_doc(doc: &mut Doc, operations: &Attributes) -> Result<()> {
    let mut push = None;
    let mut pull = None;
    let mut inc = None;
    let mut unset = None;

    for (key, value) in operations {
        match key.as_str() {
            "$push" => push = Some(operand_object(key, value)?),
            "$pull" => pull = Some(operand_object(key, value)?),
            "$inc" => inc = Some(operand_object(key, value)?),
            "$unset" => unset = Some(operand_object(key, value)?),
            "_id" | "_class" => {
                return Err(DocError::invalid_update(format!("'{key}' cannot be updated")))
            }
            "space" => {
                let space = value
                    .as_str()
                    .ok_or_else(|| DocError::invalid_update("'space' must be a string"))?;
                doc.space = Ref::<Space>::new(space);
            }
            "modifiedOn" | "modifiedBy" | "createdOn" => {}
            other if other.starts_with('$') => {
                return Err(DocError::invalid_update(format!("unknown operator '{other}'")))
            }
            path => set_path(&mut doc.attributes, path, value.clone())?,
        }
    }

    if let Some(push) = push {
        for (path, value) in push {
            let items: Vec<Value> = match value {
                Value::Object(map) if map.contains_key("$each") => match map.get("$each") {
                    Some(Value::Array(items)) => items.clone(),
                    _ => return Err(DocError::invalid_update("'$each' must be an array")),
                },
                other => vec![other.clone()],
            };
            let target = slot(&mut doc.attributes, path)?;
            if target.is_null() {
                *target = Value::Array(Vec::new());
            }
            match target {
                Value::Array(array) => array.extend(items),
                _ => return Err(DocError::invalid_update(format!("$push target '{path}' is not an array"))),
            }
        }
    }

    if let Some(pull) = pull {
        for (path, value) in pull {
            let matcher = PullMatcher::new(value)?;
            if let Some(Value::Array(array)) = get_path_mut(&mut doc.attributes, path) {
                array.retain(|item| !matcher.matches(item));
            }
        }
    }

    if let Some(inc) = inc {
        for (path, value) in inc {
            let delta = match value {
                Value::Number(n) => n,
                _ => {
                    return Err(DocError::invalid_update(format!(
                        "$inc operand for '{path}' is not a number"
                    )))
                }
            };
            let target = slot(&mut doc.attributes, path)?;
            let current = match target {
                Value::Null => Number::from(0),
                Value::Number(n) => n.clone(),
                _ => return Err(DocError::invalid_update(format!("$inc target '{path}' is not a number"))),
            };
            *target = Value::Number(add_numbers(&current, delta)?);
        }
    }

    if let Some(unset) = unset {
        for path in unset.keys() {
            remove_path(&mut doc.attributes, path);
        }
    }
    Ok(())
}

fn operand_object<'a>(key: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| DocError::invalid_update(format!("'{key}' operand must be an object")))
}

fn add_numbers(a: &Number, b: &Number) -> Result<Number> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(sum) = x.checked_add(y) {
            return Ok(Number::from(sum));
        }
    }
    let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).ok_or_else(|| DocError::invalid_update("$inc produced a non-finite number"))
}

enum PullMatcher {
    Literal(Value),
    Predicates(Vec<Predicate>),
    Query(CompiledQuery),
}

impl PullMatcher {
    fn new(value: &Value) -> Result<Self> {
        match value {
            Value::Object(map) if is_predicate(map) => {
                Ok(PullMatcher::Predicates(Predicate::parse_all(map)?))
            }
            Value::Object(map) => Ok(PullMatcher::Query(CompiledQuery::compile(map)?)),
            other => Ok(PullMatcher::Literal(other.clone())),
        }
    }

    fn matches(&self, item: &Value) -> bool {
        match self {
            PullMatcher::Literal(value) => loose_eq(item, value),
            PullMatcher::Predicates(predicates) => predicates.iter().all(|p| p.test(Some(item))),
            PullMatcher::Query(query) => item.is_object() && query.matches(item),
        }
    }
}

/// Mutable slot at a dotted path; missing intermediate objects are created
/// and a missing leaf is `null`
fn slot<'a>(map: &'a mut Attributes, path: &str) -> Result<&'a mut Value> {
    match path.split_once('.') {
        None => Ok(map.entry(path.to_string()).or_insert(Value::Null)),
        Some((head, rest)) => {
            let entry = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if entry.is_null() {
                *entry = Value::Object(Map::new());
            }
            match entry {
                Value::Object(inner) => slot(inner, rest),
                _ => Err(DocError::invalid_update(format!(
                    "cannot descend into '{head}' of '{path}': not an object"
                ))),
            }
        }
    }
}

fn get_path_mut<'a>(map: &'a mut Attributes, path: &str) -> Option<&'a mut Value> {
    match path.split_once('.') {
        None => map.get_mut(path),
        Some((head, rest)) => match map.get_mut(head)? {
            Value::Object(inner) => get_path_mut(inner, rest),
            _ => None,
        },
    }
}

fn set_path(map: &mut Attributes, path: &str, value: Value) -> Result<()> {
    *slot(map, path)? = value;
    Ok(())
}

fn remove_path(map: &mut Attributes, path: &str) {
    match path.split_once('.') {
        None => {
            map.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(inner)) = map.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

/// Merge attributes into the bag of `mixin`; last write wins per field
pub fn apply_mixin(doc: &mut Doc, mixin: &Ref<Class>, attributes: &Attributes) -> Result<()> {
    let bag = doc.mixins.entry(mixin.clone()).or_default();
    for (key, value) in attributes {
        set_path(bag, key, value.clone())?;
    }
    Ok(())
}

/// `doc[bag][key] = value`
pub fn put_bag(doc: &mut Doc, bag: &str, key: &str, value: Value) -> Result<()> {
    let target = doc
        .attributes
        .entry(bag.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if target.is_null() {
        *target = Value::Object(Map::new());
    }
    match target {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        _ => Err(DocError::invalid_update(format!("bag '{bag}' is not an object"))),
    }
}

/// Inner transaction of a collection CUD with the attachment fields filled
/// in on creation
pub fn attach_inner(tx: &TxCollectionCud) -> Tx {
    let mut inner = (*tx.tx).clone();
    if let Tx::CreateDoc(create) = &mut inner {
        let attributes = &mut create.attributes;
        attributes.insert(
            ATTACHED_TO.to_string(),
            Value::String(tx.header.object_id.to_string()),
        );
        attributes.insert(
            ATTACHED_TO_CLASS.to_string(),
            Value::String(tx.header.object_class.to_string()),
        );
        attributes.insert(COLLECTION.to_string(), Value::String(tx.collection.clone()));
    }
    inner
}

/// Check an attached document against its parent: the parent must derive
/// from the declared `attachedToClass`, and the collection must not be a
/// declared attribute of another type
pub fn validate_attachment(hierarchy: &Hierarchy, parent: &Doc, tx: &TxCollectionCud) -> Result<()> {
    let declared = &tx.header.object_class;
    if !hierarchy.is_derived(&parent.class, declared)? {
        return Err(DocError::InvalidAttachment(format!(
            "parent {} is a {}, not a {}",
            parent.id, parent.class, declared
        )));
    }
    if let Some(attr) = hierarchy.find_attribute(declared, &tx.collection)? {
        if !attr.attr_type.is_collection() {
            return Err(DocError::InvalidAttachment(format!(
                "'{}' on {} is not a collection",
                tx.collection, declared
            )));
        }
    }
    Ok(())
}

/// Counter changes on parents for one collection transaction.
///
/// Counters are cached only for collections declared as `Collection`
/// attributes of the parent class: +1 on create, -1 on removal of a document
/// that existed. An update that changes `attachedTo` moves the document:
/// -1 on the old parent, +1 on the new one. `inner_before` is the attached
/// document before the transaction.
///
/// Each update targets its parent by id and class; callers skip parents that
/// do not exist and stamp `objectSpace` from the stored parent.
pub fn counter_updates(
    hierarchy: &Hierarchy,
    tx: &TxCollectionCud,
    inner_before: Option<&Doc>,
) -> Result<Vec<Tx>> {
    let parent = CounterTarget {
        class: tx.header.object_class.clone(),
        id: tx.header.object_id.to_string(),
        collection: tx.collection.clone(),
    };
    let changes: Vec<(CounterTarget, i64, &str)> = match tx.tx.as_ref() {
        Tx::CreateDoc(_) => vec![(parent, 1, "counter")],
        Tx::RemoveDoc(_) if inner_before.is_some() => vec![(parent, -1, "counter")],
        Tx::UpdateDoc(update) => match moved(&parent, &update.operations, inner_before) {
            Some((from, to)) => vec![(from, -1, "counter"), (to, 1, "counter-to")],
            None => Vec::new(),
        },
        _ => Vec::new(),
    };

    let mut out = Vec::with_capacity(changes.len());
    for (target, delta, suffix) in changes {
        let declared = hierarchy
            .find_attribute(&target.class, &target.collection)?
            .map(|attr| attr.attr_type.is_collection())
            .unwrap_or(false);
        if !declared {
            continue;
        }
        let mut inc = Map::new();
        inc.insert(target.collection, Value::from(delta));
        let mut operations = Attributes::new();
        operations.insert("$inc".to_string(), Value::Object(inc));

        let mut header = tx.header.clone();
        header.id = Ref::new(format!("{}-{}", tx.header.id, suffix));
        header.object_id = Ref::new(target.id);
        header.object_class = target.class;
        out.push(Tx::UpdateDoc(TxUpdateDoc {
            header,
            operations,
            retrieve: false,
        }));
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
struct CounterTarget {
    class: Ref<Class>,
    id: String,
    collection: String,
}

/// Old and new parent of an attached document moved by `operations`
fn moved(
    parent: &CounterTarget,
    operations: &Attributes,
    before: Option<&Doc>,
) -> Option<(CounterTarget, CounterTarget)> {
    let target = operations.get(ATTACHED_TO)?.as_str()?;
    let from = match before {
        Some(doc) => CounterTarget {
            class: doc
                .get_str(ATTACHED_TO_CLASS)
                .map(Ref::new)
                .unwrap_or_else(|| parent.class.clone()),
            id: doc.get_str(ATTACHED_TO)?.to_string(),
            collection: doc
                .get_str(COLLECTION)
                .map(str::to_string)
                .unwrap_or_else(|| parent.collection.clone()),
        },
        None => parent.clone(),
    };
    if from.id == target {
        return None;
    }
    let to = CounterTarget {
        class: operations
            .get(ATTACHED_TO_CLASS)
            .and_then(Value::as_str)
            .map(Ref::new)
            .unwrap_or_else(|| from.class.clone()),
        id: target.to_string(),
        collection: operations
            .get(COLLECTION)
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| from.collection.clone()),
    };
    Some((from, to))
}

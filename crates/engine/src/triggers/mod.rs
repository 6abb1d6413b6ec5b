//! Server-side triggers
//!
//! A trigger is a named function from a committed transaction to further
//! transactions. Functions live in a [`TriggerRegistry`]; which ones run is
//! declared in the model by `Trigger` documents:
//!
//! ```json
//! {
//!   "_class": "server:class:Trigger",
//!   "trigger": "activity:trigger:OnDocUpdate",
//!   "objectClass": "tracker:class:Issue",
//!   "txMatch": { "_class": "core:class:TxCollectionCUD", "collection": "comments" },
//!   "derived": false
//! }
//! ```
//!
//! `objectClass` restricts dispatch to transactions whose `objectClass`
//! derives from it, `txMatch` is a query over the transaction's wire shape.
//! Transactions in the derived space are skipped unless `derived` is set.
//! A failing or panicking trigger is logged and skipped.

pub mod activity;

use crate::server_storage::ServerStorage;
use doctx_core::classes::{CLASS_CLASS, CLASS_DOC, DOMAIN_MODEL, SPACE_MODEL};
use doctx_core::query::matches_query;
use doctx_core::{
    Attributes, AttributeType, Builder, Class, Doc, FindOptions, FindResult, Hierarchy, ModelDb,
    Query, Ref, Result, Tx, TxFactory,
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Model class of trigger declarations
pub const CLASS_TRIGGER: Ref<Class> = Ref::from_static("server:class:Trigger");

/// A trigger function
pub type TriggerFn = Arc<dyn Fn(&Tx, &TriggerControl<'_>) -> Result<Vec<Tx>> + Send + Sync>;

/// Name -> function table
#[derive(Clone, Default)]
pub struct TriggerRegistry {
    functions: FxHashMap<String, TriggerFn>,
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("TriggerRegistry").field("functions", &names).finish()
    }
}

impl TriggerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `function`, replacing an earlier binding
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&Tx, &TriggerControl<'_>) -> Result<Vec<Tx>> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    /// Function bound to `name`
    pub fn get(&self, name: &str) -> Option<&TriggerFn> {
        self.functions.get(name)
    }

    /// Number of bound functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// True if nothing is bound
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Declaration stored in a `Trigger` document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDef {
    /// Registry name of the function
    pub trigger: String,
    /// Only transactions on this class or its descendants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_class: Option<Ref<Class>>,
    /// Only transactions whose wire shape matches this query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_match: Option<Query>,
    /// Also run on derived transactions
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub derived: bool,
}

impl TriggerDef {
    /// Declaration running `trigger` on every transaction
    pub fn new(trigger: impl Into<String>) -> Self {
        TriggerDef {
            trigger: trigger.into(),
            ..Self::default()
        }
    }

    /// Decode from a `Trigger` document
    pub fn from_doc(doc: &Doc) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(
            doc.attributes.clone(),
        ))?)
    }

    fn to_attributes(&self) -> Attributes {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => Attributes::new(),
        }
    }
}

/// Record the `Trigger` class
pub fn trigger_model(b: &mut Builder) {
    b.create_class(CLASS_TRIGGER, CLASS_DOC, Some(DOMAIN_MODEL))
        .attribute("trigger", AttributeType::String)
        .attribute("objectClass", AttributeType::RefTo { to: CLASS_CLASS })
        .attribute("derived", AttributeType::Boolean);
}

/// Record a trigger declaration as a model document
pub fn declare_trigger(b: &mut Builder, id: &str, def: &TriggerDef) -> Ref<Doc> {
    b.create_doc(CLASS_TRIGGER, SPACE_MODEL, def.to_attributes(), Some(Ref::new(id)))
}

/// What a trigger may read, and how it builds its output
pub struct TriggerControl<'a> {
    storage: &'a ServerStorage,
    factory: TxFactory,
}

impl<'a> TriggerControl<'a> {
    /// Control for transactions caused by `origin`
    pub fn new(storage: &'a ServerStorage, origin: &Tx) -> Self {
        let header = origin.header();
        TriggerControl {
            storage,
            factory: TxFactory::derived(header.modified_by.clone(), header.modified_on),
        }
    }

    /// Find documents in current storage
    pub fn find_all(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<FindResult> {
        self.storage.find_all(class, query, options)
    }

    /// First matching document
    pub fn find_one(&self, class: &Ref<Class>, query: &Query) -> Result<Option<Doc>> {
        let options = FindOptions::default().limit(1);
        Ok(self.storage.find_all(class, query, &options)?.into_docs().into_iter().next())
    }

    /// Document by class and id
    pub fn get(&self, class: &Ref<Class>, id: &Ref<Doc>) -> Result<Option<Doc>> {
        let mut query = Query::new();
        query.insert("_id".to_string(), serde_json::Value::String(id.to_string()));
        self.find_one(class, &query)
    }

    /// Run `f` against the class hierarchy
    pub fn with_hierarchy<R>(&self, f: impl FnOnce(&Hierarchy) -> R) -> R {
        self.storage.with_model(|model| f(model.hierarchy()))
    }

    /// Run `f` against the model
    pub fn with_model<R>(&self, f: impl FnOnce(&ModelDb) -> R) -> R {
        self.storage.with_model(f)
    }

    /// Factory for derived transactions: derived space, author and time of
    /// the originating transaction
    pub fn txes(&self) -> &TxFactory {
        &self.factory
    }
}

/// Dispatches committed transactions to the declared triggers
#[derive(Debug, Default)]
pub struct Triggers {
    registry: TriggerRegistry,
}

impl Triggers {
    /// Dispatcher over `registry`
    pub fn new(registry: TriggerRegistry) -> Self {
        Triggers { registry }
    }

    /// Bound functions
    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    fn declarations(&self, storage: &ServerStorage) -> Vec<(Ref<Doc>, TriggerDef)> {
        let docs = storage.with_model(|model| {
            model.find_all(&CLASS_TRIGGER, &Query::new(), &FindOptions::default())
        });
        let docs = match docs {
            Ok(docs) => docs,
            Err(err) => {
                debug!(target: "doctx::triggers", error = %err, "no trigger declarations");
                return Vec::new();
            }
        };
        docs.into_iter()
            .filter_map(|doc| match TriggerDef::from_doc(&doc) {
                Ok(def) => Some((doc.id, def)),
                Err(err) => {
                    warn!(target: "doctx::triggers", id = %doc.id, error = %err, "malformed trigger declaration");
                    None
                }
            })
            .collect()
    }

    fn selects(&self, storage: &ServerStorage, def: &TriggerDef, tx: &Tx) -> Result<bool> {
        if tx.is_derived() && !def.derived {
            return Ok(false);
        }
        if let Some(class) = &def.object_class {
            let derived = storage.with_model(|model| model.hierarchy().is_derived(tx.object_class(), class));
            // transactions on unknown classes never reach a commit
            if !derived.unwrap_or(false) {
                return Ok(false);
            }
        }
        if let Some(query) = &def.tx_match {
            return matches_query(&tx.to_value()?, query);
        }
        Ok(true)
    }

    /// Run every selected trigger on `tx` and concatenate their output.
    ///
    /// An apply-if is dispatched as its component transactions.
    pub fn apply(&self, storage: &ServerStorage, tx: &Tx) -> Vec<Tx> {
        let declarations = self.declarations(storage);
        if declarations.is_empty() {
            return Vec::new();
        }
        let control = TriggerControl::new(storage, tx);
        let mut output = Vec::new();
        for target in flatten(tx) {
            for (id, def) in &declarations {
                match self.selects(storage, def, target) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        warn!(target: "doctx::triggers", trigger = %id, error = %err, "trigger selection failed");
                        continue;
                    }
                }
                let Some(function) = self.registry.get(&def.trigger) else {
                    warn!(target: "doctx::triggers", trigger = %def.trigger, "declared trigger is not registered");
                    continue;
                };
                match catch_unwind(AssertUnwindSafe(|| function(target, &control))) {
                    Ok(Ok(txes)) => {
                        debug!(
                            target: "doctx::triggers",
                            trigger = %def.trigger,
                            tx = %target.id(),
                            produced = txes.len(),
                            "trigger ran"
                        );
                        output.extend(txes);
                    }
                    Ok(Err(err)) => {
                        warn!(target: "doctx::triggers", trigger = %def.trigger, tx = %target.id(), error = %err, "trigger failed");
                    }
                    Err(_) => {
                        error!(target: "doctx::triggers", trigger = %def.trigger, tx = %target.id(), "trigger panicked");
                    }
                }
            }
        }
        output
    }
}

fn flatten(tx: &Tx) -> Vec<&Tx> {
    match tx {
        Tx::ApplyIf(apply) => apply.txes.iter().flat_map(flatten).collect(),
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_storage::in_memory_adapters;
    use doctx_core::core_model;
    use doctx_core::DocError;
    use doctx_storage::InMemoryTxLog;
    use serde_json::json;

    const TASK: Ref<Class> = Ref::from_static("test:class:Task");
    const NOTE: Ref<Class> = Ref::from_static("test:class:Note");

    fn storage(declare: impl FnOnce(&mut Builder)) -> ServerStorage {
        let storage = ServerStorage::open(Arc::new(InMemoryTxLog::new()), in_memory_adapters(), None).unwrap();
        let mut b = Builder::new();
        core_model(&mut b);
        trigger_model(&mut b);
        b.create_class(TASK, CLASS_DOC, Some(doctx_core::Domain::new("task")));
        b.create_class(NOTE, CLASS_DOC, Some(doctx_core::Domain::new("task")));
        declare(&mut b);
        for tx in b.txes() {
            storage.tx(tx).unwrap();
        }
        storage
    }

    fn echo(tx: &Tx, control: &TriggerControl<'_>) -> Result<Vec<Tx>> {
        Ok(vec![control.txes().create_tx_remove_doc(
            tx.object_class().clone(),
            tx.object_space().clone(),
            Ref::new(format!("{}-echo", tx.object_id())),
        )])
    }

    fn create(class: Ref<Class>, id: &str) -> Tx {
        TxFactory::new(Ref::new("alice")).create_tx_create_doc(class, Ref::new("sp"), Attributes::new(), Some(Ref::new(id)))
    }

    #[test]
    fn test_object_class_and_match_select_triggers() {
        let storage = storage(|b| {
            declare_trigger(b, "t:tasks", &TriggerDef {
                object_class: Some(TASK),
                ..TriggerDef::new("echo")
            });
            declare_trigger(b, "t:notes", &TriggerDef {
                tx_match: Some(json!({"objectId": "n2"}).as_object().cloned().unwrap_or_default()),
                ..TriggerDef::new("echo")
            });
        });
        let mut registry = TriggerRegistry::new();
        registry.register("echo", echo);
        let triggers = Triggers::new(registry);

        let out = triggers.apply(&storage, &create(TASK, "t1"));
        assert_eq!(out.len(), 1);
        assert!(out[0].is_derived());
        assert_eq!(out[0].object_id().as_str(), "t1-echo");
        assert_eq!(out[0].header().modified_by.as_str(), "alice");

        assert!(triggers.apply(&storage, &create(NOTE, "n1")).is_empty());
        assert_eq!(triggers.apply(&storage, &create(NOTE, "n2")).len(), 1);
    }

    #[test]
    fn test_derived_transactions_need_opt_in() {
        let storage = storage(|b| {
            declare_trigger(b, "t:plain", &TriggerDef::new("echo"));
            declare_trigger(b, "t:derived", &TriggerDef {
                derived: true,
                ..TriggerDef::new("echo")
            });
        });
        let mut registry = TriggerRegistry::new();
        registry.register("echo", echo);
        let triggers = Triggers::new(registry);

        let derived = TxFactory::derived(Ref::new("alice"), 1).create_tx_create_doc(TASK, Ref::new("sp"), Attributes::new(), None);
        assert_eq!(triggers.apply(&storage, &derived).len(), 1);
        assert_eq!(triggers.apply(&storage, &create(TASK, "t1")).len(), 2);
    }

    #[test]
    fn test_failures_and_panics_are_isolated() {
        let storage = storage(|b| {
            declare_trigger(b, "t:fail", &TriggerDef::new("fail"));
            declare_trigger(b, "t:panic", &TriggerDef::new("panic"));
            declare_trigger(b, "t:missing", &TriggerDef::new("missing"));
            declare_trigger(b, "t:echo", &TriggerDef::new("echo"));
        });
        let mut registry = TriggerRegistry::new();
        registry.register("fail", |_: &Tx, _: &TriggerControl<'_>| Err(DocError::internal("boom")));
        registry.register("panic", |_: &Tx, _: &TriggerControl<'_>| -> Result<Vec<Tx>> { panic!("trigger bug") });
        registry.register("echo", echo);
        let triggers = Triggers::new(registry);

        assert_eq!(triggers.apply(&storage, &create(TASK, "t1")).len(), 1);
    }

    #[test]
    fn test_apply_if_is_dispatched_per_component() {
        let storage = storage(|b| {
            declare_trigger(b, "t:echo", &TriggerDef::new("echo"));
        });
        let mut registry = TriggerRegistry::new();
        registry.register("echo", echo);
        let triggers = Triggers::new(registry);

        let f = TxFactory::new(Ref::new("alice"));
        let apply = f.create_tx_apply_if("s", vec![], vec![], vec![create(TASK, "a"), create(TASK, "b")]);
        let ids: Vec<String> = triggers
            .apply(&storage, &apply)
            .iter()
            .map(|tx| tx.object_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a-echo", "b-echo"]);
    }
}

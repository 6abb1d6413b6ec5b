//! Activity: one `DocUpdateMessage` per change to a tracked document
//!
//! Classes opt in by carrying the [`ACTIVITY_DOC`] class mixin (directly or
//! through an ancestor). Changes to attached documents are reported on the
//! nearest tracked ancestor found by following `attachedTo`.

use super::{declare_trigger, TriggerControl, TriggerDef, TriggerRegistry};
use doctx_core::classes::{CLASS_ATTACHED_DOC, CLASS_CLASS, CLASS_DOC, SPACE_MODEL};
use doctx_core::doc::{ATTACHED_TO, ATTACHED_TO_CLASS, COLLECTION};
use doctx_core::{
    Attributes, AttributeType, Builder, Class, Doc, Domain, Ref, Result, Tx, TxCollectionCud,
};
use serde_json::{json, Value};
use tracing::trace;

/// Class mixin marking classes whose documents collect activity
pub const ACTIVITY_DOC: Ref<Class> = Ref::from_static("activity:mixin:ActivityDoc");

/// Activity entry attached to the changed document
pub const CLASS_DOC_UPDATE_MESSAGE: Ref<Class> = Ref::from_static("activity:class:DocUpdateMessage");

/// Registry name of the activity trigger
pub const TRIGGER_ACTIVITY: &str = "activity:trigger:OnDocUpdate";

/// Collection holding the messages on the owner
pub const DOC_UPDATE_MESSAGES: &str = "docUpdateMessages";

/// Storage domain of activity messages
pub const DOMAIN_ACTIVITY: Domain = Domain::from_static("activity");

// attachedTo chains longer than this are treated as cycles
const MAX_OWNER_DEPTH: usize = 16;

/// Record the activity classes and the trigger declaration
pub fn activity_model(b: &mut Builder) {
    b.create_mixin(ACTIVITY_DOC, CLASS_CLASS);
    b.create_class(CLASS_DOC_UPDATE_MESSAGE, CLASS_ATTACHED_DOC, Some(DOMAIN_ACTIVITY))
        .attribute("action", AttributeType::String)
        .attribute("objectId", AttributeType::RefTo { to: CLASS_DOC })
        .attribute("objectClass", AttributeType::RefTo { to: CLASS_CLASS })
        .attribute("txId", AttributeType::String);
    declare_trigger(b, "activity:trigger-doc:OnDocUpdate", &TriggerDef::new(TRIGGER_ACTIVITY));
}

/// Mark `class` as collecting activity
pub fn track_activity(b: &mut Builder, class: Ref<Class>) {
    b.mixin(class.cast(), CLASS_CLASS, ACTIVITY_DOC, Attributes::new());
}

/// Bind the activity trigger
pub fn register_activity(registry: &mut TriggerRegistry) {
    registry.register(TRIGGER_ACTIVITY, generate_doc_update_messages);
}

fn is_tracked(control: &TriggerControl<'_>, class: &Ref<Class>) -> Result<bool> {
    control.with_hierarchy(|h| Ok(h.class_hierarchy_mixin(class, &ACTIVITY_DOC)?.is_some()))
}

/// Nearest tracked document starting at `(class, id)` and following
/// `attachedTo`
fn resolve_owner(control: &TriggerControl<'_>, class: &Ref<Class>, id: &Ref<Doc>) -> Result<Option<Doc>> {
    let mut class = class.clone();
    let mut id = id.clone();
    for _ in 0..MAX_OWNER_DEPTH {
        let Some(doc) = control.get(&class, &id)? else {
            return Ok(None);
        };
        if is_tracked(control, &doc.class)? {
            return Ok(Some(doc));
        }
        match (doc.attached_to(), doc.attached_to_class()) {
            (Some(parent), Some(parent_class)) => {
                id = parent;
                class = parent_class;
            }
            _ => return Ok(None),
        }
    }
    Ok(None)
}

fn update_entry(key: &str, set: Vec<Value>, added: Vec<Value>, removed: Vec<Value>, is_mixin: bool) -> Value {
    json!({
        "attrKey": key,
        "set": set,
        "added": added,
        "removed": removed,
        "isMixin": is_mixin,
    })
}

fn values(operand: &Value) -> Vec<Value> {
    match operand {
        Value::Object(map) if map.contains_key("$each") => match map.get("$each") {
            Some(Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        },
        other => vec![other.clone()],
    }
}

/// `attributeUpdates` of one source transaction
fn attribute_updates(tx: &Tx) -> Vec<Value> {
    let mut updates = Vec::new();
    match tx {
        Tx::CreateDoc(create) => {
            for (key, value) in &create.attributes {
                if [ATTACHED_TO, ATTACHED_TO_CLASS, COLLECTION].contains(&key.as_str()) {
                    continue;
                }
                updates.push(update_entry(key, vec![value.clone()], Vec::new(), Vec::new(), false));
            }
        }
        Tx::UpdateDoc(update) => {
            for (key, value) in &update.operations {
                match key.as_str() {
                    "$push" | "$pull" | "$inc" | "$unset" => {
                        let Value::Object(fields) = value else {
                            continue;
                        };
                        for (field, operand) in fields {
                            let entry = match key.as_str() {
                                "$push" => update_entry(field, Vec::new(), values(operand), Vec::new(), false),
                                "$pull" => update_entry(field, Vec::new(), Vec::new(), values(operand), false),
                                "$inc" => update_entry(field, vec![operand.clone()], Vec::new(), Vec::new(), false),
                                _ => update_entry(field, vec![Value::Null], Vec::new(), Vec::new(), false),
                            };
                            updates.push(entry);
                        }
                    }
                    _ => updates.push(update_entry(key, vec![value.clone()], Vec::new(), Vec::new(), false)),
                }
            }
        }
        Tx::Mixin(mixin) => {
            for (key, value) in &mixin.attributes {
                updates.push(update_entry(key, vec![value.clone()], Vec::new(), Vec::new(), true));
            }
        }
        Tx::PutBag(bag) => {
            updates.push(update_entry(
                &format!("{}.{}", bag.bag, bag.key),
                vec![bag.value.clone()],
                Vec::new(),
                Vec::new(),
                false,
            ));
        }
        Tx::RemoveDoc(_) | Tx::CollectionCud(_) | Tx::ApplyIf(_) => {}
    }
    updates
}

fn action(tx: &Tx) -> &'static str {
    match tx {
        Tx::CreateDoc(_) => "create",
        Tx::RemoveDoc(_) => "remove",
        _ => "update",
    }
}

/// Message creation attached to `owner`, describing `subject` as changed by
/// `source`
fn message(control: &TriggerControl<'_>, owner: &Doc, source: &Tx, subject: &Tx) -> Tx {
    let mut attributes = Attributes::new();
    attributes.insert("action".to_string(), json!(action(subject)));
    attributes.insert("objectId".to_string(), json!(subject.object_id().as_str()));
    attributes.insert("objectClass".to_string(), json!(subject.object_class().as_str()));
    attributes.insert("txId".to_string(), json!(source.id().as_str()));
    attributes.insert("attributeUpdates".to_string(), Value::Array(attribute_updates(subject)));

    let factory = control.txes();
    let create = factory.create_tx_create_doc(CLASS_DOC_UPDATE_MESSAGE, owner.space.clone(), attributes, None);
    factory.create_tx_collection_cud(owner.class.clone(), owner.id.clone(), owner.space.clone(), DOC_UPDATE_MESSAGES, create)
}

/// New parent of an attached document moved by `update`
fn moved_to(cud: &TxCollectionCud) -> Option<(Ref<Class>, Ref<Doc>)> {
    let Tx::UpdateDoc(update) = cud.tx.as_ref() else {
        return None;
    };
    let parent = update.operations.get(ATTACHED_TO)?.as_str()?;
    if parent == cud.header.object_id.as_str() {
        return None;
    }
    let class = update
        .operations
        .get(ATTACHED_TO_CLASS)
        .and_then(Value::as_str)
        .map(Ref::new)
        .unwrap_or_else(|| cud.header.object_class.clone());
    Some((class, Ref::new(parent)))
}

/// Activity trigger.
///
/// Emits one `DocUpdateMessage` per source transaction on a tracked
/// document, attached to that document's owner. Moving an attached document
/// between parents reports on both parents. Removing the owner itself
/// produces nothing, since the message would have nowhere to live.
pub fn generate_doc_update_messages(tx: &Tx, control: &TriggerControl<'_>) -> Result<Vec<Tx>> {
    if *tx.object_space() == SPACE_MODEL || *tx.object_class() == CLASS_DOC_UPDATE_MESSAGE {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    match tx {
        Tx::CollectionCud(cud) => {
            let subject = cud.tx.as_ref();
            if let Some(owner) = resolve_owner(control, &cud.header.object_class, &cud.header.object_id)? {
                out.push(message(control, &owner, tx, subject));
            }
            if let Some((class, parent)) = moved_to(cud) {
                if let Some(owner) = resolve_owner(control, &class, &parent)? {
                    out.push(message(control, &owner, tx, subject));
                }
            }
        }
        Tx::RemoveDoc(_) | Tx::ApplyIf(_) => {}
        _ => {
            if let Some(owner) = resolve_owner(control, tx.object_class(), tx.object_id())? {
                out.push(message(control, &owner, tx, tx));
            }
        }
    }
    trace!(target: "doctx::triggers", tx = %tx.id(), messages = out.len(), "activity");
    Ok(out)
}

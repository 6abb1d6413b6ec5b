//! Triggers through the full pipeline: activity messages and a declared
//! custom trigger

use doctx_core::classes::{CLASS_ATTACHED_DOC, CLASS_DOC};
use doctx_core::{Attributes, AttributeType, Class, Doc, Domain, FindOptions, Query, Ref, Result, Tx, TxFactory};
use doctx_engine::{
    declare_trigger, track_activity, SessionContext, TriggerControl, TriggerDef, Workspace, WorkspaceBuilder,
    CLASS_DOC_UPDATE_MESSAGE,
};
use doctx_engine::EngineConfig;
use serde_json::{json, Value};

const ISSUE: Ref<Class> = Ref::from_static("test:class:Issue");
const COMMENT: Ref<Class> = Ref::from_static("test:class:Comment");
const WELCOME: &str = "test:trigger:Welcome";

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

fn alice() -> SessionContext {
    SessionContext::new(Ref::new("alice"))
}

fn factory() -> TxFactory {
    TxFactory::new(Ref::new("alice"))
}

/// Adds a greeting comment to every new issue
fn welcome(tx: &Tx, control: &TriggerControl<'_>) -> Result<Vec<Tx>> {
    let f = control.txes();
    let comment = f.create_tx_create_doc(
        COMMENT,
        tx.object_space().clone(),
        attrs(json!({"message": "welcome"})),
        None,
    );
    Ok(vec![f.create_tx_collection_cud(
        ISSUE,
        tx.object_id().clone(),
        tx.object_space().clone(),
        "comments",
        comment,
    )])
}

fn workspace(with_welcome: bool) -> Workspace {
    let mut builder = WorkspaceBuilder::new(EngineConfig::in_memory()).with_model(move |b| {
        b.create_class(ISSUE, CLASS_DOC, Some(Domain::new("task")))
            .attribute("title", AttributeType::String)
            .attribute("comments", AttributeType::Collection { of: COMMENT });
        b.create_class(COMMENT, CLASS_ATTACHED_DOC, Some(Domain::new("chunter")))
            .attribute("message", AttributeType::Markup);
        track_activity(b, ISSUE);
        if with_welcome {
            let mut def = TriggerDef::new(WELCOME);
            def.object_class = Some(ISSUE);
            def.tx_match = Some(attrs(json!({"_class": "core:class:TxCreateDoc"})));
            declare_trigger(b, "test:trigger-doc:Welcome", &def);
        }
    });
    if with_welcome {
        builder = builder.with_trigger(WELCOME, welcome);
    }
    builder.open().unwrap()
}

fn create_issue(workspace: &Workspace, id: &str) {
    let tx = factory().create_tx_create_doc(ISSUE, Ref::new("sp"), attrs(json!({"title": "Crash"})), Some(Ref::new(id)));
    workspace.tx(&alice(), tx).unwrap();
}

fn messages(workspace: &Workspace, owner: &str) -> Vec<Doc> {
    let mut query = Query::new();
    query.insert("attachedTo".to_string(), json!(owner));
    workspace
        .find_all(
            &alice(),
            &CLASS_DOC_UPDATE_MESSAGE,
            &query,
            &FindOptions::default().sort_by("modifiedOn", doctx_core::SortingOrder::Ascending),
        )
        .unwrap()
        .into_docs()
}

fn get(workspace: &Workspace, class: &Ref<Class>, id: &str) -> Option<Doc> {
    workspace.find_one(&alice(), class, &attrs(json!({"_id": id}))).unwrap()
}

#[test]
fn test_activity_records_create_update_and_comment() {
    let workspace = workspace(false);
    create_issue(&workspace, "i1");

    let update = factory().create_tx_update_doc(ISSUE, Ref::new("sp"), Ref::new("i1"), attrs(json!({"title": "Crash on login"})));
    workspace.tx(&alice(), update).unwrap();

    let comment = factory().create_tx_create_doc(COMMENT, Ref::new("sp"), attrs(json!({"message": "seen"})), Some(Ref::new("c1")));
    let cud = factory().create_tx_collection_cud(ISSUE, Ref::new("i1"), Ref::new("sp"), "comments", comment);
    workspace.tx(&alice(), cud).unwrap();

    let found = messages(&workspace, "i1");
    let mut actions: Vec<(String, String)> = found
        .iter()
        .map(|m| {
            (
                m.get_str("action").unwrap_or_default().to_string(),
                m.get_str("objectId").unwrap_or_default().to_string(),
            )
        })
        .collect();
    actions.sort();
    assert_eq!(
        actions,
        vec![
            ("create".to_string(), "c1".to_string()),
            ("create".to_string(), "i1".to_string()),
            ("update".to_string(), "i1".to_string()),
        ]
    );

    let title_update = found
        .iter()
        .find(|m| m.get_str("action") == Some("update"))
        .and_then(|m| m.get("attributeUpdates"))
        .cloned();
    assert_eq!(
        title_update,
        Some(json!([{"attrKey": "title", "set": ["Crash on login"], "added": [], "removed": [], "isMixin": false}]))
    );

    for message in &found {
        assert_eq!(message.modified_by.as_str(), "alice");
        assert_eq!(message.get_str("collection"), Some("docUpdateMessages"));
    }
    assert_eq!(get(&workspace, &ISSUE, "i1").and_then(|i| i.get("comments").cloned()), Some(json!(1)));
}

#[test]
fn test_untracked_classes_produce_no_activity() {
    let workspace = workspace(false);
    create_issue(&workspace, "i1");
    let comment = factory().create_tx_create_doc(COMMENT, Ref::new("sp"), Attributes::new(), Some(Ref::new("c1")));
    let cud = factory().create_tx_collection_cud(ISSUE, Ref::new("i1"), Ref::new("sp"), "comments", comment);
    workspace.tx(&alice(), cud).unwrap();

    // messages about c1 live on its tracked owner, never on c1
    assert!(messages(&workspace, "c1").is_empty());
    assert_eq!(messages(&workspace, "i1").len(), 2);
}

#[test]
fn test_declared_trigger_runs_with_its_filters() {
    let workspace = workspace(true);
    create_issue(&workspace, "i1");

    let issue = get(&workspace, &ISSUE, "i1").unwrap();
    assert_eq!(issue.get("comments"), Some(&json!(1)));

    let comments = workspace
        .find_all(&alice(), &COMMENT, &attrs(json!({"attachedTo": "i1"})), &FindOptions::default())
        .unwrap();
    let greeting = comments.first().unwrap();
    assert_eq!(greeting.get_str("message"), Some("welcome"));
    assert_eq!(greeting.modified_by.as_str(), "alice");

    // updates do not match txMatch
    let update = factory().create_tx_update_doc(ISSUE, Ref::new("sp"), Ref::new("i1"), attrs(json!({"title": "x"})));
    workspace.tx(&alice(), update).unwrap();
    let issue = get(&workspace, &ISSUE, "i1").unwrap();
    assert_eq!(issue.get("comments"), Some(&json!(1)));
}

#[test]
fn test_subscribers_see_source_and_derived_in_order() {
    let workspace = workspace(true);
    let subscription = workspace.subscribe();
    create_issue(&workspace, "i1");

    let received: Vec<_> = subscription.drain();
    let sequences: Vec<u64> = received.iter().map(|e| e.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    assert_eq!(sequences, sorted);

    // the issue, its activity message and the greeting comment
    assert_eq!(received.len(), 3);
    assert!(!received[0].tx.is_derived());
    assert!(received[1..].iter().all(|e| e.tx.is_derived()));
}

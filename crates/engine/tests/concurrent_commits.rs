//! Concurrent commits through the full pipeline
//!
//! Writers on one parent serialize per object, counters come out exact,
//! subscribers see every sequence once and in order, and a guarded create
//! wins exactly once.

use doctx_core::classes::{CLASS_ATTACHED_DOC, CLASS_DOC};
use doctx_core::{Attributes, AttributeType, Class, Domain, FindOptions, MatchCondition, Ref, TxFactory};
use doctx_engine::{EngineConfig, SessionContext, Workspace, WorkspaceBuilder};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

const ISSUE: Ref<Class> = Ref::from_static("test:class:Issue");
const COMMENT: Ref<Class> = Ref::from_static("test:class:Comment");

const THREADS: usize = 8;
const ROUNDS: usize = 25;

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

fn workspace() -> Workspace {
    WorkspaceBuilder::new(EngineConfig::in_memory())
        .with_model(|b| {
            b.create_class(ISSUE, CLASS_DOC, Some(Domain::new("task")))
                .attribute("title", AttributeType::String)
                .attribute("comments", AttributeType::Collection { of: COMMENT });
            b.create_class(COMMENT, CLASS_ATTACHED_DOC, Some(Domain::new("chunter")));
        })
        .open()
        .unwrap()
}

#[test]
fn test_concurrent_writers_on_one_parent() {
    let workspace = workspace();
    let alice = SessionContext::new(Ref::new("alice"));
    let f = TxFactory::new(alice.account.clone());
    workspace
        .tx(&alice, f.create_tx_create_doc(ISSUE, Ref::new("sp"), attrs(json!({"hits": 0})), Some(Ref::new("p1"))))
        .unwrap();

    let sub = workspace.subscribe();
    let start = workspace.last_sequence();

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let ctx = SessionContext::new(Ref::new("alice"));
                let f = TxFactory::new(ctx.account.clone());
                for _ in 0..ROUNDS {
                    let inc = f.create_tx_update_doc(ISSUE, Ref::new("sp"), Ref::new("p1"), attrs(json!({"$inc": {"hits": 1}})));
                    workspace.tx(&ctx, inc).unwrap();
                    let comment = f.create_tx_create_doc(COMMENT, Ref::new("sp"), Attributes::new(), None);
                    let cud = f.create_tx_collection_cud(ISSUE, Ref::new("p1"), Ref::new("sp"), "comments", comment);
                    workspace.tx(&ctx, cud).unwrap();
                }
            });
        }
    });

    let total = THREADS * ROUNDS;
    let parent = workspace
        .find_one(&alice, &ISSUE, &attrs(json!({"_id": "p1"})))
        .unwrap()
        .unwrap();
    assert_eq!(parent.get("hits"), Some(&json!(total)));
    assert_eq!(parent.get("comments"), Some(&json!(total)));
    let comments = workspace
        .find_all(&alice, &COMMENT, &attrs(json!({"attachedTo": "p1"})), &FindOptions::default())
        .unwrap();
    assert_eq!(comments.len(), total);

    let delivered: Vec<u64> = sub.drain().iter().map(|e| e.sequence).collect();
    let expected: Vec<u64> = (start + 1..=start + 2 * total as u64).collect();
    assert_eq!(delivered, expected);
    assert_eq!(workspace.last_sequence(), start + 2 * total as u64);
}

#[test]
fn test_guarded_create_wins_once() {
    let workspace = workspace();
    let applied = AtomicUsize::new(0);

    thread::scope(|s| {
        for n in 0..THREADS {
            let workspace = &workspace;
            let applied = &applied;
            s.spawn(move || {
                let ctx = SessionContext::new(Ref::new("alice"));
                let f = TxFactory::new(ctx.account.clone());
                let condition = MatchCondition {
                    class: ISSUE,
                    query: attrs(json!({"title": "unique"})),
                };
                let create = f.create_tx_create_doc(
                    ISSUE,
                    Ref::new("sp"),
                    attrs(json!({"title": "unique"})),
                    Some(Ref::new(format!("i{n}"))),
                );
                let guarded = f.create_tx_apply_if("issue-titles", vec![], vec![condition], vec![create]);
                if workspace.tx(&ctx, guarded).unwrap().result.applied {
                    applied.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(applied.load(Ordering::SeqCst), 1);
    let issues = workspace
        .find_all(
            &SessionContext::system(),
            &ISSUE,
            &attrs(json!({"title": "unique"})),
            &FindOptions::default(),
        )
        .unwrap();
    assert_eq!(issues.len(), 1);
}

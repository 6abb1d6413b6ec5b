//! Space-based access control
//!
//! A private space is visible only to the accounts in its `members`. Reads
//! are narrowed to the spaces the session may see and writes into other
//! private spaces fail with `Forbidden`, including updates that move a
//! document into one. The system account is not checked.
//!
//! The claimed `objectSpace` of a write is checked against the stored
//! document by storage itself.

use super::Middleware;
use crate::context::SessionContext;
use crate::server_storage::{ServerStorage, TxOutcome};
use doctx_core::classes::{CLASS_SPACE, CLASS_TX};
use doctx_core::predicate::is_predicate;
use doctx_core::{Account, Class, Doc, DocError, FindOptions, FindResult, Query, Ref, Result, Space, Tx};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Private spaces `account` is not a member of
pub fn forbidden_spaces(storage: &ServerStorage, account: &Ref<Account>) -> Result<Vec<Ref<Space>>> {
    let mut query = Query::new();
    query.insert("private".to_string(), Value::Bool(true));
    Ok(storage
        .find_all(&CLASS_SPACE, &query, &FindOptions::default())?
        .into_iter()
        .filter(|space| !space.has_member(account))
        .map(|space| space.id.cast())
        .collect())
}

/// Narrow `query` on `key` to spaces outside `forbidden`; `None` if the query
/// pins a forbidden space
fn restrict(query: &Query, key: &str, forbidden: &[Ref<Space>]) -> Option<Query> {
    let excluded: Vec<Value> = forbidden.iter().map(|s| json!(s.as_str())).collect();
    let mut query = query.clone();
    match query.get_mut(key) {
        None => {
            query.insert(key.to_string(), json!({ "$nin": excluded }));
        }
        Some(Value::String(space)) => {
            if forbidden.iter().any(|f| f.as_str() == space) {
                return None;
            }
        }
        Some(Value::Object(preds)) if is_predicate(&*preds) => {
            match preds.get_mut("$nin") {
                Some(Value::Array(items)) => items.extend(excluded),
                Some(_) => {}
                None => {
                    preds.insert("$nin".to_string(), Value::Array(excluded));
                }
            }
        }
        Some(_) => {}
    }
    Some(query)
}

fn space_of<'a>(doc: &'a Doc, key: &str) -> Option<&'a str> {
    if key == "space" {
        Some(doc.space.as_str())
    } else {
        doc.get_str(key)
    }
}

/// Enforces private-space membership
pub struct SpaceSecurityMiddleware {
    storage: Arc<ServerStorage>,
    next: Option<Box<dyn Middleware>>,
}

impl SpaceSecurityMiddleware {
    /// Check against the spaces stored in `storage`
    pub fn new(storage: Arc<ServerStorage>, next: Option<Box<dyn Middleware>>) -> Self {
        SpaceSecurityMiddleware { storage, next }
    }

    fn is_derived(&self, class: &Ref<Class>, ancestor: &Ref<Class>) -> Result<bool> {
        self.storage
            .with_model(|model| model.hierarchy().is_derived(class, ancestor))
    }
}

impl Middleware for SpaceSecurityMiddleware {
    fn name(&self) -> &'static str {
        "space-security"
    }

    fn next(&self) -> Option<&dyn Middleware> {
        self.next.as_deref()
    }

    fn tx(&self, ctx: &SessionContext, tx: Tx) -> Result<TxOutcome> {
        if ctx.is_system() {
            return self.provide_tx(ctx, tx);
        }
        let forbidden = forbidden_spaces(&self.storage, &ctx.account)?;
        if !forbidden.is_empty() {
            for inner in tx.extract() {
                if matches!(inner, Tx::ApplyIf(_)) {
                    continue;
                }
                let space = inner.object_space();
                let is_forbidden_space = self.is_derived(inner.object_class(), &CLASS_SPACE)?
                    && forbidden.iter().any(|f| f.as_str() == inner.object_id().as_str());
                let moves_into_forbidden = match inner {
                    Tx::UpdateDoc(update) => update
                        .operations
                        .get("space")
                        .and_then(Value::as_str)
                        .is_some_and(|target| forbidden.iter().any(|f| f.as_str() == target)),
                    _ => false,
                };
                if forbidden.contains(space) || is_forbidden_space || moves_into_forbidden {
                    debug!(
                        target: "doctx::pipeline",
                        account = %ctx.account,
                        space = %space,
                        object = %inner.object_id(),
                        "write rejected"
                    );
                    return Err(DocError::Forbidden(format!(
                        "{} is not a member of the space of {}",
                        ctx.account,
                        inner.object_id()
                    )));
                }
            }
        }
        self.provide_tx(ctx, tx)
    }

    fn find_all(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        if ctx.is_system() || class.as_str().is_empty() {
            return self.provide_find_all(ctx, class, query, options);
        }
        let forbidden = forbidden_spaces(&self.storage, &ctx.account)?;
        if forbidden.is_empty() {
            return self.provide_find_all(ctx, class, query, options);
        }

        if self.is_derived(class, &CLASS_SPACE)? {
            let mut result = self.provide_find_all(ctx, class, query, options)?;
            let before = result.docs.len();
            result
                .docs
                .retain(|doc| !forbidden.iter().any(|f| f.as_str() == doc.id.as_str()));
            let removed = before - result.docs.len();
            if let Some(total) = result.total.as_mut() {
                *total = total.saturating_sub(removed);
            }
            return Ok(result);
        }

        let key = if self.is_derived(class, &CLASS_TX)? {
            "objectSpace"
        } else {
            "space"
        };
        let Some(restricted) = restrict(query, key, &forbidden) else {
            return Ok(FindResult::empty());
        };
        let mut result = self.provide_find_all(ctx, class, &restricted, options)?;
        result.docs.retain(|doc| {
            space_of(doc, key).map_or(true, |space| !forbidden.iter().any(|f| f.as_str() == space))
        });
        Ok(result)
    }
}

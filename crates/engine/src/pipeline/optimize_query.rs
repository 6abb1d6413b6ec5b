//! Query normalization ahead of storage

use super::Middleware;
use crate::context::SessionContext;
use doctx_core::{Class, FindOptions, FindResult, Query, Ref, Result};
use serde_json::Value;
use tracing::warn;

/// Rejects queries that cannot match anything and simplifies the rest
pub struct OptimizeQueryMiddleware {
    next: Option<Box<dyn Middleware>>,
}

impl OptimizeQueryMiddleware {
    /// Wrap `next`
    pub fn new(next: Option<Box<dyn Middleware>>) -> Self {
        OptimizeQueryMiddleware { next }
    }
}

/// `{field: {$in: [x]}}` becomes `{field: x}`
fn optimize(query: &Query) -> Query {
    let mut optimized = query.clone();
    for value in optimized.values_mut() {
        let single = match value {
            Value::Object(preds) if preds.len() == 1 => match preds.get("$in") {
                Some(Value::Array(items)) if items.len() == 1 => Some(items[0].clone()),
                _ => None,
            },
            _ => None,
        };
        if let Some(single) = single {
            *value = single;
        }
    }
    optimized
}

impl Middleware for OptimizeQueryMiddleware {
    fn name(&self) -> &'static str {
        "optimize-query"
    }

    fn next(&self) -> Option<&dyn Middleware> {
        self.next.as_deref()
    }

    fn find_all(
        &self,
        ctx: &SessionContext,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        if class.as_str().is_empty() || matches!(query.get("_class"), Some(Value::Null)) {
            warn!(target: "doctx::pipeline", class = %class, "find without a class");
            return Ok(FindResult::empty());
        }
        self.provide_find_all(ctx, class, &optimize(query), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn q(value: Value) -> Query {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_single_in_becomes_equality() {
        let optimized = optimize(&q(json!({
            "status": {"$in": ["open"]},
            "kind": {"$in": ["a", "b"]},
            "rank": {"$in": [1], "$ne": 2}
        })));
        assert_eq!(optimized.get("status"), Some(&json!("open")));
        assert_eq!(optimized.get("kind"), Some(&json!({"$in": ["a", "b"]})));
        assert_eq!(optimized.get("rank"), Some(&json!({"$in": [1], "$ne": 2})));
    }

    #[test]
    fn test_missing_class_is_empty() {
        let middleware = OptimizeQueryMiddleware::new(None);
        let ctx = SessionContext::system();
        let result = middleware
            .find_all(&ctx, &Ref::new(""), &Query::new(), &FindOptions::default())
            .unwrap();
        assert!(result.is_empty());
        let result = middleware
            .find_all(&ctx, &Ref::new("test:class:Task"), &q(json!({"_class": null})), &FindOptions::default())
            .unwrap();
        assert!(result.is_empty());
    }
}

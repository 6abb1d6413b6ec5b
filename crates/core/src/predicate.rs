//! Query predicates
//!
//! An operator object (`{"$in": [...], "$ne": 3}`) is a set of predicates that
//! must all hold for the field value. Supported keys: `$in`, `$nin`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$exists`, `$size`, `$all`, `$like`,
//! `$regex` (with optional `$options`). Any other `$` key is an
//! `UnknownPredicate` error.

use crate::doc::Attributes;
use crate::error::{DocError, Result};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::cmp::Ordering;

/// True if `map` is an operator object: non-empty and every key starts with `$`
pub fn is_predicate(map: &Attributes) -> bool {
    !map.is_empty() && map.keys().all(|key| key.starts_with('$'))
}

/// A compiled predicate
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Value (or any array element) is one of the operands
    In(Vec<Value>),
    /// Value (and every array element) is none of the operands
    Nin(Vec<Value>),
    /// Value differs from the operand
    Ne(Value),
    /// Value is greater than the operand
    Gt(Value),
    /// Value is greater than or equal to the operand
    Gte(Value),
    /// Value is less than the operand
    Lt(Value),
    /// Value is less than or equal to the operand
    Lte(Value),
    /// Field presence
    Exists(bool),
    /// Array length
    Size(usize),
    /// Array contains every operand
    All(Vec<Value>),
    /// SQL-style `%` wildcard, case-insensitive, anchored
    Like(Regex),
    /// Raw regular expression
    Regex(Regex),
}

impl Predicate {
    /// Compile every predicate of an operator object
    pub fn parse_all(map: &Attributes) -> Result<Vec<Predicate>> {
        let mut predicates = Vec::with_capacity(map.len());
        for (key, operand) in map {
            let predicate = match key.as_str() {
                "$in" => Predicate::In(array_operand(key, operand)?),
                "$nin" => Predicate::Nin(array_operand(key, operand)?),
                "$all" => Predicate::All(array_operand(key, operand)?),
                "$ne" => Predicate::Ne(operand.clone()),
                "$gt" => Predicate::Gt(operand.clone()),
                "$gte" => Predicate::Gte(operand.clone()),
                "$lt" => Predicate::Lt(operand.clone()),
                "$lte" => Predicate::Lte(operand.clone()),
                "$exists" => Predicate::Exists(
                    operand
                        .as_bool()
                        .ok_or_else(|| DocError::invalid_predicate(key, "operand must be a boolean"))?,
                ),
                "$size" => Predicate::Size(
                    operand
                        .as_u64()
                        .map(|n| n as usize)
                        .ok_or_else(|| DocError::invalid_predicate(key, "operand must be a non-negative integer"))?,
                ),
                "$like" => Predicate::Like(like_regex(
                    operand
                        .as_str()
                        .ok_or_else(|| DocError::invalid_predicate(key, "operand must be a string"))?,
                )?),
                "$regex" => {
                    let pattern = operand
                        .as_str()
                        .ok_or_else(|| DocError::invalid_predicate(key, "operand must be a string"))?;
                    let options = map.get("$options").and_then(Value::as_str).unwrap_or("");
                    Predicate::Regex(build_regex(pattern, options)?)
                }
                // consumed together with `$regex`
                "$options" if map.contains_key("$regex") => continue,
                other => return Err(DocError::UnknownPredicate(other.to_string())),
            };
            predicates.push(predicate);
        }
        Ok(predicates)
    }

    /// Evaluate against a field value (`None` when the field is missing)
    pub fn test(&self, value: Option<&Value>) -> bool {
        match self {
            Predicate::In(options) => match value {
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| options.iter().any(|o| loose_eq(item, o))),
                Some(v) => options.iter().any(|o| loose_eq(v, o)),
                None => options.iter().any(Value::is_null),
            },
            Predicate::Nin(options) => !Predicate::In(options.clone()).test(value),
            Predicate::Ne(operand) => match value {
                Some(Value::Array(items)) => !items.iter().any(|item| loose_eq(item, operand)),
                Some(v) => !loose_eq(v, operand),
                None => !operand.is_null(),
            },
            Predicate::Gt(operand) => compare_opt(value, operand) == Some(Ordering::Greater),
            Predicate::Gte(operand) => matches!(
                compare_opt(value, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Lt(operand) => compare_opt(value, operand) == Some(Ordering::Less),
            Predicate::Lte(operand) => matches!(
                compare_opt(value, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Predicate::Exists(expected) => {
                let present = matches!(value, Some(v) if !v.is_null());
                present == *expected
            }
            Predicate::Size(size) => matches!(value, Some(Value::Array(items)) if items.len() == *size),
            Predicate::All(required) => match value {
                Some(Value::Array(items)) => required
                    .iter()
                    .all(|r| items.iter().any(|item| loose_eq(item, r))),
                _ => false,
            },
            Predicate::Like(re) | Predicate::Regex(re) => match value {
                Some(Value::String(s)) => re.is_match(s),
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| item.as_str().map(|s| re.is_match(s)).unwrap_or(false)),
                _ => false,
            },
        }
    }
}

fn array_operand(key: &str, operand: &Value) -> Result<Vec<Value>> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| DocError::invalid_predicate(key, "operand must be an array"))
}

/// Translate a `$like` pattern: `%` matches any run of characters, the rest
/// is literal
fn like_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('%')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    RegexBuilder::new(&format!("^{body}$"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| DocError::invalid_predicate("$like", e.to_string()))
}

fn build_regex(pattern: &str, options: &str) -> Result<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(DocError::invalid_predicate(
                    "$options",
                    format!("unsupported flag '{other}'"),
                ))
            }
        };
    }
    builder
        .build()
        .map_err(|e| DocError::invalid_predicate("$regex", e.to_string()))
}

/// Equality that treats `1` and `1.0` as the same number
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).map(|y| loose_eq(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Order two values of the same scalar type; `None` if incomparable
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values for sorting: null < numbers < strings <
/// bools < arrays < objects, values of one type compared among themselves
pub fn sort_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(x, y)| sort_order(x, y))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_opt(value: Option<&Value>, operand: &Value) -> Option<Ordering> {
    compare_values(value?, operand)
}

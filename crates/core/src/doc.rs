//! The document envelope
//!
//! Every persisted entity is a [`Doc`]: a fixed header (`_id`, `_class`,
//! `space`, `modifiedOn`, `modifiedBy`, `createdOn`) plus an open attribute
//! bag. Mixin fields live in a side table keyed by mixin class and are only
//! merged with the base attributes on read (see `Hierarchy::as_mixin`).

use crate::error::Result;
use crate::types::{Account, Class, Ref, Space, Timestamp};
use crate::classes::ACCOUNT_SYSTEM;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Open attribute bag
pub type Attributes = Map<String, Value>;

/// Header keys that never live in the attribute bag
pub const RESERVED_KEYS: &[&str] = &[
    "_id",
    "_class",
    "space",
    "modifiedOn",
    "modifiedBy",
    "createdOn",
    "$mixins",
];

/// Attribute key of the parent reference of an attached document
pub const ATTACHED_TO: &str = "attachedTo";
/// Attribute key of the declared parent class of an attached document
pub const ATTACHED_TO_CLASS: &str = "attachedToClass";
/// Attribute key of the parent collection of an attached document
pub const COLLECTION: &str = "collection";
/// Attribute key under which lookup results are placed
pub const LOOKUP: &str = "$lookup";

/// A document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    /// Document id
    #[serde(rename = "_id")]
    pub id: Ref<Doc>,
    /// Document class
    #[serde(rename = "_class")]
    pub class: Ref<Class>,
    /// Owning space
    pub space: Ref<Space>,
    /// Time of the last applied transaction
    #[serde(rename = "modifiedOn")]
    pub modified_on: Timestamp,
    /// Author of the last applied transaction
    #[serde(rename = "modifiedBy")]
    pub modified_by: Ref<Account>,
    /// Time of creation
    #[serde(rename = "createdOn", default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<Timestamp>,
    /// Mixin side table: mixin class -> field bag
    #[serde(rename = "$mixins", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mixins: BTreeMap<Ref<Class>, Attributes>,
    /// Attribute bag
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Doc {
    /// Create an empty document authored by the system account
    pub fn new(id: Ref<Doc>, class: Ref<Class>, space: Ref<Space>) -> Self {
        Doc {
            id,
            class,
            space,
            modified_on: 0,
            modified_by: ACCOUNT_SYSTEM,
            created_on: None,
            mixins: BTreeMap::new(),
            attributes: Attributes::new(),
        }
    }

    /// Builder-style attribute assignment
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attribute value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Attribute value as a string slice
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Parent document, for attached documents
    pub fn attached_to(&self) -> Option<Ref<Doc>> {
        self.get_str(ATTACHED_TO).map(Ref::new)
    }

    /// Declared parent class, for attached documents
    pub fn attached_to_class(&self) -> Option<Ref<Class>> {
        self.get_str(ATTACHED_TO_CLASS).map(Ref::new)
    }

    /// Parent collection name, for attached documents
    pub fn collection(&self) -> Option<&str> {
        self.get_str(COLLECTION)
    }

    /// Field bag of one mixin
    pub fn mixin(&self, mixin: &Ref<Class>) -> Option<&Attributes> {
        self.mixins.get(mixin)
    }

    /// JSON view used for query matching and wire output.
    ///
    /// Mixin bags are exposed under their mixin class id, so
    /// `"<mixin>.<field>"` paths resolve.
    pub fn to_value(&self) -> Value {
        let mut map = self.attributes.clone();
        map.insert("_id".to_string(), Value::String(self.id.to_string()));
        map.insert("_class".to_string(), Value::String(self.class.to_string()));
        map.insert("space".to_string(), Value::String(self.space.to_string()));
        map.insert("modifiedOn".to_string(), Value::from(self.modified_on));
        map.insert(
            "modifiedBy".to_string(),
            Value::String(self.modified_by.to_string()),
        );
        if let Some(created_on) = self.created_on {
            map.insert("createdOn".to_string(), Value::from(created_on));
        }
        for (mixin, bag) in &self.mixins {
            map.insert(mixin.to_string(), Value::Object(bag.clone()));
        }
        Value::Object(map)
    }

    /// Decode a document from its serialized form
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    // Space documents

    /// `private` flag of a space document
    pub fn is_private(&self) -> bool {
        self.get("private").and_then(Value::as_bool).unwrap_or(false)
    }

    /// `archived` flag of a space document
    pub fn is_archived(&self) -> bool {
        self.get("archived").and_then(Value::as_bool).unwrap_or(false)
    }

    /// True if `account` is listed in the `members` of a space document
    pub fn has_member(&self, account: &Ref<Account>) -> bool {
        self.get("members")
            .and_then(Value::as_array)
            .map(|members| {
                members
                    .iter()
                    .any(|member| member.as_str() == Some(account.as_str()))
            })
            .unwrap_or(false)
    }
}

/// Strip header keys from an attribute bag
pub fn without_reserved(attributes: &Attributes) -> Attributes {
    attributes
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

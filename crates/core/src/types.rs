//! Identifier and scalar types
//!
//! - `Ref<T>`: typed document reference (phantom-typed string id)
//! - `Class`, `Space`, `Account`: marker types for `Ref` targets
//! - `Domain`: storage domain name
//! - `Timestamp`: milliseconds since the Unix epoch

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::{Borrow, Cow};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Marker for references to classifiers (classes, mixins, interfaces)
#[derive(Debug)]
pub enum Class {}

/// Marker for references to spaces
#[derive(Debug)]
pub enum Space {}

/// Marker for references to accounts
#[derive(Debug)]
pub enum Account {}

/// Typed reference to a document
///
/// The type parameter only documents what the id points at; two refs compare
/// equal when their string ids are equal. Well-known ids are `const` thanks to
/// [`Ref::from_static`].
///
/// Serialized as a plain JSON string.
pub struct Ref<T> {
    id: Cow<'static, str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Ref<T> {
    /// Create a reference from a static string (usable in `const` items)
    pub const fn from_static(id: &'static str) -> Self {
        Ref {
            id: Cow::Borrowed(id),
            _marker: PhantomData,
        }
    }

    /// Create a reference from any string
    pub fn new(id: impl Into<String>) -> Self {
        Ref {
            id: Cow::Owned(id.into()),
            _marker: PhantomData,
        }
    }

    /// Generate a fresh unique id
    pub fn generate() -> Self {
        Ref::new(generate_id())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// Reinterpret as a reference to another target type
    pub fn cast<U>(&self) -> Ref<U> {
        Ref {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

/// Generate a unique document id
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Ref {
            id: self.id.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Ref<T> {}

impl<T> PartialOrd for Ref<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ref<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl<T> Borrow<str> for Ref<T> {
    fn borrow(&self) -> &str {
        &self.id
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({})", self.id)
    }
}

impl<T> fmt::Display for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl<T> From<&str> for Ref<T> {
    fn from(id: &str) -> Self {
        Ref::new(id)
    }
}

impl<T> From<String> for Ref<T> {
    fn from(id: String) -> Self {
        Ref::new(id)
    }
}

impl<T> Serialize for Ref<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}

impl<'de, T> Deserialize<'de> for Ref<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Ref::new)
    }
}

/// Storage domain name
///
/// Every class resolves to exactly one domain (see `Hierarchy::get_domain`);
/// the server routes reads and writes to the adapter registered for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(Cow<'static, str>);

impl Domain {
    /// Create a domain from a static string (usable in `const` items)
    pub const fn from_static(name: &'static str) -> Self {
        Domain(Cow::Borrowed(name))
    }

    /// Create a domain from any string
    pub fn new(name: impl Into<String>) -> Self {
        Domain(Cow::Owned(name.into()))
    }

    /// Get the domain name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

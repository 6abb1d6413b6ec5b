//! Schema descriptors carried by model documents
//!
//! Classifier documents (`core:class:Class`, `core:class:Mixin`,
//! `core:class:Interface`) and attribute documents (`core:class:Attribute`)
//! keep their payload in the document attribute bag. These types are the typed
//! reading of that bag.

use crate::classes;
use crate::doc::{Attributes, Doc};
use crate::error::{DocError, Result};
use crate::types::{Class, Domain, Ref};
use serde::{Deserialize, Serialize};

/// What kind of classifier a model document describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Regular class with instances
    Class,
    /// Extension record attached to instances of its base class
    Mixin,
    /// Marker contract a class may implement
    Interface,
}

impl ClassifierKind {
    /// Class id of the model documents describing this kind of classifier
    pub fn model_class(self) -> Ref<Class> {
        match self {
            ClassifierKind::Class => classes::CLASS_CLASS,
            ClassifierKind::Mixin => classes::CLASS_MIXIN,
            ClassifierKind::Interface => classes::CLASS_INTERFACE,
        }
    }

    /// Kind described by documents of `class`, if it is a classifier class
    pub fn from_model_class(class: &Ref<Class>) -> Option<Self> {
        if *class == classes::CLASS_CLASS {
            Some(ClassifierKind::Class)
        } else if *class == classes::CLASS_MIXIN {
            Some(ClassifierKind::Mixin)
        } else if *class == classes::CLASS_INTERFACE {
            Some(ClassifierKind::Interface)
        } else {
            None
        }
    }
}

/// Typed reading of a classifier document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    /// Classifier kind
    pub kind: ClassifierKind,
    /// Parent classifier (`None` only for the root)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<Ref<Class>>,
    /// Storage domain declared by this classifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    /// Interfaces implemented by this classifier
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub implements: Vec<Ref<Class>>,
    /// Human readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ClassDef {
    /// Class extending `extends`
    pub fn class(extends: Option<Ref<Class>>, domain: Option<Domain>) -> Self {
        ClassDef {
            kind: ClassifierKind::Class,
            extends,
            domain,
            implements: Vec::new(),
            label: None,
        }
    }

    /// Mixin over `extends`
    pub fn mixin(extends: Ref<Class>) -> Self {
        ClassDef {
            kind: ClassifierKind::Mixin,
            extends: Some(extends),
            domain: None,
            implements: Vec::new(),
            label: None,
        }
    }

    /// Interface extending the given interfaces
    pub fn interface(extends: Vec<Ref<Class>>) -> Self {
        ClassDef {
            kind: ClassifierKind::Interface,
            extends: None,
            domain: None,
            implements: extends,
            label: None,
        }
    }

    /// Read the definition off a classifier document
    pub fn from_doc(doc: &Doc) -> Result<Self> {
        let kind = ClassifierKind::from_model_class(&doc.class)
            .ok_or_else(|| DocError::ClassNotFound(doc.class.to_string()))?;
        let mut attributes = doc.attributes.clone();
        attributes.insert("kind".to_string(), serde_json::to_value(kind)?);
        Ok(serde_json::from_value(serde_json::Value::Object(attributes))?)
    }

    /// Attribute bag stored on the classifier document
    pub fn to_attributes(&self) -> Result<Attributes> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(mut map) => {
                map.remove("kind");
                Ok(map)
            }
            _ => Err(DocError::internal("class definition did not serialize to an object")),
        }
    }
}

/// Attribute value type
///
/// Serialized with a `_class` tag naming the type class, e.g.
/// `{"_class": "core:class:RefTo", "to": "tracker:class:Issue"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_class")]
pub enum AttributeType {
    /// Plain string
    #[serde(rename = "core:class:TypeString")]
    String,
    /// Number
    #[serde(rename = "core:class:TypeNumber")]
    Number,
    /// Boolean
    #[serde(rename = "core:class:TypeBoolean")]
    Boolean,
    /// Timestamp in milliseconds
    #[serde(rename = "core:class:TypeDate")]
    Date,
    /// Rich text
    #[serde(rename = "core:class:TypeMarkup")]
    Markup,
    /// Reference to a document of class `to`
    #[serde(rename = "core:class:RefTo")]
    RefTo {
        /// Target class
        to: Ref<Class>,
    },
    /// Attached collection of documents of class `of`; the parent keeps the
    /// cached element count under the attribute name
    #[serde(rename = "core:class:Collection")]
    Collection {
        /// Element class
        of: Ref<Class>,
    },
    /// Array of values of type `of`
    #[serde(rename = "core:class:ArrOf")]
    ArrOf {
        /// Element type
        of: Box<AttributeType>,
    },
}

impl AttributeType {
    /// True for `Collection` attributes
    pub fn is_collection(&self) -> bool {
        matches!(self, AttributeType::Collection { .. })
    }
}

/// Typed reading of an attribute document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDef {
    /// Declaring classifier
    pub attribute_of: Ref<Class>,
    /// Attribute name (the document field it describes)
    pub name: String,
    /// Value type
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Human readable label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl AttributeDef {
    /// Create an attribute definition
    pub fn new(attribute_of: Ref<Class>, name: impl Into<String>, attr_type: AttributeType) -> Self {
        AttributeDef {
            attribute_of,
            name: name.into(),
            attr_type,
            label: None,
        }
    }

    /// Conventional document id: `<class>_<name>`
    pub fn doc_id(&self) -> Ref<Doc> {
        Ref::new(format!("{}_{}", self.attribute_of, self.name))
    }

    /// Read the definition off an attribute document
    pub fn from_doc(doc: &Doc) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(
            doc.attributes.clone(),
        ))?)
    }

    /// Attribute bag stored on the attribute document
    pub fn to_attributes(&self) -> Result<Attributes> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(DocError::internal("attribute definition did not serialize to an object")),
        }
    }
}

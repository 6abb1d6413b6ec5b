//! Model construction
//!
//! A [`Builder`] records the transactions that create classifiers, attributes
//! and model documents. The resulting list is what a fresh workspace writes to
//! its log before accepting user transactions; replaying it reproduces the
//! same [`Hierarchy`](crate::hierarchy::Hierarchy).
//!
//! ```ignore
//! let mut b = Builder::new();
//! core_model(&mut b);
//! b.create_class(ISSUE, CLASS_DOC, Some(Domain::new("task")))
//!     .attribute("title", AttributeType::String);
//! ```

use crate::classes::*;
use crate::doc::{Attributes, Doc};
use crate::operations::TxFactory;
use crate::schema::{AttributeDef, AttributeType, ClassDef};
use crate::tx::Tx;
use crate::types::{Class, Domain, Ref, Space};
use serde_json::json;

/// Records model transactions
#[derive(Debug, Clone)]
pub struct Builder {
    factory: TxFactory,
    space: Ref<Space>,
    txes: Vec<Tx>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Empty builder authoring as the system account into the model space
    pub fn new() -> Self {
        Builder {
            factory: TxFactory::new(ACCOUNT_SYSTEM),
            space: SPACE_MODEL,
            txes: Vec::new(),
        }
    }

    fn push(&mut self, mut tx: Tx) {
        // model transactions carry no wall-clock time so replays are identical
        tx.stamp(0, &ACCOUNT_SYSTEM);
        self.txes.push(tx);
    }

    /// Declare a class
    pub fn create_class(
        &mut self,
        id: Ref<Class>,
        extends: Ref<Class>,
        domain: Option<Domain>,
    ) -> ClassBuilder<'_> {
        self.create_classifier(id, ClassDef::class(Some(extends), domain))
    }

    /// Declare a mixin over `extends`
    pub fn create_mixin(&mut self, id: Ref<Class>, extends: Ref<Class>) -> ClassBuilder<'_> {
        self.create_classifier(id, ClassDef::mixin(extends))
    }

    /// Declare an interface
    pub fn create_interface(&mut self, id: Ref<Class>, extends: Vec<Ref<Class>>) -> ClassBuilder<'_> {
        self.create_classifier(id, ClassDef::interface(extends))
    }

    /// Declare a classifier from a full definition
    pub fn create_classifier(&mut self, id: Ref<Class>, def: ClassDef) -> ClassBuilder<'_> {
        let attributes = class_attributes(&def);
        let tx = self.factory.create_tx_create_doc(
            def.kind.model_class(),
            self.space.clone(),
            attributes,
            Some(id.cast()),
        );
        self.push(tx);
        ClassBuilder {
            builder: self,
            id,
            def,
        }
    }

    /// Create a model document and return its id
    pub fn create_doc(
        &mut self,
        class: Ref<Class>,
        space: Ref<Space>,
        attributes: Attributes,
        id: Option<Ref<Doc>>,
    ) -> Ref<Doc> {
        let tx = self.factory.create_tx_create_doc(class, space, attributes, id);
        let id = tx.object_id().clone();
        self.push(tx);
        id
    }

    /// Apply `mixin` to a model document
    pub fn mixin(&mut self, id: Ref<Doc>, class: Ref<Class>, mixin: Ref<Class>, attributes: Attributes) {
        let tx = self
            .factory
            .create_tx_mixin(id, class, self.space.clone(), mixin, attributes);
        self.push(tx);
    }

    /// Update a model document
    pub fn update_doc(&mut self, class: Ref<Class>, id: Ref<Doc>, operations: Attributes) {
        let tx = self
            .factory
            .create_tx_update_doc(class, self.space.clone(), id, operations);
        self.push(tx);
    }

    /// Remove a model document
    pub fn remove_doc(&mut self, class: Ref<Class>, id: Ref<Doc>) {
        let tx = self
            .factory
            .create_tx_remove_doc(class, self.space.clone(), id);
        self.push(tx);
    }

    /// Recorded transactions in order
    pub fn txes(&self) -> &[Tx] {
        &self.txes
    }

    /// Take the recorded transactions
    pub fn into_txes(self) -> Vec<Tx> {
        self.txes
    }
}

fn class_attributes(def: &ClassDef) -> Attributes {
    // ClassDef always serializes to an object; an empty bag is unreachable
    def.to_attributes().unwrap_or_default()
}

/// Continues a classifier declaration with attributes and interfaces
pub struct ClassBuilder<'a> {
    builder: &'a mut Builder,
    id: Ref<Class>,
    def: ClassDef,
}

impl ClassBuilder<'_> {
    /// Id of the declared classifier
    pub fn id(&self) -> &Ref<Class> {
        &self.id
    }

    /// Declare an attribute owned by this classifier
    pub fn attribute(self, name: &str, attr_type: AttributeType) -> Self {
        let def = AttributeDef::new(self.id.clone(), name, attr_type);
        if let Ok(attributes) = def.to_attributes() {
            let tx = self.builder.factory.create_tx_create_doc(
                CLASS_ATTRIBUTE,
                self.builder.space.clone(),
                attributes,
                Some(def.doc_id()),
            );
            self.builder.push(tx);
        }
        self
    }

    /// Add implemented interfaces
    pub fn implements(mut self, interfaces: Vec<Ref<Class>>) -> Self {
        self.def.implements.extend(interfaces);
        let mut operations = Attributes::new();
        operations.insert("implements".to_string(), json!(self.def.implements));
        self.builder
            .update_doc(self.def.kind.model_class(), self.id.cast(), operations);
        self
    }
}

/// Record the core model: root classes, transaction classes, attribute
/// types and the system attributes of attached documents and spaces
pub fn core_model(b: &mut Builder) {
    b.create_classifier(CLASS_OBJ, ClassDef::class(None, None));

    b.create_class(CLASS_DOC, CLASS_OBJ, None);
    b.create_class(CLASS_ATTACHED_DOC, CLASS_DOC, None)
        .attribute("attachedTo", AttributeType::RefTo { to: CLASS_DOC })
        .attribute("attachedToClass", AttributeType::RefTo { to: CLASS_CLASS })
        .attribute("collection", AttributeType::String);

    for class in [CLASS_CLASS, CLASS_MIXIN, CLASS_INTERFACE, CLASS_ATTRIBUTE] {
        b.create_class(class, CLASS_DOC, Some(DOMAIN_MODEL));
    }

    b.create_class(CLASS_SPACE, CLASS_DOC, Some(DOMAIN_SPACE))
        .attribute("name", AttributeType::String)
        .attribute("private", AttributeType::Boolean)
        .attribute("archived", AttributeType::Boolean)
        .attribute(
            "members",
            AttributeType::ArrOf {
                of: Box::new(AttributeType::String),
            },
        );

    b.create_class(CLASS_TX, CLASS_DOC, Some(DOMAIN_TX));
    b.create_class(CLASS_TX_CUD, CLASS_TX, None);
    for class in [
        CLASS_TX_CREATE_DOC,
        CLASS_TX_UPDATE_DOC,
        CLASS_TX_REMOVE_DOC,
        CLASS_TX_MIXIN,
        CLASS_TX_COLLECTION_CUD,
        CLASS_TX_PUT_BAG,
    ] {
        b.create_class(class, CLASS_TX_CUD, None);
    }
    b.create_class(CLASS_TX_APPLY_IF, CLASS_TX, None);

    for class in [
        CLASS_TYPE_STRING,
        CLASS_TYPE_NUMBER,
        CLASS_TYPE_BOOLEAN,
        CLASS_TYPE_DATE,
        CLASS_TYPE_MARKUP,
        CLASS_REF_TO,
        CLASS_COLLECTION,
        CLASS_ARR_OF,
    ] {
        b.create_class(class, CLASS_OBJ, None);
    }
}

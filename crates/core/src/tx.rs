//! Transaction wire model
//!
//! A [`Tx`] is the only way state changes. Every kind shares the
//! [`TxHeader`] (`_id`, `space`, `modifiedOn`, `modifiedBy`, `objectId`,
//! `objectClass`, `objectSpace`) and is tagged on the wire by `_class`.
//! Field names are part of the persisted log format and must not change.

use crate::classes::{self, SPACE_DERIVED_TX, SPACE_MODEL};
use crate::doc::{Attributes, Doc, ATTACHED_TO};
use crate::error::{DocError, Result};
use crate::types::{Account, Class, Ref, Space, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields shared by every transaction kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxHeader {
    /// Transaction id
    #[serde(rename = "_id")]
    pub id: Ref<Doc>,
    /// Space of the transaction itself (`core:space:Tx` or `core:space:DerivedTx`)
    pub space: Ref<Space>,
    /// Server-stamped modification time
    pub modified_on: Timestamp,
    /// Server-stamped author
    pub modified_by: Ref<Account>,
    /// Target document
    pub object_id: Ref<Doc>,
    /// Class of the target document
    pub object_class: Ref<Class>,
    /// Space of the target document
    pub object_space: Ref<Space>,
}

/// Create a document from an attribute set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxCreateDoc {
    /// Common fields
    #[serde(flatten)]
    pub header: TxHeader,
    /// Initial attributes
    pub attributes: Attributes,
}

/// Operator-based partial update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxUpdateDoc {
    /// Common fields
    #[serde(flatten)]
    pub header: TxHeader,
    /// Plain keys assign, `$push`/`$pull`/`$inc`/`$unset` operate
    pub operations: Attributes,
    /// Ask the server to return the updated document
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retrieve: bool,
}

/// Remove a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRemoveDoc {
    /// Common fields
    #[serde(flatten)]
    pub header: TxHeader,
}

/// Merge attributes into one mixin bag of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxMixin {
    /// Common fields
    #[serde(flatten)]
    pub header: TxHeader,
    /// Mixin class
    pub mixin: Ref<Class>,
    /// Mixin fields to merge
    pub attributes: Attributes,
}

/// Transaction on an attached document, addressed through its parent.
///
/// The header targets the parent (`objectId` is the parent id and
/// `objectClass` its declared class), `tx` targets the attached document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxCollectionCud {
    /// Common fields
    #[serde(flatten)]
    pub header: TxHeader,
    /// Collection on the parent
    pub collection: String,
    /// Inner transaction on the attached document
    pub tx: Box<Tx>,
}

/// Query that must (or must not) find a document for an apply-if to proceed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCondition {
    /// Class to search
    #[serde(rename = "_class")]
    pub class: Ref<Class>,
    /// Query object
    pub query: Attributes,
}

/// Guarded compound transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxApplyIf {
    /// Common fields
    #[serde(flatten)]
    pub header: TxHeader,
    /// Serialization scope
    pub scope: String,
    /// Every condition must find at least one document
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<MatchCondition>,
    /// No condition may find a document
    #[serde(rename = "notMatch", default, skip_serializing_if = "Vec::is_empty")]
    pub not_matches: Vec<MatchCondition>,
    /// Transactions applied as one unit
    pub txes: Vec<Tx>,
}

/// Untyped bag write: `doc[bag][key] = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxPutBag {
    /// Common fields
    #[serde(flatten)]
    pub header: TxHeader,
    /// Bag attribute
    pub bag: String,
    /// Key inside the bag
    pub key: String,
    /// Stored value
    pub value: Value,
}

/// A transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_class")]
pub enum Tx {
    /// Document creation
    #[serde(rename = "core:class:TxCreateDoc")]
    CreateDoc(TxCreateDoc),
    /// Document update
    #[serde(rename = "core:class:TxUpdateDoc")]
    UpdateDoc(TxUpdateDoc),
    /// Document removal
    #[serde(rename = "core:class:TxRemoveDoc")]
    RemoveDoc(TxRemoveDoc),
    /// Mixin application
    #[serde(rename = "core:class:TxMixin")]
    Mixin(TxMixin),
    /// Attached document transaction
    #[serde(rename = "core:class:TxCollectionCUD")]
    CollectionCud(TxCollectionCud),
    /// Guarded compound transaction
    #[serde(rename = "core:class:TxApplyIf")]
    ApplyIf(TxApplyIf),
    /// Bag write
    #[serde(rename = "core:class:TxPutBag")]
    PutBag(TxPutBag),
}

/// Transaction kind without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    /// `TxCreateDoc`
    CreateDoc,
    /// `TxUpdateDoc`
    UpdateDoc,
    /// `TxRemoveDoc`
    RemoveDoc,
    /// `TxMixin`
    Mixin,
    /// `TxCollectionCUD`
    CollectionCud,
    /// `TxApplyIf`
    ApplyIf,
    /// `TxPutBag`
    PutBag,
}

impl TxKind {
    /// All kinds
    pub const ALL: [TxKind; 7] = [
        TxKind::CreateDoc,
        TxKind::UpdateDoc,
        TxKind::RemoveDoc,
        TxKind::Mixin,
        TxKind::CollectionCud,
        TxKind::ApplyIf,
        TxKind::PutBag,
    ];

    /// Wire `_class` of this kind
    pub fn class(self) -> Ref<Class> {
        match self {
            TxKind::CreateDoc => classes::CLASS_TX_CREATE_DOC,
            TxKind::UpdateDoc => classes::CLASS_TX_UPDATE_DOC,
            TxKind::RemoveDoc => classes::CLASS_TX_REMOVE_DOC,
            TxKind::Mixin => classes::CLASS_TX_MIXIN,
            TxKind::CollectionCud => classes::CLASS_TX_COLLECTION_CUD,
            TxKind::ApplyIf => classes::CLASS_TX_APPLY_IF,
            TxKind::PutBag => classes::CLASS_TX_PUT_BAG,
        }
    }

    /// Kind for a wire `_class`
    pub fn from_class(class: &str) -> Option<Self> {
        TxKind::ALL
            .into_iter()
            .find(|kind| kind.class().as_str() == class)
    }
}

/// Outcome of applying one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxResult {
    /// False only for an apply-if whose conditions did not hold
    pub applied: bool,
}

impl TxResult {
    /// Transaction took effect
    pub const APPLIED: TxResult = TxResult { applied: true };
    /// Apply-if conditions did not hold
    pub const NOT_APPLIED: TxResult = TxResult { applied: false };
}

impl Default for TxResult {
    fn default() -> Self {
        TxResult::APPLIED
    }
}

impl Tx {
    /// Decode a wire transaction.
    ///
    /// An unknown `_class` anywhere in the tree is rejected with
    /// `UnknownTxKind` before decoding.
    pub fn from_value(value: Value) -> Result<Self> {
        check_kinds(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    /// Decode from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Tx::from_value(serde_json::from_str(json)?)
    }

    /// Encode to the wire shape
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Kind of this transaction
    pub fn kind(&self) -> TxKind {
        match self {
            Tx::CreateDoc(_) => TxKind::CreateDoc,
            Tx::UpdateDoc(_) => TxKind::UpdateDoc,
            Tx::RemoveDoc(_) => TxKind::RemoveDoc,
            Tx::Mixin(_) => TxKind::Mixin,
            Tx::CollectionCud(_) => TxKind::CollectionCud,
            Tx::ApplyIf(_) => TxKind::ApplyIf,
            Tx::PutBag(_) => TxKind::PutBag,
        }
    }

    /// Wire `_class`
    pub fn class(&self) -> Ref<Class> {
        self.kind().class()
    }

    /// Common fields
    pub fn header(&self) -> &TxHeader {
        match self {
            Tx::CreateDoc(tx) => &tx.header,
            Tx::UpdateDoc(tx) => &tx.header,
            Tx::RemoveDoc(tx) => &tx.header,
            Tx::Mixin(tx) => &tx.header,
            Tx::CollectionCud(tx) => &tx.header,
            Tx::ApplyIf(tx) => &tx.header,
            Tx::PutBag(tx) => &tx.header,
        }
    }

    /// Mutable common fields
    pub fn header_mut(&mut self) -> &mut TxHeader {
        match self {
            Tx::CreateDoc(tx) => &mut tx.header,
            Tx::UpdateDoc(tx) => &mut tx.header,
            Tx::RemoveDoc(tx) => &mut tx.header,
            Tx::Mixin(tx) => &mut tx.header,
            Tx::CollectionCud(tx) => &mut tx.header,
            Tx::ApplyIf(tx) => &mut tx.header,
            Tx::PutBag(tx) => &mut tx.header,
        }
    }

    /// Transaction id
    pub fn id(&self) -> &Ref<Doc> {
        &self.header().id
    }

    /// Target document
    pub fn object_id(&self) -> &Ref<Doc> {
        &self.header().object_id
    }

    /// Class of the target document
    pub fn object_class(&self) -> &Ref<Class> {
        &self.header().object_class
    }

    /// Space of the target document
    pub fn object_space(&self) -> &Ref<Space> {
        &self.header().object_space
    }

    /// True for trigger-derived transactions
    pub fn is_derived(&self) -> bool {
        self.header().space == SPACE_DERIVED_TX
    }

    /// Move this transaction and every nested one out of the derived space
    pub fn clear_derived(&mut self) {
        if self.header().space == SPACE_DERIVED_TX {
            self.header_mut().space = classes::SPACE_TX;
        }
        match self {
            Tx::CollectionCud(cud) => cud.tx.clear_derived(),
            Tx::ApplyIf(apply) => {
                for tx in &mut apply.txes {
                    tx.clear_derived();
                }
            }
            _ => {}
        }
    }

    /// True if this transaction (or any nested one) targets the model space
    pub fn touches_model(&self) -> bool {
        self.extract().iter().any(|tx| *tx.object_space() == SPACE_MODEL)
    }

    /// This transaction followed by every nested one, depth first
    pub fn extract(&self) -> Vec<&Tx> {
        let mut out = vec![self];
        match self {
            Tx::CollectionCud(cud) => out.extend(cud.tx.extract()),
            Tx::ApplyIf(apply) => {
                for tx in &apply.txes {
                    out.extend(tx.extract());
                }
            }
            _ => {}
        }
        out
    }

    /// Ids of every document this transaction may write
    pub fn affected_ids(&self) -> Vec<Ref<Doc>> {
        let mut ids: Vec<Ref<Doc>> = Vec::new();
        for tx in self.extract() {
            if matches!(tx, Tx::ApplyIf(_)) {
                continue;
            }
            if !ids.contains(tx.object_id()) {
                ids.push(tx.object_id().clone());
            }
            // a moved attached document also changes its new parent
            if let Tx::CollectionCud(cud) = tx {
                if let Tx::UpdateDoc(update) = cud.tx.as_ref() {
                    if let Some(target) = update.operations.get(ATTACHED_TO).and_then(Value::as_str) {
                        let target = Ref::new(target);
                        if !ids.contains(&target) {
                            ids.push(target);
                        }
                    }
                }
            }
        }
        ids
    }

    /// Stamp time and author on this transaction and every nested one
    pub fn stamp(&mut self, modified_on: Timestamp, modified_by: &Ref<Account>) {
        {
            let header = self.header_mut();
            header.modified_on = modified_on;
            header.modified_by = modified_by.clone();
        }
        match self {
            Tx::CollectionCud(cud) => cud.tx.stamp(modified_on, modified_by),
            Tx::ApplyIf(apply) => {
                for tx in &mut apply.txes {
                    tx.stamp(modified_on, modified_by);
                }
            }
            _ => {}
        }
    }

    /// Transaction as a document of the `tx` domain, so the log can be
    /// queried like any other collection
    pub fn to_doc(&self) -> Result<Doc> {
        Doc::from_value(self.to_value()?)
    }

    /// Transaction stored as a document of the `tx` domain
    pub fn from_doc(doc: &Doc) -> Result<Self> {
        Tx::from_value(doc.to_value())
    }
}

fn check_kinds(value: &Value) -> Result<()> {
    let class = value
        .get("_class")
        .and_then(Value::as_str)
        .ok_or_else(|| DocError::UnknownTxKind("<missing _class>".to_string()))?;
    match TxKind::from_class(class) {
        None => Err(DocError::UnknownTxKind(class.to_string())),
        Some(TxKind::CollectionCud) => match value.get("tx") {
            Some(inner) => check_kinds(inner),
            None => Ok(()),
        },
        Some(TxKind::ApplyIf) => {
            if let Some(txes) = value.get("txes").and_then(Value::as_array) {
                for inner in txes {
                    check_kinds(inner)?;
                }
            }
            Ok(())
        }
        Some(_) => Ok(()),
    }
}

//! Transaction construction
//!
//! [`TxFactory`] builds well-formed transactions for one author;
//! [`TxOperations`] wraps a [`Storage`] with document-level helpers
//! (`create_doc`, `update_doc`, `add_collection`, ...) and guarded batches
//! via [`TxOperations::apply`].

use crate::classes::{SPACE_DERIVED_TX, SPACE_TX};
use crate::client::Storage;
use crate::doc::{Attributes, Doc};
use crate::error::Result;
use crate::query::{FindOptions, FindResult, Query};
use crate::tx::{
    MatchCondition, Tx, TxApplyIf, TxCollectionCud, TxCreateDoc, TxHeader, TxMixin, TxPutBag,
    TxRemoveDoc, TxResult, TxUpdateDoc,
};
use crate::types::{now, Account, Class, Ref, Space, Timestamp};
use serde_json::Value;

/// Builds transactions authored by one account
#[derive(Debug, Clone)]
pub struct TxFactory {
    account: Ref<Account>,
    space: Ref<Space>,
    modified_on: Option<Timestamp>,
}

impl TxFactory {
    /// Factory for user transactions (`core:space:Tx`, current time)
    pub fn new(account: Ref<Account>) -> Self {
        TxFactory {
            account,
            space: SPACE_TX,
            modified_on: None,
        }
    }

    /// Factory for trigger output: `core:space:DerivedTx`, with the author
    /// and time of the originating transaction
    pub fn derived(account: Ref<Account>, modified_on: Timestamp) -> Self {
        TxFactory {
            account,
            space: SPACE_DERIVED_TX,
            modified_on: Some(modified_on),
        }
    }

    /// Author
    pub fn account(&self) -> &Ref<Account> {
        &self.account
    }

    /// Space the produced transactions are placed in
    pub fn tx_space(&self) -> &Ref<Space> {
        &self.space
    }

    fn header(&self, object_id: Ref<Doc>, object_class: Ref<Class>, object_space: Ref<Space>) -> TxHeader {
        TxHeader {
            id: Ref::generate(),
            space: self.space.clone(),
            modified_on: self.modified_on.unwrap_or_else(now),
            modified_by: self.account.clone(),
            object_id,
            object_class,
            object_space,
        }
    }

    /// `TxCreateDoc`; a fresh id is generated when `id` is `None`
    pub fn create_tx_create_doc(
        &self,
        class: Ref<Class>,
        space: Ref<Space>,
        attributes: Attributes,
        id: Option<Ref<Doc>>,
    ) -> Tx {
        let id = id.unwrap_or_else(Ref::generate);
        Tx::CreateDoc(TxCreateDoc {
            header: self.header(id, class, space),
            attributes,
        })
    }

    /// `TxUpdateDoc`
    pub fn create_tx_update_doc(
        &self,
        class: Ref<Class>,
        space: Ref<Space>,
        id: Ref<Doc>,
        operations: Attributes,
    ) -> Tx {
        Tx::UpdateDoc(TxUpdateDoc {
            header: self.header(id, class, space),
            operations,
            retrieve: false,
        })
    }

    /// `TxRemoveDoc`
    pub fn create_tx_remove_doc(&self, class: Ref<Class>, space: Ref<Space>, id: Ref<Doc>) -> Tx {
        Tx::RemoveDoc(TxRemoveDoc {
            header: self.header(id, class, space),
        })
    }

    /// `TxMixin`
    pub fn create_tx_mixin(
        &self,
        id: Ref<Doc>,
        class: Ref<Class>,
        space: Ref<Space>,
        mixin: Ref<Class>,
        attributes: Attributes,
    ) -> Tx {
        Tx::Mixin(TxMixin {
            header: self.header(id, class, space),
            mixin,
            attributes,
        })
    }

    /// `TxCollectionCUD` addressed to `collection` of parent `id`
    pub fn create_tx_collection_cud(
        &self,
        class: Ref<Class>,
        id: Ref<Doc>,
        space: Ref<Space>,
        collection: impl Into<String>,
        tx: Tx,
    ) -> Tx {
        Tx::CollectionCud(TxCollectionCud {
            header: self.header(id, class, space),
            collection: collection.into(),
            tx: Box::new(tx),
        })
    }

    /// `TxApplyIf` serialized on `scope`
    pub fn create_tx_apply_if(
        &self,
        scope: impl Into<String>,
        matches: Vec<MatchCondition>,
        not_matches: Vec<MatchCondition>,
        txes: Vec<Tx>,
    ) -> Tx {
        let scope = scope.into();
        Tx::ApplyIf(TxApplyIf {
            header: self.header(Ref::new(scope.clone()), crate::classes::CLASS_TX_APPLY_IF, self.space.clone()),
            scope,
            matches,
            not_matches,
            txes,
        })
    }

    /// `TxPutBag`
    pub fn create_tx_put_bag(
        &self,
        class: Ref<Class>,
        space: Ref<Space>,
        id: Ref<Doc>,
        bag: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Tx {
        Tx::PutBag(TxPutBag {
            header: self.header(id, class, space),
            bag: bag.into(),
            key: key.into(),
            value,
        })
    }
}

/// Document-level helpers over a [`Storage`]
pub struct TxOperations<C> {
    client: C,
    factory: TxFactory,
}

impl<C: Storage> TxOperations<C> {
    /// Helpers submitting as `account`
    pub fn new(client: C, account: Ref<Account>) -> Self {
        TxOperations {
            client,
            factory: TxFactory::new(account),
        }
    }

    /// Underlying storage
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Transaction factory
    pub fn factory(&self) -> &TxFactory {
        &self.factory
    }

    /// Find documents
    pub fn find_all(&self, class: &Ref<Class>, query: &Query, options: &FindOptions) -> Result<FindResult> {
        self.client.find_all(class, query, options)
    }

    /// First matching document
    pub fn find_one(&self, class: &Ref<Class>, query: &Query) -> Result<Option<Doc>> {
        self.client.find_one(class, query, &FindOptions::default())
    }

    /// Create a document and return its id
    pub fn create_doc(
        &self,
        class: Ref<Class>,
        space: Ref<Space>,
        attributes: Attributes,
        id: Option<Ref<Doc>>,
    ) -> Result<Ref<Doc>> {
        let tx = self.factory.create_tx_create_doc(class, space, attributes, id);
        let id = tx.object_id().clone();
        self.client.tx(tx)?;
        Ok(id)
    }

    /// Update a document
    pub fn update_doc(
        &self,
        class: Ref<Class>,
        space: Ref<Space>,
        id: Ref<Doc>,
        operations: Attributes,
    ) -> Result<TxResult> {
        self.client
            .tx(self.factory.create_tx_update_doc(class, space, id, operations))
    }

    /// Remove a document
    pub fn remove_doc(&self, class: Ref<Class>, space: Ref<Space>, id: Ref<Doc>) -> Result<TxResult> {
        self.client
            .tx(self.factory.create_tx_remove_doc(class, space, id))
    }

    /// Apply a mixin to a document
    pub fn create_mixin(
        &self,
        id: Ref<Doc>,
        class: Ref<Class>,
        space: Ref<Space>,
        mixin: Ref<Class>,
        attributes: Attributes,
    ) -> Result<TxResult> {
        self.client
            .tx(self.factory.create_tx_mixin(id, class, space, mixin, attributes))
    }

    /// Update mixin fields (same transaction as `create_mixin`)
    pub fn update_mixin(
        &self,
        id: Ref<Doc>,
        class: Ref<Class>,
        space: Ref<Space>,
        mixin: Ref<Class>,
        attributes: Attributes,
    ) -> Result<TxResult> {
        self.create_mixin(id, class, space, mixin, attributes)
    }

    /// Create an attached document in `collection` of the parent
    #[allow(clippy::too_many_arguments)]
    pub fn add_collection(
        &self,
        class: Ref<Class>,
        space: Ref<Space>,
        attached_to: Ref<Doc>,
        attached_to_class: Ref<Class>,
        collection: impl Into<String>,
        attributes: Attributes,
        id: Option<Ref<Doc>>,
    ) -> Result<Ref<Doc>> {
        let inner = self
            .factory
            .create_tx_create_doc(class, space.clone(), attributes, id);
        let id = inner.object_id().clone();
        let tx = self.factory.create_tx_collection_cud(
            attached_to_class,
            attached_to,
            space,
            collection,
            inner,
        );
        self.client.tx(tx)?;
        Ok(id)
    }

    /// Update an attached document
    #[allow(clippy::too_many_arguments)]
    pub fn update_collection(
        &self,
        class: Ref<Class>,
        space: Ref<Space>,
        id: Ref<Doc>,
        attached_to: Ref<Doc>,
        attached_to_class: Ref<Class>,
        collection: impl Into<String>,
        operations: Attributes,
    ) -> Result<TxResult> {
        let inner = self
            .factory
            .create_tx_update_doc(class, space.clone(), id, operations);
        self.client.tx(self.factory.create_tx_collection_cud(
            attached_to_class,
            attached_to,
            space,
            collection,
            inner,
        ))
    }

    /// Remove an attached document
    pub fn remove_collection(
        &self,
        class: Ref<Class>,
        space: Ref<Space>,
        id: Ref<Doc>,
        attached_to: Ref<Doc>,
        attached_to_class: Ref<Class>,
        collection: impl Into<String>,
    ) -> Result<TxResult> {
        let inner = self.factory.create_tx_remove_doc(class, space.clone(), id);
        self.client.tx(self.factory.create_tx_collection_cud(
            attached_to_class,
            attached_to,
            space,
            collection,
            inner,
        ))
    }

    /// Write one key of a bag attribute
    pub fn put_bag(
        &self,
        class: Ref<Class>,
        space: Ref<Space>,
        id: Ref<Doc>,
        bag: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Result<TxResult> {
        self.client
            .tx(self.factory.create_tx_put_bag(class, space, id, bag, key, value))
    }

    /// Start a guarded batch serialized on `scope`
    pub fn apply(&self, scope: impl Into<String>) -> ApplyOperations<'_, C> {
        ApplyOperations {
            ops: self,
            scope: scope.into(),
            matches: Vec::new(),
            not_matches: Vec::new(),
            txes: Vec::new(),
        }
    }
}

/// Guarded batch: collected transactions are committed as one `TxApplyIf`
pub struct ApplyOperations<'a, C> {
    ops: &'a TxOperations<C>,
    scope: String,
    matches: Vec<MatchCondition>,
    not_matches: Vec<MatchCondition>,
    txes: Vec<Tx>,
}

impl<C: Storage> ApplyOperations<'_, C> {
    /// Require at least one document of `class` to match `query`
    pub fn if_match(mut self, class: Ref<Class>, query: Query) -> Self {
        self.matches.push(MatchCondition { class, query });
        self
    }

    /// Require no document of `class` to match `query`
    pub fn if_not_match(mut self, class: Ref<Class>, query: Query) -> Self {
        self.not_matches.push(MatchCondition { class, query });
        self
    }

    /// Add a creation to the batch and return the new id
    pub fn create_doc(
        &mut self,
        class: Ref<Class>,
        space: Ref<Space>,
        attributes: Attributes,
        id: Option<Ref<Doc>>,
    ) -> Ref<Doc> {
        let tx = self
            .ops
            .factory
            .create_tx_create_doc(class, space, attributes, id);
        let id = tx.object_id().clone();
        self.txes.push(tx);
        id
    }

    /// Add an update to the batch
    pub fn update_doc(&mut self, class: Ref<Class>, space: Ref<Space>, id: Ref<Doc>, operations: Attributes) {
        self.txes
            .push(self.ops.factory.create_tx_update_doc(class, space, id, operations));
    }

    /// Add a removal to the batch
    pub fn remove_doc(&mut self, class: Ref<Class>, space: Ref<Space>, id: Ref<Doc>) {
        self.txes
            .push(self.ops.factory.create_tx_remove_doc(class, space, id));
    }

    /// Add an attached creation to the batch and return the new id
    #[allow(clippy::too_many_arguments)]
    pub fn add_collection(
        &mut self,
        class: Ref<Class>,
        space: Ref<Space>,
        attached_to: Ref<Doc>,
        attached_to_class: Ref<Class>,
        collection: impl Into<String>,
        attributes: Attributes,
    ) -> Ref<Doc> {
        let inner = self
            .ops
            .factory
            .create_tx_create_doc(class, space.clone(), attributes, None);
        let id = inner.object_id().clone();
        self.txes.push(self.ops.factory.create_tx_collection_cud(
            attached_to_class,
            attached_to,
            space,
            collection,
            inner,
        ));
        id
    }

    /// Number of queued transactions
    pub fn len(&self) -> usize {
        self.txes.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.txes.is_empty()
    }

    /// Submit the batch; `applied` is false when a condition did not hold
    pub fn commit(self) -> Result<TxResult> {
        let tx = self.ops.factory.create_tx_apply_if(
            self.scope,
            self.matches,
            self.not_matches,
            self.txes,
        );
        self.ops.client.tx(tx)
    }
}

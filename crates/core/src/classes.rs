//! Well-known ids of the core model
//!
//! Class ids follow the `<plugin>:class:<Name>` convention and are stable: they
//! appear verbatim in the persisted transaction log.

use crate::types::{Account, Class, Domain, Ref, Space};

// =============================================================================
// Domains
// =============================================================================

/// Domain holding classes, mixins, attributes and other model documents
pub const DOMAIN_MODEL: Domain = Domain::from_static("model");

/// Domain holding the ordered transaction log
pub const DOMAIN_TX: Domain = Domain::from_static("tx");

/// Domain holding spaces
pub const DOMAIN_SPACE: Domain = Domain::from_static("space");

// =============================================================================
// Classes
// =============================================================================

/// Root of every class chain
pub const CLASS_OBJ: Ref<Class> = Ref::from_static("core:class:Obj");
/// Universal document envelope
pub const CLASS_DOC: Ref<Class> = Ref::from_static("core:class:Doc");
/// Document attached to a parent through a named collection
pub const CLASS_ATTACHED_DOC: Ref<Class> = Ref::from_static("core:class:AttachedDoc");
/// Class classifier
pub const CLASS_CLASS: Ref<Class> = Ref::from_static("core:class:Class");
/// Mixin classifier
pub const CLASS_MIXIN: Ref<Class> = Ref::from_static("core:class:Mixin");
/// Interface classifier
pub const CLASS_INTERFACE: Ref<Class> = Ref::from_static("core:class:Interface");
/// Attribute declaration
pub const CLASS_ATTRIBUTE: Ref<Class> = Ref::from_static("core:class:Attribute");
/// Access-scoped container
pub const CLASS_SPACE: Ref<Class> = Ref::from_static("core:class:Space");

/// Abstract transaction
pub const CLASS_TX: Ref<Class> = Ref::from_static("core:class:Tx");
/// Abstract create/update/delete transaction
pub const CLASS_TX_CUD: Ref<Class> = Ref::from_static("core:class:TxCUD");
/// Document creation
pub const CLASS_TX_CREATE_DOC: Ref<Class> = Ref::from_static("core:class:TxCreateDoc");
/// Operator-based document update
pub const CLASS_TX_UPDATE_DOC: Ref<Class> = Ref::from_static("core:class:TxUpdateDoc");
/// Document removal
pub const CLASS_TX_REMOVE_DOC: Ref<Class> = Ref::from_static("core:class:TxRemoveDoc");
/// Mixin application
pub const CLASS_TX_MIXIN: Ref<Class> = Ref::from_static("core:class:TxMixin");
/// Wrapper for transactions on attached documents
pub const CLASS_TX_COLLECTION_CUD: Ref<Class> = Ref::from_static("core:class:TxCollectionCUD");
/// Guarded compound transaction
pub const CLASS_TX_APPLY_IF: Ref<Class> = Ref::from_static("core:class:TxApplyIf");
/// Untyped bag write
pub const CLASS_TX_PUT_BAG: Ref<Class> = Ref::from_static("core:class:TxPutBag");

// Attribute types

/// String attribute type
pub const CLASS_TYPE_STRING: Ref<Class> = Ref::from_static("core:class:TypeString");
/// Number attribute type
pub const CLASS_TYPE_NUMBER: Ref<Class> = Ref::from_static("core:class:TypeNumber");
/// Boolean attribute type
pub const CLASS_TYPE_BOOLEAN: Ref<Class> = Ref::from_static("core:class:TypeBoolean");
/// Date attribute type
pub const CLASS_TYPE_DATE: Ref<Class> = Ref::from_static("core:class:TypeDate");
/// Rich text attribute type
pub const CLASS_TYPE_MARKUP: Ref<Class> = Ref::from_static("core:class:TypeMarkup");
/// Reference attribute type
pub const CLASS_REF_TO: Ref<Class> = Ref::from_static("core:class:RefTo");
/// Attached collection attribute type
pub const CLASS_COLLECTION: Ref<Class> = Ref::from_static("core:class:Collection");
/// Array attribute type
pub const CLASS_ARR_OF: Ref<Class> = Ref::from_static("core:class:ArrOf");

// =============================================================================
// Spaces and accounts
// =============================================================================

/// Space of model documents
pub const SPACE_MODEL: Ref<Space> = Ref::from_static("core:space:Model");
/// Space of user-authored transactions
pub const SPACE_TX: Ref<Space> = Ref::from_static("core:space:Tx");
/// Space of trigger-derived transactions
pub const SPACE_DERIVED_TX: Ref<Space> = Ref::from_static("core:space:DerivedTx");
/// Space for documents without a dedicated owner space
pub const SPACE_WORKSPACE: Ref<Space> = Ref::from_static("core:space:Workspace");

/// Account used for model bootstrap, replay and system-authored changes
pub const ACCOUNT_SYSTEM: Ref<Account> = Ref::from_static("core:account:System");

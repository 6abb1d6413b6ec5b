//! Concurrency primitives for doctx
//!
//! This crate provides the pieces the commit path serializes on:
//! - ObjectLocks: per-document mutual exclusion with deadlock-free ordering
//! - Sequence: monotonic commit numbering

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locks;
pub mod sequence;

pub use locks::{LockSet, ObjectLocks};
pub use sequence::Sequence;

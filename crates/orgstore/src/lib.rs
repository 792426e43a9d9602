//! # orgstore
//!
//! Data model and store capability for the users / departments / orders
//! schema.
//!
//! - Entities with lazily resolved relation cells ([`LazyCell`])
//! - Pagination arithmetic ([`paginate`], [`PageResult`])
//! - Store traits a data-access layer issues row-level calls through
//! - [`MemoryStore`], an in-memory store with call accounting, and a
//!   nom-based fixture loader ([`Seed`])

#![warn(missing_docs)]

mod error;
pub mod lazy;
pub mod memory;
mod model;
mod page;
pub mod seed;
mod store;

pub use error::{Error, Result, StoreError};
pub use lazy::{BatchOutcome, CellState, LazyCell, Relation};
pub use memory::{MemoryHandle, MemoryStore};
pub use model::{Department, Entity, EntityKind, Id, Order, User};
pub use page::{build_page_result, paginate, PageRequest, PageResult, DEFAULT_PAGE_SIZE};
pub use seed::Seed;
pub use store::{
    Associated, Association, AssociationStore, DepartmentAssociation, JoinStore,
    OrderAssociation, Repository, Store, StorePool, UserAssociation,
};

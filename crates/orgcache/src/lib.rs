//! # orgcache
//!
//! Two-tier query cache and relation access on top of `orgstore`.
//!
//! ## Architecture
//! - **QueryCache**: cross-session LRU tier shared by every unit of work,
//!   invalidated per entity kind on writes
//! - **SessionCache**: per-unit-of-work tier, cleared on writes and dropped
//!   with the unit of work
//! - **UnitOfWork**: one store handle plus one session tier; reads, writes,
//!   lazy relation resolution (single and batched) and eager joins
//! - **DataAccess**: owns the pool, the shared tier and the configuration

#![warn(missing_docs)]

mod access;
mod association;
mod config;
mod key;
mod lru;
mod query_cache;
mod resolver;
mod session;
mod stats;
mod uow;

pub use access::DataAccess;
pub use config::CacheConfig;
pub use key::{CacheKey, KindSet, Param};
pub use query_cache::{FillTicket, QueryCache};
pub use session::SessionCache;
pub use stats::{CacheStats, StatsSnapshot};
pub use uow::UnitOfWork;

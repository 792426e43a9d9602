//! Store capability
//!
//! The data-access layer never talks to a database directly. It acquires a
//! handle from a [`StorePool`] and issues row-level calls through these
//! traits. Handles are released when dropped.

use std::fmt;

use crate::error::Result;
use crate::model::{Department, Entity, EntityKind, Id, Order, User};

/// Row-level operations for one entity kind
pub trait Repository<E: Entity> {
    /// Row by id, `None` if there is no such row
    fn fetch_by_id(&self, id: Id) -> Result<Option<E>>;

    /// Every row, ordered by id
    fn fetch_all(&self) -> Result<Vec<E>>;

    /// At most `limit` rows starting at `offset`, ordered by id
    fn fetch_page(&self, offset: u64, limit: u64) -> Result<Vec<E>>;

    /// Number of rows
    fn fetch_count(&self) -> Result<u64>;

    /// Insert and return the store-assigned id (the entity's own id is ignored)
    fn insert(&self, entity: &E) -> Result<Id>;

    /// Replace the row with the entity's id, returning the affected count
    fn update(&self, entity: &E) -> Result<u64>;

    /// Delete by id, returning the affected count
    fn delete_by_id(&self, id: Id) -> Result<u64>;
}

/// Relation lookups keyed by foreign key, single and batched
pub trait AssociationStore {
    /// User by exact name
    fn fetch_user_by_name(&self, name: &str) -> Result<Option<User>>;

    /// Orders of one user, ordered by id
    fn fetch_orders_by_user(&self, user_id: Id) -> Result<Vec<Order>>;

    /// Orders of every listed user, ordered by id
    fn fetch_orders_by_users(&self, user_ids: &[Id]) -> Result<Vec<Order>>;

    /// Members of one department, ordered by id
    fn fetch_users_by_department(&self, department_id: Id) -> Result<Vec<User>>;

    /// Members of every listed department, ordered by id
    fn fetch_users_by_departments(&self, department_ids: &[Id]) -> Result<Vec<User>>;

    /// Users with the listed ids; missing ids are skipped
    fn fetch_users_by_ids(&self, ids: &[Id]) -> Result<Vec<User>>;

    /// Departments with the listed ids; missing ids are skipped
    fn fetch_departments_by_ids(&self, ids: &[Id]) -> Result<Vec<Department>>;
}

/// Which relations an eager (join) fetch populates
pub trait Association: Copy + fmt::Debug + Send + Sync + 'static {
    /// Name used in cache keys and logs
    fn name(&self) -> &'static str;

    /// Kinds embedded in the result besides the owner's own kind
    fn related(&self) -> &'static [EntityKind];
}

/// Eager fetch specs for [`User`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserAssociation {
    /// Populate `department`
    Department,
    /// Populate `orders`
    Orders,
    /// Populate `department` and `orders`
    DepartmentAndOrders,
}

/// Eager fetch specs for [`Department`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepartmentAssociation {
    /// Populate `users`
    Users,
}

/// Eager fetch specs for [`Order`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderAssociation {
    /// Populate `user`
    User,
}

impl Association for UserAssociation {
    fn name(&self) -> &'static str {
        match self {
            UserAssociation::Department => "department",
            UserAssociation::Orders => "orders",
            UserAssociation::DepartmentAndOrders => "department_and_orders",
        }
    }

    fn related(&self) -> &'static [EntityKind] {
        match self {
            UserAssociation::Department => &[EntityKind::Department],
            UserAssociation::Orders => &[EntityKind::Order],
            UserAssociation::DepartmentAndOrders => &[EntityKind::Department, EntityKind::Order],
        }
    }
}

impl Association for DepartmentAssociation {
    fn name(&self) -> &'static str {
        "users"
    }

    fn related(&self) -> &'static [EntityKind] {
        &[EntityKind::User]
    }
}

impl Association for OrderAssociation {
    fn name(&self) -> &'static str {
        "user"
    }

    fn related(&self) -> &'static [EntityKind] {
        &[EntityKind::User]
    }
}

/// An entity with eager fetch variants
pub trait Associated: Entity {
    /// The specs valid for this kind
    type Spec: Association;
}

impl Associated for User {
    type Spec = UserAssociation;
}

impl Associated for Department {
    type Spec = DepartmentAssociation;
}

impl Associated for Order {
    type Spec = OrderAssociation;
}

/// Join-style fetches returning entities with relation cells pre-populated
pub trait JoinStore<E: Associated> {
    /// One entity with the spec's relations resolved, `None` if absent
    fn fetch_with(&self, id: Id, spec: E::Spec) -> Result<Option<E>>;

    /// Every entity with the spec's relations resolved, ordered by id
    fn fetch_all_with(&self, spec: E::Spec) -> Result<Vec<E>>;
}

/// Everything the data-access layer needs from a store handle
pub trait Store:
    Repository<User>
    + Repository<Department>
    + Repository<Order>
    + AssociationStore
    + JoinStore<User>
    + JoinStore<Department>
    + JoinStore<Order>
{
}

impl<T> Store for T where
    T: Repository<User>
        + Repository<Department>
        + Repository<Order>
        + AssociationStore
        + JoinStore<User>
        + JoinStore<Department>
        + JoinStore<Order>
{
}

/// Source of scoped store handles
pub trait StorePool: Send + Sync {
    /// Handle type; dropping it releases the underlying connection
    type Handle: Store;

    /// Acquire a handle for one unit of work
    fn acquire(&self) -> Result<Self::Handle>;
}

//! Deferred relation cells and their resolution
//!
//! A [`LazyCell`] is owned by exactly one entity instance. It moves from
//! unresolved to resolved (a value, or absent) at most once; a failed fetch
//! leaves it unresolved so the next access retries.
//!
//! [`Relation`] ties a cell to the foreign key that drives it and to the
//! store calls that load it, one owner at a time ([`resolve`]) or batched
//! over a slice of owners ([`resolve_batch`]).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Department, Entity, Id, Order, User};
use crate::store::{Repository, Store};

/// Observable state of a [`LazyCell`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// Never loaded
    Unresolved,
    /// Loaded, nothing there
    Absent,
    /// Loaded with a value
    Resolved,
}

/// Relation slot: unresolved, resolved(value) or resolved(absent)
pub struct LazyCell<T> {
    slot: OnceLock<Option<T>>,
}

impl<T> LazyCell<T> {
    /// Cell that has not been loaded yet
    pub const fn unresolved() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    /// Cell already holding `value`
    pub fn resolved(value: T) -> Self {
        Self::settled(Some(value))
    }

    /// Cell already resolved to nothing
    pub fn absent() -> Self {
        Self::settled(None)
    }

    /// Cell already resolved to `value`, which may be absent
    pub fn settled(value: Option<T>) -> Self {
        let slot = OnceLock::new();
        let _ = slot.set(value);
        Self { slot }
    }

    /// Current state
    pub fn state(&self) -> CellState {
        match self.slot.get() {
            None => CellState::Unresolved,
            Some(None) => CellState::Absent,
            Some(Some(_)) => CellState::Resolved,
        }
    }

    /// Whether the cell has been resolved (including to absent)
    pub fn is_resolved(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Resolved value, `None` when unresolved or absent
    pub fn get(&self) -> Option<&T> {
        self.slot.get().and_then(Option::as_ref)
    }

    /// Return the memoized value, or run `fetch` once and memoize its outcome.
    ///
    /// An error from `fetch` is returned as is and the cell stays unresolved.
    pub fn resolve<F>(&self, fetch: F) -> Result<Option<&T>>
    where
        F: FnOnce() -> Result<Option<T>>,
    {
        if let Some(settled) = self.slot.get() {
            return Ok(settled.as_ref());
        }
        let value = fetch()?;
        Ok(self.settle(value))
    }

    /// Like [`resolve`](Self::resolve), keyed by a nullable foreign key.
    ///
    /// A null key resolves to absent without calling `fetch`.
    pub fn resolve_by<K, F>(&self, key: Option<K>, fetch: F) -> Result<Option<&T>>
    where
        F: FnOnce(K) -> Result<Option<T>>,
    {
        match key {
            Some(key) => self.resolve(|| fetch(key)),
            None => Ok(self.settle(None)),
        }
    }

    /// Store an externally loaded outcome.
    ///
    /// Returns false if the cell was already resolved; the old value stays.
    pub fn fill(&self, value: Option<T>) -> bool {
        self.slot.set(value).is_ok()
    }

    /// Consume the cell: `None` when unresolved, `Some(outcome)` otherwise
    pub fn into_inner(self) -> Option<Option<T>> {
        self.slot.into_inner()
    }

    fn settle(&self, value: Option<T>) -> Option<&T> {
        let _ = self.slot.set(value);
        self.slot.get().and_then(Option::as_ref)
    }
}

impl<T> Default for LazyCell<T> {
    fn default() -> Self {
        Self::unresolved()
    }
}

impl<T: Clone> Clone for LazyCell<T> {
    fn clone(&self) -> Self {
        match self.slot.get() {
            Some(value) => Self::settled(value.clone()),
            None => Self::unresolved(),
        }
    }
}

impl<T: PartialEq> PartialEq for LazyCell<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot.get() == other.slot.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for LazyCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyCell")
            .field("state", &self.state())
            .field("value", &self.get())
            .finish()
    }
}

#[derive(Serialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
enum CellRef<'a, T> {
    Unresolved,
    Absent,
    Resolved(&'a T),
}

#[derive(Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
enum CellRepr<T> {
    Unresolved,
    Absent,
    Resolved(T),
}

impl<T: Serialize> Serialize for LazyCell<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let repr = match self.slot.get() {
            None => CellRef::Unresolved,
            Some(None) => CellRef::Absent,
            Some(Some(value)) => CellRef::Resolved(value),
        };
        repr.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for LazyCell<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(match CellRepr::deserialize(deserializer)? {
            CellRepr::Unresolved => Self::unresolved(),
            CellRepr::Absent => Self::absent(),
            CellRepr::Resolved(value) => Self::resolved(value),
        })
    }
}

/// A relation field: which cell it fills and how the store loads it
pub trait Relation {
    /// Entity holding the cell
    type Owner: Entity;
    /// Value kept in the cell
    type Target: Clone;
    /// Row type returned by the batched store call
    type Row: Entity;

    /// Relation name for logs
    const NAME: &'static str;

    /// Key that drives the load; `None` short-circuits to absent
    fn key(owner: &Self::Owner) -> Option<Id>;

    /// The owner's cell
    fn cell(owner: &Self::Owner) -> &LazyCell<Self::Target>;

    /// Single-owner store call
    fn fetch<S: Store + ?Sized>(store: &S, key: Id) -> Result<Option<Self::Target>>;

    /// One store call for a set of distinct keys
    fn fetch_batch<S: Store + ?Sized>(store: &S, keys: &[Id]) -> Result<Vec<Self::Row>>;

    /// Which key a batched row belongs to
    fn row_key(row: &Self::Row) -> Option<Id>;

    /// Build a cell value from the rows grouped under one key
    fn assemble(rows: Vec<Self::Row>) -> Option<Self::Target>;
}

/// `User.department` (many-to-one through `department_id`)
#[derive(Debug)]
pub struct UserDepartment;

/// `User.orders` (one-to-many through `Order.user_id`)
#[derive(Debug)]
pub struct UserOrders;

/// `Order.user` (many-to-one through `user_id`)
#[derive(Debug)]
pub struct OrderUser;

/// `Department.users` (one-to-many through `User.department_id`)
#[derive(Debug)]
pub struct DepartmentUsers;

impl Relation for UserDepartment {
    type Owner = User;
    type Target = Department;
    type Row = Department;

    const NAME: &'static str = "user.department";

    fn key(owner: &User) -> Option<Id> {
        owner.department_id
    }

    fn cell(owner: &User) -> &LazyCell<Department> {
        &owner.department
    }

    fn fetch<S: Store + ?Sized>(store: &S, key: Id) -> Result<Option<Department>> {
        Repository::<Department>::fetch_by_id(store, key)
    }

    fn fetch_batch<S: Store + ?Sized>(store: &S, keys: &[Id]) -> Result<Vec<Department>> {
        store.fetch_departments_by_ids(keys)
    }

    fn row_key(row: &Department) -> Option<Id> {
        Some(row.id)
    }

    fn assemble(rows: Vec<Department>) -> Option<Department> {
        rows.into_iter().next()
    }
}

impl Relation for UserOrders {
    type Owner = User;
    type Target = Vec<Order>;
    type Row = Order;

    const NAME: &'static str = "user.orders";

    fn key(owner: &User) -> Option<Id> {
        Some(owner.id)
    }

    fn cell(owner: &User) -> &LazyCell<Vec<Order>> {
        &owner.orders
    }

    fn fetch<S: Store + ?Sized>(store: &S, key: Id) -> Result<Option<Vec<Order>>> {
        store.fetch_orders_by_user(key).map(Some)
    }

    fn fetch_batch<S: Store + ?Sized>(store: &S, keys: &[Id]) -> Result<Vec<Order>> {
        store.fetch_orders_by_users(keys)
    }

    fn row_key(row: &Order) -> Option<Id> {
        Some(row.user_id)
    }

    fn assemble(rows: Vec<Order>) -> Option<Vec<Order>> {
        Some(rows)
    }
}

impl Relation for OrderUser {
    type Owner = Order;
    type Target = User;
    type Row = User;

    const NAME: &'static str = "order.user";

    fn key(owner: &Order) -> Option<Id> {
        Some(owner.user_id)
    }

    fn cell(owner: &Order) -> &LazyCell<User> {
        &owner.user
    }

    fn fetch<S: Store + ?Sized>(store: &S, key: Id) -> Result<Option<User>> {
        Repository::<User>::fetch_by_id(store, key)
    }

    fn fetch_batch<S: Store + ?Sized>(store: &S, keys: &[Id]) -> Result<Vec<User>> {
        store.fetch_users_by_ids(keys)
    }

    fn row_key(row: &User) -> Option<Id> {
        Some(row.id)
    }

    fn assemble(rows: Vec<User>) -> Option<User> {
        rows.into_iter().next()
    }
}

impl Relation for DepartmentUsers {
    type Owner = Department;
    type Target = Vec<User>;
    type Row = User;

    const NAME: &'static str = "department.users";

    fn key(owner: &Department) -> Option<Id> {
        Some(owner.id)
    }

    fn cell(owner: &Department) -> &LazyCell<Vec<User>> {
        &owner.users
    }

    fn fetch<S: Store + ?Sized>(store: &S, key: Id) -> Result<Option<Vec<User>>> {
        store.fetch_users_by_department(key).map(Some)
    }

    fn fetch_batch<S: Store + ?Sized>(store: &S, keys: &[Id]) -> Result<Vec<User>> {
        store.fetch_users_by_departments(keys)
    }

    fn row_key(row: &User) -> Option<Id> {
        row.department_id
    }

    fn assemble(rows: Vec<User>) -> Option<Vec<User>> {
        Some(rows)
    }
}

/// Resolve one owner's relation, contacting the store at most once per cell
pub fn resolve<'o, R, S>(owner: &'o R::Owner, store: &S) -> Result<Option<&'o R::Target>>
where
    R: Relation,
    S: Store + ?Sized,
{
    let cell = R::cell(owner);
    if cell.is_resolved() {
        return Ok(cell.get());
    }
    debug!(relation = R::NAME, owner = owner.id(), "resolving lazy relation");
    cell.resolve_by(R::key(owner), |key| R::fetch(store, key))
}

/// Summary of a [`resolve_batch`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Cells that moved to resolved
    pub resolved: usize,
    /// Distinct foreign keys sent to the store
    pub keys: usize,
    /// Store round trips issued
    pub store_calls: usize,
}

/// Resolve the same relation across `owners` with one store call per
/// `chunk_size` distinct keys.
///
/// Already-resolved cells are skipped. Null keys resolve to absent without
/// contributing a key. Fail-all: results are staged and cells are only
/// written once every chunk succeeded, so on error no cell changes.
pub fn resolve_batch<R, S>(owners: &[R::Owner], store: &S, chunk_size: usize) -> Result<BatchOutcome>
where
    R: Relation,
    S: Store + ?Sized,
{
    if chunk_size == 0 {
        return Err(Error::invalid("batch size must be at least 1"));
    }

    let pending: Vec<&R::Owner> = owners
        .iter()
        .filter(|owner| !R::cell(owner).is_resolved())
        .collect();

    let mut keys: Vec<Id> = pending.iter().filter_map(|owner| R::key(owner)).collect();
    keys.sort_unstable();
    keys.dedup();

    let mut grouped: BTreeMap<Id, Vec<R::Row>> = BTreeMap::new();
    let mut store_calls = 0;
    for chunk in keys.chunks(chunk_size) {
        let rows = R::fetch_batch(store, chunk)?;
        store_calls += 1;
        for row in rows {
            if let Some(key) = R::row_key(&row) {
                grouped.entry(key).or_default().push(row);
            }
        }
    }

    let mut resolved = 0;
    for owner in pending {
        let value = match R::key(owner) {
            Some(key) => R::assemble(grouped.get(&key).cloned().unwrap_or_default()),
            None => None,
        };
        if R::cell(owner).fill(value) {
            resolved += 1;
        }
    }

    debug!(
        relation = R::NAME,
        owners = owners.len(),
        keys = keys.len(),
        store_calls,
        "batch resolved lazy relation"
    );

    Ok(BatchOutcome {
        resolved,
        keys: keys.len(),
        store_calls,
    })
}

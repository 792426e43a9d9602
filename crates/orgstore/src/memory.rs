//! In-memory reference store
//!
//! Tables live behind one `RwLock` shared by every handle. Each call is
//! counted under an operation name of the form `"<kind>.<operation>"`
//! (`"user.fetch_by_id"`, `"order.fetch_by_users"`, ...) and any call can be
//! scheduled to fail, which is how the cache layer's tests observe and
//! disturb store traffic.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::{Mutex, RwLock};
use tracing::{info, trace};

use crate::error::{Result, StoreError};
use crate::model::{Department, Entity, EntityKind, Id, Order, User};
use crate::seed::Seed;
use crate::store::{
    Association, AssociationStore, DepartmentAssociation, JoinStore, OrderAssociation, Repository,
    StorePool, UserAssociation,
};

use self::tables::{Stored, Tables};

mod tables {
    use std::collections::BTreeMap;

    use crate::error::StoreError;
    use crate::lazy::LazyCell;
    use crate::model::{Department, Entity, Id, Order, User};
    use crate::store::UserAssociation;

    /// Row storage, one ordered map per kind
    #[derive(Debug, Clone)]
    pub struct Tables {
        pub users: BTreeMap<Id, User>,
        pub departments: BTreeMap<Id, Department>,
        pub orders: BTreeMap<Id, Order>,
        pub next_ids: [Id; 3],
    }

    impl Default for Tables {
        fn default() -> Self {
            Self {
                users: BTreeMap::new(),
                departments: BTreeMap::new(),
                orders: BTreeMap::new(),
                next_ids: [1; 3],
            }
        }
    }

    impl Tables {
        pub fn orders_of(&self, user_id: Id) -> Vec<Order> {
            self.orders
                .values()
                .filter(|order| order.user_id == user_id)
                .cloned()
                .collect()
        }

        pub fn members_of(&self, department_id: Id) -> Vec<User> {
            self.users
                .values()
                .filter(|user| user.department_id == Some(department_id))
                .cloned()
                .collect()
        }

        pub fn join_user(&self, user: &User, spec: UserAssociation) -> User {
            let mut joined = user.clone();
            if matches!(spec, UserAssociation::Department | UserAssociation::DepartmentAndOrders) {
                let department = user
                    .department_id
                    .and_then(|id| self.departments.get(&id).cloned());
                joined.department = LazyCell::settled(department);
            }
            if matches!(spec, UserAssociation::Orders | UserAssociation::DepartmentAndOrders) {
                joined.orders = LazyCell::resolved(self.orders_of(user.id));
            }
            joined
        }

        pub fn join_department(&self, department: &Department) -> Department {
            let mut joined = department.clone();
            joined.users = LazyCell::resolved(self.members_of(department.id));
            joined
        }

        pub fn join_order(&self, order: &Order) -> Order {
            let mut joined = order.clone();
            joined.user = LazyCell::settled(self.users.get(&order.user_id).cloned());
            joined
        }

        /// Insert a row keeping its id (fixtures)
        pub fn put_seeded<E: Stored>(&mut self, row: &E) -> Result<(), StoreError> {
            let id = row.id();
            if id < 1 {
                return Err(StoreError::Constraint(format!("{} id must be positive, got {}", E::KIND, id)));
            }
            if E::rows(self).contains_key(&id) {
                return Err(StoreError::Constraint(format!("duplicate {} id {}", E::KIND, id)));
            }
            row.check_references(self)?;
            E::rows_mut(self).insert(id, row.detached());
            let next = &mut self.next_ids[E::KIND.ordinal()];
            *next = (*next).max(id + 1);
            Ok(())
        }
    }

    /// Per-kind table access and foreign key rules
    pub trait Stored: Entity {
        fn rows(tables: &Tables) -> &BTreeMap<Id, Self>;
        fn rows_mut(tables: &mut Tables) -> &mut BTreeMap<Id, Self>;
        fn check_references(&self, tables: &Tables) -> Result<(), StoreError>;
        fn check_unreferenced(id: Id, tables: &Tables) -> Result<(), StoreError>;
    }

    impl Stored for User {
        fn rows(tables: &Tables) -> &BTreeMap<Id, Self> {
            &tables.users
        }

        fn rows_mut(tables: &mut Tables) -> &mut BTreeMap<Id, Self> {
            &mut tables.users
        }

        fn check_references(&self, tables: &Tables) -> Result<(), StoreError> {
            match self.department_id {
                Some(department_id) if !tables.departments.contains_key(&department_id) => {
                    Err(StoreError::Constraint(format!(
                        "user references missing department {}",
                        department_id
                    )))
                }
                _ => Ok(()),
            }
        }

        fn check_unreferenced(id: Id, tables: &Tables) -> Result<(), StoreError> {
            if tables.orders.values().any(|order| order.user_id == id) {
                return Err(StoreError::Constraint(format!("user {} still has orders", id)));
            }
            Ok(())
        }
    }

    impl Stored for Department {
        fn rows(tables: &Tables) -> &BTreeMap<Id, Self> {
            &tables.departments
        }

        fn rows_mut(tables: &mut Tables) -> &mut BTreeMap<Id, Self> {
            &mut tables.departments
        }

        fn check_references(&self, _tables: &Tables) -> Result<(), StoreError> {
            Ok(())
        }

        fn check_unreferenced(id: Id, tables: &Tables) -> Result<(), StoreError> {
            if tables.users.values().any(|user| user.department_id == Some(id)) {
                return Err(StoreError::Constraint(format!("department {} still has members", id)));
            }
            Ok(())
        }
    }

    impl Stored for Order {
        fn rows(tables: &Tables) -> &BTreeMap<Id, Self> {
            &tables.orders
        }

        fn rows_mut(tables: &mut Tables) -> &mut BTreeMap<Id, Self> {
            &mut tables.orders
        }

        fn check_references(&self, tables: &Tables) -> Result<(), StoreError> {
            if !tables.users.contains_key(&self.user_id) {
                return Err(StoreError::Constraint(format!(
                    "order references missing user {}",
                    self.user_id
                )));
            }
            Ok(())
        }

        fn check_unreferenced(_id: Id, _tables: &Tables) -> Result<(), StoreError> {
            Ok(())
        }
    }
}

struct Shared {
    tables: RwLock<Tables>,
    closed: RwLock<bool>,
    open_handles: AtomicUsize,
    calls: Mutex<HashMap<String, u64, RandomState>>,
    faults: Mutex<HashMap<String, Vec<u64>, RandomState>>,
}

impl Shared {
    /// Gate every store call: closed check, call counting, scheduled faults
    fn enter(&self, op: String) -> Result<()> {
        if *self.closed.read() {
            return Err(StoreError::Closed.into());
        }

        let ordinal = {
            let mut calls = self.calls.lock();
            let count = calls.entry(op.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let mut faults = self.faults.lock();
        if let Some(pending) = faults.get_mut(&op) {
            if let Some(pos) = pending.iter().position(|&n| n == ordinal) {
                pending.swap_remove(pos);
                return Err(StoreError::backend(io::Error::other(format!(
                    "injected failure in {}",
                    op
                )))
                .into());
            }
        }

        trace!(op = %op, "store call");
        Ok(())
    }
}

fn op(kind: EntityKind, name: &str) -> String {
    format!("{}.{}", kind, name)
}

/// Shared in-memory database; cloning yields another reference to it
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                closed: RwLock::new(false),
                open_handles: AtomicUsize::new(0),
                calls: Mutex::new(HashMap::default()),
                faults: Mutex::new(HashMap::default()),
            }),
        }
    }

    /// Store pre-loaded with a fixture
    pub fn from_seed(seed: &Seed) -> Result<Self> {
        let store = Self::new();
        store.load_seed(seed)?;
        Ok(store)
    }

    /// Insert fixture rows with their explicit ids.
    ///
    /// Departments go first, then users, then orders. Nothing is written
    /// unless every row is accepted.
    pub fn load_seed(&self, seed: &Seed) -> Result<()> {
        if self.is_closed() {
            return Err(StoreError::Closed.into());
        }

        let mut tables = self.shared.tables.write();
        let mut staged = tables.clone();
        for department in &seed.departments {
            staged.put_seeded(department)?;
        }
        for user in &seed.users {
            staged.put_seeded(user)?;
        }
        for order in &seed.orders {
            staged.put_seeded(order)?;
        }
        *tables = staged;

        info!(
            departments = seed.departments.len(),
            users = seed.users.len(),
            orders = seed.orders.len(),
            "seed loaded"
        );
        Ok(())
    }

    /// Refuse every further call; idempotent
    pub fn close(&self) {
        let mut closed = self.shared.closed.write();
        if !*closed {
            *closed = true;
            info!("memory store closed");
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.read()
    }

    /// Handles acquired and not yet dropped
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    /// Rows currently stored for `kind` (not counted as a call)
    pub fn row_count(&self, kind: EntityKind) -> usize {
        let tables = self.shared.tables.read();
        match kind {
            EntityKind::User => tables.users.len(),
            EntityKind::Department => tables.departments.len(),
            EntityKind::Order => tables.orders.len(),
        }
    }

    /// Calls issued for one operation since the last reset
    pub fn calls(&self, op: &str) -> u64 {
        self.shared.calls.lock().get(op).copied().unwrap_or(0)
    }

    /// Calls issued for every operation since the last reset
    pub fn total_calls(&self) -> u64 {
        self.shared.calls.lock().values().sum()
    }

    /// Reset call counters and drop scheduled failures
    pub fn reset_calls(&self) {
        self.shared.calls.lock().clear();
        self.shared.faults.lock().clear();
    }

    /// Make the `nth` next call of `op` (1 = the very next) fail with a
    /// backend error
    pub fn fail_call(&self, op: &str, nth: u64) {
        let ordinal = self.calls(op) + nth.max(1);
        self.shared
            .faults
            .lock()
            .entry(op.to_string())
            .or_default()
            .push(ordinal);
    }

    /// Make the next call of `op` fail
    pub fn fail_next(&self, op: &str) {
        self.fail_call(op, 1);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StorePool for MemoryStore {
    type Handle = MemoryHandle;

    fn acquire(&self) -> Result<MemoryHandle> {
        if self.is_closed() {
            return Err(StoreError::Closed.into());
        }
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryHandle {
            shared: Arc::clone(&self.shared),
        })
    }
}

/// Scoped handle on a [`MemoryStore`]; released on drop
pub struct MemoryHandle {
    shared: Arc<Shared>,
}

impl Drop for MemoryHandle {
    fn drop(&mut self) {
        self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<E: Stored> Repository<E> for MemoryHandle {
    fn fetch_by_id(&self, id: Id) -> Result<Option<E>> {
        self.shared.enter(op(E::KIND, "fetch_by_id"))?;
        Ok(E::rows(&self.shared.tables.read()).get(&id).cloned())
    }

    fn fetch_all(&self) -> Result<Vec<E>> {
        self.shared.enter(op(E::KIND, "fetch_all"))?;
        Ok(E::rows(&self.shared.tables.read()).values().cloned().collect())
    }

    fn fetch_page(&self, offset: u64, limit: u64) -> Result<Vec<E>> {
        self.shared.enter(op(E::KIND, "fetch_page"))?;
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(E::rows(&self.shared.tables.read())
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn fetch_count(&self) -> Result<u64> {
        self.shared.enter(op(E::KIND, "fetch_count"))?;
        Ok(E::rows(&self.shared.tables.read()).len() as u64)
    }

    fn insert(&self, entity: &E) -> Result<Id> {
        self.shared.enter(op(E::KIND, "insert"))?;
        let mut tables = self.shared.tables.write();
        entity.check_references(&tables)?;

        let slot = E::KIND.ordinal();
        let id = tables.next_ids[slot];
        tables.next_ids[slot] += 1;

        let mut row = entity.detached();
        row.set_id(id);
        E::rows_mut(&mut tables).insert(id, row);
        Ok(id)
    }

    fn update(&self, entity: &E) -> Result<u64> {
        self.shared.enter(op(E::KIND, "update"))?;
        let mut tables = self.shared.tables.write();
        if !E::rows(&tables).contains_key(&entity.id()) {
            return Ok(0);
        }
        entity.check_references(&tables)?;
        E::rows_mut(&mut tables).insert(entity.id(), entity.detached());
        Ok(1)
    }

    fn delete_by_id(&self, id: Id) -> Result<u64> {
        self.shared.enter(op(E::KIND, "delete_by_id"))?;
        let mut tables = self.shared.tables.write();
        if !E::rows(&tables).contains_key(&id) {
            return Ok(0);
        }
        E::check_unreferenced(id, &tables)?;
        E::rows_mut(&mut tables).remove(&id);
        Ok(1)
    }
}

impl AssociationStore for MemoryHandle {
    fn fetch_user_by_name(&self, name: &str) -> Result<Option<User>> {
        self.shared.enter(op(EntityKind::User, "fetch_by_name"))?;
        let tables = self.shared.tables.read();
        Ok(tables.users.values().find(|user| user.name == name).cloned())
    }

    fn fetch_orders_by_user(&self, user_id: Id) -> Result<Vec<Order>> {
        self.shared.enter(op(EntityKind::Order, "fetch_by_user"))?;
        Ok(self.shared.tables.read().orders_of(user_id))
    }

    fn fetch_orders_by_users(&self, user_ids: &[Id]) -> Result<Vec<Order>> {
        self.shared.enter(op(EntityKind::Order, "fetch_by_users"))?;
        let wanted: BTreeSet<Id> = user_ids.iter().copied().collect();
        let tables = self.shared.tables.read();
        Ok(tables
            .orders
            .values()
            .filter(|order| wanted.contains(&order.user_id))
            .cloned()
            .collect())
    }

    fn fetch_users_by_department(&self, department_id: Id) -> Result<Vec<User>> {
        self.shared.enter(op(EntityKind::User, "fetch_by_department"))?;
        Ok(self.shared.tables.read().members_of(department_id))
    }

    fn fetch_users_by_departments(&self, department_ids: &[Id]) -> Result<Vec<User>> {
        self.shared.enter(op(EntityKind::User, "fetch_by_departments"))?;
        let wanted: BTreeSet<Id> = department_ids.iter().copied().collect();
        let tables = self.shared.tables.read();
        Ok(tables
            .users
            .values()
            .filter(|user| user.department_id.is_some_and(|id| wanted.contains(&id)))
            .cloned()
            .collect())
    }

    fn fetch_users_by_ids(&self, ids: &[Id]) -> Result<Vec<User>> {
        self.shared.enter(op(EntityKind::User, "fetch_by_ids"))?;
        let tables = self.shared.tables.read();
        let wanted: BTreeSet<Id> = ids.iter().copied().collect();
        Ok(wanted.iter().filter_map(|id| tables.users.get(id).cloned()).collect())
    }

    fn fetch_departments_by_ids(&self, ids: &[Id]) -> Result<Vec<Department>> {
        self.shared.enter(op(EntityKind::Department, "fetch_by_ids"))?;
        let tables = self.shared.tables.read();
        let wanted: BTreeSet<Id> = ids.iter().copied().collect();
        Ok(wanted
            .iter()
            .filter_map(|id| tables.departments.get(id).cloned())
            .collect())
    }
}

impl JoinStore<User> for MemoryHandle {
    fn fetch_with(&self, id: Id, spec: UserAssociation) -> Result<Option<User>> {
        self.shared
            .enter(op(EntityKind::User, &format!("fetch_with_{}", spec.name())))?;
        let tables = self.shared.tables.read();
        Ok(tables.users.get(&id).map(|user| tables.join_user(user, spec)))
    }

    fn fetch_all_with(&self, spec: UserAssociation) -> Result<Vec<User>> {
        self.shared
            .enter(op(EntityKind::User, &format!("fetch_all_with_{}", spec.name())))?;
        let tables = self.shared.tables.read();
        Ok(tables
            .users
            .values()
            .map(|user| tables.join_user(user, spec))
            .collect())
    }
}

impl JoinStore<Department> for MemoryHandle {
    fn fetch_with(&self, id: Id, spec: DepartmentAssociation) -> Result<Option<Department>> {
        self.shared
            .enter(op(EntityKind::Department, &format!("fetch_with_{}", spec.name())))?;
        let tables = self.shared.tables.read();
        Ok(tables
            .departments
            .get(&id)
            .map(|department| tables.join_department(department)))
    }

    fn fetch_all_with(&self, spec: DepartmentAssociation) -> Result<Vec<Department>> {
        self.shared
            .enter(op(EntityKind::Department, &format!("fetch_all_with_{}", spec.name())))?;
        let tables = self.shared.tables.read();
        Ok(tables
            .departments
            .values()
            .map(|department| tables.join_department(department))
            .collect())
    }
}

impl JoinStore<Order> for MemoryHandle {
    fn fetch_with(&self, id: Id, spec: OrderAssociation) -> Result<Option<Order>> {
        self.shared
            .enter(op(EntityKind::Order, &format!("fetch_with_{}", spec.name())))?;
        let tables = self.shared.tables.read();
        Ok(tables.orders.get(&id).map(|order| tables.join_order(order)))
    }

    fn fetch_all_with(&self, spec: OrderAssociation) -> Result<Vec<Order>> {
        self.shared
            .enter(op(EntityKind::Order, &format!("fetch_all_with_{}", spec.name())))?;
        let tables = self.shared.tables.read();
        Ok(tables
            .orders
            .values()
            .map(|order| tables.join_order(order))
            .collect())
    }
}

//! Data-access facade
//!
//! [`DataAccess`] owns the store pool, the cross-session cache and the
//! configuration. Every convenience method opens its own unit of work and
//! releases it before returning; [`DataAccess::run`] groups several calls
//! into one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use orgstore::{
    Associated, BatchOutcome, Department, Entity, Id, JoinStore, Order, PageRequest, PageResult,
    Relation, Repository, Result, StorePool, User,
};

use crate::config::CacheConfig;
use crate::query_cache::QueryCache;
use crate::stats::StatsSnapshot;
use crate::uow::UnitOfWork;

/// Entry point for reads, writes and relation access
pub struct DataAccess<P: StorePool> {
    pool: P,
    cache: Arc<QueryCache>,
    config: CacheConfig,
    next_uow: AtomicU64,
}

impl<P: StorePool> DataAccess<P> {
    /// Validate `config` and build a private shared tier from it
    pub fn new(pool: P, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(QueryCache::from_config(&config));
        Ok(Self::assemble(pool, cache, config))
    }

    /// Use an existing shared tier, e.g. one serving several pools of the
    /// same database; `config.capacity` and `config.shared` are ignored
    pub fn with_shared_cache(pool: P, cache: Arc<QueryCache>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(pool, cache, config))
    }

    fn assemble(pool: P, cache: Arc<QueryCache>, config: CacheConfig) -> Self {
        Self {
            pool,
            cache,
            config,
            next_uow: AtomicU64::new(1),
        }
    }

    /// Open a unit of work; its handle is released when it is dropped
    pub fn begin(&self) -> Result<UnitOfWork<'_, P>> {
        let handle = self.pool.acquire()?;
        let id = self.next_uow.fetch_add(1, Ordering::Relaxed);
        Ok(UnitOfWork::new(handle, &self.cache, &self.config, id))
    }

    /// Run `work` inside one unit of work
    pub fn run<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&mut UnitOfWork<'_, P>) -> Result<T>,
    {
        let mut uow = self.begin()?;
        work(&mut uow)
    }

    /// One page of `E`
    pub fn get_page<E>(&self, request: PageRequest) -> Result<PageResult<E>>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        self.run(|uow| uow.get_page(request))
    }

    /// `E` by id
    pub fn get_by_id<E>(&self, id: Id) -> Result<Option<E>>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        self.run(|uow| uow.get_by_id(id))
    }

    /// Every `E`
    pub fn get_all<E>(&self) -> Result<Vec<E>>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        self.run(|uow| uow.get_all())
    }

    /// Number of `E` rows
    pub fn count<E>(&self) -> Result<u64>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        self.run(|uow| uow.count::<E>())
    }

    /// Insert, setting the assigned id on `entity`
    pub fn create<E>(&self, entity: &mut E) -> Result<u64>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        self.run(|uow| uow.create(entity))
    }

    /// Replace the stored row
    pub fn update<E>(&self, entity: &E) -> Result<u64>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        self.run(|uow| uow.update(entity))
    }

    /// Delete by id
    pub fn delete<E>(&self, id: Id) -> Result<u64>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        self.run(|uow| uow.delete::<E>(id))
    }

    /// `E` by id with relations eagerly populated
    pub fn get_with_association<E>(&self, id: Id, spec: E::Spec) -> Result<Option<E>>
    where
        E: Associated,
        P::Handle: JoinStore<E>,
    {
        self.run(|uow| uow.get_with_association(id, spec))
    }

    /// Every `E` with relations eagerly populated
    pub fn get_all_with_association<E>(&self, spec: E::Spec) -> Result<Vec<E>>
    where
        E: Associated,
        P::Handle: JoinStore<E>,
    {
        self.run(|uow| uow.get_all_with_association(spec))
    }

    /// User by exact name
    pub fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
        self.run(|uow| uow.get_user_by_name(name))
    }

    /// Orders placed by a user
    pub fn get_orders_by_user_id(&self, user_id: Id) -> Result<Vec<Order>> {
        self.run(|uow| uow.get_orders_by_user_id(user_id))
    }

    /// Resolve `user.department`
    pub fn department_of<'o>(&self, user: &'o User) -> Result<Option<&'o Department>> {
        self.begin()?.department_of(user)
    }

    /// Resolve `user.orders`
    pub fn orders_of<'o>(&self, user: &'o User) -> Result<&'o [Order]> {
        self.begin()?.orders_of(user)
    }

    /// Resolve `order.user`
    pub fn user_of<'o>(&self, order: &'o Order) -> Result<Option<&'o User>> {
        self.begin()?.user_of(order)
    }

    /// Resolve `department.users`
    pub fn members_of<'o>(&self, department: &'o Department) -> Result<&'o [User]> {
        self.begin()?.members_of(department)
    }

    /// Batch-resolve relation `R` across `owners`
    pub fn resolve_all<R: Relation>(&self, owners: &[R::Owner]) -> Result<BatchOutcome> {
        self.begin()?.resolve_all::<R>(owners)
    }

    /// The shared tier
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Shared-tier counters
    pub fn stats(&self) -> StatsSnapshot {
        self.cache.stats().snapshot()
    }

    /// Empty the shared tier
    pub fn invalidate_all(&self) -> usize {
        self.cache.invalidate_all()
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The store pool
    pub fn pool(&self) -> &P {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use orgstore::lazy::UserOrders;
    use orgstore::{CellState, MemoryStore, StoreError, UserAssociation};
    use rust_decimal::Decimal;
    use std::thread;

    /// Three departments, fifteen users (every fifth without a department),
    /// two orders for each of the first five users
    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        {
            let handle = store.acquire().unwrap();
            let created = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
            for name in ["Engineering", "Sales", "Support"] {
                handle.insert(&Department::new(name, "", created)).unwrap();
            }
            for i in 1..=15i64 {
                let department = if i % 5 == 0 { None } else { Some(i % 3 + 1) };
                let user = User::new(format!("user{}", i), format!("user{}@example.com", i), 20 + i as u32, department);
                handle.insert(&user).unwrap();
            }
            for user_id in 1..=5 {
                for n in 0..2 {
                    let order = Order::new(
                        format!("ORD-{}-{}", user_id, n),
                        Decimal::new(1000 + n, 2),
                        user_id,
                        created,
                    );
                    handle.insert(&order).unwrap();
                }
            }
        }
        store.reset_calls();
        store
    }

    fn access() -> DataAccess<MemoryStore> {
        DataAccess::new(seeded(), CacheConfig::new()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = DataAccess::new(MemoryStore::new(), CacheConfig::new().with_capacity(0));
        assert!(matches!(result, Err(orgstore::Error::InvalidArgument(_))));
    }

    #[test]
    fn test_first_and_last_page() {
        let access = access();

        let first: PageResult<User> = access.get_page(PageRequest::new(1, 5).unwrap()).unwrap();
        assert_eq!(first.data.len(), 5);
        assert_eq!(first.total, 15);
        assert_eq!(first.total_pages, 3);
        assert!(first.has_next);
        assert!(!first.has_previous);

        let last: PageResult<User> = access.get_page(PageRequest::new(3, 5).unwrap()).unwrap();
        assert_eq!(last.data[0].id, 11);
        assert!(!last.has_next);
        assert!(last.has_previous);
    }

    #[test]
    fn test_page_past_the_end_is_empty() {
        let access = access();
        let page: PageResult<Order> = access.get_page(PageRequest::new(4, 5).unwrap()).unwrap();
        assert!(page.is_empty());
        assert_eq!(page.total_pages, 2);
        assert!(!page.has_next);
        assert!(page.has_previous);
    }

    #[test]
    fn test_shared_tier_spans_units_of_work() {
        let access = access();
        let store = access.pool().clone();

        let a: Option<User> = access.get_by_id(1).unwrap();
        let b: Option<User> = access.get_by_id(1).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.calls("user.fetch_by_id"), 1);
        assert_eq!(access.stats().hits, 1);
        assert_eq!(access.stats().misses, 1);
    }

    #[test]
    fn test_lazy_orders_fetched_once() {
        let access = access();
        let store = access.pool().clone();

        let user: User = access.get_by_id(1).unwrap().unwrap();
        assert_eq!(access.orders_of(&user).unwrap().len(), 2);
        assert_eq!(access.orders_of(&user).unwrap().len(), 2);
        assert_eq!(store.calls("order.fetch_by_user"), 1);
    }

    #[test]
    fn test_cached_copies_have_independent_cells() {
        let access = access();
        let store = access.pool().clone();

        let first: User = access.get_by_id(2).unwrap().unwrap();
        access.orders_of(&first).unwrap();

        let second: User = access.get_by_id(2).unwrap().unwrap();
        assert_eq!(second.orders.state(), CellState::Unresolved);
        assert_eq!(store.calls("user.fetch_by_id"), 1);
    }

    #[test]
    fn test_null_department_needs_no_store_call() {
        let access = access();
        let store = access.pool().clone();

        let user: User = access.get_by_id(5).unwrap().unwrap();
        store.reset_calls();
        assert!(access.department_of(&user).unwrap().is_none());
        assert_eq!(store.total_calls(), 0);
    }

    #[test]
    fn test_create_read_update_read() {
        let access = access();

        let mut user = User::new("Zoe", "zoe@example.com", 28, Some(1));
        assert_eq!(access.create(&mut user).unwrap(), 1);
        assert_eq!(user.id, 16);

        let read: User = access.get_by_id(user.id).unwrap().unwrap();
        assert_eq!(read.email, "zoe@example.com");

        let mut changed = read.clone();
        changed.email = "zoe@corp.example".into();
        assert_eq!(access.update(&changed).unwrap(), 1);

        let reread: User = access.get_by_id(user.id).unwrap().unwrap();
        assert_eq!(reread.email, "zoe@corp.example");
    }

    #[test]
    fn test_write_invalidates_only_its_kind() {
        let access = access();
        let store = access.pool().clone();

        let _: Vec<Department> = access.get_all().unwrap();
        let _: Vec<User> = access.get_all().unwrap();

        let order = Order::new("ORD-new", Decimal::ONE, 7, Utc::now());
        access.create(&mut order.clone()).unwrap();

        let _: Vec<Department> = access.get_all().unwrap();
        let _: Vec<User> = access.get_all().unwrap();
        assert_eq!(store.calls("department.fetch_all"), 1);
        assert_eq!(store.calls("user.fetch_all"), 1);
    }

    #[test]
    fn test_failed_delete_keeps_cached_reads() {
        let access = access();
        let store = access.pool().clone();

        let _: Option<Department> = access.get_by_id(1).unwrap();
        let err = access.delete::<Department>(1).unwrap_err();
        assert!(matches!(err, orgstore::Error::Store(StoreError::Constraint(_))));

        let _: Option<Department> = access.get_by_id(1).unwrap();
        assert_eq!(store.calls("department.fetch_by_id"), 1);
        assert_eq!(access.stats().invalidations, 0);
    }

    #[test]
    fn test_handles_released_on_error_paths() {
        let access = access();
        let store = access.pool().clone();

        store.fail_next("order.fetch_all");
        assert!(access.get_all::<Order>().is_err());
        let result: Result<()> = access.run(|uow| {
            uow.get_by_id::<User>(1)?;
            Err(orgstore::Error::invalid("abandon"))
        });
        assert!(result.is_err());
        assert_eq!(store.open_handles(), 0);
    }

    #[test]
    fn test_closed_store_surfaces_store_error() {
        let access = access();
        access.pool().close();
        let result = access.get_by_id::<User>(1);
        assert!(matches!(result, Err(orgstore::Error::Store(StoreError::Closed))));
    }

    #[test]
    fn test_lookups_and_associations() {
        let access = access();

        let user3 = access.get_user_by_name("user3").unwrap().unwrap();
        assert_eq!(user3.id, 3);
        assert_eq!(access.get_orders_by_user_id(3).unwrap().len(), 2);

        let joined = access
            .get_with_association::<User>(3, UserAssociation::DepartmentAndOrders)
            .unwrap()
            .unwrap();
        assert_eq!(joined.department.get().unwrap().id, 1);
        assert_eq!(joined.orders.get().unwrap().len(), 2);

        let all = access
            .get_all_with_association::<User>(UserAssociation::Orders)
            .unwrap();
        assert_eq!(all.len(), 15);
        assert!(all[14].orders.get().unwrap().is_empty());
    }

    #[test]
    fn test_batch_resolution_for_a_page() {
        let access = DataAccess::new(seeded(), CacheConfig::new().with_batch_size(4)).unwrap();
        let store = access.pool().clone();

        let page: PageResult<User> = access.get_page(PageRequest::new(1, 10).unwrap()).unwrap();
        let outcome = access.resolve_all::<UserOrders>(&page.data).unwrap();

        assert_eq!(outcome.resolved, 10);
        assert_eq!(outcome.store_calls, 3);
        assert_eq!(store.calls("order.fetch_by_users"), 3);
        assert_eq!(access.orders_of(&page.data[4]).unwrap().len(), 2);
        assert_eq!(store.calls("order.fetch_by_user"), 0);
    }

    #[test]
    fn test_shared_cache_between_facades() {
        let store = seeded();
        let cache = Arc::new(QueryCache::new(16));
        let a = DataAccess::with_shared_cache(store.clone(), Arc::clone(&cache), CacheConfig::new()).unwrap();
        let b = DataAccess::with_shared_cache(store.clone(), Arc::clone(&cache), CacheConfig::new()).unwrap();

        let _: Option<User> = a.get_by_id(1).unwrap();
        let _: Option<User> = b.get_by_id(1).unwrap();
        assert_eq!(store.calls("user.fetch_by_id"), 1);

        assert_eq!(b.invalidate_all(), 1);
        assert!(a.cache().is_empty());
    }

    #[test]
    fn test_concurrent_units_of_work() {
        let access = access();

        thread::scope(|scope| {
            for t in 0..4i64 {
                let access = &access;
                scope.spawn(move || {
                    for round in 0..25 {
                        let id = (t * 25 + round) % 15 + 1;
                        let user: User = access.get_by_id(id).unwrap().unwrap();
                        assert_eq!(user.id, id);
                        if round % 5 == 0 {
                            let mut updated = user.clone();
                            updated.age += 1;
                            access.update(&updated).unwrap();
                        }
                        let count = access.count::<User>().unwrap();
                        assert_eq!(count, 15);
                    }
                });
            }
        });

        // after all writers finished, a fresh read reflects the store
        let store = access.pool().clone();
        let from_store: User = {
            let handle = store.acquire().unwrap();
            Repository::<User>::fetch_by_id(&handle, 1).unwrap().unwrap()
        };
        let cached: User = access.get_by_id(1).unwrap().unwrap();
        assert_eq!(cached.age, from_store.age);
        assert_eq!(store.open_handles(), 0);
    }
}

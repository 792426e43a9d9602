//! Unit of work
//!
//! Holds one store handle and one session tier for a logical sequence of
//! reads and writes. Reads consult the session tier, then the shared tier,
//! then the store. Writes go straight to the store; on success they
//! invalidate the written kind in the shared tier and clear the session
//! tier. Dropping the unit of work releases the handle on every exit path.

use orgstore::{
    build_page_result, AssociationStore, Entity, EntityKind, Id, Order, PageRequest, PageResult,
    Repository, Result, StorePool, User,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::CacheConfig;
use crate::key::CacheKey;
use crate::query_cache::QueryCache;
use crate::session::SessionCache;

/// Scoped store handle plus session cache
pub struct UnitOfWork<'a, P: StorePool> {
    pub(crate) handle: P::Handle,
    pub(crate) session: SessionCache,
    pub(crate) shared: &'a QueryCache,
    pub(crate) batch_size: usize,
    id: u64,
}

impl<'a, P: StorePool> UnitOfWork<'a, P> {
    pub(crate) fn new(handle: P::Handle, shared: &'a QueryCache, config: &CacheConfig, id: u64) -> Self {
        debug!(uow = id, "unit of work started");
        Self {
            handle,
            session: SessionCache::new(config.session),
            shared,
            batch_size: config.batch_size,
            id,
        }
    }

    /// Sequence number, for correlating logs
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The underlying store handle; calls through it bypass both tiers
    pub fn handle(&self) -> &P::Handle {
        &self.handle
    }

    /// The session tier
    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    /// Read through session tier, shared tier, then store.
    ///
    /// A store failure propagates and caches nothing.
    pub fn cached<T, F>(&mut self, key: CacheKey, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&P::Handle) -> Result<T>,
    {
        if let Some(value) = self.session.get(&key) {
            return Ok(value);
        }
        if let Some(value) = self.shared.get(&key) {
            self.session.put(key, &value);
            return Ok(value);
        }

        let ticket = self.shared.ticket(&key);
        let value = fetch(&self.handle)?;
        self.shared.fill(ticket, key.clone(), &value);
        self.session.put(key, &value);
        Ok(value)
    }

    /// Run a write against the store; caches change only if it succeeds
    pub fn write<T, F>(&mut self, kind: EntityKind, op: F) -> Result<T>
    where
        F: FnOnce(&P::Handle) -> Result<T>,
    {
        match op(&self.handle) {
            Ok(outcome) => {
                self.shared.invalidate(kind);
                self.session.clear();
                Ok(outcome)
            }
            Err(err) => {
                debug!(uow = self.id, kind = %kind, error = %err, "write failed, caches untouched");
                Err(err)
            }
        }
    }

    /// Entity by id; `None` if absent
    pub fn get_by_id<E>(&mut self, id: Id) -> Result<Option<E>>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        let key = CacheKey::new(E::KIND, "by_id").param(id);
        self.cached(key, |handle| Repository::<E>::fetch_by_id(handle, id))
    }

    /// Every entity of the kind, ordered by id
    pub fn get_all<E>(&mut self) -> Result<Vec<E>>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        let key = CacheKey::new(E::KIND, "all");
        self.cached(key, |handle| Repository::<E>::fetch_all(handle))
    }

    /// Number of entities of the kind
    pub fn count<E>(&mut self) -> Result<u64>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        let key = CacheKey::new(E::KIND, "count");
        self.cached(key, |handle| Repository::<E>::fetch_count(handle))
    }

    /// One page plus the total count, cached as a whole
    pub fn get_page<E>(&mut self, request: PageRequest) -> Result<PageResult<E>>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        let (offset, limit) = request.window();
        let key = CacheKey::new(E::KIND, "page").param(offset).param(limit);
        self.cached(key, |handle| {
            let data = Repository::<E>::fetch_page(handle, offset, limit)?;
            let total = Repository::<E>::fetch_count(handle)?;
            Ok(build_page_result(data, total, request))
        })
    }

    /// Insert `entity`, recording the assigned id on it; returns the
    /// affected count
    pub fn create<E>(&mut self, entity: &mut E) -> Result<u64>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        let id = self.write(E::KIND, |handle| Repository::<E>::insert(handle, entity))?;
        entity.set_id(id);
        Ok(1)
    }

    /// Replace the stored row with `entity`; returns the affected count
    pub fn update<E>(&mut self, entity: &E) -> Result<u64>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        self.write(E::KIND, |handle| Repository::<E>::update(handle, entity))
    }

    /// Delete by id; returns the affected count
    pub fn delete<E>(&mut self, id: Id) -> Result<u64>
    where
        E: Entity,
        P::Handle: Repository<E>,
    {
        self.write(E::KIND, |handle| Repository::<E>::delete_by_id(handle, id))
    }

    /// User with exactly this name
    pub fn get_user_by_name(&mut self, name: &str) -> Result<Option<User>> {
        let key = CacheKey::new(EntityKind::User, "by_name").param(name);
        self.cached(key, |handle| handle.fetch_user_by_name(name))
    }

    /// Orders placed by one user, ordered by id
    pub fn get_orders_by_user_id(&mut self, user_id: Id) -> Result<Vec<Order>> {
        let key = CacheKey::new(EntityKind::Order, "by_user").param(user_id);
        self.cached(key, |handle| handle.fetch_orders_by_user(user_id))
    }
}

impl<P: StorePool> Drop for UnitOfWork<'_, P> {
    fn drop(&mut self) {
        debug!(
            uow = self.id,
            session_hits = self.session.hits(),
            session_misses = self.session.misses(),
            "unit of work released"
        );
    }
}

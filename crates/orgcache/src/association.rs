//! Eager association reads
//!
//! Join fetches come back with relation cells already populated. They are
//! cached like any other read; the key declares every kind embedded in the
//! result, so a write to any of them drops the entry.

use orgstore::{Associated, Association, EntityKind, Id, JoinStore, Result, StorePool};

use crate::key::CacheKey;
use crate::uow::UnitOfWork;

fn association_key<S: Association>(kind: EntityKind, operation: &'static str, spec: S) -> CacheKey {
    spec.related()
        .iter()
        .fold(CacheKey::new(kind, operation).param(spec.name()), |key, related| {
            key.with_related(*related)
        })
}

impl<P: StorePool> UnitOfWork<'_, P> {
    /// One entity with the spec's relations resolved; `None` if absent
    pub fn get_with_association<E>(&mut self, id: Id, spec: E::Spec) -> Result<Option<E>>
    where
        E: Associated,
        P::Handle: JoinStore<E>,
    {
        let key = association_key(E::KIND, "with", spec).param(id);
        self.cached(key, |handle| JoinStore::<E>::fetch_with(handle, id, spec))
    }

    /// Every entity of the kind with the spec's relations resolved
    pub fn get_all_with_association<E>(&mut self, spec: E::Spec) -> Result<Vec<E>>
    where
        E: Associated,
        P::Handle: JoinStore<E>,
    {
        let key = association_key(E::KIND, "all_with", spec);
        self.cached(key, |handle| JoinStore::<E>::fetch_all_with(handle, spec))
    }
}

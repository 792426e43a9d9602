//! Lazy relation access within a unit of work
//!
//! Resolution goes straight to the store handle: the result is memoized in
//! the owning entity's cell, not in either cache tier.

use orgstore::lazy::{self, DepartmentUsers, OrderUser, UserDepartment, UserOrders};
use orgstore::{BatchOutcome, Department, Order, Relation, Result, StorePool, User};

use crate::uow::UnitOfWork;

impl<P: StorePool> UnitOfWork<'_, P> {
    /// Resolve relation `R` on one owner, at most one store call per cell
    pub fn resolve<'o, R: Relation>(&self, owner: &'o R::Owner) -> Result<Option<&'o R::Target>> {
        lazy::resolve::<R, P::Handle>(owner, &self.handle)
    }

    /// Resolve relation `R` across `owners`, one store call per
    /// `batch_size` distinct keys; on failure no cell changes
    pub fn resolve_all<R: Relation>(&self, owners: &[R::Owner]) -> Result<BatchOutcome> {
        lazy::resolve_batch::<R, P::Handle>(owners, &self.handle, self.batch_size)
    }

    /// `user.department`
    pub fn department_of<'o>(&self, user: &'o User) -> Result<Option<&'o Department>> {
        self.resolve::<UserDepartment>(user)
    }

    /// `user.orders`
    pub fn orders_of<'o>(&self, user: &'o User) -> Result<&'o [Order]> {
        Ok(self
            .resolve::<UserOrders>(user)?
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }

    /// `order.user`
    pub fn user_of<'o>(&self, order: &'o Order) -> Result<Option<&'o User>> {
        self.resolve::<OrderUser>(order)
    }

    /// `department.users`
    pub fn members_of<'o>(&self, department: &'o Department) -> Result<&'o [User]> {
        Ok(self
            .resolve::<DepartmentUsers>(department)?
            .map(Vec::as_slice)
            .unwrap_or(&[]))
    }
}

#[cfg(test)]
mod tests {
    use crate::access::DataAccess;
    use crate::config::CacheConfig;
    use chrono::{TimeZone, Utc};
    use orgstore::lazy::{DepartmentUsers, OrderUser, UserOrders};
    use orgstore::{
        CellState, Department, MemoryStore, Order, Repository, StorePool, User,
    };
    use rust_decimal::Decimal;

    fn access(batch_size: usize) -> DataAccess<MemoryStore> {
        let store = MemoryStore::new();
        {
            let handle = store.acquire().unwrap();
            let created = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
            handle.insert(&Department::new("Engineering", "", created)).unwrap();
            handle.insert(&Department::new("Sales", "", created)).unwrap();
            for (name, department) in [("Alice", Some(1)), ("Bob", Some(2)), ("Carol", Some(1)), ("Dave", None)] {
                handle.insert(&User::new(name, "x@example.com", 30, department)).unwrap();
            }
            for user in [1, 1, 2, 3, 3] {
                handle
                    .insert(&Order::new(format!("ORD-{}", user), Decimal::ONE, user, created))
                    .unwrap();
            }
        }
        store.reset_calls();
        DataAccess::new(store, CacheConfig::new().with_batch_size(batch_size)).unwrap()
    }

    #[test]
    fn test_orders_resolved_once() {
        let access = access(10);
        let store = access.pool().clone();
        let mut uow = access.begin().unwrap();

        let alice: User = uow.get_by_id(1).unwrap().unwrap();
        assert_eq!(uow.orders_of(&alice).unwrap().len(), 2);
        assert_eq!(uow.orders_of(&alice).unwrap().len(), 2);
        assert_eq!(store.calls("order.fetch_by_user"), 1);
    }

    #[test]
    fn test_null_department_skips_store() {
        let access = access(10);
        let store = access.pool().clone();
        let uow = access.begin().unwrap();

        let dave: User = Repository::<User>::fetch_by_id(uow.handle(), 4).unwrap().unwrap();
        store.reset_calls();

        assert!(uow.department_of(&dave).unwrap().is_none());
        assert_eq!(dave.department.state(), CellState::Absent);
        assert_eq!(store.total_calls(), 0);
    }

    #[test]
    fn test_user_of_and_members_of() {
        let access = access(10);
        let mut uow = access.begin().unwrap();

        let order: Order = uow.get_by_id(3).unwrap().unwrap();
        assert_eq!(uow.user_of(&order).unwrap().unwrap().name, "Bob");

        let engineering: Department = uow.get_by_id(1).unwrap().unwrap();
        let names: Vec<&str> = uow
            .members_of(&engineering)
            .unwrap()
            .iter()
            .map(|u| u.name.as_str())
            .collect();
        assert_eq!(names, vec!["Alice", "Carol"]);
    }

    #[test]
    fn test_batch_chunks_by_batch_size() {
        let access = access(2);
        let store = access.pool().clone();
        let mut uow = access.begin().unwrap();

        let users: Vec<User> = uow.get_all().unwrap();
        let outcome = uow.resolve_all::<UserOrders>(&users).unwrap();

        assert_eq!(outcome.keys, 4);
        assert_eq!(outcome.store_calls, 2);
        assert_eq!(store.calls("order.fetch_by_users"), 2);
        assert_eq!(users[0].orders.get().unwrap().len(), 2);
        assert!(users[3].orders.get().unwrap().is_empty());

        // already resolved: nothing left to fetch
        let again = uow.resolve_all::<UserOrders>(&users).unwrap();
        assert_eq!(again.store_calls, 0);
        assert_eq!(uow.orders_of(&users[1]).unwrap().len(), 1);
        assert_eq!(store.calls("order.fetch_by_user"), 0);
    }

    #[test]
    fn test_batch_failure_leaves_cells_unresolved() {
        let access = access(1);
        let store = access.pool().clone();
        let mut uow = access.begin().unwrap();

        let departments: Vec<Department> = uow.get_all().unwrap();
        store.fail_call("user.fetch_by_departments", 2);

        assert!(uow.resolve_all::<DepartmentUsers>(&departments).is_err());
        assert!(departments
            .iter()
            .all(|d| d.users.state() == CellState::Unresolved));

        let outcome = uow.resolve_all::<DepartmentUsers>(&departments).unwrap();
        assert_eq!(outcome.resolved, 2);
    }

    #[test]
    fn test_batch_many_to_one() {
        let access = access(500);
        let store = access.pool().clone();
        let mut uow = access.begin().unwrap();

        let orders: Vec<Order> = uow.get_all().unwrap();
        let outcome = uow.resolve_all::<OrderUser>(&orders).unwrap();

        assert_eq!(outcome.keys, 3);
        assert_eq!(store.calls("user.fetch_by_ids"), 1);
        assert_eq!(orders[4].user.get().unwrap().name, "Carol");
    }
}

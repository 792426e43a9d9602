//! Entities of the users / departments / orders schema
//!
//! Relation fields are [`LazyCell`]s: a freshly fetched row carries
//! unresolved cells, join fetches hand them out pre-populated.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::lazy::LazyCell;

/// Surrogate key assigned by the store on insert
pub type Id = i64;

/// The entity kinds known to the data-access layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// [`User`]
    User,
    /// [`Department`]
    Department,
    /// [`Order`]
    Order,
}

impl EntityKind {
    /// Every kind, in ordinal order
    pub const ALL: [EntityKind; 3] = [EntityKind::User, EntityKind::Department, EntityKind::Order];

    /// Lowercase name used in cache keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Department => "department",
            EntityKind::Order => "order",
        }
    }

    /// Dense index in `0..3`, usable for per-kind tables
    pub fn ordinal(&self) -> usize {
        match self {
            EntityKind::User => 0,
            EntityKind::Department => 1,
            EntityKind::Order => 2,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row type the store can persist
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Kind used for cache keys and invalidation
    const KIND: EntityKind;

    /// Surrogate key (0 until the store assigns one)
    fn id(&self) -> Id;

    /// Record the key assigned by the store
    fn set_id(&mut self, id: Id);

    /// Copy of the scalar columns with every relation cell unresolved
    fn detached(&self) -> Self;
}

/// A user, optionally belonging to a department, owning orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Surrogate key
    pub id: Id,
    /// Display name, also used for lookups by name
    pub name: String,
    /// Contact address
    pub email: String,
    /// Age in years
    pub age: u32,
    /// Foreign key into departments
    pub department_id: Option<Id>,
    /// Many-to-one: the user's department
    #[serde(default)]
    pub department: LazyCell<Department>,
    /// One-to-many: the user's orders, ordered by id
    #[serde(default)]
    pub orders: LazyCell<Vec<Order>>,
}

impl User {
    /// New unsaved user
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        age: u32,
        department_id: Option<Id>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            email: email.into(),
            age,
            department_id,
            department: LazyCell::unresolved(),
            orders: LazyCell::unresolved(),
        }
    }

    /// Same user with an explicit id
    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> Id {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn detached(&self) -> Self {
        User::new(self.name.clone(), self.email.clone(), self.age, self.department_id)
            .with_id(self.id)
    }
}

/// A department grouping users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    /// Surrogate key
    pub id: Id,
    /// Department name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// When the department was created
    pub created_time: DateTime<Utc>,
    /// One-to-many: members, ordered by id
    #[serde(default)]
    pub users: LazyCell<Vec<User>>,
}

impl Department {
    /// New unsaved department
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        created_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: description.into(),
            created_time,
            users: LazyCell::unresolved(),
        }
    }

    /// Same department with an explicit id
    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }
}

impl Entity for Department {
    const KIND: EntityKind = EntityKind::Department;

    fn id(&self) -> Id {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn detached(&self) -> Self {
        Department::new(self.name.clone(), self.description.clone(), self.created_time)
            .with_id(self.id)
    }
}

/// An order placed by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Surrogate key
    pub id: Id,
    /// Business order number
    pub order_no: String,
    /// Exact amount
    pub amount: Decimal,
    /// Foreign key into users
    pub user_id: Id,
    /// When the order was placed
    pub order_time: DateTime<Utc>,
    /// Many-to-one: the ordering user
    #[serde(default)]
    pub user: LazyCell<User>,
}

impl Order {
    /// New unsaved order
    pub fn new(
        order_no: impl Into<String>,
        amount: Decimal,
        user_id: Id,
        order_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            order_no: order_no.into(),
            amount,
            user_id,
            order_time,
            user: LazyCell::unresolved(),
        }
    }

    /// Same order with an explicit id
    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }
}

impl Entity for Order {
    const KIND: EntityKind = EntityKind::Order;

    fn id(&self) -> Id {
        self.id
    }

    fn set_id(&mut self, id: Id) {
        self.id = id;
    }

    fn detached(&self) -> Self {
        Order::new(self.order_no.clone(), self.amount, self.user_id, self.order_time)
            .with_id(self.id)
    }
}

//! Cache keys
//!
//! A key names one logical read: the kind it returns, the operation, its
//! parameters, and any other kinds whose rows are embedded in the result.
//! Two keys are equal exactly when they describe the same read.

use std::fmt;

use orgstore::EntityKind;

/// One query parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Param {
    /// Signed integer (ids)
    Int(i64),
    /// Unsigned integer (offsets, limits)
    UInt(u64),
    /// Text (names)
    Text(String),
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<u64> for Param {
    fn from(value: u64) -> Self {
        Param::UInt(value)
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Param::UInt(u64::from(value))
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Int(n) => write!(f, "{}", n),
            Param::UInt(n) => write!(f, "{}", n),
            Param::Text(s) => write!(f, "{:?}", s),
        }
    }
}

/// Small set of entity kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KindSet(u8);

impl KindSet {
    /// No kinds
    pub const EMPTY: KindSet = KindSet(0);

    /// This set plus `kind`
    pub fn with(self, kind: EntityKind) -> Self {
        KindSet(self.0 | (1 << kind.ordinal()))
    }

    /// Membership test
    pub fn contains(self, kind: EntityKind) -> bool {
        self.0 & (1 << kind.ordinal()) != 0
    }

    /// True for the empty set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Members in ordinal order
    pub fn iter(self) -> impl Iterator<Item = EntityKind> {
        EntityKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<EntityKind> for KindSet {
    fn from_iter<I: IntoIterator<Item = EntityKind>>(iter: I) -> Self {
        iter.into_iter().fold(KindSet::EMPTY, KindSet::with)
    }
}

/// Identity of a cached read
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: EntityKind,
    operation: &'static str,
    params: Vec<Param>,
    related: KindSet,
}

impl CacheKey {
    /// Key for `operation` on `kind` with no parameters yet
    pub fn new(kind: EntityKind, operation: &'static str) -> Self {
        Self {
            kind,
            operation,
            params: Vec::new(),
            related: KindSet::EMPTY,
        }
    }

    /// Append a parameter
    pub fn param(mut self, param: impl Into<Param>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Declare that the result embeds rows of `kind`
    pub fn with_related(mut self, kind: EntityKind) -> Self {
        if kind != self.kind {
            self.related = self.related.with(kind);
        }
        self
    }

    /// Kind of the returned rows
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Operation name
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Parameters in call order
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Embedded kinds other than [`kind`](Self::kind)
    pub fn related(&self) -> KindSet {
        self.related
    }

    /// Whether a write to `kind` can change this read's result
    pub fn reads(&self, kind: EntityKind) -> bool {
        self.kind == kind || self.related.contains(kind)
    }

    /// Every kind this read depends on
    pub fn dependencies(&self) -> KindSet {
        self.related.with(self.kind)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}(", self.kind, self.operation)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", param)?;
        }
        f.write_str(")")?;
        for kind in self.related.iter() {
            write!(f, "+{}", kind)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_compare_structurally() {
        let a = CacheKey::new(EntityKind::User, "page").param(0u64).param(5u64);
        let b = CacheKey::new(EntityKind::User, "page").param(0u64).param(5u64);
        let c = CacheKey::new(EntityKind::User, "page").param(5u64).param(0u64);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, CacheKey::new(EntityKind::Order, "page").param(0u64).param(5u64));
    }

    #[test]
    fn test_related_kinds_drive_reads() {
        let key = CacheKey::new(EntityKind::User, "with")
            .param(1i64)
            .with_related(EntityKind::Order)
            .with_related(EntityKind::User);

        assert!(key.reads(EntityKind::User));
        assert!(key.reads(EntityKind::Order));
        assert!(!key.reads(EntityKind::Department));
        assert_eq!(key.related().iter().collect::<Vec<_>>(), vec![EntityKind::Order]);
        assert_eq!(
            key.dependencies().iter().collect::<Vec<_>>(),
            vec![EntityKind::User, EntityKind::Order]
        );
    }

    #[test]
    fn test_display() {
        let key = CacheKey::new(EntityKind::User, "by_name")
            .param("Alice")
            .with_related(EntityKind::Department);
        assert_eq!(key.to_string(), "user:by_name(\"Alice\")+department");

        let key = CacheKey::new(EntityKind::Order, "all");
        assert_eq!(key.to_string(), "order:all()");
    }

    #[test]
    fn test_kind_set_from_iter() {
        let set: KindSet = [EntityKind::Order, EntityKind::User].into_iter().collect();
        assert!(set.contains(EntityKind::User));
        assert!(!set.contains(EntityKind::Department));
        assert!(!set.is_empty());
        assert!(KindSet::EMPTY.is_empty());
    }
}

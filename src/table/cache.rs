//! Invalidating cache for descriptors and column listings
//!
//! Entries expire after a TTL and are dropped whenever their table is
//! mutated. A generation counter, bumped under the write lock by every
//! invalidation, keeps a reader that raced with a mutation from storing the
//! result it read before the mutation committed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::ColumnDescriptor;
use crate::catalog::{DescriptorField, TableInfo};

/// Cache key
///
/// Redacted and unredacted column listings never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// `describe(table, fields)`; `fields` is sorted and deduplicated
    Describe {
        table: String,
        fields: Vec<DescriptorField>,
    },
    /// `list_columns(table, include_auth)`
    Columns { table: String, include_auth: bool },
}

impl CacheKey {
    pub fn table(&self) -> &str {
        match self {
            CacheKey::Describe { table, .. } | CacheKey::Columns { table, .. } => table,
        }
    }
}

/// Cached value
#[derive(Debug, Clone)]
pub enum CachedValue {
    Describe(TableInfo),
    Columns(Arc<Vec<ColumnDescriptor>>),
}

#[derive(Debug)]
struct Entry {
    value: CachedValue,
    cached_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<CacheKey, Entry>,
    generation: u64,
}

/// Thread-safe schema cache
#[derive(Debug)]
pub struct SchemaCache {
    state: RwLock<State>,
    ttl: Duration,
}

impl SchemaCache {
    /// Create a cache; a zero TTL disables caching
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            ttl,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Current generation, to be recorded before reading storage
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Look up a live entry
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        if !self.is_enabled() {
            return None;
        }
        let state = self.state.read();
        state
            .entries
            .get(key)
            .filter(|e| e.cached_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// Store a value read from storage
    ///
    /// Skipped when any invalidation happened after `observed` was taken.
    pub fn insert(&self, key: CacheKey, value: CachedValue, observed: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut state = self.state.write();
        if state.generation != observed {
            tracing::trace!(table = %key.table(), "Skipping stale cache fill");
            return false;
        }
        let ttl = self.ttl;
        state.entries.retain(|_, e| e.cached_at.elapsed() < ttl);
        state.entries.insert(
            key,
            Entry {
                value,
                cached_at: Instant::now(),
            },
        );
        true
    }

    /// Drop every entry of the given tables
    pub fn invalidate_tables<S: AsRef<str>>(&self, tables: &[S]) {
        let mut state = self.state.write();
        state.generation = state.generation.wrapping_add(1);
        state
            .entries
            .retain(|key, _| !tables.iter().any(|t| t.as_ref() == key.table()));
    }

    pub fn invalidate_table(&self, table: &str) {
        self.invalidate_tables(&[table]);
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.generation = state.generation.wrapping_add(1);
        state.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe_key(table: &str) -> CacheKey {
        CacheKey::Describe {
            table: table.to_string(),
            fields: vec![DescriptorField::Name],
        }
    }

    fn info(name: &str) -> CachedValue {
        CachedValue::Describe(TableInfo {
            name: Some(name.to_string()),
            ..TableInfo::default()
        })
    }

    #[test]
    fn test_insert_and_get() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        let gen = cache.generation();
        assert!(cache.insert(describe_key("a"), info("a"), gen));
        assert!(matches!(
            cache.get(&describe_key("a")),
            Some(CachedValue::Describe(i)) if i.name.as_deref() == Some("a")
        ));
        assert!(cache.get(&describe_key("b")).is_none());
    }

    #[test]
    fn test_stale_fill_rejected() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        let gen = cache.generation();
        cache.invalidate_table("a");
        assert!(!cache.insert(describe_key("a"), info("a"), gen));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_only_named_tables() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        let gen = cache.generation();
        cache.insert(describe_key("a"), info("a"), gen);
        cache.insert(describe_key("b"), info("b"), gen);
        cache.insert(
            CacheKey::Columns {
                table: "a".into(),
                include_auth: true,
            },
            CachedValue::Columns(Arc::new(Vec::new())),
            gen,
        );
        cache.invalidate_table("a");
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&describe_key("b")).is_some());
    }

    #[test]
    fn test_column_keys_distinct_by_redaction() {
        let redacted = CacheKey::Columns {
            table: "users".into(),
            include_auth: false,
        };
        let full = CacheKey::Columns {
            table: "users".into(),
            include_auth: true,
        };
        let cache = SchemaCache::new(Duration::from_secs(60));
        cache.insert(
            redacted,
            CachedValue::Columns(Arc::new(Vec::new())),
            cache.generation(),
        );
        assert!(cache.get(&full).is_none());
    }

    #[test]
    fn test_zero_ttl_disables() {
        let cache = SchemaCache::new(Duration::ZERO);
        assert!(!cache.insert(describe_key("a"), info("a"), cache.generation()));
        assert!(cache.get(&describe_key("a")).is_none());
    }

    #[test]
    fn test_expired_entries_not_returned() {
        let cache = SchemaCache::new(Duration::from_millis(20));
        cache.insert(describe_key("a"), info("a"), cache.generation());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&describe_key("a")).is_none());
    }
}

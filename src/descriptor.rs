//! Table Descriptor Cache — maps a variable id to its table index, current
//! column count/type, and last-seen metadata. Owned exclusively by the SQL
//! Writer.

use crate::encoding::SqlType;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Cached metadata last written for a variable.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMeta {
    pub version: i64,
    pub sampling: u32,
    pub ndim: usize,
    pub shape: Vec<usize>,
    pub unit: Option<String>,
}

/// One descriptor per logged variable.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub id: String,
    pub tid: i64,
    pub cols: usize,
    pub sql_type: SqlType,
    pub meta: Option<CachedMeta>,
}

impl TableDescriptor {
    pub fn new(id: impl Into<String>, tid: i64, cols: usize, sql_type: SqlType) -> Self {
        TableDescriptor {
            id: id.into(),
            tid,
            cols,
            sql_type,
            meta: None,
        }
    }

    /// Canonical digit width for column names at the current column count:
    /// `1 + floor(log10(max(1, cols - 1)))`.
    pub fn digit_width(&self) -> usize {
        digit_width(self.cols)
    }

    /// The canonical name for data column `i` (0-indexed) at the current
    /// column count.
    pub fn column_name(&self, i: usize) -> String {
        format!("c{:0width$}", i, width = self.digit_width())
    }
}

/// Computes the canonical column-name digit width for a given column count:
/// `1 + floor(log10(max(1, cols - 1)))`.
pub fn digit_width(cols: usize) -> usize {
    let n = cols.saturating_sub(1).max(1);
    1 + (n as f64).log10().floor() as usize
}

/// Bounded, lock-guarded map from variable id to its descriptor. Populated
/// at startup from the DB's information schema and updated by the writer as
/// schemas evolve. There is no eviction policy, only a logged ceiling.
pub struct DescriptorCache {
    entries: RwLock<HashMap<String, TableDescriptor>>,
    capacity: usize,
}

impl DescriptorCache {
    pub fn new(capacity: usize) -> Self {
        DescriptorCache {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn get(&self, id: &str) -> Option<TableDescriptor> {
        self.entries.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn insert(&self, desc: TableDescriptor) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity && !entries.contains_key(&desc.id) {
            tracing::warn!(
                size = entries.len(),
                capacity = self.capacity,
                id = %desc.id,
                "descriptor cache at configured ceiling; not caching new variable"
            );
            return;
        }
        entries.insert(desc.id.clone(), desc);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_width_matches_known_examples() {
        assert_eq!(digit_width(1), 1);
        assert_eq!(digit_width(4), 1);
        assert_eq!(digit_width(10), 1);
        assert_eq!(digit_width(11), 2);
        assert_eq!(digit_width(12), 2);
        assert_eq!(digit_width(100), 2);
        assert_eq!(digit_width(101), 3);
    }

    #[test]
    fn column_name_zero_pads_to_width() {
        let mut d = TableDescriptor::new("a:b", 1, 4, SqlType::Integer);
        assert_eq!(d.column_name(0), "c0");
        assert_eq!(d.column_name(3), "c3");
        d.cols = 12;
        assert_eq!(d.digit_width(), 2);
        assert_eq!(d.column_name(0), "c00");
        assert_eq!(d.column_name(11), "c11");
    }

    #[test]
    fn cache_respects_capacity_ceiling() {
        let cache = DescriptorCache::new(1);
        cache.insert(TableDescriptor::new("a", 1, 1, SqlType::Integer));
        cache.insert(TableDescriptor::new("b", 2, 1, SqlType::Integer));
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 1);
    }
}

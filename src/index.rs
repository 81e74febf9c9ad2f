//! Table indexes: metadata, composite-key construction from record bytes,
//! the MySQL-compatible NULL policy for unique indexes, and range scanners
//! with prefix padding.

use crate::btree::{BplusTree, BplusTreeScanner, KeyComparator};
use crate::rc::{DbError, Result};
use crate::record::{self, Rid};
use crate::table::{self, FieldMeta};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Index description as stored inside the table metadata file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub field_names: Vec<String>,
    pub is_unique: bool,
}

/// A B+tree index over one or more fields of a table. The key is the
/// concatenation of the referenced field bytes in declared order.
pub struct Index {
    meta: IndexMeta,
    fields: Vec<FieldMeta>,
    tree: BplusTree,
    key_len: usize,
}

impl Index {
    fn comparator(fields: &[FieldMeta]) -> KeyComparator {
        KeyComparator::new(fields.iter().map(|f| (f.attr_type, f.len)).collect())
    }

    /// Create a fresh index file.
    pub fn create(path: &Path, meta: IndexMeta, fields: Vec<FieldMeta>) -> Result<Index> {
        let comparator = Self::comparator(&fields);
        let key_len = comparator.key_len();
        let tree = BplusTree::create(path, comparator)?;
        log::info!("created index {} with key width {}", meta.name, key_len);
        Ok(Index { meta, fields, tree, key_len })
    }

    /// Open an existing index file.
    pub fn open(path: &Path, meta: IndexMeta, fields: Vec<FieldMeta>) -> Result<Index> {
        let comparator = Self::comparator(&fields);
        let key_len = comparator.key_len();
        let tree = BplusTree::open(path, comparator)?;
        Ok(Index { meta, fields, tree, key_len })
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    /// Extract the composite key from a record buffer.
    pub fn build_key(&self, record: &[u8]) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.key_len);
        for f in &self.fields {
            key.extend_from_slice(&record[f.offset..f.offset + f.len]);
        }
        key
    }

    /// A key is NULL when any component field is entirely 0xFF.
    pub fn is_null_key(&self, key: &[u8]) -> bool {
        let mut off = 0;
        for f in &self.fields {
            if record::field_is_null(&key[off..off + f.len]) {
                return true;
            }
            off += f.len;
        }
        false
    }

    /// Insert the entry for a record. A unique index skips NULL keys
    /// entirely (multiple NULLs coexist, MySQL style) and reports
    /// `RecordDuplicateKey` when a live entry with the same key exists.
    pub fn insert_entry(&self, record: &[u8], rid: &Rid) -> Result<()> {
        let key = self.build_key(record);
        if self.meta.is_unique {
            if self.is_null_key(&key) {
                log::debug!("unique index {}: NULL key not inserted", self.meta.name);
                return Ok(());
            }
            if !self.tree.get_entry(&key)?.is_empty() {
                return Err(DbError::RecordDuplicateKey);
            }
        }
        self.tree.insert_entry(&key, rid)
    }

    /// Delete the entry for a record. NULL keys of a unique index were
    /// never inserted, so their deletion is a no-op.
    pub fn delete_entry(&self, record: &[u8], rid: &Rid) -> Result<()> {
        let key = self.build_key(record);
        if self.meta.is_unique && self.is_null_key(&key) {
            return Ok(());
        }
        self.tree.delete_entry(&key, rid)
    }

    /// Serialise `values` over the leading index fields into key bytes,
    /// padding the uncovered suffix with `fill` (0x00 for a left bound,
    /// 0xFF for a right bound).
    pub fn make_scan_key(&self, values: &[Value], fill: u8) -> Result<Vec<u8>> {
        if values.len() > self.fields.len() {
            return Err(DbError::InvalidArgument(format!(
                "too many key values for index {}: {} of {}",
                self.meta.name,
                values.len(),
                self.fields.len()
            )));
        }
        let mut key = vec![fill; self.key_len];
        let mut off = 0;
        for (f, v) in self.fields.iter().zip(values.iter()) {
            table::store_value(f, v, &mut key[off..off + f.len])?;
            off += f.len;
        }
        Ok(key)
    }

    /// Range scanner over `[left, right]` in key order.
    pub fn create_scanner(
        &self,
        left_key: Option<&[u8]>,
        left_inclusive: bool,
        right_key: Option<&[u8]>,
        right_inclusive: bool,
    ) -> Result<IndexScanner> {
        let inner = self.tree.scanner(left_key, left_inclusive, right_key, right_inclusive)?;
        Ok(IndexScanner { inner })
    }

    /// Flush index pages to disk.
    pub fn sync(&self) -> Result<()> {
        self.tree.sync()
    }
}

/// Cursor over the RIDs in a key range, ascending.
pub struct IndexScanner {
    inner: BplusTreeScanner,
}

impl IndexScanner {
    pub fn next_entry(&mut self) -> Result<Option<Rid>> {
        self.inner.next_entry()
    }
}

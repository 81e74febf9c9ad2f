//! Table metadata and the heap table engine: record storage combined with
//! index maintenance. Metadata is a JSON document on disk, updated through
//! a `.tmp` file and an atomic rename.

use crate::buffer::DiskBufferPool;
use crate::index::{Index, IndexMeta};
use crate::rc::{DbError, Result};
use crate::record::{
    self, Record, RecordFileHandler, RecordFileScanner, Rid, NULL_FIELD_BYTE, TEXT_FIELD_WIDTH,
};
use crate::types::{self, AttrType};
use crate::util;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Row-major slots or per-page columnar (PAX) layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    Row,
    Pax,
}

/// One column of a table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttrType,
    pub offset: usize,
    pub len: usize,
    pub nullable: bool,
    pub visible: bool,
    pub field_id: usize,
}

/// Column description coming from DDL. `arg` is the `(n)` of `CHAR(n)` /
/// `VECTOR(n)` and ignored for the fixed-width types.
#[derive(Clone, Debug)]
pub struct ColumnSpec {
    pub name: String,
    pub attr_type: AttrType,
    pub arg: usize,
    pub nullable: bool,
}

/// On-disk width of a column of the given type.
pub fn field_len(attr_type: AttrType, arg: usize) -> Result<usize> {
    match attr_type {
        AttrType::Ints | AttrType::Floats | AttrType::Dates => Ok(4),
        AttrType::Booleans => Ok(1),
        AttrType::Chars => {
            if arg == 0 || arg > 4096 {
                return Err(DbError::InvalidArgument(format!("bad char length {arg}")));
            }
            Ok(arg)
        }
        AttrType::Vectors => {
            if arg == 0 || arg > 16000 {
                return Err(DbError::InvalidArgument(format!("bad vector dimension {arg}")));
            }
            Ok(arg * 4)
        }
        AttrType::Texts => Ok(TEXT_FIELD_WIDTH),
        AttrType::Undefined => Err(DbError::InvalidArgument("column of undefined type".into())),
    }
}

/// Full description of one table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableMeta {
    pub table_id: u32,
    pub name: String,
    pub storage_format: StorageFormat,
    pub fields: Vec<FieldMeta>,
    pub indexes: Vec<IndexMeta>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    pub record_size: usize,
}

impl TableMeta {
    /// Build metadata for a new table; offsets are assigned in column order.
    pub fn new(
        table_id: u32,
        name: &str,
        columns: &[ColumnSpec],
        storage_format: StorageFormat,
    ) -> Result<TableMeta> {
        if columns.is_empty() {
            return Err(DbError::InvalidArgument("table needs at least one column".into()));
        }
        let mut fields = Vec::with_capacity(columns.len());
        let mut offset = 0;
        for (i, c) in columns.iter().enumerate() {
            if fields.iter().any(|f: &FieldMeta| f.name == c.name) {
                return Err(DbError::InvalidArgument(format!("duplicate column {}", c.name)));
            }
            let len = field_len(c.attr_type, c.arg)?;
            fields.push(FieldMeta {
                name: c.name.clone(),
                attr_type: c.attr_type,
                offset,
                len,
                nullable: c.nullable,
                visible: true,
                field_id: i,
            });
            offset += len;
        }
        Ok(TableMeta {
            table_id,
            name: name.to_string(),
            storage_format,
            fields,
            indexes: Vec::new(),
            primary_keys: Vec::new(),
            record_size: offset,
        })
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields exposed to tuples, in declared order.
    pub fn visible_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter().filter(|f| f.visible)
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexMeta> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// Path of the metadata file for `table`.
pub fn table_meta_file(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}.table"))
}

/// Path of the data file for `table`.
pub fn table_data_file(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}.data"))
}

/// Path of the index file for `index` on `table`.
pub fn table_index_file(dir: &Path, table: &str, index: &str) -> PathBuf {
    dir.join(format!("{table}-{index}.index"))
}

/// Serialise the metadata through a `.tmp` file and rename it into place,
/// so a crash never leaves a half-written metadata file behind.
pub fn save_table_meta(dir: &Path, meta: &TableMeta) -> Result<()> {
    let target = table_meta_file(dir, &meta.name);
    let tmp = target.with_extension("table.tmp");
    let json = serde_json::to_string_pretty(meta)
        .map_err(|e| DbError::Internal(format!("serialize table meta: {e}")))?;
    std::fs::write(&tmp, json).map_err(DbError::IoWrite)?;
    std::fs::rename(&tmp, &target).map_err(DbError::IoWrite)?;
    Ok(())
}

/// Serialise one value into a fixed-width field slot. NULL fills the slot
/// with 0xFF; CHAR content is zero-padded and truncated to the slot.
pub fn store_value(field: &FieldMeta, value: &Value, out: &mut [u8]) -> Result<()> {
    debug_assert_eq!(out.len(), field.len);
    if value.is_null() {
        if !field.nullable {
            return Err(DbError::ConstraintViolation(format!(
                "field {} does not allow NULL",
                field.name
            )));
        }
        out.fill(NULL_FIELD_BYTE);
        return Ok(());
    }
    let v = types::cast_to(value, field.attr_type)?;
    match &v {
        Value::Int(x) | Value::Date(x) => util::seti32(out, 0, *x),
        Value::Float(x) => util::setf32(out, 0, *x),
        Value::Bool(x) => out[0] = *x as u8,
        Value::Chars(b) => {
            out.fill(0);
            let n = b.len().min(field.len);
            out[..n].copy_from_slice(&b[..n]);
        }
        Value::Text(b) => {
            if b.len() + 1 > field.len {
                return Err(DbError::InvalidArgument(format!(
                    "text too long for inline slot: {}",
                    b.len()
                )));
            }
            out.fill(0);
            out[..b.len()].copy_from_slice(b);
        }
        Value::Vector(xs) => {
            if xs.len() * 4 != field.len {
                return Err(DbError::InvalidArgument(format!(
                    "vector dimension mismatch: value {} field {}",
                    xs.len(),
                    field.len / 4
                )));
            }
            for (i, x) in xs.iter().enumerate() {
                util::setf32(out, i * 4, *x);
            }
        }
        Value::Null(_) => unreachable!(),
    }
    Ok(())
}

/// Decode one field of a record buffer into a value.
pub fn read_value(field: &FieldMeta, data: &[u8]) -> Value {
    let slot = &data[field.offset..field.offset + field.len];
    if record::field_is_null(slot) {
        return Value::Null(field.attr_type);
    }
    match field.attr_type {
        AttrType::Ints => Value::Int(util::geti32(slot, 0)),
        AttrType::Dates => Value::Date(util::geti32(slot, 0)),
        AttrType::Floats => Value::Float(util::getf32(slot, 0)),
        AttrType::Booleans => Value::Bool(slot[0] != 0),
        AttrType::Chars => {
            let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
            Value::Chars(slot[..end].to_vec())
        }
        AttrType::Texts => Value::Text(record::text_slot_content(data, field.offset, field.len).to_vec()),
        AttrType::Vectors => {
            let n = field.len / 4;
            Value::Vector((0..n).map(|i| util::getf32(slot, i * 4)).collect())
        }
        AttrType::Undefined => Value::null(),
    }
}

/// Serialise a full row of values into a record buffer. TEXT values longer
/// than the inline capacity go to the buffer tail behind an extension
/// marker; the record file handler spills them to overflow pages on insert.
pub fn make_record(meta: &TableMeta, values: &[Value]) -> Result<Vec<u8>> {
    let visible: Vec<&FieldMeta> = meta.visible_fields().collect();
    if values.len() != visible.len() {
        return Err(DbError::FieldMissing(format!(
            "table {} expects {} values, got {}",
            meta.name,
            visible.len(),
            values.len()
        )));
    }
    let mut data = vec![0u8; meta.record_size];
    let mut tails: Vec<(usize, usize, Vec<u8>)> = Vec::new();
    for (field, value) in visible.iter().zip(values.iter()) {
        if field.attr_type == AttrType::Texts && !value.is_null() {
            let v = types::cast_to(value, AttrType::Texts)?;
            let content = match &v {
                Value::Text(b) => b.clone(),
                _ => v.get_string().into_bytes(),
            };
            if content.len() + 1 > field.len {
                tails.push((field.offset, field.len, content));
                continue;
            }
            let slot = &mut data[field.offset..field.offset + field.len];
            slot.fill(0);
            slot[..content.len()].copy_from_slice(&content);
            continue;
        }
        store_value(field, value, &mut data[field.offset..field.offset + field.len])?;
    }
    for (offset, len, content) in tails {
        let tail = data.len();
        record::write_text_extension(&mut data[offset..offset + len], content.len() as u64, tail as u32);
        data.extend_from_slice(&content);
    }
    Ok(data)
}

/// Shared handle to a table.
pub type TablePtr = Arc<Table>;

/// A heap table: record file plus its indexes.
pub struct Table {
    dir: PathBuf,
    meta: RwLock<Arc<TableMeta>>,
    pool: Arc<DiskBufferPool>,
    handler: Arc<RecordFileHandler>,
    indexes: Mutex<Vec<Arc<Index>>>,
}

impl Table {
    /// Create the table files and open the engine.
    pub fn create(
        dir: &Path,
        table_id: u32,
        name: &str,
        columns: &[ColumnSpec],
        storage_format: StorageFormat,
    ) -> Result<TablePtr> {
        let meta = Arc::new(TableMeta::new(table_id, name, columns, storage_format)?);
        save_table_meta(dir, &meta)?;
        let pool = DiskBufferPool::open_file(&table_data_file(dir, name))?;
        let handler = Arc::new(RecordFileHandler::open(pool.clone(), meta.clone())?);
        log::info!("created table {} (id {})", name, table_id);
        Ok(Arc::new(Table {
            dir: dir.to_path_buf(),
            meta: RwLock::new(meta),
            pool,
            handler,
            indexes: Mutex::new(Vec::new()),
        }))
    }

    /// Open an existing table from its metadata file.
    pub fn open(dir: &Path, name: &str) -> Result<TablePtr> {
        let json = std::fs::read_to_string(table_meta_file(dir, name)).map_err(DbError::IoRead)?;
        let meta: TableMeta = serde_json::from_str(&json)
            .map_err(|e| DbError::Internal(format!("parse table meta {name}: {e}")))?;
        let meta = Arc::new(meta);
        let pool = DiskBufferPool::open_file(&table_data_file(dir, name))?;
        let handler = Arc::new(RecordFileHandler::open(pool.clone(), meta.clone())?);
        let mut indexes = Vec::new();
        for im in &meta.indexes {
            let fields = resolve_index_fields(&meta, &im.field_names)?;
            let path = table_index_file(dir, name, &im.name);
            indexes.push(Arc::new(Index::open(&path, im.clone(), fields)?));
        }
        Ok(Arc::new(Table {
            dir: dir.to_path_buf(),
            meta: RwLock::new(meta),
            pool,
            handler,
            indexes: Mutex::new(indexes),
        }))
    }

    /// Current metadata snapshot.
    pub fn meta(&self) -> Arc<TableMeta> {
        self.meta.read().clone()
    }

    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    pub fn handler(&self) -> &Arc<RecordFileHandler> {
        &self.handler
    }

    /// Indexes currently attached to the table.
    pub fn indexes(&self) -> Vec<Arc<Index>> {
        self.indexes.lock().clone()
    }

    /// Find an index by name.
    pub fn find_index(&self, name: &str) -> Option<Arc<Index>> {
        self.indexes.lock().iter().find(|i| i.meta().name == name).cloned()
    }

    /// Store a record and maintain every index. If any index insert fails,
    /// the entries inserted so far and the record itself are rolled back.
    pub fn insert_record(&self, data: &[u8]) -> Result<Rid> {
        let rid = self.handler.insert_record(data)?;
        let indexes = self.indexes();
        for (i, index) in indexes.iter().enumerate() {
            if let Err(e) = index.insert_entry(data, &rid) {
                for done in &indexes[..i] {
                    if let Err(e2) = done.delete_entry(data, &rid) {
                        log::error!("index rollback failed on {}: {}", done.meta().name, e2);
                    }
                }
                if let Err(e2) = self.handler.delete_record(&rid) {
                    log::error!("record rollback failed: {e2}");
                }
                return Err(e);
            }
        }
        Ok(rid)
    }

    /// Remove the index entries of a record, then the record itself.
    pub fn delete_record(&self, record: &Record) -> Result<()> {
        for index in self.indexes() {
            match index.delete_entry(&record.data, &record.rid) {
                Ok(()) => {}
                Err(DbError::RecordNotExist) => {
                    log::warn!(
                        "index entry missing on delete: table={} index={} rid={}",
                        self.name(),
                        index.meta().name,
                        record.rid
                    );
                }
                Err(e) => return Err(e),
            }
        }
        self.handler.delete_record(&record.rid)
    }

    /// Read a record with TEXT fields reconstructed.
    pub fn get_record(&self, rid: &Rid) -> Result<Record> {
        self.handler.get_record(rid)
    }

    /// Read, let a caller mutate, write back (raw stored bytes).
    pub fn visit_record<F>(&self, rid: &Rid, updater: F) -> Result<()>
    where
        F: FnMut(&mut Record) -> bool,
    {
        self.handler.visit_record(rid, updater)
    }

    /// In-place update: swap index entries, rebuild TEXT overflow chains
    /// and write the new bytes under the old RID.
    pub fn update_record(&self, old: &Record, new_data: &[u8]) -> Result<()> {
        let meta = self.meta();
        // Authoritative current bytes: index entries must be removed with
        // what is actually stored, not with what the caller remembers.
        let authoritative = self.handler.get_record(&old.rid)?;
        let indexes = self.indexes();
        for index in &indexes {
            match index.delete_entry(&authoritative.data, &old.rid) {
                Ok(()) => {}
                Err(DbError::RecordNotExist) => {
                    log::warn!(
                        "index entry missing on update: table={} index={}",
                        meta.name,
                        index.meta().name
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let raw = self.handler.get_raw_record(&old.rid)?;
        self.handler.free_text_overflow_pages(&raw.data)?;

        let mut stored = raw.data.clone();
        for field in &meta.fields {
            let range = field.offset..field.offset + field.len;
            if field.attr_type == AttrType::Texts {
                let slot_new = &new_data[range.clone()];
                if record::field_is_null(slot_new) {
                    stored[range].fill(NULL_FIELD_BYTE);
                } else {
                    let content = record::text_slot_content(new_data, field.offset, field.len).to_vec();
                    self.handler
                        .store_text_into_slot(&mut stored, field.offset, field.len, &content)?;
                }
            } else {
                stored[range.clone()].copy_from_slice(&new_data[range]);
            }
        }
        self.handler.update_record(&old.rid, &stored)?;

        for (i, index) in indexes.iter().enumerate() {
            if let Err(e) = index.insert_entry(new_data, &old.rid) {
                // Best effort: take back the new entries, put back the old.
                for done in &indexes[..i] {
                    let _ = done.delete_entry(new_data, &old.rid);
                }
                for index in &indexes {
                    if let Err(e2) = index.insert_entry(&authoritative.data, &old.rid) {
                        log::error!(
                            "failed to restore index entry on {}: {}",
                            index.meta().name,
                            e2
                        );
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Build a new index over `field_names`, back-filling it from every
    /// live record, then publish the new metadata atomically.
    pub fn create_index(&self, index_name: &str, field_names: &[String], is_unique: bool) -> Result<()> {
        let meta = self.meta();
        if meta.index(index_name).is_some() {
            return Err(DbError::InvalidArgument(format!("index {index_name} already exists")));
        }
        let fields = resolve_index_fields(&meta, field_names)?;
        if fields.iter().any(|f| f.attr_type == AttrType::Texts) {
            return Err(DbError::Unsupported("index over TEXT column".into()));
        }
        let im = IndexMeta {
            name: index_name.to_string(),
            field_names: field_names.to_vec(),
            is_unique,
        };
        let path = table_index_file(&self.dir, &meta.name, index_name);
        let index = Arc::new(Index::create(&path, im.clone(), fields)?);

        let mut scanner = self.handler.scanner();
        loop {
            let record = match scanner.next_record()? {
                Some(r) => r,
                None => break,
            };
            if let Err(e) = index.insert_entry(&record.data, &record.rid) {
                drop(scanner);
                drop(index);
                let _ = std::fs::remove_file(&path);
                return Err(e);
            }
        }

        let mut new_meta = (*meta).clone();
        new_meta.indexes.push(im);
        save_table_meta(&self.dir, &new_meta)?;
        *self.meta.write() = Arc::new(new_meta);
        self.indexes.lock().push(index);
        log::info!("created index {} on table {}", index_name, meta.name);
        Ok(())
    }

    /// Remove an index and publish the new metadata.
    pub fn drop_index(&self, index_name: &str) -> Result<()> {
        let meta = self.meta();
        if meta.index(index_name).is_none() {
            return Err(DbError::InvalidArgument(format!("index {index_name} does not exist")));
        }
        let mut new_meta = (*meta).clone();
        new_meta.indexes.retain(|i| i.name != index_name);
        save_table_meta(&self.dir, &new_meta)?;
        *self.meta.write() = Arc::new(new_meta);
        self.indexes.lock().retain(|i| i.meta().name != index_name);
        let _ = std::fs::remove_file(table_index_file(&self.dir, &meta.name, index_name));
        Ok(())
    }

    /// Full-table record scanner.
    pub fn record_scanner(&self) -> RecordFileScanner {
        self.handler.scanner()
    }

    /// Flush table data and all indexes.
    pub fn sync(&self) -> Result<()> {
        for index in self.indexes() {
            index.sync()?;
        }
        self.pool.flush_all_pages()
    }

    /// Delete every file belonging to this table. The table must not be
    /// used afterwards.
    pub fn remove_files(&self) -> Result<()> {
        let meta = self.meta();
        for im in &meta.indexes {
            let _ = std::fs::remove_file(table_index_file(&self.dir, &meta.name, &im.name));
        }
        let _ = std::fs::remove_file(table_data_file(&self.dir, &meta.name));
        let _ = std::fs::remove_file(table_meta_file(&self.dir, &meta.name));
        Ok(())
    }
}

fn resolve_index_fields(meta: &TableMeta, field_names: &[String]) -> Result<Vec<FieldMeta>> {
    if field_names.is_empty() {
        return Err(DbError::InvalidArgument("index needs at least one field".into()));
    }
    let mut fields = Vec::with_capacity(field_names.len());
    for name in field_names {
        let f = meta
            .field(name)
            .ok_or_else(|| DbError::FieldNotExist(format!("{}.{}", meta.name, name)))?;
        fields.push(f.clone());
    }
    Ok(fields)
}

//! The catalog: named tables inside one data directory.

use crate::rc::{DbError, Result};
use crate::table::{ColumnSpec, StorageFormat, Table, TablePtr};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// `Rc<Db>` — the catalog is shared within one session thread.
pub type DbPtr = Rc<Db>;

/// A database: a directory of table files.
pub struct Db {
    dir: PathBuf,
    tables: RefCell<HashMap<String, TablePtr>>,
    next_table_id: Cell<u32>,
}

impl Db {
    /// Open a database directory, loading every table whose metadata file
    /// is present.
    pub fn open(dir: &Path) -> Result<DbPtr> {
        std::fs::create_dir_all(dir).map_err(|e| DbError::IoOpen {
            path: dir.display().to_string(),
            source: e,
        })?;
        let mut tables = HashMap::new();
        let mut max_id = 0;
        let entries = std::fs::read_dir(dir).map_err(DbError::IoRead)?;
        for entry in entries {
            let entry = entry.map_err(DbError::IoRead)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("table") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let table = Table::open(dir, name)?;
            max_id = max_id.max(table.meta().table_id);
            tables.insert(name.to_string(), table);
        }
        log::info!("opened database at {} with {} tables", dir.display(), tables.len());
        Ok(Rc::new(Db {
            dir: dir.to_path_buf(),
            tables: RefCell::new(tables),
            next_table_id: Cell::new(max_id + 1),
        }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a table and register it.
    pub fn create_table(
        &self,
        name: &str,
        columns: &[ColumnSpec],
        storage_format: StorageFormat,
    ) -> Result<TablePtr> {
        if self.tables.borrow().contains_key(name) {
            return Err(DbError::InvalidArgument(format!("table {name} already exists")));
        }
        let id = self.next_table_id.get();
        self.next_table_id.set(id + 1);
        let table = Table::create(&self.dir, id, name, columns, storage_format)?;
        self.tables.borrow_mut().insert(name.to_string(), table.clone());
        Ok(table)
    }

    /// Drop a table and delete its files.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let table = self
            .tables
            .borrow_mut()
            .remove(name)
            .ok_or_else(|| DbError::TableNotExist(name.to_string()))?;
        table.remove_files()
    }

    /// Look up a table by name.
    pub fn find_table(&self, name: &str) -> Option<TablePtr> {
        self.tables.borrow().get(name).cloned()
    }

    /// All table names, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    /// Flush every table.
    pub fn sync(&self) -> Result<()> {
        for table in self.tables.borrow().values() {
            table.sync()?;
        }
        Ok(())
    }
}

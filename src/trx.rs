//! Transaction façade. The execution engine only ever talks to this trait:
//! visibility of scanned records and the three mutations. The isolation
//! policy behind it is deliberately a black box; [`VanillaTrx`] is the
//! autocommit implementation where every record is visible and mutations
//! apply immediately.

use crate::rc::Result;
use crate::record::{Record, Rid};
use crate::table::TablePtr;

/// Whether a scan intends to write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RwMode {
    ReadOnly,
    ReadWrite,
}

/// Transaction interface used by the physical operators.
pub trait Trx {
    /// Visibility probe: `Err(RecordInvisible)` hides the record from the
    /// calling scan, anything else surfaces as-is.
    fn visit_record(&self, table: &TablePtr, record: &Record, mode: RwMode) -> Result<()>;

    /// Insert a serialised record into the table.
    fn insert_record(&self, table: &TablePtr, data: &[u8]) -> Result<Rid>;

    /// In-place update of `old` to `new_data`.
    fn update_record(&self, table: &TablePtr, old: &Record, new_data: &[u8]) -> Result<()>;

    /// Delete a record.
    fn delete_record(&self, table: &TablePtr, record: &Record) -> Result<()>;
}

/// Autocommit transaction: no versioning, everything visible.
#[derive(Default)]
pub struct VanillaTrx;

impl Trx for VanillaTrx {
    fn visit_record(&self, _table: &TablePtr, _record: &Record, _mode: RwMode) -> Result<()> {
        Ok(())
    }

    fn insert_record(&self, table: &TablePtr, data: &[u8]) -> Result<Rid> {
        table.insert_record(data)
    }

    fn update_record(&self, table: &TablePtr, old: &Record, new_data: &[u8]) -> Result<()> {
        table.update_record(old, new_data)
    }

    fn delete_record(&self, table: &TablePtr, record: &Record) -> Result<()> {
        table.delete_record(record)
    }
}

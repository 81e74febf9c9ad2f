//! Columnar batch used by the vectorised operators: a [`Chunk`] is a set of
//! [`Column`]s with one entry per row (or a single entry for a constant
//! column).

use crate::rc::{DbError, Result};
use crate::tuple::TupleCellSpec;
use crate::types::AttrType;
use crate::value::Value;

/// Whether a column holds one value per row or a single broadcast value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Normal,
    Constant,
}

/// One column of a chunk.
#[derive(Clone)]
pub struct Column {
    attr_type: AttrType,
    column_type: ColumnType,
    values: Vec<Value>,
}

impl Column {
    /// An empty NORMAL column of the given type.
    pub fn new(attr_type: AttrType) -> Column {
        Column { attr_type, column_type: ColumnType::Normal, values: Vec::new() }
    }

    /// A CONSTANT column broadcasting one value.
    pub fn constant(value: Value) -> Column {
        Column {
            attr_type: value.attr_type(),
            column_type: ColumnType::Constant,
            values: vec![value],
        }
    }

    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Row count of a NORMAL column; 1 for a constant.
    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn append(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Value at row `i`; a constant column answers every row.
    pub fn value_at(&self, i: usize) -> Value {
        match self.column_type {
            ColumnType::Constant => self.values[0].clone(),
            ColumnType::Normal => self.values[i].clone(),
        }
    }
}

/// A batch of rows in columnar form.
#[derive(Default)]
pub struct Chunk {
    columns: Vec<Column>,
    specs: Vec<TupleCellSpec>,
    rows: usize,
}

impl Chunk {
    pub fn new(columns: Vec<Column>, specs: Vec<TupleCellSpec>, rows: usize) -> Chunk {
        Chunk { columns, specs, rows }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn column_num(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    pub fn spec(&self, i: usize) -> &TupleCellSpec {
        &self.specs[i]
    }

    /// Position of the column a spec addresses.
    pub fn find_column(&self, spec: &TupleCellSpec) -> Result<usize> {
        self.specs
            .iter()
            .position(|s| s.matches(spec))
            .ok_or_else(|| DbError::FieldNotExist(format!("{}.{}", spec.table_name, spec.field_name)))
    }

    /// One row of the chunk as values.
    pub fn row(&self, i: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.value_at(i)).collect()
    }
}

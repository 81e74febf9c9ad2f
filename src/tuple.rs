//! Tuples: the abstract row interface the operators pass around, and its
//! concrete shapes. All tuples here own their data, so operators can hand
//! them up the pipeline without lifetime ties to the page they came from.

use crate::rc::{DbError, Result};
use crate::record::Record;
use crate::table::{self, FieldMeta};
use crate::value::Value;

/// Addresses one cell of a tuple: `(table, field)` or an alias.
#[derive(Clone, Debug, PartialEq)]
pub struct TupleCellSpec {
    pub table_name: String,
    pub field_name: String,
    pub alias: String,
}

impl TupleCellSpec {
    pub fn new(table_name: &str, field_name: &str) -> TupleCellSpec {
        TupleCellSpec {
            table_name: table_name.to_string(),
            field_name: field_name.to_string(),
            alias: String::new(),
        }
    }

    /// A spec addressed only by alias (aggregate results).
    pub fn by_alias(alias: &str) -> TupleCellSpec {
        TupleCellSpec {
            table_name: String::new(),
            field_name: String::new(),
            alias: alias.to_string(),
        }
    }

    /// Does this spec satisfy a lookup for `other`? An empty table name in
    /// the lookup matches any table.
    pub fn matches(&self, other: &TupleCellSpec) -> bool {
        if !other.alias.is_empty() {
            if self.alias == other.alias {
                return true;
            }
        }
        if other.field_name.is_empty() {
            return false;
        }
        if self.field_name != other.field_name {
            return false;
        }
        other.table_name.is_empty() || self.table_name == other.table_name
    }
}

/// Abstract row.
pub trait Tuple {
    /// Number of cells.
    fn cell_num(&self) -> usize;
    /// Cell by position.
    fn cell_at(&self, index: usize) -> Result<Value>;
    /// Cell by spec.
    fn find_cell(&self, spec: &TupleCellSpec) -> Result<Value>;
    /// The specs of all cells, in order.
    fn specs(&self) -> Vec<TupleCellSpec>;
    /// The backing record, when this tuple is a table row (DML collects it).
    fn row_record(&self) -> Option<&Record> {
        None
    }
}

/// A tuple backed by a record and the table schema: each visible field maps
/// to a byte range of the record buffer.
pub struct RowTuple {
    record: Record,
    table_name: String,
    fields: Vec<FieldMeta>,
}

impl RowTuple {
    pub fn new(record: Record, table_name: &str, fields: Vec<FieldMeta>) -> RowTuple {
        RowTuple { record, table_name: table_name.to_string(), fields }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl Tuple for RowTuple {
    fn cell_num(&self) -> usize {
        self.fields.len()
    }

    fn cell_at(&self, index: usize) -> Result<Value> {
        let field = self
            .fields
            .get(index)
            .ok_or_else(|| DbError::internal(format!("cell index {index} out of range")))?;
        Ok(table::read_value(field, &self.record.data))
    }

    fn find_cell(&self, spec: &TupleCellSpec) -> Result<Value> {
        if !spec.table_name.is_empty() && spec.table_name != self.table_name {
            return Err(DbError::FieldNotExist(format!(
                "{}.{}",
                spec.table_name, spec.field_name
            )));
        }
        for field in &self.fields {
            if field.name == spec.field_name {
                return Ok(table::read_value(field, &self.record.data));
            }
        }
        Err(DbError::FieldNotExist(format!("{}.{}", self.table_name, spec.field_name)))
    }

    fn specs(&self) -> Vec<TupleCellSpec> {
        self.fields
            .iter()
            .map(|f| TupleCellSpec::new(&self.table_name, &f.name))
            .collect()
    }

    fn row_record(&self) -> Option<&Record> {
        Some(&self.record)
    }
}

/// A tuple of in-memory values.
#[derive(Clone, Default)]
pub struct ValueListTuple {
    cells: Vec<Value>,
    cell_specs: Vec<TupleCellSpec>,
}

impl ValueListTuple {
    pub fn new(cells: Vec<Value>, cell_specs: Vec<TupleCellSpec>) -> ValueListTuple {
        ValueListTuple { cells, cell_specs }
    }

    /// Snapshot any tuple into an owned value list.
    pub fn snapshot(tuple: &dyn Tuple) -> Result<ValueListTuple> {
        let mut cells = Vec::with_capacity(tuple.cell_num());
        for i in 0..tuple.cell_num() {
            cells.push(tuple.cell_at(i)?);
        }
        Ok(ValueListTuple { cells, cell_specs: tuple.specs() })
    }
}

impl Tuple for ValueListTuple {
    fn cell_num(&self) -> usize {
        self.cells.len()
    }

    fn cell_at(&self, index: usize) -> Result<Value> {
        self.cells
            .get(index)
            .cloned()
            .ok_or_else(|| DbError::internal(format!("cell index {index} out of range")))
    }

    fn find_cell(&self, spec: &TupleCellSpec) -> Result<Value> {
        for (s, v) in self.cell_specs.iter().zip(self.cells.iter()) {
            if s.matches(spec) {
                return Ok(v.clone());
            }
        }
        Err(DbError::FieldNotExist(format!("{}.{}", spec.table_name, spec.field_name)))
    }

    fn specs(&self) -> Vec<TupleCellSpec> {
        self.cell_specs.clone()
    }
}

/// Left and right halves of a join result.
pub struct JoinedTuple {
    left: ValueListTuple,
    right: ValueListTuple,
}

impl JoinedTuple {
    pub fn new(left: ValueListTuple, right: ValueListTuple) -> JoinedTuple {
        JoinedTuple { left, right }
    }
}

impl Tuple for JoinedTuple {
    fn cell_num(&self) -> usize {
        self.left.cell_num() + self.right.cell_num()
    }

    fn cell_at(&self, index: usize) -> Result<Value> {
        if index < self.left.cell_num() {
            self.left.cell_at(index)
        } else {
            self.right.cell_at(index - self.left.cell_num())
        }
    }

    fn find_cell(&self, spec: &TupleCellSpec) -> Result<Value> {
        match self.left.find_cell(spec) {
            Ok(v) => Ok(v),
            Err(_) => self.right.find_cell(spec),
        }
    }

    fn specs(&self) -> Vec<TupleCellSpec> {
        let mut specs = self.left.specs();
        specs.extend(self.right.specs());
        specs
    }
}

/// Several stacked sub-tuples presented as one row (group-by output:
/// grouping columns followed by aggregate results).
#[derive(Default)]
pub struct CompositeTuple {
    tuples: Vec<ValueListTuple>,
}

impl CompositeTuple {
    pub fn add_tuple(&mut self, tuple: ValueListTuple) {
        self.tuples.push(tuple);
    }
}

impl Tuple for CompositeTuple {
    fn cell_num(&self) -> usize {
        self.tuples.iter().map(|t| t.cell_num()).sum()
    }

    fn cell_at(&self, index: usize) -> Result<Value> {
        let mut index = index;
        for t in &self.tuples {
            if index < t.cell_num() {
                return t.cell_at(index);
            }
            index -= t.cell_num();
        }
        Err(DbError::internal("cell index out of range"))
    }

    fn find_cell(&self, spec: &TupleCellSpec) -> Result<Value> {
        for t in &self.tuples {
            if let Ok(v) = t.find_cell(spec) {
                return Ok(v);
            }
        }
        Err(DbError::FieldNotExist(format!("{}.{}", spec.table_name, spec.field_name)))
    }

    fn specs(&self) -> Vec<TupleCellSpec> {
        self.tuples.iter().flat_map(|t| t.specs()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_matching() {
        let cell = TupleCellSpec::new("t", "a");
        assert!(cell.matches(&TupleCellSpec::new("", "a")));
        assert!(cell.matches(&TupleCellSpec::new("t", "a")));
        assert!(!cell.matches(&TupleCellSpec::new("u", "a")));
        assert!(!cell.matches(&TupleCellSpec::new("t", "b")));
        let agg = TupleCellSpec::by_alias("sum(v)");
        assert!(agg.matches(&TupleCellSpec::by_alias("sum(v)")));
    }

    #[test]
    fn composite_lookup() {
        let mut ct = CompositeTuple::default();
        ct.add_tuple(ValueListTuple::new(
            vec![Value::Int(1)],
            vec![TupleCellSpec::new("t", "k")],
        ));
        ct.add_tuple(ValueListTuple::new(
            vec![Value::Int(10)],
            vec![TupleCellSpec::by_alias("sum(v)")],
        ));
        assert_eq!(ct.cell_num(), 2);
        assert_eq!(ct.cell_at(1).unwrap(), Value::Int(10));
        assert_eq!(
            ct.find_cell(&TupleCellSpec::by_alias("sum(v)")).unwrap(),
            Value::Int(10)
        );
    }
}

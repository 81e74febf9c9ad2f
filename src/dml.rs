//! DML operators. Insert writes its rows on open. Update and delete use the
//! first-collect strategy: the child pipeline is drained completely, then
//! the collected records are mutated through the transaction façade, so the
//! scan never observes its own writes.

use crate::expr::Expr;
use crate::operator::{BoxedOperator, PhysicalOperator, TrxRef};
use crate::rc::{DbError, Result};
use crate::record::{self, Record};
use crate::table::{self, TablePtr};
use crate::tuple::{RowTuple, Tuple};
use crate::types::{self, AttrType};
use crate::value::Value;

/// Inserts literal rows; produces no tuples.
pub struct InsertOperator {
    table: TablePtr,
    rows: Vec<Vec<Value>>,
}

impl InsertOperator {
    pub fn new(table: TablePtr, rows: Vec<Vec<Value>>) -> InsertOperator {
        InsertOperator { table, rows }
    }
}

impl PhysicalOperator for InsertOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        let meta = self.table.meta();
        for row in &self.rows {
            let data = table::make_record(&meta, row)?;
            trx.insert_record(&self.table, &data)?;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        None
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "INSERT"
    }

    fn param(&self) -> String {
        self.table.name()
    }
}

/// Collects matching records, then rewrites the target fields and updates
/// each record in place through the transaction.
pub struct UpdateOperator {
    table: TablePtr,
    assignments: Vec<(String, Expr)>,
    child: BoxedOperator,
}

impl UpdateOperator {
    pub fn new(
        table: TablePtr,
        assignments: Vec<(String, Expr)>,
        child: BoxedOperator,
    ) -> UpdateOperator {
        UpdateOperator { table, assignments, child }
    }

    /// Apply the assignments to one collected record, producing the new
    /// record buffer (with TEXT tails where needed).
    fn build_new_record(&self, record: &Record, row: &RowTuple) -> Result<Vec<u8>> {
        let meta = self.table.meta();
        let mut new_data = record.data.clone();
        for (field_name, expr) in &self.assignments {
            let field = meta
                .field(field_name)
                .ok_or_else(|| DbError::FieldNotExist(field_name.clone()))?
                .clone();
            let value = expr.get_value(row)?;
            let value = if value.attr_type() == field.attr_type || value.is_null() {
                value
            } else {
                types::cast_to(&value, field.attr_type)
                    .map_err(|_| DbError::FieldTypeMismatch(format!(
                        "cannot store {} into {} {}",
                        value.attr_type().name(),
                        field.attr_type.name(),
                        field.name
                    )))?
            };
            if value.is_null() {
                if !field.nullable {
                    return Err(DbError::ConstraintViolation(format!(
                        "field {} does not allow NULL",
                        field.name
                    )));
                }
                new_data[field.offset..field.offset + field.len].fill(record::NULL_FIELD_BYTE);
                continue;
            }
            if field.attr_type == AttrType::Texts {
                let v = types::cast_to(&value, AttrType::Texts)?;
                let content = match &v {
                    Value::Text(b) => b.clone(),
                    _ => v.get_string().into_bytes(),
                };
                if content.len() + 1 <= field.len {
                    let slot = &mut new_data[field.offset..field.offset + field.len];
                    slot.fill(0);
                    slot[..content.len()].copy_from_slice(&content);
                } else {
                    // Long text rides at the record tail behind a marker;
                    // the table engine rebuilds the overflow chain from it.
                    let tail = new_data.len();
                    record::write_text_extension(
                        &mut new_data[field.offset..field.offset + field.len],
                        content.len() as u64,
                        tail as u32,
                    );
                    new_data.extend_from_slice(&content);
                }
                continue;
            }
            table::store_value(
                &field,
                &value,
                &mut new_data[field.offset..field.offset + field.len],
            )?;
        }
        Ok(new_data)
    }
}

impl PhysicalOperator for UpdateOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.child.open(trx)?;
        let mut records: Vec<Record> = Vec::new();
        while self.child.next()? {
            let tuple = self
                .child
                .current_tuple()
                .ok_or_else(|| DbError::internal("child yielded no tuple"))?;
            let record = tuple
                .row_record()
                .ok_or_else(|| DbError::internal("update child must produce table rows"))?;
            records.push(record.clone());
        }
        self.child.close()?;

        let meta = self.table.meta();
        let fields: Vec<_> = meta.visible_fields().cloned().collect();
        let mut updated = 0usize;
        for record in records {
            let row = RowTuple::new(record.clone(), &meta.name, fields.clone());
            let new_data = self.build_new_record(&record, &row)?;
            trx.update_record(&self.table, &record, &new_data)?;
            updated += 1;
        }
        log::debug!("updated {} rows in {}", updated, meta.name);
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        // UPDATE produces no rows.
        Ok(false)
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        None
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "UPDATE"
    }

    fn param(&self) -> String {
        self.table.name()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

/// Collects matching records, then deletes them through the transaction.
pub struct DeleteOperator {
    table: TablePtr,
    child: BoxedOperator,
}

impl DeleteOperator {
    pub fn new(table: TablePtr, child: BoxedOperator) -> DeleteOperator {
        DeleteOperator { table, child }
    }
}

impl PhysicalOperator for DeleteOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.child.open(trx)?;
        let mut records: Vec<Record> = Vec::new();
        while self.child.next()? {
            let tuple = self
                .child
                .current_tuple()
                .ok_or_else(|| DbError::internal("child yielded no tuple"))?;
            let record = tuple
                .row_record()
                .ok_or_else(|| DbError::internal("delete child must produce table rows"))?;
            records.push(record.clone());
        }
        self.child.close()?;

        let mut deleted = 0usize;
        for record in records {
            trx.delete_record(&self.table, &record)?;
            deleted += 1;
        }
        log::debug!("deleted {} rows from {}", deleted, self.table.name());
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        None
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DELETE"
    }

    fn param(&self) -> String {
        self.table.name()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

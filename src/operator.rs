//! Physical operators: the pull pipeline. Every operator implements
//! `open / next / current_tuple / close`; `next` answers whether a tuple is
//! available. The vectorised variants produce [`Chunk`]s instead.

use crate::chunk::{Chunk, Column};
use crate::expr::{Expr, ExpressionTuple};
use crate::index::{Index, IndexScanner};
use crate::rc::{DbError, Result};
use crate::record::RecordFileScanner;
use crate::table::{FieldMeta, TablePtr};
use crate::trx::{RwMode, Trx};
use crate::tuple::{RowTuple, Tuple, TupleCellSpec, ValueListTuple};
use crate::value::Value;
use std::rc::Rc;
use std::sync::Arc;

/// Shared transaction handle passed down at `open`.
pub type TrxRef = Rc<dyn Trx>;

/// Rows produced per vectorised chunk.
pub const CHUNK_CAPACITY: usize = 1024;

/// The pull protocol.
pub trait PhysicalOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()>;
    /// Advance to the next tuple; `Ok(false)` signals end of stream.
    fn next(&mut self) -> Result<bool>;
    fn current_tuple(&self) -> Option<&dyn Tuple>;
    fn close(&mut self) -> Result<()>;

    /// Operator name for EXPLAIN output.
    fn name(&self) -> &'static str;
    /// Operator argument for EXPLAIN output.
    fn param(&self) -> String {
        String::new()
    }
    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        Vec::new()
    }

    /// Vectorised pull; only the vec operators implement it.
    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        Err(DbError::Unimplemented("vectorised execution for this operator"))
    }
}

/// Boxed operator node.
pub type BoxedOperator = Box<dyn PhysicalOperator>;

/// Render an operator tree as an indented text plan.
pub fn render_plan(op: &dyn PhysicalOperator) -> String {
    fn walk(op: &dyn PhysicalOperator, depth: usize, out: &mut String) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(op.name());
        let param = op.param();
        if !param.is_empty() {
            out.push('(');
            out.push_str(&param);
            out.push(')');
        }
        out.push('\n');
        for c in op.children() {
            walk(c, depth + 1, out);
        }
    }
    let mut out = String::new();
    walk(op, 0, &mut out);
    out
}

fn visible_fields(table: &TablePtr) -> Vec<FieldMeta> {
    table.meta().visible_fields().cloned().collect()
}

/// Run residual predicates over a tuple; all must come out true.
fn passes_predicates(predicates: &[Expr], tuple: &dyn Tuple) -> Result<bool> {
    for p in predicates {
        if !p.get_value(tuple)?.get_bool() {
            return Ok(false);
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------

/// Full-table scan with residual predicates and transaction visibility.
pub struct TableScanOperator {
    table: TablePtr,
    mode: RwMode,
    predicates: Vec<Expr>,
    scanner: Option<RecordFileScanner>,
    tuple: Option<RowTuple>,
    trx: Option<TrxRef>,
}

impl TableScanOperator {
    pub fn new(table: TablePtr, mode: RwMode, predicates: Vec<Expr>) -> TableScanOperator {
        TableScanOperator { table, mode, predicates, scanner: None, tuple: None, trx: None }
    }
}

impl PhysicalOperator for TableScanOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.scanner = Some(self.table.record_scanner());
        self.trx = Some(trx.clone());
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        let scanner = self.scanner.as_mut().ok_or_else(|| DbError::internal("scan not open"))?;
        let fields = visible_fields(&self.table);
        let name = self.table.name();
        loop {
            let record = match scanner.next_record()? {
                Some(r) => r,
                None => return Ok(false),
            };
            let tuple = RowTuple::new(record, &name, fields.clone());
            if !passes_predicates(&self.predicates, &tuple)? {
                continue;
            }
            let trx = self.trx.as_ref().unwrap();
            match trx.visit_record(&self.table, tuple.record(), self.mode) {
                Ok(()) => {}
                Err(DbError::RecordInvisible) => continue,
                Err(e) => return Err(e),
            }
            self.tuple = Some(tuple);
            return Ok(true);
        }
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.tuple.as_ref().map(|t| t as &dyn Tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.scanner = None;
        self.tuple = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TABLE_SCAN"
    }

    fn param(&self) -> String {
        self.table.name()
    }
}

// ---------------------------------------------------------------------------

/// Index range scan: drives an [`IndexScanner`], fetches records by RID.
pub struct IndexScanOperator {
    table: TablePtr,
    index: Arc<Index>,
    mode: RwMode,
    left_values: Vec<Value>,
    left_inclusive: bool,
    right_values: Vec<Value>,
    right_inclusive: bool,
    predicates: Vec<Expr>,
    scanner: Option<IndexScanner>,
    tuple: Option<RowTuple>,
    trx: Option<TrxRef>,
}

impl IndexScanOperator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: TablePtr,
        index: Arc<Index>,
        mode: RwMode,
        left_values: Vec<Value>,
        left_inclusive: bool,
        right_values: Vec<Value>,
        right_inclusive: bool,
        predicates: Vec<Expr>,
    ) -> IndexScanOperator {
        IndexScanOperator {
            table,
            index,
            mode,
            left_values,
            left_inclusive,
            right_values,
            right_inclusive,
            predicates,
            scanner: None,
            tuple: None,
            trx: None,
        }
    }
}

impl PhysicalOperator for IndexScanOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        // Short prefixes pad with 0x00 on the left bound and 0xFF on the
        // right bound to cover the whole remaining suffix.
        let left_key = if self.left_values.is_empty() {
            None
        } else {
            Some(self.index.make_scan_key(&self.left_values, 0x00)?)
        };
        let right_key = if self.right_values.is_empty() {
            None
        } else {
            Some(self.index.make_scan_key(&self.right_values, 0xFF)?)
        };
        self.scanner = Some(self.index.create_scanner(
            left_key.as_deref(),
            self.left_inclusive,
            right_key.as_deref(),
            self.right_inclusive,
        )?);
        self.trx = Some(trx.clone());
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        let scanner = self.scanner.as_mut().ok_or_else(|| DbError::internal("scan not open"))?;
        let fields = visible_fields(&self.table);
        let name = self.table.name();
        loop {
            let rid = match scanner.next_entry()? {
                Some(rid) => rid,
                None => return Ok(false),
            };
            let record = self.table.get_record(&rid)?;
            let tuple = RowTuple::new(record, &name, fields.clone());
            if !passes_predicates(&self.predicates, &tuple)? {
                continue;
            }
            let trx = self.trx.as_ref().unwrap();
            match trx.visit_record(&self.table, tuple.record(), self.mode) {
                Ok(()) => {}
                Err(DbError::RecordInvisible) => continue,
                Err(e) => return Err(e),
            }
            self.tuple = Some(tuple);
            return Ok(true);
        }
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.tuple.as_ref().map(|t| t as &dyn Tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.scanner = None;
        self.tuple = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "INDEX_SCAN"
    }

    fn param(&self) -> String {
        format!("{} ON {}", self.index.meta().name, self.table.name())
    }
}

// ---------------------------------------------------------------------------

/// Filters child tuples by one boolean expression.
pub struct PredicateOperator {
    expression: Expr,
    child: BoxedOperator,
}

impl PredicateOperator {
    pub fn new(expression: Expr, child: BoxedOperator) -> PredicateOperator {
        PredicateOperator { expression, child }
    }
}

impl PhysicalOperator for PredicateOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.child.open(trx)
    }

    fn next(&mut self) -> Result<bool> {
        loop {
            if !self.child.next()? {
                return Ok(false);
            }
            let tuple = self
                .child
                .current_tuple()
                .ok_or_else(|| DbError::internal("child yielded no tuple"))?;
            if self.expression.get_value(tuple)?.get_bool() {
                return Ok(true);
            }
        }
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.child.current_tuple()
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn name(&self) -> &'static str {
        "PREDICATE"
    }

    fn param(&self) -> String {
        self.expression.name()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

// ---------------------------------------------------------------------------

/// Projects child tuples through the query expressions.
pub struct ProjectOperator {
    expressions: Vec<Expr>,
    child: Option<BoxedOperator>,
    tuple: Option<ExpressionTuple>,
}

impl ProjectOperator {
    pub fn new(expressions: Vec<Expr>, child: Option<BoxedOperator>) -> ProjectOperator {
        ProjectOperator { expressions, child, tuple: None }
    }

    /// Output column headers.
    pub fn headers(&self) -> Vec<String> {
        self.expressions.iter().map(|e| e.name()).collect()
    }
}

impl PhysicalOperator for ProjectOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        match &mut self.child {
            Some(c) => c.open(trx),
            None => Ok(()),
        }
    }

    fn next(&mut self) -> Result<bool> {
        let Some(child) = &mut self.child else { return Ok(false) };
        if !child.next()? {
            return Ok(false);
        }
        let tuple = child
            .current_tuple()
            .ok_or_else(|| DbError::internal("child yielded no tuple"))?;
        self.tuple = Some(ExpressionTuple::evaluate(&self.expressions, tuple)?);
        Ok(true)
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.tuple.as_ref().map(|t| t as &dyn Tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.tuple = None;
        match &mut self.child {
            Some(c) => c.close(),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "PROJECT"
    }

    fn param(&self) -> String {
        self.expressions.iter().map(|e| e.name()).collect::<Vec<_>>().join(", ")
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        self.child.iter().map(|c| c.as_ref() as &dyn PhysicalOperator).collect()
    }
}

// ---------------------------------------------------------------------------

/// Emits one row of constant expressions (SELECT/CALC without FROM).
pub struct CalcOperator {
    expressions: Vec<Expr>,
    emitted: bool,
    tuple: Option<ValueListTuple>,
}

impl CalcOperator {
    pub fn new(expressions: Vec<Expr>) -> CalcOperator {
        CalcOperator { expressions, emitted: false, tuple: None }
    }

    pub fn headers(&self) -> Vec<String> {
        self.expressions.iter().map(|e| e.name()).collect()
    }
}

impl PhysicalOperator for CalcOperator {
    fn open(&mut self, _trx: &TrxRef) -> Result<()> {
        self.emitted = false;
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        let mut cells = Vec::with_capacity(self.expressions.len());
        let mut specs = Vec::with_capacity(self.expressions.len());
        for e in &self.expressions {
            cells.push(e.try_get_value()?);
            specs.push(TupleCellSpec::by_alias(&e.name()));
        }
        self.tuple = Some(ValueListTuple::new(cells, specs));
        Ok(true)
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.tuple.as_ref().map(|t| t as &dyn Tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.tuple = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "CALC"
    }

    fn param(&self) -> String {
        self.expressions.iter().map(|e| e.name()).collect::<Vec<_>>().join(", ")
    }
}

// ---------------------------------------------------------------------------

/// Emits the rendered plan of the statement under EXPLAIN as one row.
pub struct ExplainOperator {
    plan_text: String,
    emitted: bool,
    tuple: Option<ValueListTuple>,
}

impl ExplainOperator {
    pub fn new(plan_text: String) -> ExplainOperator {
        ExplainOperator { plan_text, emitted: false, tuple: None }
    }
}

impl PhysicalOperator for ExplainOperator {
    fn open(&mut self, _trx: &TrxRef) -> Result<()> {
        self.emitted = false;
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;
        self.tuple = Some(ValueListTuple::new(
            vec![Value::Chars(self.plan_text.clone().into_bytes())],
            vec![TupleCellSpec::by_alias("Query Plan")],
        ));
        Ok(true)
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.tuple.as_ref().map(|t| t as &dyn Tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.tuple = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EXPLAIN"
    }
}

// ---------------------------------------------------------------------------

/// Vectorised table scan: materialises chunks of rows in columnar form,
/// filtering with the chunk-wise comparison path where possible.
pub struct TableScanVecOperator {
    table: TablePtr,
    mode: RwMode,
    predicates: Vec<Expr>,
    scanner: Option<RecordFileScanner>,
    trx: Option<TrxRef>,
}

impl TableScanVecOperator {
    pub fn new(table: TablePtr, mode: RwMode, predicates: Vec<Expr>) -> TableScanVecOperator {
        TableScanVecOperator { table, mode, predicates, scanner: None, trx: None }
    }
}

impl PhysicalOperator for TableScanVecOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.scanner = Some(self.table.record_scanner());
        self.trx = Some(trx.clone());
        Ok(())
    }

    fn next(&mut self) -> Result<bool> {
        Err(DbError::Unimplemented("row-at-a-time pull on a vectorised scan"))
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        None
    }

    fn close(&mut self) -> Result<()> {
        self.scanner = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TABLE_SCAN_VEC"
    }

    fn param(&self) -> String {
        self.table.name()
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let scanner = self.scanner.as_mut().ok_or_else(|| DbError::internal("scan not open"))?;
        let fields = visible_fields(&self.table);
        let name = self.table.name();
        let trx = self.trx.clone().unwrap();

        let mut rows: Vec<RowTuple> = Vec::new();
        while rows.len() < CHUNK_CAPACITY {
            let record = match scanner.next_record()? {
                Some(r) => r,
                None => break,
            };
            let tuple = RowTuple::new(record, &name, fields.clone());
            match trx.visit_record(&self.table, tuple.record(), self.mode) {
                Ok(()) => {}
                Err(DbError::RecordInvisible) => continue,
                Err(e) => return Err(e),
            }
            rows.push(tuple);
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let specs: Vec<TupleCellSpec> =
            fields.iter().map(|f| TupleCellSpec::new(&name, &f.name)).collect();
        let mut columns: Vec<Column> = fields.iter().map(|f| Column::new(f.attr_type)).collect();
        for row in &rows {
            for (i, col) in columns.iter_mut().enumerate() {
                col.append(row.cell_at(i)?);
            }
        }
        let mut chunk = Chunk::new(columns, specs.clone(), rows.len());

        // Chunk-wise filters where the expression supports it, row-wise
        // fallback otherwise.
        let mut select = vec![1u8; chunk.rows()];
        for pred in &self.predicates {
            if pred.eval(&chunk, &mut select).is_ok() {
                continue;
            }
            for (i, row) in rows.iter().enumerate() {
                if select[i] != 0 && !pred.get_value(row)?.get_bool() {
                    select[i] = 0;
                }
            }
        }
        if select.iter().any(|&s| s == 0) {
            let mut columns: Vec<Column> =
                fields.iter().map(|f| Column::new(f.attr_type)).collect();
            let mut kept = 0;
            for (i, row) in rows.iter().enumerate() {
                if select[i] == 0 {
                    continue;
                }
                kept += 1;
                for (c, col) in columns.iter_mut().enumerate() {
                    col.append(row.cell_at(c)?);
                }
            }
            chunk = Chunk::new(columns, specs, kept);
        }
        Ok(Some(chunk))
    }
}

// ---------------------------------------------------------------------------

/// Vectorised projection: evaluates each expression column-wise.
pub struct ProjectVecOperator {
    expressions: Vec<Expr>,
    child: BoxedOperator,
}

impl ProjectVecOperator {
    pub fn new(expressions: Vec<Expr>, child: BoxedOperator) -> ProjectVecOperator {
        ProjectVecOperator { expressions, child }
    }

    pub fn headers(&self) -> Vec<String> {
        self.expressions.iter().map(|e| e.name()).collect()
    }
}

impl PhysicalOperator for ProjectVecOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.child.open(trx)
    }

    fn next(&mut self) -> Result<bool> {
        Err(DbError::Unimplemented("row-at-a-time pull on a vectorised projection"))
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        None
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn name(&self) -> &'static str {
        "PROJECT_VEC"
    }

    fn param(&self) -> String {
        self.expressions.iter().map(|e| e.name()).collect::<Vec<_>>().join(", ")
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        let Some(input) = self.child.next_chunk()? else { return Ok(None) };
        let mut columns = Vec::with_capacity(self.expressions.len());
        let mut specs = Vec::with_capacity(self.expressions.len());
        for e in &self.expressions {
            columns.push(e.get_column(&input)?);
            specs.push(TupleCellSpec::by_alias(&e.name()));
        }
        Ok(Some(Chunk::new(columns, specs, input.rows())))
    }
}

//! Subquery execution. Expressions holding an inner SELECT call into here
//! at evaluation time; results are materialised into flat value lists and
//! cached per session. Simple single-table selects take a fast path that
//! never builds a plan; everything else runs the full
//! statement → logical → rewrite → physical pipeline.

use crate::ast::SelectSqlNode;
use crate::db::DbPtr;
use crate::expr::Expr;
use crate::operator::{PhysicalOperator, TableScanOperator, TrxRef};
use crate::physical::{create_physical_plan, PlannerContext};
use crate::plan::{create_logical_plan, set_session_context_recursive};
use crate::rc::{DbError, Result};
use crate::rewrite::rewrite;
use crate::stmt::{SelectStmt, Stmt};
use crate::trx::RwMode;
use crate::tuple::{Tuple, TupleCellSpec};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// What a subquery-bearing expression needs to run its inner SELECT: the
/// catalog, the session's executor (with its cache) and the transaction.
#[derive(Clone)]
pub struct SubqueryContext {
    pub db: DbPtr,
    pub executor: Rc<RefCell<SubqueryExecutor>>,
    pub trx: TrxRef,
}

impl SubqueryContext {
    /// Run a subquery, returning its output cells flattened row-major.
    /// `check_single_column` enforces the one-column rule (everything but
    /// EXISTS).
    pub fn execute(&self, select: &SelectSqlNode, check_single_column: bool) -> Result<Vec<Value>> {
        let key = cache_key(select);
        // The borrow must not be held across the pipeline: a nested
        // subquery would need the executor again.
        if let Some(hit) = self.executor.borrow_mut().get_cached(&key) {
            return Ok(hit);
        }
        let results = run_subquery(select, self, check_single_column)?;
        self.executor.borrow_mut().put_cache(key, results.clone());
        Ok(results)
    }
}

/// Per-session subquery result cache.
pub struct SubqueryExecutor {
    cache: FxHashMap<String, Vec<Value>>,
    order: VecDeque<String>,
    cache_limit: usize,
    hits: u64,
    misses: u64,
}

impl Default for SubqueryExecutor {
    fn default() -> SubqueryExecutor {
        SubqueryExecutor::new(1000)
    }
}

impl SubqueryExecutor {
    pub fn new(cache_limit: usize) -> SubqueryExecutor {
        SubqueryExecutor {
            cache: FxHashMap::default(),
            order: VecDeque::new(),
            cache_limit,
            hits: 0,
            misses: 0,
        }
    }

    fn get_cached(&mut self, key: &str) -> Option<Vec<Value>> {
        match self.cache.get(key) {
            Some(v) => {
                self.hits += 1;
                Some(v.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn put_cache(&mut self, key: String, results: Vec<Value>) {
        if self.cache.contains_key(&key) {
            return;
        }
        if self.cache.len() >= self.cache_limit {
            // Evict the oldest entry.
            if let Some(old) = self.order.pop_front() {
                self.cache.remove(&old);
            }
        }
        self.order.push_back(key.clone());
        self.cache.insert(key, results);
    }

    /// Drop every cached result (DML invalidates them).
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.order.clear();
    }

    pub fn set_cache_limit(&mut self, limit: usize) {
        self.cache_limit = limit;
    }
}

impl Drop for SubqueryExecutor {
    fn drop(&mut self) {
        log::debug!("subquery executor: {} cache hits, {} misses", self.hits, self.misses);
    }
}

/// Cache key: table names, expression identities, condition and join counts.
fn cache_key(select: &SelectSqlNode) -> String {
    use std::fmt::Write;
    let mut key = String::new();
    for r in &select.relations {
        let _ = write!(key, "{r},");
    }
    for (i, e) in select.expressions.iter().enumerate() {
        let _ = write!(key, "expr_{i}_{},", e.name());
    }
    let _ = write!(key, "conds_{},joins_{}", select.conditions.len(), select.having.len() + select.joins.len());
    key
}

fn run_subquery(
    select: &SelectSqlNode,
    ctx: &SubqueryContext,
    check_single_column: bool,
) -> Result<Vec<Value>> {
    if check_single_column && select.expressions.len() != 1 {
        return Err(DbError::SqlSyntax {
            line: 0,
            column: 0,
            msg: format!("subquery must return one column, not {}", select.expressions.len()),
        });
    }

    // The fast path only knows plain projections over one bare table.
    let plain_exprs = select
        .expressions
        .iter()
        .all(|e| matches!(e, Expr::Star { .. } | Expr::UnboundField { .. } | Expr::Value(_)));
    let simple = plain_exprs
        && select.relations.len() == 1
        && select.joins.is_empty()
        && select.conditions.is_empty()
        && select.group_by.is_empty()
        && select.having.is_empty();
    if simple {
        return run_simple_subquery(select, ctx, check_single_column);
    }
    run_complex_subquery(select, ctx, check_single_column)
}

/// Fast path for `SELECT cols FROM t`: scan the table and pick cells, no
/// planning at all.
fn run_simple_subquery(
    select: &SelectSqlNode,
    ctx: &SubqueryContext,
    check_single_column: bool,
) -> Result<Vec<Value>> {
    let table = ctx
        .db
        .find_table(&select.relations[0])
        .ok_or_else(|| DbError::TableNotExist(select.relations[0].clone()))?;
    let mut scan = TableScanOperator::new(table, RwMode::ReadOnly, Vec::new());
    scan.open(&ctx.trx)?;
    let mut results = Vec::new();
    let scan_result = (|| -> Result<()> {
        while scan.next()? {
            let tuple = scan.current_tuple().ok_or_else(|| DbError::internal("no tuple"))?;
            for expr in &select.expressions {
                match expr {
                    Expr::Star { .. } => {
                        if check_single_column && tuple.cell_num() != 1 {
                            return Err(DbError::SqlSyntax {
                                line: 0,
                                column: 0,
                                msg: format!(
                                    "subquery with SELECT * returns {} columns",
                                    tuple.cell_num()
                                ),
                            });
                        }
                        let take = if check_single_column { 1 } else { tuple.cell_num() };
                        for i in 0..take {
                            results.push(tuple.cell_at(i)?);
                        }
                    }
                    Expr::UnboundField { table, field } => {
                        let mut spec = TupleCellSpec::new(table.as_deref().unwrap_or(""), field);
                        spec.alias = field.clone();
                        results.push(tuple.find_cell(&spec)?);
                    }
                    other => results.push(other.get_value(tuple)?),
                }
            }
        }
        Ok(())
    })();
    scan.close()?;
    scan_result?;
    log::debug!("simple subquery returned {} values", results.len());
    Ok(results)
}

/// Everything else goes through the full pipeline:
/// bind → logical → rewrite → physical → open / drain / close.
fn run_complex_subquery(
    select: &SelectSqlNode,
    ctx: &SubqueryContext,
    check_single_column: bool,
) -> Result<Vec<Value>> {
    // Statements bind against pre-expanded projections; reuse the binder's
    // star expansion by creating the statement from the raw node.
    let stmt = Stmt::Select(SelectStmt::create(&ctx.db, select)?);
    let mut logical = create_logical_plan(&stmt)?;
    rewrite(&mut logical)?;
    set_session_context_recursive(&mut logical, ctx);
    // Subplans never use the hash join flag of the outer session.
    let mut oper = create_physical_plan(logical, &PlannerContext { hash_join_on: false })?;

    oper.open(&ctx.trx)?;
    let mut results = Vec::new();
    let drain = (|| -> Result<()> {
        while oper.next()? {
            let tuple = oper.current_tuple().ok_or_else(|| DbError::internal("no tuple"))?;
            if check_single_column && tuple.cell_num() != 1 {
                return Err(DbError::SqlSyntax {
                    line: 0,
                    column: 0,
                    msg: format!("subquery returns {} columns", tuple.cell_num()),
                });
            }
            for i in 0..tuple.cell_num() {
                results.push(tuple.cell_at(i)?);
            }
        }
        Ok(())
    })();
    oper.close()?;
    drain?;
    log::debug!("complex subquery returned {} values", results.len());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_evicts_oldest() {
        let mut ex = SubqueryExecutor::new(2);
        ex.put_cache("a".into(), vec![Value::Int(1)]);
        ex.put_cache("b".into(), vec![Value::Int(2)]);
        ex.put_cache("c".into(), vec![Value::Int(3)]);
        assert!(ex.get_cached("a").is_none());
        assert_eq!(ex.get_cached("b"), Some(vec![Value::Int(2)]));
        assert_eq!(ex.get_cached("c"), Some(vec![Value::Int(3)]));
    }
}

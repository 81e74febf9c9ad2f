//! Physical planning: turn the rewritten logical tree into executable
//! operators. This is where scans pick an index (longest equal-covered
//! prefix, unique breaking ties), joins pick an algorithm (hash join for
//! pure equi-joins when the session allows it), and group-by picks its
//! scalar or hash variant. `create_physical_plan_vec` is the separate entry
//! point for the vectorised variants.

use crate::expr::{CompOp, Expr};
use crate::group::{AggregateVecOperator, GroupByVecOperator, HashGroupByOperator, ScalarGroupByOperator};
use crate::index::Index;
use crate::join::{equi_join_pairs, HashJoinOperator, NestedLoopJoinOperator};
use crate::dml::{DeleteOperator, InsertOperator, UpdateOperator};
use crate::operator::{
    render_plan, BoxedOperator, CalcOperator, ExplainOperator, IndexScanOperator,
    PredicateOperator, ProjectOperator, ProjectVecOperator, TableScanOperator, TableScanVecOperator,
};
use crate::plan::{conjunction_of, LogicalNode, LogicalOperator};
use crate::rc::{DbError, Result};
use crate::table::TablePtr;
use crate::trx::RwMode;
use crate::value::Value;
use std::sync::Arc;

/// Per-statement planning knobs, taken from the session.
#[derive(Clone, Copy, Default)]
pub struct PlannerContext {
    pub hash_join_on: bool,
}

/// Cost of one comparison/projection step.
pub const CPU_OP: f64 = 1.0;
/// Cost of hashing one build row.
pub const HASH_COST: f64 = 1.2;
/// Cost of probing with one row.
pub const HASH_PROBE: f64 = 1.1;

/// Cost of a nested-loop join over the given cardinalities.
pub fn nested_loop_join_cost(left: f64, right: f64, output: f64) -> f64 {
    left * right * CPU_OP + output * CPU_OP
}

/// Cost of a hash join over the given cardinalities.
pub fn hash_join_cost(left: f64, right: f64, output: f64) -> f64 {
    left * HASH_COST + right * HASH_PROBE + output * CPU_OP
}

/// Build the row-at-a-time physical plan.
pub fn create_physical_plan(logical: LogicalOperator, ctx: &PlannerContext) -> Result<BoxedOperator> {
    let LogicalOperator { node, mut children } = logical;
    match node {
        LogicalNode::TableGet { table, mode, predicates } => {
            table_get_plan(table, mode, predicates)
        }
        LogicalNode::Predicate { predicates } => {
            let child = create_physical_plan(take_one(children)?, ctx)?;
            match conjunction_of(predicates) {
                Some(expr) => Ok(Box::new(PredicateOperator::new(expr, child))),
                None => Ok(child),
            }
        }
        LogicalNode::Join { condition } => {
            if children.len() != 2 {
                return Err(DbError::internal("join expects two children"));
            }
            let right_logical = children.pop().unwrap();
            let left_logical = children.pop().unwrap();
            let left_tables = left_logical.involved_tables();
            let right_tables = right_logical.involved_tables();
            let left = create_physical_plan(left_logical, ctx)?;
            let right = create_physical_plan(right_logical, ctx)?;

            if ctx.hash_join_on {
                if let Some(cond) = &condition {
                    if let Some((lefts, rights)) =
                        equi_join_pairs(cond, &left_tables, &right_tables)
                    {
                        log::trace!(
                            "equi-join: hash cost {} vs nlj cost {} (unit cardinalities)",
                            hash_join_cost(1.0, 1.0, 1.0),
                            nested_loop_join_cost(1.0, 1.0, 1.0)
                        );
                        return Ok(Box::new(HashJoinOperator::new(lefts, rights, left, right)));
                    }
                }
            }
            Ok(Box::new(NestedLoopJoinOperator::new(condition, left, right)))
        }
        LogicalNode::GroupBy { group_by, aggregates, having } => {
            let child = create_physical_plan(take_one(children)?, ctx)?;
            if group_by.is_empty() {
                Ok(Box::new(ScalarGroupByOperator::new(aggregates, having, child)))
            } else {
                Ok(Box::new(HashGroupByOperator::new(group_by, aggregates, having, child)))
            }
        }
        LogicalNode::Project { expressions } => {
            let child = match children.pop() {
                Some(c) => Some(create_physical_plan(c, ctx)?),
                None => None,
            };
            Ok(Box::new(ProjectOperator::new(expressions, child)))
        }
        LogicalNode::Insert { table, rows } => Ok(Box::new(InsertOperator::new(table, rows))),
        LogicalNode::Update { table, assignments } => {
            let child = create_physical_plan(take_one(children)?, ctx)?;
            Ok(Box::new(UpdateOperator::new(table, assignments, child)))
        }
        LogicalNode::Delete { table } => {
            let child = create_physical_plan(take_one(children)?, ctx)?;
            Ok(Box::new(DeleteOperator::new(table, child)))
        }
        LogicalNode::Calc { expressions } => Ok(Box::new(CalcOperator::new(expressions))),
        LogicalNode::Explain => {
            let child = create_physical_plan(take_one(children)?, ctx)?;
            Ok(Box::new(ExplainOperator::new(render_plan(child.as_ref()))))
        }
    }
}

/// Build the vectorised physical plan (table scan, projection, group-by and
/// explain only).
pub fn create_physical_plan_vec(
    logical: LogicalOperator,
    ctx: &PlannerContext,
) -> Result<BoxedOperator> {
    let LogicalOperator { node, mut children } = logical;
    match node {
        LogicalNode::TableGet { table, mode, predicates } => {
            Ok(Box::new(TableScanVecOperator::new(table, mode, predicates)))
        }
        LogicalNode::Project { expressions } => {
            let child = create_physical_plan_vec(take_one(children)?, ctx)?;
            Ok(Box::new(ProjectVecOperator::new(expressions, child)))
        }
        LogicalNode::GroupBy { group_by, aggregates, .. } => {
            let child = create_physical_plan_vec(take_one(children)?, ctx)?;
            if group_by.is_empty() {
                Ok(Box::new(AggregateVecOperator::new(aggregates, child)))
            } else {
                Ok(Box::new(GroupByVecOperator::new(group_by, aggregates, child)))
            }
        }
        LogicalNode::Explain => {
            let child = create_physical_plan_vec(take_one(children)?, ctx)?;
            Ok(Box::new(ExplainOperator::new(render_plan(child.as_ref()))))
        }
        _ => Err(DbError::InvalidArgument(
            "operator not supported by the vectorised engine".into(),
        )),
    }
}

fn take_one(mut children: Vec<LogicalOperator>) -> Result<LogicalOperator> {
    if children.len() != 1 {
        return Err(DbError::internal("operator expects exactly one child"));
    }
    Ok(children.pop().unwrap())
}

/// Decide TableScan vs IndexScan for one base relation.
///
/// Equal comparisons between a field and a value are candidate index keys;
/// the index covering the longest prefix of them wins, unique indexes
/// breaking ties. Predicates consumed by the lookup drop out of the
/// residual list.
fn table_get_plan(table: TablePtr, mode: RwMode, predicates: Vec<Expr>) -> Result<BoxedOperator> {
    // (field name, value, predicate position) — first equality per field.
    let mut equals: Vec<(String, Value, usize)> = Vec::new();
    for (pos, expr) in predicates.iter().enumerate() {
        let Expr::Comparison { comp: CompOp::EqualTo, left, right } = expr else { continue };
        let (field, value) = match (left.as_ref(), right.as_ref()) {
            (Expr::Field(f), Expr::Value(v)) => (f, v),
            (Expr::Value(v), Expr::Field(f)) => (f, v),
            _ => continue,
        };
        if value.is_null() {
            // `field = NULL` never matches; leave it to the predicate.
            continue;
        }
        if equals.iter().any(|(name, _, _)| name == &field.field_name) {
            continue;
        }
        equals.push((field.field_name.clone(), value.clone(), pos));
    }

    if equals.is_empty() {
        log::trace!("table scan on {} (no equal conditions)", table.name());
        return Ok(Box::new(TableScanOperator::new(table, mode, predicates)));
    }

    let meta = table.meta();
    let mut best: Option<(&crate::index::IndexMeta, usize)> = None;
    for im in &meta.indexes {
        let covered = im
            .field_names
            .iter()
            .take_while(|f| equals.iter().any(|(name, _, _)| name == *f))
            .count();
        if covered == 0 {
            continue;
        }
        best = match best {
            None => Some((im, covered)),
            Some((cur, cur_covered)) => {
                if covered > cur_covered || (covered == cur_covered && im.is_unique && !cur.is_unique)
                {
                    Some((im, covered))
                } else {
                    Some((cur, cur_covered))
                }
            }
        };
    }

    let Some((best_meta, covered)) = best else {
        log::trace!("table scan on {} (no usable index)", table.name());
        return Ok(Box::new(TableScanOperator::new(table, mode, predicates)));
    };
    let index: Arc<Index> = table
        .find_index(&best_meta.name)
        .ok_or_else(|| DbError::internal(format!("index {} not open", best_meta.name)))?;

    let mut key_values = Vec::with_capacity(covered);
    let mut consumed = Vec::with_capacity(covered);
    for f in best_meta.field_names.iter().take(covered) {
        let (_, value, pos) = equals.iter().find(|(name, _, _)| name == f).unwrap();
        key_values.push(value.clone());
        consumed.push(*pos);
    }
    let residual: Vec<Expr> = predicates
        .into_iter()
        .enumerate()
        .filter(|(pos, _)| !consumed.contains(pos))
        .map(|(_, e)| e)
        .collect();

    log::info!(
        "index scan on {} via {} (covered prefix {}/{})",
        table.name(),
        best_meta.name,
        covered,
        best_meta.field_names.len()
    );
    Ok(Box::new(IndexScanOperator::new(
        table,
        index,
        mode,
        key_values.clone(),
        true,
        key_values,
        true,
        residual,
    )))
}

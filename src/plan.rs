//! Logical plan: operator tree built from a bound statement. WHERE clauses
//! become a Predicate of conjuncts over the join tree; comparisons between
//! differently-typed operands get an implicit cast toward the cheaper
//! target, folded immediately when the casted side is a constant.

use crate::ast::CondOp;
use crate::expr::{ConjType, Expr};
use crate::rc::{DbError, Result};
use crate::stmt::{CalcStmt, DeleteStmt, FilterObj, FilterStmt, FilterUnit, SelectStmt, Stmt, UpdateStmt};
use crate::table::TablePtr;
use crate::trx::RwMode;
use crate::types::{self, AttrType};
use crate::value::Value;
use std::collections::BTreeSet;

/// One node of the logical tree.
pub struct LogicalOperator {
    pub node: LogicalNode,
    pub children: Vec<LogicalOperator>,
}

/// Node payloads, inspected by the rewriter and the physical planner.
pub enum LogicalNode {
    TableGet { table: TablePtr, mode: RwMode, predicates: Vec<Expr> },
    Predicate { predicates: Vec<Expr> },
    Join { condition: Option<Expr> },
    GroupBy { group_by: Vec<Expr>, aggregates: Vec<Expr>, having: Vec<Expr> },
    Project { expressions: Vec<Expr> },
    Insert { table: TablePtr, rows: Vec<Vec<Value>> },
    Update { table: TablePtr, assignments: Vec<(String, Expr)> },
    Delete { table: TablePtr },
    Calc { expressions: Vec<Expr> },
    Explain,
}

impl LogicalOperator {
    pub fn new(node: LogicalNode, children: Vec<LogicalOperator>) -> LogicalOperator {
        LogicalOperator { node, children }
    }

    /// Names of the tables this subtree produces rows from.
    pub fn involved_tables(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        if let LogicalNode::TableGet { table, .. } = &self.node {
            set.insert(table.name());
        }
        for c in &self.children {
            set.extend(c.involved_tables());
        }
        set
    }
}

/// Wire the session into every subquery-bearing expression of the tree.
/// Runs as a separate pass after planning, before execution.
pub fn set_session_context_recursive(op: &mut LogicalOperator, ctx: &crate::subquery::SubqueryContext) {
    match &mut op.node {
        LogicalNode::TableGet { predicates, .. } | LogicalNode::Predicate { predicates } => {
            for p in predicates {
                p.set_session_context(ctx);
            }
        }
        LogicalNode::Join { condition } => {
            if let Some(c) = condition {
                c.set_session_context(ctx);
            }
        }
        LogicalNode::GroupBy { group_by, aggregates, having } => {
            for e in group_by.iter_mut().chain(aggregates).chain(having) {
                e.set_session_context(ctx);
            }
        }
        LogicalNode::Project { expressions } | LogicalNode::Calc { expressions } => {
            for e in expressions {
                e.set_session_context(ctx);
            }
        }
        LogicalNode::Update { assignments, .. } => {
            for (_, e) in assignments {
                e.set_session_context(ctx);
            }
        }
        _ => {}
    }
    for child in &mut op.children {
        set_session_context_recursive(child, ctx);
    }
}

/// Build the logical tree for a bound statement.
pub fn create_logical_plan(stmt: &Stmt) -> Result<LogicalOperator> {
    match stmt {
        Stmt::Select(s) => select_plan(s),
        Stmt::Insert(s) => Ok(LogicalOperator::new(
            LogicalNode::Insert { table: s.table.clone(), rows: s.rows.clone() },
            Vec::new(),
        )),
        Stmt::Update(s) => update_plan(s),
        Stmt::Delete(s) => delete_plan(s),
        Stmt::Calc(s) => calc_plan(s),
        Stmt::Explain(inner) => {
            let child = create_logical_plan(inner)?;
            Ok(LogicalOperator::new(LogicalNode::Explain, vec![child]))
        }
    }
}

fn select_plan(stmt: &SelectStmt) -> Result<LogicalOperator> {
    let join_start = stmt.tables.len() - stmt.joins.len();
    let mut tree: Option<LogicalOperator> = None;
    for (i, table) in stmt.tables.iter().enumerate() {
        let get = LogicalOperator::new(
            LogicalNode::TableGet {
                table: table.clone(),
                mode: RwMode::ReadOnly,
                predicates: Vec::new(),
            },
            Vec::new(),
        );
        tree = Some(match tree {
            None => get,
            Some(left) => {
                // JOIN relations carry their bound ON condition; comma
                // relations start as a plain product.
                let condition = if i >= join_start {
                    let (_, on) = &stmt.joins[i - join_start];
                    conjunction_of(filter_to_exprs(on)?)
                } else {
                    None
                };
                LogicalOperator::new(LogicalNode::Join { condition }, vec![left, get])
            }
        });
    }

    // SELECT without FROM: a calc row source.
    let mut last = match tree {
        Some(t) => t,
        None => LogicalOperator::new(LogicalNode::Calc { expressions: Vec::new() }, Vec::new()),
    };

    let where_exprs = filter_to_exprs(&stmt.filter)?;
    if !where_exprs.is_empty() {
        last = LogicalOperator::new(LogicalNode::Predicate { predicates: where_exprs }, vec![last]);
    }

    if let Some(group_by) = group_by_plan(stmt)? {
        last = LogicalOperator::new(group_by, vec![last]);
    }

    Ok(LogicalOperator::new(
        LogicalNode::Project { expressions: stmt.query_expressions.clone() },
        vec![last],
    ))
}

fn update_plan(stmt: &UpdateStmt) -> Result<LogicalOperator> {
    let get = LogicalOperator::new(
        LogicalNode::TableGet {
            table: stmt.table.clone(),
            mode: RwMode::ReadWrite,
            predicates: Vec::new(),
        },
        Vec::new(),
    );
    let child = wrap_predicate(get, &stmt.filter)?;
    Ok(LogicalOperator::new(
        LogicalNode::Update { table: stmt.table.clone(), assignments: stmt.assignments.clone() },
        vec![child],
    ))
}

fn delete_plan(stmt: &DeleteStmt) -> Result<LogicalOperator> {
    let get = LogicalOperator::new(
        LogicalNode::TableGet {
            table: stmt.table.clone(),
            mode: RwMode::ReadWrite,
            predicates: Vec::new(),
        },
        Vec::new(),
    );
    let child = wrap_predicate(get, &stmt.filter)?;
    Ok(LogicalOperator::new(LogicalNode::Delete { table: stmt.table.clone() }, vec![child]))
}

fn calc_plan(stmt: &CalcStmt) -> Result<LogicalOperator> {
    Ok(LogicalOperator::new(
        LogicalNode::Calc { expressions: stmt.expressions.clone() },
        Vec::new(),
    ))
}

fn wrap_predicate(child: LogicalOperator, filter: &FilterStmt) -> Result<LogicalOperator> {
    let exprs = filter_to_exprs(filter)?;
    if exprs.is_empty() {
        return Ok(child);
    }
    Ok(LogicalOperator::new(LogicalNode::Predicate { predicates: exprs }, vec![child]))
}

/// AND-combine a list of conjuncts into a single expression.
pub fn conjunction_of(mut exprs: Vec<Expr>) -> Option<Expr> {
    match exprs.len() {
        0 => None,
        1 => Some(exprs.pop().unwrap()),
        _ => Some(Expr::Conjunction { conj: ConjType::And, children: exprs }),
    }
}

/// Turn a bound filter into one expression per conjunct.
pub fn filter_to_exprs(filter: &FilterStmt) -> Result<Vec<Expr>> {
    filter.units.iter().map(unit_to_expr).collect()
}

fn obj_to_expr(obj: &FilterObj) -> Result<Expr> {
    Ok(match obj {
        FilterObj::Field(f) => Expr::Field(f.clone()),
        FilterObj::Value(v) => Expr::Value(v.clone()),
        FilterObj::Expr(e) => e.clone(),
        FilterObj::Subquery(s) => {
            Expr::Subquery(crate::expr::SubqueryExpr { select: s.clone(), ctx: None })
        }
        FilterObj::ValueList(_) => {
            return Err(DbError::internal("value list outside of IN"));
        }
    })
}

fn unit_to_expr(unit: &FilterUnit) -> Result<Expr> {
    match unit.op {
        CondOp::Comp(comp) => {
            let left = obj_to_expr(&unit.left)?;
            let right = obj_to_expr(&unit.right)?;
            let (left, right) = insert_implicit_cast(left, right)?;
            Ok(Expr::Comparison { comp, left: Box::new(left), right: Box::new(right) })
        }
        CondOp::In { not } => {
            let left = obj_to_expr(&unit.left)?;
            let set = match &unit.right {
                FilterObj::ValueList(vs) => {
                    crate::expr::InSet::List(vs.iter().map(|v| Expr::Value(v.clone())).collect())
                }
                FilterObj::Subquery(s) => crate::expr::InSet::Subquery(s.clone()),
                _ => return Err(DbError::internal("IN needs a value list or subquery")),
            };
            Ok(Expr::In(crate::expr::InExpr { not, left: Box::new(left), set, ctx: None }))
        }
        CondOp::Exists { not } => {
            let FilterObj::Subquery(s) = &unit.right else {
                return Err(DbError::internal("EXISTS needs a subquery"));
            };
            Ok(Expr::Exists(crate::expr::ExistsExpr { not, select: s.clone(), ctx: None }))
        }
        CondOp::IsNull { not } => {
            let left = obj_to_expr(&unit.left)?;
            Ok(Expr::IsNull { not, child: Box::new(left) })
        }
    }
}

/// When the two sides of a comparison differ in type, cast the side whose
/// conversion is cheaper; fold the cast right away for constants. Sides of
/// unknown type (NULL literals, subqueries) are left alone.
fn insert_implicit_cast(left: Expr, right: Expr) -> Result<(Expr, Expr)> {
    let lt = left.value_type();
    let rt = right.value_type();
    if lt == rt || lt == AttrType::Undefined || rt == AttrType::Undefined {
        return Ok((left, right));
    }
    let l2r = types::cast_cost(lt, rt);
    let r2l = types::cast_cost(rt, lt);
    if l2r <= r2l && l2r != types::CAST_IMPOSSIBLE {
        Ok((cast_side(left, rt)?, right))
    } else if r2l < l2r && r2l != types::CAST_IMPOSSIBLE {
        Ok((left, cast_side(right, lt)?))
    } else {
        Err(DbError::Unsupported(format!(
            "no cast between {} and {}",
            lt.name(),
            rt.name()
        )))
    }
}

fn cast_side(expr: Expr, target: AttrType) -> Result<Expr> {
    let is_const = matches!(expr, Expr::Value(_));
    let cast = Expr::Cast { child: Box::new(expr), target };
    if is_const {
        // Fold now so index selection sees a plain value.
        Ok(Expr::Value(cast.try_get_value()?))
    } else {
        Ok(cast)
    }
}

/// Build the GroupBy node: collect aggregates from the projection and
/// HAVING, and require every bare column to appear in GROUP BY.
fn group_by_plan(stmt: &SelectStmt) -> Result<Option<LogicalNode>> {
    let mut aggregates: Vec<Expr> = Vec::new();
    let mut collect = |expr: &Expr| collect_aggregates(expr, &mut aggregates);
    for e in &stmt.query_expressions {
        collect(e);
    }
    let having = filter_to_exprs(&stmt.having)?;
    for e in &having {
        collect_aggregates(e, &mut aggregates);
    }

    if stmt.group_by.is_empty() && aggregates.is_empty() {
        if having.is_empty() {
            return Ok(None);
        }
        // HAVING without aggregates still forces the implicit aggregation path.
    }

    for e in &stmt.query_expressions {
        if has_column_outside_group(e, &stmt.group_by) {
            return Err(DbError::InvalidArgument(
                "column must appear in the GROUP BY clause or be used in an aggregate function"
                    .into(),
            ));
        }
    }

    Ok(Some(LogicalNode::GroupBy { group_by: stmt.group_by.clone(), aggregates, having }))
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Aggregate { .. } => {
            if !out.iter().any(|a| a.name() == expr.name()) {
                out.push(expr.clone());
            }
        }
        Expr::Cast { child, .. } | Expr::IsNull { child, .. } => collect_aggregates(child, out),
        Expr::Comparison { left, right, .. } | Expr::Distance { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::Conjunction { children, .. } => {
            for c in children {
                collect_aggregates(c, out);
            }
        }
        Expr::Arithmetic { left, right, .. } => {
            collect_aggregates(left, out);
            if let Some(r) = right {
                collect_aggregates(r, out);
            }
        }
        _ => {}
    }
}

/// Does `expr` reference a column that is neither inside an aggregate nor
/// equal to a GROUP BY expression?
fn has_column_outside_group(expr: &Expr, group_by: &[Expr]) -> bool {
    if group_by.is_empty() {
        // Implicit aggregation: any bare column is a violation, but only
        // when aggregation is in play at all (caller guarantees that).
        return match expr {
            Expr::Aggregate { .. } => false,
            Expr::Field(_) => true,
            _ => child_columns_outside_group(expr, group_by),
        };
    }
    if group_by.iter().any(|g| g.equal_expr(expr)) {
        return false;
    }
    match expr {
        Expr::Aggregate { .. } => false,
        Expr::Field(_) => true,
        _ => child_columns_outside_group(expr, group_by),
    }
}

fn child_columns_outside_group(expr: &Expr, group_by: &[Expr]) -> bool {
    match expr {
        Expr::Cast { child, .. } | Expr::IsNull { child, .. } => {
            has_column_outside_group(child, group_by)
        }
        Expr::Comparison { left, right, .. } | Expr::Distance { left, right, .. } => {
            has_column_outside_group(left, group_by) || has_column_outside_group(right, group_by)
        }
        Expr::Conjunction { children, .. } => {
            children.iter().any(|c| has_column_outside_group(c, group_by))
        }
        Expr::Arithmetic { left, right, .. } => {
            has_column_outside_group(left, group_by)
                || right.as_ref().is_some_and(|r| has_column_outside_group(r, group_by))
        }
        _ => false,
    }
}

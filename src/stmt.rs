//! Statement binding: resolve parsed nodes against the catalog, producing
//! typed statements the planner can work from. Unbound field references
//! become [`FieldRef`]s; WHERE/ON/HAVING clauses become [`FilterStmt`]s.

use crate::ast::*;
use crate::db::DbPtr;
use crate::expr::{AggType, Expr, FieldRef};
use crate::rc::{DbError, Result};
use crate::table::TablePtr;
use crate::types::AttrType;
use crate::value::Value;

/// Tables in scope while binding one statement.
pub struct BinderContext {
    pub db: DbPtr,
    pub tables: Vec<TablePtr>,
}

impl BinderContext {
    pub fn new(db: DbPtr) -> BinderContext {
        BinderContext { db, tables: Vec::new() }
    }

    /// Add a relation to the scope, resolving it in the catalog.
    pub fn add_table(&mut self, name: &str) -> Result<TablePtr> {
        let table = self
            .db
            .find_table(name)
            .ok_or_else(|| DbError::TableNotExist(name.to_string()))?;
        self.tables.push(table.clone());
        Ok(table)
    }

    fn find_table(&self, name: &str) -> Option<&TablePtr> {
        self.tables.iter().find(|t| t.name() == name)
    }

    /// Resolve a (possibly qualified) field name. Unqualified names must be
    /// unambiguous among the visible fields of the in-scope tables.
    pub fn resolve_field(&self, table: Option<&str>, field: &str) -> Result<FieldRef> {
        let qualified = self.tables.len() > 1;
        if let Some(tname) = table {
            let t = self
                .find_table(tname)
                .ok_or_else(|| DbError::TableNotExist(tname.to_string()))?;
            let meta = t.meta();
            let fm = meta
                .field(field)
                .filter(|f| f.visible)
                .ok_or_else(|| DbError::FieldNotExist(format!("{tname}.{field}")))?;
            return Ok(FieldRef {
                table_name: tname.to_string(),
                field_name: field.to_string(),
                attr_type: fm.attr_type,
                qualified,
            });
        }
        let mut found: Option<FieldRef> = None;
        for t in &self.tables {
            let meta = t.meta();
            if let Some(fm) = meta.field(field).filter(|f| f.visible) {
                if found.is_some() {
                    return Err(DbError::InvalidArgument(format!("ambiguous field {field}")));
                }
                found = Some(FieldRef {
                    table_name: meta.name.clone(),
                    field_name: field.to_string(),
                    attr_type: fm.attr_type,
                    qualified,
                });
            }
        }
        found.ok_or_else(|| DbError::FieldNotExist(field.to_string()))
    }

    /// Bind one expression tree: replace unbound references with resolved
    /// ones and resolve aggregate names.
    pub fn bind_expression(&self, expr: &Expr) -> Result<Expr> {
        Ok(match expr {
            Expr::UnboundField { table, field } => {
                Expr::Field(self.resolve_field(table.as_deref(), field)?)
            }
            Expr::Star { .. } => {
                return Err(DbError::InvalidArgument("'*' is not valid here".into()));
            }
            Expr::UnboundAggregate { func, child } => {
                let func = AggType::from_name(func)?;
                let child = match child.as_ref() {
                    // COUNT(*): the star child is kept for naming; it counts rows.
                    Expr::Star { table: None } if func == AggType::Count => {
                        Expr::Star { table: None }
                    }
                    Expr::Star { .. } => {
                        return Err(DbError::InvalidArgument(format!(
                            "{}(*) is not supported",
                            func.name()
                        )));
                    }
                    other => self.bind_expression(other)?,
                };
                Expr::Aggregate { func, child: Box::new(child) }
            }
            Expr::Cast { child, target } => {
                Expr::Cast { child: Box::new(self.bind_expression(child)?), target: *target }
            }
            Expr::Comparison { comp, left, right } => Expr::Comparison {
                comp: *comp,
                left: Box::new(self.bind_expression(left)?),
                right: Box::new(self.bind_expression(right)?),
            },
            Expr::IsNull { not, child } => {
                Expr::IsNull { not: *not, child: Box::new(self.bind_expression(child)?) }
            }
            Expr::Conjunction { conj, children } => Expr::Conjunction {
                conj: *conj,
                children: children
                    .iter()
                    .map(|c| self.bind_expression(c))
                    .collect::<Result<Vec<_>>>()?,
            },
            Expr::Arithmetic { op, left, right } => Expr::Arithmetic {
                op: *op,
                left: Box::new(self.bind_expression(left)?),
                right: match right {
                    Some(r) => Some(Box::new(self.bind_expression(r)?)),
                    None => None,
                },
            },
            Expr::Distance { func, left, right } => Expr::Distance {
                func: *func,
                left: Box::new(self.bind_expression(left)?),
                right: Box::new(self.bind_expression(right)?),
            },
            Expr::In(e) => {
                let set = match &e.set {
                    crate::expr::InSet::List(items) => crate::expr::InSet::List(
                        items
                            .iter()
                            .map(|i| self.bind_expression(i))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    crate::expr::InSet::Subquery(s) => crate::expr::InSet::Subquery(s.clone()),
                };
                Expr::In(crate::expr::InExpr {
                    not: e.not,
                    left: Box::new(self.bind_expression(&e.left)?),
                    set,
                    ctx: None,
                })
            }
            other => other.clone(),
        })
    }

    /// Expand `*` / `t.*` in a projection list and bind the rest.
    pub fn bind_projection(&self, exprs: &[Expr]) -> Result<Vec<Expr>> {
        let qualified = self.tables.len() > 1;
        let mut out = Vec::new();
        for e in exprs {
            match e {
                Expr::Star { table } => {
                    let tables: Vec<&TablePtr> = match table {
                        Some(t) => vec![self
                            .find_table(t)
                            .ok_or_else(|| DbError::TableNotExist(t.clone()))?],
                        None => self.tables.iter().collect(),
                    };
                    if tables.is_empty() {
                        return Err(DbError::InvalidArgument("'*' without FROM".into()));
                    }
                    for t in tables {
                        let meta = t.meta();
                        for f in meta.visible_fields() {
                            out.push(Expr::Field(FieldRef {
                                table_name: meta.name.clone(),
                                field_name: f.name.clone(),
                                attr_type: f.attr_type,
                                qualified,
                            }));
                        }
                    }
                }
                Expr::UnboundAggregate { func, child } if matches!(child.as_ref(), Expr::Star { .. }) => {
                    // COUNT(*) passes through star expansion untouched.
                    out.push(self.bind_expression(&Expr::UnboundAggregate {
                        func: func.clone(),
                        child: child.clone(),
                    })?);
                }
                other => out.push(self.bind_expression(other)?),
            }
        }
        Ok(out)
    }
}

/// One operand of a filter condition.
#[derive(Clone, Debug)]
pub enum FilterObj {
    Field(FieldRef),
    Value(Value),
    ValueList(Vec<Value>),
    Subquery(Box<SelectSqlNode>),
    Expr(Expr),
}

/// One conjunct of a bound WHERE/ON/HAVING clause.
#[derive(Clone, Debug)]
pub struct FilterUnit {
    pub left: FilterObj,
    pub op: CondOp,
    pub right: FilterObj,
}

/// A bound filter: conjunction of units.
#[derive(Clone, Debug, Default)]
pub struct FilterStmt {
    pub units: Vec<FilterUnit>,
}

impl FilterStmt {
    /// Bind a parsed condition list.
    pub fn create(ctx: &BinderContext, conditions: &[ConditionSqlNode]) -> Result<FilterStmt> {
        let mut units = Vec::with_capacity(conditions.len());
        for cond in conditions {
            let left = match &cond.left {
                Some(e) => expr_to_filter_obj(ctx, e)?,
                None => FilterObj::Value(Value::Bool(true)),
            };
            let right = match &cond.rhs {
                CondRhs::Expr(e) => expr_to_filter_obj(ctx, e)?,
                CondRhs::ValueList(vs) => FilterObj::ValueList(vs.clone()),
                CondRhs::Subquery(s) => FilterObj::Subquery(s.clone()),
                CondRhs::None => FilterObj::Value(Value::Bool(true)),
            };
            units.push(FilterUnit { left, op: cond.op, right });
        }
        Ok(FilterStmt { units })
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Bind one side of a condition into the narrowest FilterObj: a plain
/// field, a folded constant, or a general expression.
fn expr_to_filter_obj(ctx: &BinderContext, expr: &Expr) -> Result<FilterObj> {
    match expr {
        Expr::UnboundField { table, field } => {
            Ok(FilterObj::Field(ctx.resolve_field(table.as_deref(), field)?))
        }
        Expr::Value(v) => Ok(FilterObj::Value(v.clone())),
        other => {
            let bound = ctx.bind_expression(other)?;
            match bound.try_get_value() {
                Ok(v) => Ok(FilterObj::Value(v)),
                Err(_) => Ok(FilterObj::Expr(bound)),
            }
        }
    }
}

/// A bound statement, ready for planning.
pub enum Stmt {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    Calc(CalcStmt),
    Explain(Box<Stmt>),
}

pub struct SelectStmt {
    pub tables: Vec<TablePtr>,
    pub query_expressions: Vec<Expr>,
    pub filter: FilterStmt,
    /// JOIN relations in order, each with its bound ON filter.
    pub joins: Vec<(TablePtr, FilterStmt)>,
    pub group_by: Vec<Expr>,
    pub having: FilterStmt,
}

impl SelectStmt {
    /// Resolve FROM and JOIN relations, bind ON conditions in the combined
    /// scope, then projection, GROUP BY and WHERE.
    pub fn create(db: &DbPtr, node: &SelectSqlNode) -> Result<SelectStmt> {
        let mut ctx = BinderContext::new(db.clone());
        for rel in &node.relations {
            ctx.add_table(rel)?;
        }
        let mut join_tables = Vec::new();
        for join in &node.joins {
            join_tables.push(ctx.add_table(&join.relation)?);
        }
        // ON conditions see every table bound so far.
        let mut joins = Vec::new();
        for (join, table) in node.joins.iter().zip(join_tables) {
            let filter = FilterStmt::create(&ctx, &join.conditions)?;
            joins.push((table, filter));
        }
        let query_expressions = ctx.bind_projection(&node.expressions)?;
        let group_by = node
            .group_by
            .iter()
            .map(|e| ctx.bind_expression(e))
            .collect::<Result<Vec<_>>>()?;
        let filter = FilterStmt::create(&ctx, &node.conditions)?;
        let having = FilterStmt::create(&ctx, &node.having)?;
        Ok(SelectStmt {
            tables: ctx.tables,
            query_expressions,
            filter,
            joins,
            group_by,
            having,
        })
    }
}

pub struct InsertStmt {
    pub table: TablePtr,
    pub rows: Vec<Vec<Value>>,
}

impl InsertStmt {
    pub fn create(db: &DbPtr, node: &InsertNode) -> Result<InsertStmt> {
        let table = db
            .find_table(&node.table)
            .ok_or_else(|| DbError::TableNotExist(node.table.clone()))?;
        let field_num = table.meta().visible_fields().count();
        for row in &node.rows {
            if row.len() != field_num {
                return Err(DbError::FieldMissing(format!(
                    "table {} expects {} values, got {}",
                    node.table,
                    field_num,
                    row.len()
                )));
            }
        }
        Ok(InsertStmt { table, rows: node.rows.clone() })
    }
}

pub struct UpdateStmt {
    pub table: TablePtr,
    /// `(field name, bound value expression)` per SET item.
    pub assignments: Vec<(String, Expr)>,
    pub filter: FilterStmt,
}

impl UpdateStmt {
    pub fn create(db: &DbPtr, node: &UpdateNode) -> Result<UpdateStmt> {
        let mut ctx = BinderContext::new(db.clone());
        let table = ctx.add_table(&node.table)?;
        let meta = table.meta();
        let mut assignments = Vec::with_capacity(node.assignments.len());
        for (name, expr) in &node.assignments {
            let field = meta
                .field(name)
                .filter(|f| f.visible)
                .ok_or_else(|| DbError::FieldNotExist(format!("{}.{}", node.table, name)))?;
            if assignments.iter().any(|(n, _)| n == name) {
                return Err(DbError::InvalidArgument(format!("duplicate SET target {name}")));
            }
            let bound = ctx.bind_expression(expr)?;
            let vt = bound.value_type();
            if vt != AttrType::Undefined
                && vt != field.attr_type
                && crate::types::cast_cost(vt, field.attr_type) == crate::types::CAST_IMPOSSIBLE
            {
                return Err(DbError::FieldTypeMismatch(format!(
                    "cannot assign {} to {} {}",
                    vt.name(),
                    field.attr_type.name(),
                    name
                )));
            }
            assignments.push((name.clone(), bound));
        }
        let filter = FilterStmt::create(&ctx, &node.conditions)?;
        Ok(UpdateStmt { table, assignments, filter })
    }
}

pub struct DeleteStmt {
    pub table: TablePtr,
    pub filter: FilterStmt,
}

impl DeleteStmt {
    pub fn create(db: &DbPtr, node: &DeleteNode) -> Result<DeleteStmt> {
        let mut ctx = BinderContext::new(db.clone());
        let table = ctx.add_table(&node.table)?;
        let filter = FilterStmt::create(&ctx, &node.conditions)?;
        Ok(DeleteStmt { table, filter })
    }
}

pub struct CalcStmt {
    pub expressions: Vec<Expr>,
}

impl Stmt {
    /// Bind a parsed command that goes through the planner. DDL and utility
    /// commands are executed by the session directly and never reach here.
    pub fn from_command(db: &DbPtr, cmd: &SqlCommand) -> Result<Stmt> {
        match cmd {
            SqlCommand::Select(node) => Ok(Stmt::Select(SelectStmt::create(db, node)?)),
            SqlCommand::Insert(node) => Ok(Stmt::Insert(InsertStmt::create(db, node)?)),
            SqlCommand::Update(node) => Ok(Stmt::Update(UpdateStmt::create(db, node)?)),
            SqlCommand::Delete(node) => Ok(Stmt::Delete(DeleteStmt::create(db, node)?)),
            SqlCommand::Calc { expressions } => {
                let ctx = BinderContext::new(db.clone());
                let expressions = expressions
                    .iter()
                    .map(|e| ctx.bind_expression(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Stmt::Calc(CalcStmt { expressions }))
            }
            SqlCommand::Explain(inner) => {
                Ok(Stmt::Explain(Box::new(Stmt::from_command(db, inner)?)))
            }
            _ => Err(DbError::internal("command does not bind to a statement")),
        }
    }
}

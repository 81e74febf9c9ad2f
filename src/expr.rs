//! The expression tree evaluated over tuples (and, for the vectorised
//! path, over chunks), plus the aggregate accumulators. Expressions are a
//! sum type dispatched by match; subquery-bearing variants carry the
//! session context they were wired to by `set_session_context`.

use crate::ast::SelectSqlNode;
use crate::chunk::{Chunk, Column};
use crate::rc::{DbError, Result};
use crate::subquery::SubqueryContext;
use crate::tuple::{Tuple, TupleCellSpec};
use crate::types::{self, AttrType};
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompOp {
    EqualTo,
    LessEqual,
    NotEqual,
    LessThan,
    GreatEqual,
    GreatThan,
}

impl CompOp {
    /// Apply the operator to a comparison outcome.
    pub fn apply(self, ord: Ordering) -> bool {
        match self {
            CompOp::EqualTo => ord == Ordering::Equal,
            CompOp::LessEqual => ord != Ordering::Greater,
            CompOp::NotEqual => ord != Ordering::Equal,
            CompOp::LessThan => ord == Ordering::Less,
            CompOp::GreatEqual => ord != Ordering::Less,
            CompOp::GreatThan => ord == Ordering::Greater,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompOp::EqualTo => "=",
            CompOp::LessEqual => "<=",
            CompOp::NotEqual => "<>",
            CompOp::LessThan => "<",
            CompOp::GreatEqual => ">=",
            CompOp::GreatThan => ">",
        }
    }
}

/// AND / OR.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConjType {
    And,
    Or,
}

/// Arithmetic operators; `Negative` is unary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Negative,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Negative => "-",
        }
    }
}

/// Aggregate functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggType {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggType {
    pub fn from_name(name: &str) -> Result<AggType> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Ok(AggType::Count),
            "sum" => Ok(AggType::Sum),
            "avg" => Ok(AggType::Avg),
            "max" => Ok(AggType::Max),
            "min" => Ok(AggType::Min),
            _ => Err(DbError::InvalidArgument(format!("unknown aggregate {name}"))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AggType::Count => "count",
            AggType::Sum => "sum",
            AggType::Avg => "avg",
            AggType::Max => "max",
            AggType::Min => "min",
        }
    }
}

/// Vector distance built-ins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceFunc {
    L2Distance,
    CosineDistance,
    InnerProduct,
}

impl DistanceFunc {
    pub fn from_name(name: &str) -> Option<DistanceFunc> {
        match name.to_ascii_lowercase().as_str() {
            "l2_distance" => Some(DistanceFunc::L2Distance),
            "cosine_distance" => Some(DistanceFunc::CosineDistance),
            "inner_product" => Some(DistanceFunc::InnerProduct),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DistanceFunc::L2Distance => "l2_distance",
            DistanceFunc::CosineDistance => "cosine_distance",
            DistanceFunc::InnerProduct => "inner_product",
        }
    }
}

/// A resolved column reference.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldRef {
    pub table_name: String,
    pub field_name: String,
    pub attr_type: AttrType,
    /// Print as `table.field` (set when several tables are in scope).
    pub qualified: bool,
}

impl FieldRef {
    pub fn spec(&self) -> TupleCellSpec {
        TupleCellSpec::new(&self.table_name, &self.field_name)
    }
}

/// Scalar subquery expression.
#[derive(Clone)]
pub struct SubqueryExpr {
    pub select: Box<SelectSqlNode>,
    pub ctx: Option<SubqueryContext>,
}

/// Membership in a list or a subquery.
#[derive(Clone)]
pub enum InSet {
    List(Vec<Expr>),
    Subquery(Box<SelectSqlNode>),
}

/// `expr [NOT] IN (…)`.
#[derive(Clone)]
pub struct InExpr {
    pub not: bool,
    pub left: Box<Expr>,
    pub set: InSet,
    pub ctx: Option<SubqueryContext>,
}

/// `[NOT] EXISTS (subquery)`.
#[derive(Clone)]
pub struct ExistsExpr {
    pub not: bool,
    pub select: Box<SelectSqlNode>,
    pub ctx: Option<SubqueryContext>,
}

/// Expression tree node.
#[derive(Clone)]
pub enum Expr {
    /// `*` or `t.*`, expanded by the binder.
    Star { table: Option<String> },
    /// A column reference not yet resolved against the catalog.
    UnboundField { table: Option<String>, field: String },
    Field(FieldRef),
    Value(Value),
    Cast { child: Box<Expr>, target: AttrType },
    Comparison { comp: CompOp, left: Box<Expr>, right: Box<Expr> },
    IsNull { not: bool, child: Box<Expr> },
    Conjunction { conj: ConjType, children: Vec<Expr> },
    Arithmetic { op: ArithOp, left: Box<Expr>, right: Option<Box<Expr>> },
    /// An aggregate call not yet resolved (name still text).
    UnboundAggregate { func: String, child: Box<Expr> },
    Aggregate { func: AggType, child: Box<Expr> },
    Subquery(SubqueryExpr),
    In(InExpr),
    Exists(ExistsExpr),
    Distance { func: DistanceFunc, left: Box<Expr>, right: Box<Expr> },
}

impl std::fmt::Debug for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Expr {
    /// The type of the value this expression produces.
    pub fn value_type(&self) -> AttrType {
        match self {
            Expr::Star { .. } | Expr::UnboundField { .. } | Expr::UnboundAggregate { .. } => {
                AttrType::Undefined
            }
            Expr::Field(f) => f.attr_type,
            Expr::Value(v) => v.attr_type(),
            Expr::Cast { target, .. } => *target,
            Expr::Comparison { .. } | Expr::IsNull { .. } | Expr::Conjunction { .. } => {
                AttrType::Booleans
            }
            Expr::Arithmetic { op, left, right } => match right {
                None => left.value_type(),
                Some(r) => {
                    types::arith_result_type(left.value_type(), r.value_type(), *op == ArithOp::Div)
                }
            },
            Expr::Aggregate { func, child } => match func {
                AggType::Count => AttrType::Ints,
                AggType::Avg => AttrType::Floats,
                _ => child.value_type(),
            },
            Expr::Subquery(_) => AttrType::Undefined,
            Expr::In(_) | Expr::Exists(_) => AttrType::Booleans,
            Expr::Distance { .. } => AttrType::Floats,
        }
    }

    /// Canonical display name (also the alias of computed columns).
    pub fn name(&self) -> String {
        match self {
            Expr::Star { table: Some(t) } => format!("{t}.*"),
            Expr::Star { table: None } => "*".to_string(),
            Expr::UnboundField { table: Some(t), field } => format!("{t}.{field}"),
            Expr::UnboundField { table: None, field } => field.clone(),
            Expr::Field(f) => {
                if f.qualified {
                    format!("{}.{}", f.table_name, f.field_name)
                } else {
                    f.field_name.clone()
                }
            }
            Expr::Value(v) => v.get_string(),
            Expr::Cast { child, .. } => child.name(),
            Expr::Comparison { comp, left, right } => {
                format!("{}{}{}", left.name(), comp.symbol(), right.name())
            }
            Expr::IsNull { not, child } => {
                format!("{} is {}null", child.name(), if *not { "not " } else { "" })
            }
            Expr::Conjunction { conj, children } => {
                let sep = match conj {
                    ConjType::And => " and ",
                    ConjType::Or => " or ",
                };
                children.iter().map(|c| c.name()).collect::<Vec<_>>().join(sep)
            }
            Expr::Arithmetic { op, left, right } => match right {
                Some(r) => format!("{}{}{}", left.name(), op.symbol(), r.name()),
                None => format!("-{}", left.name()),
            },
            Expr::UnboundAggregate { func, child } => format!("{}({})", func, child.name()),
            Expr::Aggregate { func, child } => format!("{}({})", func.name(), child.name()),
            Expr::Subquery(_) => "subquery".to_string(),
            Expr::In(e) => format!("{} {}in (…)", e.left.name(), if e.not { "not " } else { "" }),
            Expr::Exists(e) => format!("{}exists (…)", if e.not { "not " } else { "" }),
            Expr::Distance { func, left, right } => {
                format!("{}({},{})", func.name(), left.name(), right.name())
            }
        }
    }

    /// Evaluate against one tuple.
    pub fn get_value(&self, tuple: &dyn Tuple) -> Result<Value> {
        match self {
            Expr::Star { .. } | Expr::UnboundField { .. } | Expr::UnboundAggregate { .. } => {
                Err(DbError::internal(format!("evaluating unbound expression {}", self.name())))
            }
            Expr::Field(f) => tuple.find_cell(&f.spec()),
            Expr::Value(v) => Ok(v.clone()),
            Expr::Cast { child, target } => {
                let v = child.get_value(tuple)?;
                types::cast_to(&v, *target)
            }
            Expr::Comparison { comp, left, right } => {
                let l = left.get_value(tuple)?;
                let r = right.get_value(tuple)?;
                compare_values(*comp, &l, &r)
            }
            Expr::IsNull { not, child } => {
                let v = child.get_value(tuple)?;
                Ok(Value::Bool(v.is_null() != *not))
            }
            Expr::Conjunction { conj, children } => {
                if children.is_empty() {
                    return Ok(Value::Bool(true));
                }
                for child in children {
                    let b = child.get_value(tuple)?.get_bool();
                    match conj {
                        ConjType::And if !b => return Ok(Value::Bool(false)),
                        ConjType::Or if b => return Ok(Value::Bool(true)),
                        _ => {}
                    }
                }
                Ok(Value::Bool(*conj == ConjType::And))
            }
            Expr::Arithmetic { op, left, right } => {
                let l = left.get_value(tuple)?;
                match right {
                    None => types::negative(&l),
                    Some(r) => {
                        let r = r.get_value(tuple)?;
                        calc_arith(*op, &l, &r)
                    }
                }
            }
            Expr::Aggregate { .. } => {
                // Computed upstream by the group-by operator; read back by name.
                tuple.find_cell(&TupleCellSpec::by_alias(&self.name()))
            }
            Expr::Subquery(sub) => {
                let ctx = subquery_ctx(&sub.ctx)?;
                let results = ctx.execute(&sub.select, true)?;
                match results.len() {
                    0 => Ok(Value::null()),
                    1 => Ok(results.into_iter().next().unwrap()),
                    n => Err(DbError::InvalidArgument(format!(
                        "scalar subquery returned {n} rows"
                    ))),
                }
            }
            Expr::In(e) => {
                let l = e.left.get_value(tuple)?;
                let members = match &e.set {
                    InSet::List(items) => {
                        let mut vs = Vec::with_capacity(items.len());
                        for item in items {
                            vs.push(item.get_value(tuple)?);
                        }
                        vs
                    }
                    InSet::Subquery(select) => {
                        let ctx = subquery_ctx(&e.ctx)?;
                        ctx.execute(select, true)?
                    }
                };
                Ok(eval_in(&l, &members, e.not))
            }
            Expr::Exists(e) => {
                let ctx = subquery_ctx(&e.ctx)?;
                let results = ctx.execute(&e.select, false)?;
                Ok(Value::Bool(results.is_empty() == e.not))
            }
            Expr::Distance { func, left, right } => {
                let l = left.get_value(tuple)?;
                let r = right.get_value(tuple)?;
                calc_distance(*func, &l, &r)
            }
        }
    }

    /// Evaluate without a tuple, when the expression is constant.
    pub fn try_get_value(&self) -> Result<Value> {
        match self {
            Expr::Value(v) => Ok(v.clone()),
            Expr::Cast { child, target } => {
                let v = child.try_get_value()?;
                types::cast_to(&v, *target)
            }
            Expr::Comparison { comp, left, right } => {
                let l = left.try_get_value()?;
                let r = right.try_get_value()?;
                compare_values(*comp, &l, &r)
            }
            Expr::Arithmetic { op, left, right } => {
                let l = left.try_get_value()?;
                match right {
                    None => types::negative(&l),
                    Some(r) => {
                        let r = r.try_get_value()?;
                        calc_arith(*op, &l, &r)
                    }
                }
            }
            Expr::Distance { func, left, right } => {
                let l = left.try_get_value()?;
                let r = right.try_get_value()?;
                calc_distance(*func, &l, &r)
            }
            _ => Err(DbError::Unimplemented("constant evaluation")),
        }
    }

    /// Structural equality (used by GROUP BY binding).
    pub fn equal_expr(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Field(a), Expr::Field(b)) => {
                a.table_name == b.table_name && a.field_name == b.field_name
            }
            (Expr::Value(a), Expr::Value(b)) => a.compare(b) == Some(Ordering::Equal),
            (Expr::Star { table: a }, Expr::Star { table: b }) => a == b,
            (
                Expr::UnboundField { table: ta, field: fa },
                Expr::UnboundField { table: tb, field: fb },
            ) => ta == tb && fa == fb,
            (Expr::Cast { child: a, target: ta }, Expr::Cast { child: b, target: tb }) => {
                ta == tb && a.equal_expr(b)
            }
            (
                Expr::Aggregate { func: fa, child: ca },
                Expr::Aggregate { func: fb, child: cb },
            ) => fa == fb && ca.equal_expr(cb),
            (
                Expr::Arithmetic { op: oa, left: la, right: ra },
                Expr::Arithmetic { op: ob, left: lb, right: rb },
            ) => {
                oa == ob
                    && la.equal_expr(lb)
                    && match (ra, rb) {
                        (None, None) => true,
                        (Some(a), Some(b)) => a.equal_expr(b),
                        _ => false,
                    }
            }
            (
                Expr::Distance { func: fa, left: la, right: ra },
                Expr::Distance { func: fb, left: lb, right: rb },
            ) => fa == fb && la.equal_expr(lb) && ra.equal_expr(rb),
            _ => false,
        }
    }

    /// Names of all tables referenced by this expression (for pushdown).
    pub fn involved_tables(&self) -> BTreeSet<String> {
        let mut tables = BTreeSet::new();
        self.collect_tables(&mut tables);
        tables
    }

    fn collect_tables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Field(f) => {
                if !f.table_name.is_empty() {
                    out.insert(f.table_name.clone());
                }
            }
            Expr::UnboundField { table: Some(t), .. } => {
                out.insert(t.clone());
            }
            Expr::Cast { child, .. }
            | Expr::IsNull { child, .. }
            | Expr::Aggregate { child, .. }
            | Expr::UnboundAggregate { child, .. } => child.collect_tables(out),
            Expr::Comparison { left, right, .. } | Expr::Distance { left, right, .. } => {
                left.collect_tables(out);
                right.collect_tables(out);
            }
            Expr::Conjunction { children, .. } => {
                for c in children {
                    c.collect_tables(out);
                }
            }
            Expr::Arithmetic { left, right, .. } => {
                left.collect_tables(out);
                if let Some(r) = right {
                    r.collect_tables(out);
                }
            }
            Expr::In(e) => {
                e.left.collect_tables(out);
                if let InSet::List(items) = &e.set {
                    for i in items {
                        i.collect_tables(out);
                    }
                }
            }
            _ => {}
        }
    }

    /// Wire the session context into every subquery-bearing node.
    pub fn set_session_context(&mut self, ctx: &SubqueryContext) {
        match self {
            Expr::Subquery(s) => s.ctx = Some(ctx.clone()),
            Expr::In(e) => {
                e.ctx = Some(ctx.clone());
                e.left.set_session_context(ctx);
                if let InSet::List(items) = &mut e.set {
                    for i in items {
                        i.set_session_context(ctx);
                    }
                }
            }
            Expr::Exists(e) => e.ctx = Some(ctx.clone()),
            Expr::Cast { child, .. }
            | Expr::IsNull { child, .. }
            | Expr::Aggregate { child, .. }
            | Expr::UnboundAggregate { child, .. } => child.set_session_context(ctx),
            Expr::Comparison { left, right, .. } | Expr::Distance { left, right, .. } => {
                left.set_session_context(ctx);
                right.set_session_context(ctx);
            }
            Expr::Conjunction { children, .. } => {
                for c in children {
                    c.set_session_context(ctx);
                }
            }
            Expr::Arithmetic { left, right, .. } => {
                left.set_session_context(ctx);
                if let Some(r) = right {
                    r.set_session_context(ctx);
                }
            }
            _ => {}
        }
    }

    /// Does this tree contain an aggregate call (bound or not)?
    pub fn has_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } | Expr::UnboundAggregate { .. } => true,
            Expr::Cast { child, .. } | Expr::IsNull { child, .. } => child.has_aggregate(),
            Expr::Comparison { left, right, .. } | Expr::Distance { left, right, .. } => {
                left.has_aggregate() || right.has_aggregate()
            }
            Expr::Conjunction { children, .. } => children.iter().any(|c| c.has_aggregate()),
            Expr::Arithmetic { left, right, .. } => {
                left.has_aggregate() || right.as_ref().is_some_and(|r| r.has_aggregate())
            }
            _ => false,
        }
    }

    /// Column of this expression over a chunk (vectorised path).
    pub fn get_column(&self, chunk: &Chunk) -> Result<Column> {
        match self {
            Expr::Value(v) => Ok(Column::constant(v.clone())),
            Expr::Field(f) => {
                let idx = chunk.find_column(&f.spec())?;
                Ok(chunk.column(idx).clone())
            }
            Expr::Aggregate { .. } => {
                // Computed by the group-by operator; read its column back.
                let idx = chunk.find_column(&TupleCellSpec::by_alias(&self.name()))?;
                Ok(chunk.column(idx).clone())
            }
            Expr::Cast { child, target } => {
                let col = child.get_column(chunk)?;
                let mut out = Column::new(*target);
                for i in 0..chunk.rows() {
                    out.append(types::cast_to(&col.value_at(i), *target)?);
                }
                Ok(out)
            }
            Expr::Arithmetic { op, left, right } => {
                let lcol = left.get_column(chunk)?;
                let mut out = Column::new(self.value_type());
                match right {
                    None => {
                        for i in 0..chunk.rows() {
                            out.append(types::negative(&lcol.value_at(i))?);
                        }
                    }
                    Some(r) => {
                        let rcol = r.get_column(chunk)?;
                        for i in 0..chunk.rows() {
                            out.append(calc_arith(*op, &lcol.value_at(i), &rcol.value_at(i))?);
                        }
                    }
                }
                Ok(out)
            }
            Expr::Distance { func, left, right } => {
                let lcol = left.get_column(chunk)?;
                let rcol = right.get_column(chunk)?;
                let mut out = Column::new(AttrType::Floats);
                for i in 0..chunk.rows() {
                    out.append(calc_distance(*func, &lcol.value_at(i), &rcol.value_at(i))?);
                }
                Ok(out)
            }
            _ => Err(DbError::Unimplemented("vectorised evaluation for this expression")),
        }
    }

    /// Chunk-wise filter: set `select[i]` to 0 for rows this comparison
    /// rejects. Only comparisons implement this.
    pub fn eval(&self, chunk: &Chunk, select: &mut [u8]) -> Result<()> {
        let Expr::Comparison { comp, left, right } = self else {
            return Err(DbError::Unimplemented("chunk eval for non-comparison"));
        };
        let lcol = left.get_column(chunk)?;
        let rcol = right.get_column(chunk)?;
        for (i, sel) in select.iter_mut().enumerate().take(chunk.rows()) {
            let v = compare_values(*comp, &lcol.value_at(i), &rcol.value_at(i))?;
            if !v.get_bool() {
                *sel = 0;
            }
        }
        Ok(())
    }
}

fn subquery_ctx(ctx: &Option<SubqueryContext>) -> Result<&SubqueryContext> {
    ctx.as_ref()
        .ok_or_else(|| DbError::internal("subquery expression has no session context"))
}

/// Comparison with NULL semantics: a NULL operand makes the result NULL.
pub fn compare_values(comp: CompOp, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null(AttrType::Booleans));
    }
    match left.compare(right) {
        Some(ord) => Ok(Value::Bool(comp.apply(ord))),
        None => Ok(Value::Bool(false)),
    }
}

/// Three-valued IN: true on a match, NULL if no match but a NULL was
/// involved, false otherwise. NOT IN negates through the NULL.
fn eval_in(left: &Value, members: &[Value], not: bool) -> Value {
    if left.is_null() {
        return Value::Null(AttrType::Booleans);
    }
    let mut saw_null = false;
    for m in members {
        if m.is_null() {
            saw_null = true;
            continue;
        }
        if left.compare(m) == Some(Ordering::Equal) {
            return Value::Bool(!not);
        }
    }
    if saw_null {
        return Value::Null(AttrType::Booleans);
    }
    Value::Bool(not)
}

/// Binary arithmetic with vector promotion: when either side is a vector,
/// the other side is coerced to a vector first.
pub fn calc_arith(op: ArithOp, left: &Value, right: &Value) -> Result<Value> {
    let target = types::arith_result_type(left.attr_type(), right.attr_type(), op == ArithOp::Div);
    if target == AttrType::Vectors && !left.is_null() && !right.is_null() {
        let l = types::cast_to(left, AttrType::Vectors)?;
        let r = types::cast_to(right, AttrType::Vectors)?;
        return match op {
            ArithOp::Add => types::add(&l, &r),
            ArithOp::Sub => types::subtract(&l, &r),
            ArithOp::Mul => types::multiply(&l, &r),
            ArithOp::Div => types::divide(&l, &r),
            ArithOp::Negative => types::negative(&l),
        };
    }
    match op {
        ArithOp::Add => types::add(left, right),
        ArithOp::Sub => types::subtract(left, right),
        ArithOp::Mul => types::multiply(left, right),
        ArithOp::Div => types::divide(left, right),
        ArithOp::Negative => types::negative(left),
    }
}

/// Distance between two vectors (operands are coerced to VECTOR).
pub fn calc_distance(func: DistanceFunc, left: &Value, right: &Value) -> Result<Value> {
    let l = types::cast_to(left, AttrType::Vectors)?;
    let r = types::cast_to(right, AttrType::Vectors)?;
    let (a, b) = (l.get_vector(), r.get_vector());
    if a.len() != b.len() {
        return Err(DbError::FieldTypeMismatch(format!(
            "vector dimension mismatch in {}: {} vs {}",
            func.name(),
            a.len(),
            b.len()
        )));
    }
    let result = match func {
        DistanceFunc::L2Distance => {
            a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
        }
        DistanceFunc::CosineDistance => {
            let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
            let la = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let lb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if la == 0.0 || lb == 0.0 {
                1.0
            } else {
                1.0 - dot / (la * lb)
            }
        }
        DistanceFunc::InnerProduct => a.iter().zip(&b).map(|(x, y)| x * y).sum(),
    };
    Ok(Value::Float(result))
}

/// Stateful reducer for one aggregate column of one group.
pub struct Aggregator {
    func: AggType,
    count: i64,
    acc: Option<Value>,
}

impl Aggregator {
    pub fn new(func: AggType) -> Aggregator {
        Aggregator { func, count: 0, acc: None }
    }

    /// Feed one input value; NULLs are skipped.
    pub fn accumulate(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        self.count += 1;
        match self.func {
            AggType::Count => {}
            AggType::Sum | AggType::Avg => {
                self.acc = Some(match self.acc.take() {
                    None => value.clone(),
                    Some(acc) => types::add(&acc, value)?,
                });
            }
            AggType::Max => {
                let replace = match &self.acc {
                    None => true,
                    Some(acur) => value.compare(acur) == Some(Ordering::Greater),
                };
                if replace {
                    self.acc = Some(value.clone());
                }
            }
            AggType::Min => {
                let replace = match &self.acc {
                    None => true,
                    Some(acur) => value.compare(acur) == Some(Ordering::Less),
                };
                if replace {
                    self.acc = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    /// Final value: NULL when no non-NULL input was seen (0 for COUNT).
    pub fn evaluate(&self) -> Result<Value> {
        match self.func {
            AggType::Count => Ok(Value::Int(self.count as i32)),
            AggType::Avg => match &self.acc {
                None => Ok(Value::Null(AttrType::Floats)),
                Some(sum) => types::divide(sum, &Value::Float(self.count as f32)),
            },
            _ => Ok(self.acc.clone().unwrap_or_else(Value::null)),
        }
    }
}

/// The lazily-named projection row: each cell is one projection expression
/// evaluated over the child tuple.
pub struct ExpressionTuple {
    cells: Vec<Value>,
    cell_specs: Vec<TupleCellSpec>,
}

impl ExpressionTuple {
    /// Evaluate `exprs` over `input`.
    pub fn evaluate(exprs: &[Expr], input: &dyn Tuple) -> Result<ExpressionTuple> {
        let mut cells = Vec::with_capacity(exprs.len());
        let mut cell_specs = Vec::with_capacity(exprs.len());
        for e in exprs {
            cells.push(e.get_value(input)?);
            let mut spec = match e {
                Expr::Field(f) => f.spec(),
                _ => TupleCellSpec::by_alias(&e.name()),
            };
            spec.alias = e.name();
            cell_specs.push(spec);
        }
        Ok(ExpressionTuple { cells, cell_specs })
    }
}

impl Tuple for ExpressionTuple {
    fn cell_num(&self) -> usize {
        self.cells.len()
    }

    fn cell_at(&self, index: usize) -> Result<Value> {
        self.cells
            .get(index)
            .cloned()
            .ok_or_else(|| DbError::internal("cell index out of range"))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::ValueListTuple;

    fn row(cells: Vec<(&str, Value)>) -> ValueListTuple {
        let specs = cells.iter().map(|(n, _)| TupleCellSpec::new("t", n)).collect();
        ValueListTuple::new(cells.into_iter().map(|(_, v)| v).collect(), specs)
    }

    fn field(name: &str, t: AttrType) -> Expr {
        Expr::Field(FieldRef {
            table_name: "t".into(),
            field_name: name.into(),
            attr_type: t,
            qualified: false,
        })
    }

    #[test]
    fn comparison_null_is_not_true() {
        let t = row(vec![("a", Value::null())]);
        let e = Expr::Comparison {
            comp: CompOp::EqualTo,
            left: Box::new(field("a", AttrType::Ints)),
            right: Box::new(Expr::Value(Value::Int(1))),
        };
        let v = e.get_value(&t).unwrap();
        assert!(v.is_null());
        assert!(!v.get_bool());
    }

    #[test]
    fn conjunction_short_circuit() {
        let t = row(vec![("a", Value::Int(1))]);
        let truthy = Expr::Comparison {
            comp: CompOp::EqualTo,
            left: Box::new(field("a", AttrType::Ints)),
            right: Box::new(Expr::Value(Value::Int(1))),
        };
        let falsy = Expr::Comparison {
            comp: CompOp::GreatThan,
            left: Box::new(field("a", AttrType::Ints)),
            right: Box::new(Expr::Value(Value::Int(5))),
        };
        let and = Expr::Conjunction {
            conj: ConjType::And,
            children: vec![truthy.clone(), falsy.clone()],
        };
        assert!(!and.get_value(&t).unwrap().get_bool());
        let or = Expr::Conjunction { conj: ConjType::Or, children: vec![falsy, truthy] };
        assert!(or.get_value(&t).unwrap().get_bool());
    }

    #[test]
    fn in_three_valued() {
        assert_eq!(
            eval_in(&Value::Int(2), &[Value::Int(1), Value::Int(2)], false),
            Value::Bool(true)
        );
        assert_eq!(
            eval_in(&Value::Int(3), &[Value::Int(1), Value::Int(2)], false),
            Value::Bool(false)
        );
        assert!(eval_in(&Value::Int(3), &[Value::Int(1), Value::null()], false).is_null());
        assert_eq!(
            eval_in(&Value::Int(2), &[Value::Int(2), Value::null()], true),
            Value::Bool(false)
        );
        assert!(eval_in(&Value::null(), &[Value::Int(1)], false).is_null());
    }

    #[test]
    fn aggregator_null_handling() {
        let mut sum = Aggregator::new(AggType::Sum);
        sum.accumulate(&Value::null()).unwrap();
        assert!(sum.evaluate().unwrap().is_null());
        sum.accumulate(&Value::Int(3)).unwrap();
        sum.accumulate(&Value::Int(4)).unwrap();
        assert_eq!(sum.evaluate().unwrap(), Value::Int(7));

        let mut count = Aggregator::new(AggType::Count);
        count.accumulate(&Value::null()).unwrap();
        count.accumulate(&Value::Int(9)).unwrap();
        assert_eq!(count.evaluate().unwrap(), Value::Int(1));

        let mut avg = Aggregator::new(AggType::Avg);
        avg.accumulate(&Value::Int(1)).unwrap();
        avg.accumulate(&Value::Int(2)).unwrap();
        assert_eq!(avg.evaluate().unwrap(), Value::Float(1.5));

        let mut max = Aggregator::new(AggType::Max);
        assert!(max.evaluate().unwrap().is_null());
        max.accumulate(&Value::Float(2.5)).unwrap();
        max.accumulate(&Value::Float(1.5)).unwrap();
        assert_eq!(max.evaluate().unwrap(), Value::Float(2.5));
    }

    #[test]
    fn distance_functions() {
        let a = Value::Vector(vec![1.0, 0.0]);
        let b = Value::Vector(vec![0.0, 1.0]);
        let l2 = calc_distance(DistanceFunc::L2Distance, &a, &b).unwrap();
        assert!((l2.get_float() - 2.0f32.sqrt()).abs() < 1e-6);
        let ip = calc_distance(DistanceFunc::InnerProduct, &a, &b).unwrap();
        assert_eq!(ip, Value::Float(0.0));
        let cos = calc_distance(DistanceFunc::CosineDistance, &a, &a).unwrap();
        assert!(cos.get_float().abs() < 1e-6);
        let zero = Value::Vector(vec![0.0, 0.0]);
        let cz = calc_distance(DistanceFunc::CosineDistance, &a, &zero).unwrap();
        assert_eq!(cz, Value::Float(1.0));
        let short = Value::Vector(vec![1.0]);
        assert!(matches!(
            calc_distance(DistanceFunc::L2Distance, &a, &short),
            Err(DbError::FieldTypeMismatch(_))
        ));
        // Argument coercion: a string literal vector is cast to VECTOR.
        let lit = Value::from_str("[1,0]");
        let d = calc_distance(DistanceFunc::L2Distance, &lit, &a).unwrap();
        assert_eq!(d, Value::Float(0.0));
    }
}

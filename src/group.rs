//! Group-by operators. Both drain their child on the first `next` call,
//! keep one aggregator list per group, and emit one composite row per group
//! (grouping columns first, then aggregate results) with HAVING applied.

use crate::chunk::{Chunk, Column};
use crate::expr::{AggType, Aggregator, Expr};
use crate::join::hash_value;
use crate::operator::{BoxedOperator, PhysicalOperator, TrxRef};
use crate::rc::{DbError, Result};
use crate::tuple::{CompositeTuple, Tuple, TupleCellSpec, ValueListTuple};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::hash::Hasher;

/// The value an aggregate consumes for one input row. `COUNT(*)` counts
/// rows, so its star child feeds a constant 1.
fn aggregate_input(agg: &Expr, tuple: &dyn Tuple) -> Result<Value> {
    let Expr::Aggregate { child, .. } = agg else {
        return Err(DbError::internal("not an aggregate expression"));
    };
    match child.as_ref() {
        Expr::Star { .. } => Ok(Value::Int(1)),
        other => other.get_value(tuple),
    }
}

fn make_aggregators(aggregates: &[Expr]) -> Result<Vec<Aggregator>> {
    aggregates
        .iter()
        .map(|a| match a {
            Expr::Aggregate { func, .. } => Ok(Aggregator::new(*func)),
            _ => Err(DbError::internal("not an aggregate expression")),
        })
        .collect()
}

fn evaluate_group(
    aggregates: &[Expr],
    aggregators: &[Aggregator],
    group_specs: Vec<TupleCellSpec>,
    group_values: Vec<Value>,
) -> Result<CompositeTuple> {
    let mut composite = CompositeTuple::default();
    if !group_values.is_empty() {
        composite.add_tuple(ValueListTuple::new(group_values, group_specs));
    }
    let mut cells = Vec::with_capacity(aggregators.len());
    let mut specs = Vec::with_capacity(aggregators.len());
    for (agg, a) in aggregates.iter().zip(aggregators.iter()) {
        cells.push(a.evaluate()?);
        specs.push(TupleCellSpec::by_alias(&agg.name()));
    }
    composite.add_tuple(ValueListTuple::new(cells, specs));
    Ok(composite)
}

fn passes_having(having: &[Expr], tuple: &dyn Tuple) -> Result<bool> {
    for h in having {
        if !h.get_value(tuple)?.get_bool() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Spec a grouping expression publishes its column under.
fn group_spec(expr: &Expr) -> TupleCellSpec {
    let mut spec = match expr {
        Expr::Field(f) => f.spec(),
        _ => TupleCellSpec::by_alias(&expr.name()),
    };
    spec.alias = expr.name();
    spec
}

// ---------------------------------------------------------------------------

/// Aggregation without grouping keys: exactly one output row, even for an
/// empty child (COUNT gives 0, the others NULL).
pub struct ScalarGroupByOperator {
    aggregates: Vec<Expr>,
    having: Vec<Expr>,
    child: BoxedOperator,
    consumed: bool,
    emitted: bool,
    tuple: Option<CompositeTuple>,
}

impl ScalarGroupByOperator {
    pub fn new(
        aggregates: Vec<Expr>,
        having: Vec<Expr>,
        child: BoxedOperator,
    ) -> ScalarGroupByOperator {
        ScalarGroupByOperator {
            aggregates,
            having,
            child,
            consumed: false,
            emitted: false,
            tuple: None,
        }
    }
}

impl PhysicalOperator for ScalarGroupByOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.consumed = false;
        self.emitted = false;
        self.child.open(trx)
    }

    fn next(&mut self) -> Result<bool> {
        if self.emitted {
            return Ok(false);
        }
        self.emitted = true;

        let mut aggregators = make_aggregators(&self.aggregates)?;
        if !self.consumed {
            self.consumed = true;
            while self.child.next()? {
                let tuple = self
                    .child
                    .current_tuple()
                    .ok_or_else(|| DbError::internal("child yielded no tuple"))?;
                for (agg, a) in self.aggregates.iter().zip(aggregators.iter_mut()) {
                    let v = aggregate_input(agg, tuple)?;
                    a.accumulate(&v)?;
                }
            }
        }

        let composite =
            evaluate_group(&self.aggregates, &aggregators, Vec::new(), Vec::new())?;
        if !passes_having(&self.having, &composite)? {
            return Ok(false);
        }
        self.tuple = Some(composite);
        Ok(true)
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.tuple.as_ref().map(|t| t as &dyn Tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.tuple = None;
        self.child.close()
    }

    fn name(&self) -> &'static str {
        "SCALAR_GROUP_BY"
    }

    fn param(&self) -> String {
        self.aggregates.iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

// ---------------------------------------------------------------------------

struct Group {
    key: Vec<Value>,
    aggregators: Vec<Aggregator>,
}

/// GROUP BY with keys: a hash table of groups, NULL keys grouping together
/// the way SQL wants.
pub struct HashGroupByOperator {
    group_by: Vec<Expr>,
    aggregates: Vec<Expr>,
    having: Vec<Expr>,
    child: BoxedOperator,
    groups: Vec<Group>,
    consumed: bool,
    emit_idx: usize,
    tuple: Option<CompositeTuple>,
}

impl HashGroupByOperator {
    pub fn new(
        group_by: Vec<Expr>,
        aggregates: Vec<Expr>,
        having: Vec<Expr>,
        child: BoxedOperator,
    ) -> HashGroupByOperator {
        HashGroupByOperator {
            group_by,
            aggregates,
            having,
            child,
            groups: Vec::new(),
            consumed: false,
            emit_idx: 0,
            tuple: None,
        }
    }

    fn consume_child(&mut self) -> Result<()> {
        let mut index: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
        while self.child.next()? {
            let tuple = self
                .child
                .current_tuple()
                .ok_or_else(|| DbError::internal("child yielded no tuple"))?;
            let mut key = Vec::with_capacity(self.group_by.len());
            for g in &self.group_by {
                key.push(g.get_value(tuple)?);
            }
            let mut hasher = rustc_hash::FxHasher::default();
            for v in &key {
                hash_value(v, &mut hasher);
            }
            let h = hasher.finish();

            let bucket = index.entry(h).or_default();
            let gidx = bucket.iter().copied().find(|&i| keys_equal(&self.groups[i].key, &key));
            let gidx = match gidx {
                Some(i) => i,
                None => {
                    self.groups.push(Group {
                        key: key.clone(),
                        aggregators: make_aggregators(&self.aggregates)?,
                    });
                    bucket.push(self.groups.len() - 1);
                    self.groups.len() - 1
                }
            };
            for (agg, a) in self.aggregates.iter().zip(self.groups[gidx].aggregators.iter_mut()) {
                let v = aggregate_input(agg, tuple)?;
                a.accumulate(&v)?;
            }
        }
        Ok(())
    }
}

/// Grouping equality: NULLs belong to the same group.
fn keys_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|(x, y)| {
            (x.is_null() && y.is_null()) || x.compare(y) == Some(Ordering::Equal)
        })
}

impl PhysicalOperator for HashGroupByOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.groups.clear();
        self.consumed = false;
        self.emit_idx = 0;
        self.child.open(trx)
    }

    fn next(&mut self) -> Result<bool> {
        if !self.consumed {
            self.consumed = true;
            self.consume_child()?;
        }
        let group_specs: Vec<TupleCellSpec> = self.group_by.iter().map(group_spec).collect();
        while self.emit_idx < self.groups.len() {
            let g = &self.groups[self.emit_idx];
            self.emit_idx += 1;
            let composite = evaluate_group(
                &self.aggregates,
                &g.aggregators,
                group_specs.clone(),
                g.key.clone(),
            )?;
            if passes_having(&self.having, &composite)? {
                self.tuple = Some(composite);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.tuple.as_ref().map(|t| t as &dyn Tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.groups.clear();
        self.tuple = None;
        self.child.close()
    }

    fn name(&self) -> &'static str {
        "HASH_GROUP_BY"
    }

    fn param(&self) -> String {
        self.group_by.iter().map(|g| g.name()).collect::<Vec<_>>().join(", ")
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.child.as_ref()]
    }
}

// ---------------------------------------------------------------------------

/// Vectorised scalar aggregation: drains child chunks, emits one 1-row chunk.
pub struct AggregateVecOperator {
    aggregates: Vec<Expr>,
    child: BoxedOperator,
    done: bool,
}

impl AggregateVecOperator {
    pub fn new(aggregates: Vec<Expr>, child: BoxedOperator) -> AggregateVecOperator {
        AggregateVecOperator { aggregates, child, done: false }
    }
}

impl PhysicalOperator for AggregateVecOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.done = false;
        self.child.open(trx)
    }

    fn next(&mut self) -> Result<bool> {
        Err(DbError::Unimplemented("row-at-a-time pull on a vectorised aggregate"))
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        None
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn name(&self) -> &'static str {
        "AGGREGATE_VEC"
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut aggregators = make_aggregators(&self.aggregates)?;
        while let Some(chunk) = self.child.next_chunk()? {
            for (agg, a) in self.aggregates.iter().zip(aggregators.iter_mut()) {
                let Expr::Aggregate { child, func } = agg else {
                    return Err(DbError::internal("not an aggregate expression"));
                };
                for i in 0..chunk.rows() {
                    let v = match child.as_ref() {
                        Expr::Star { .. } if *func == AggType::Count => Value::Int(1),
                        other => other.get_column(&chunk)?.value_at(i),
                    };
                    a.accumulate(&v)?;
                }
            }
        }
        let mut columns = Vec::new();
        let mut specs = Vec::new();
        for (agg, a) in self.aggregates.iter().zip(aggregators.iter()) {
            let mut col = Column::new(agg.value_type());
            col.append(a.evaluate()?);
            columns.push(col);
            specs.push(TupleCellSpec::by_alias(&agg.name()));
        }
        Ok(Some(Chunk::new(columns, specs, 1)))
    }
}

// ---------------------------------------------------------------------------

/// Vectorised hash group-by.
pub struct GroupByVecOperator {
    group_by: Vec<Expr>,
    aggregates: Vec<Expr>,
    child: BoxedOperator,
    done: bool,
}

impl GroupByVecOperator {
    pub fn new(group_by: Vec<Expr>, aggregates: Vec<Expr>, child: BoxedOperator) -> GroupByVecOperator {
        GroupByVecOperator { group_by, aggregates, child, done: false }
    }
}

impl PhysicalOperator for GroupByVecOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.done = false;
        self.child.open(trx)
    }

    fn next(&mut self) -> Result<bool> {
        Err(DbError::Unimplemented("row-at-a-time pull on a vectorised group-by"))
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        None
    }

    fn close(&mut self) -> Result<()> {
        self.child.close()
    }

    fn name(&self) -> &'static str {
        "GROUP_BY_VEC"
    }

    fn param(&self) -> String {
        self.group_by.iter().map(|g| g.name()).collect::<Vec<_>>().join(", ")
    }

    fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut groups: Vec<Group> = Vec::new();
        let mut index: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
        while let Some(chunk) = self.child.next_chunk()? {
            let key_cols: Vec<Column> = self
                .group_by
                .iter()
                .map(|g| g.get_column(&chunk))
                .collect::<Result<Vec<_>>>()?;
            for i in 0..chunk.rows() {
                let key: Vec<Value> = key_cols.iter().map(|c| c.value_at(i)).collect();
                let mut hasher = rustc_hash::FxHasher::default();
                for v in &key {
                    hash_value(v, &mut hasher);
                }
                let bucket = index.entry(hasher.finish()).or_default();
                let gidx = bucket.iter().copied().find(|&g| keys_equal(&groups[g].key, &key));
                let gidx = match gidx {
                    Some(g) => g,
                    None => {
                        groups.push(Group {
                            key: key.clone(),
                            aggregators: make_aggregators(&self.aggregates)?,
                        });
                        bucket.push(groups.len() - 1);
                        groups.len() - 1
                    }
                };
                for (agg, a) in self.aggregates.iter().zip(groups[gidx].aggregators.iter_mut()) {
                    let Expr::Aggregate { child, func } = agg else {
                        return Err(DbError::internal("not an aggregate expression"));
                    };
                    let v = match child.as_ref() {
                        Expr::Star { .. } if *func == AggType::Count => Value::Int(1),
                        other => other.get_column(&chunk)?.value_at(i),
                    };
                    a.accumulate(&v)?;
                }
            }
        }

        let mut columns: Vec<Column> = self
            .group_by
            .iter()
            .map(|g| Column::new(g.value_type()))
            .chain(self.aggregates.iter().map(|a| Column::new(a.value_type())))
            .collect();
        let mut specs: Vec<TupleCellSpec> = self.group_by.iter().map(group_spec).collect();
        specs.extend(self.aggregates.iter().map(|a| TupleCellSpec::by_alias(&a.name())));
        for g in &groups {
            for (c, v) in g.key.iter().enumerate() {
                columns[c].append(v.clone());
            }
            for (a, agg) in g.aggregators.iter().enumerate() {
                columns[self.group_by.len() + a].append(agg.evaluate()?);
            }
        }
        let rows = groups.len();
        Ok(Some(Chunk::new(columns, specs, rows)))
    }
}

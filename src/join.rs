//! Join operators: the default nested-loop join and the hash join chosen
//! for equi-joins when the session enables it.

use crate::expr::{self, Expr};
use crate::operator::{BoxedOperator, PhysicalOperator, TrxRef};
use crate::rc::{DbError, Result};
use crate::tuple::{JoinedTuple, Tuple, ValueListTuple};
use crate::value::Value;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Classic two-loop join. The right child is rewound with `close` + `open`
/// for every left row; a missing condition degrades to a Cartesian product.
pub struct NestedLoopJoinOperator {
    condition: Option<Expr>,
    left: BoxedOperator,
    right: BoxedOperator,
    left_tuple: Option<ValueListTuple>,
    right_open: bool,
    joined: Option<JoinedTuple>,
    trx: Option<TrxRef>,
}

impl NestedLoopJoinOperator {
    pub fn new(
        condition: Option<Expr>,
        left: BoxedOperator,
        right: BoxedOperator,
    ) -> NestedLoopJoinOperator {
        NestedLoopJoinOperator {
            condition,
            left,
            right,
            left_tuple: None,
            right_open: false,
            joined: None,
            trx: None,
        }
    }
}

impl PhysicalOperator for NestedLoopJoinOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.trx = Some(trx.clone());
        self.left_tuple = None;
        self.right_open = false;
        self.left.open(trx)
    }

    fn next(&mut self) -> Result<bool> {
        let trx = self.trx.clone().ok_or_else(|| DbError::internal("join not open"))?;
        loop {
            if self.left_tuple.is_none() {
                if !self.left.next()? {
                    return Ok(false);
                }
                let lt = self
                    .left
                    .current_tuple()
                    .ok_or_else(|| DbError::internal("left child yielded no tuple"))?;
                self.left_tuple = Some(ValueListTuple::snapshot(lt)?);
                if self.right_open {
                    self.right.close()?;
                }
                self.right.open(&trx)?;
                self.right_open = true;
            }

            while self.right.next()? {
                let rt = self
                    .right
                    .current_tuple()
                    .ok_or_else(|| DbError::internal("right child yielded no tuple"))?;
                let joined = JoinedTuple::new(
                    self.left_tuple.clone().unwrap(),
                    ValueListTuple::snapshot(rt)?,
                );
                let keep = match &self.condition {
                    None => true,
                    Some(cond) => cond.get_value(&joined)?.get_bool(),
                };
                if keep {
                    self.joined = Some(joined);
                    return Ok(true);
                }
            }
            self.left_tuple = None;
        }
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.joined.as_ref().map(|t| t as &dyn Tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.joined = None;
        self.left_tuple = None;
        self.left.close()?;
        if self.right_open {
            self.right_open = false;
            self.right.close()?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "NESTED_LOOP_JOIN"
    }

    fn param(&self) -> String {
        self.condition.as_ref().map(|c| c.name()).unwrap_or_default()
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }
}

/// Hash a value for join bucketing. Floats hash by bit pattern; actual key
/// equality is re-checked against bucket members, so collisions only cost
/// time.
pub fn hash_value(value: &Value, state: &mut impl Hasher) {
    match value {
        Value::Null(_) => state.write_u8(0),
        Value::Int(x) => x.hash(state),
        Value::Date(x) => {
            state.write_u8(2);
            x.hash(state);
        }
        Value::Float(x) => x.to_bits().hash(state),
        Value::Bool(x) => x.hash(state),
        Value::Chars(b) | Value::Text(b) => b.hash(state),
        Value::Vector(v) => {
            for x in v {
                x.to_bits().hash(state);
            }
        }
    }
}

fn hash_key(values: &[Value]) -> u64 {
    let mut hasher = rustc_hash::FxHasher::default();
    for v in values {
        hash_value(v, &mut hasher);
    }
    hasher.finish()
}

/// Build-then-probe equi-join. The build phase consumes the left side into
/// owned tuples bucketed by the hash of their join key; the probe phase
/// walks right tuples and emits matches one by one across `next` calls.
pub struct HashJoinOperator {
    /// Join key expressions, one pair per equality conjunct.
    left_exprs: Vec<Expr>,
    right_exprs: Vec<Expr>,
    left: BoxedOperator,
    right: BoxedOperator,
    buckets: FxHashMap<u64, Vec<(Vec<Value>, ValueListTuple)>>,
    matches: Vec<ValueListTuple>,
    match_idx: usize,
    right_tuple: Option<ValueListTuple>,
    joined: Option<JoinedTuple>,
}

impl HashJoinOperator {
    pub fn new(
        left_exprs: Vec<Expr>,
        right_exprs: Vec<Expr>,
        left: BoxedOperator,
        right: BoxedOperator,
    ) -> HashJoinOperator {
        HashJoinOperator {
            left_exprs,
            right_exprs,
            left,
            right,
            buckets: FxHashMap::default(),
            matches: Vec::new(),
            match_idx: 0,
            right_tuple: None,
            joined: None,
        }
    }

    fn build_phase(&mut self) -> Result<()> {
        while self.left.next()? {
            let tuple = self
                .left
                .current_tuple()
                .ok_or_else(|| DbError::internal("left child yielded no tuple"))?;
            let owned = ValueListTuple::snapshot(tuple)?;
            let mut key = Vec::with_capacity(self.left_exprs.len());
            for e in &self.left_exprs {
                key.push(e.get_value(&owned)?);
            }
            // A NULL key never equals anything; it can be dropped here.
            if key.iter().any(|v| v.is_null()) {
                continue;
            }
            self.buckets.entry(hash_key(&key)).or_default().push((key, owned));
        }
        log::debug!("hash join build: {} buckets", self.buckets.len());
        Ok(())
    }
}

impl PhysicalOperator for HashJoinOperator {
    fn open(&mut self, trx: &TrxRef) -> Result<()> {
        self.buckets.clear();
        self.matches.clear();
        self.match_idx = 0;
        self.left.open(trx)?;
        self.build_phase()?;
        self.right.open(trx)
    }

    fn next(&mut self) -> Result<bool> {
        loop {
            if self.match_idx < self.matches.len() {
                let left = self.matches[self.match_idx].clone();
                self.match_idx += 1;
                self.joined =
                    Some(JoinedTuple::new(left, self.right_tuple.clone().unwrap()));
                return Ok(true);
            }

            if !self.right.next()? {
                return Ok(false);
            }
            let tuple = self
                .right
                .current_tuple()
                .ok_or_else(|| DbError::internal("right child yielded no tuple"))?;
            let owned = ValueListTuple::snapshot(tuple)?;
            let mut key = Vec::with_capacity(self.right_exprs.len());
            for e in &self.right_exprs {
                key.push(e.get_value(&owned)?);
            }
            if key.iter().any(|v| v.is_null()) {
                continue;
            }
            let Some(bucket) = self.buckets.get(&hash_key(&key)) else { continue };
            // Re-check real equality among bucket members (hash collisions).
            let valid: Vec<ValueListTuple> = bucket
                .iter()
                .filter(|(lk, _)| {
                    lk.iter()
                        .zip(key.iter())
                        .all(|(a, b)| a.compare(b) == Some(Ordering::Equal))
                })
                .map(|(_, t)| t.clone())
                .collect();
            if valid.is_empty() {
                continue;
            }
            self.matches = valid;
            self.match_idx = 0;
            self.right_tuple = Some(owned);
        }
    }

    fn current_tuple(&self) -> Option<&dyn Tuple> {
        self.joined.as_ref().map(|t| t as &dyn Tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.buckets.clear();
        self.matches.clear();
        self.match_idx = 0;
        self.right_tuple = None;
        self.joined = None;
        self.left.close()?;
        self.right.close()
    }

    fn name(&self) -> &'static str {
        "HASH_JOIN"
    }

    fn param(&self) -> String {
        self.left_exprs
            .iter()
            .zip(self.right_exprs.iter())
            .map(|(l, r)| format!("{}={}", l.name(), r.name()))
            .collect::<Vec<_>>()
            .join(" and ")
    }

    fn children(&self) -> Vec<&dyn PhysicalOperator> {
        vec![self.left.as_ref(), self.right.as_ref()]
    }
}

/// Decompose a join condition into equality pairs with one side per child,
/// or `None` when the condition is not a pure equi-join. Returns the pairs
/// oriented (left-side expr, right-side expr).
pub fn equi_join_pairs(
    condition: &Expr,
    left_tables: &std::collections::BTreeSet<String>,
    right_tables: &std::collections::BTreeSet<String>,
) -> Option<(Vec<Expr>, Vec<Expr>)> {
    let conjuncts: Vec<&Expr> = match condition {
        Expr::Conjunction { conj: expr::ConjType::And, children } => children.iter().collect(),
        other => vec![other],
    };
    let mut lefts = Vec::new();
    let mut rights = Vec::new();
    for c in conjuncts {
        let Expr::Comparison { comp: expr::CompOp::EqualTo, left, right } = c else {
            return None;
        };
        let lt = left.involved_tables();
        let rt = right.involved_tables();
        let fits = |t: &std::collections::BTreeSet<String>,
                    side: &std::collections::BTreeSet<String>| {
            !t.is_empty() && t.iter().all(|x| side.contains(x))
        };
        if fits(&lt, left_tables) && fits(&rt, right_tables) {
            lefts.push((**left).clone());
            rights.push((**right).clone());
        } else if fits(&lt, right_tables) && fits(&rt, left_tables) {
            lefts.push((**right).clone());
            rights.push((**left).clone());
        } else {
            return None;
        }
    }
    Some((lefts, rights))
}

//! Logical rewrites. The only rule today is predicate pushdown: conjuncts
//! of a Predicate node move into the deepest scan or join that covers the
//! tables they mention; a Predicate left with no conjuncts disappears.

use crate::expr::{ConjType, Expr};
use crate::plan::{LogicalNode, LogicalOperator};
use crate::rc::Result;
use std::collections::BTreeSet;

/// Rewrite the tree bottom-up; returns whether anything changed.
pub fn rewrite(op: &mut LogicalOperator) -> Result<bool> {
    let mut changed = false;
    for child in &mut op.children {
        changed |= rewrite(child)?;
    }

    if !matches!(op.node, LogicalNode::Predicate { .. }) {
        return Ok(changed);
    }

    let predicates = match &mut op.node {
        LogicalNode::Predicate { predicates } => std::mem::take(predicates),
        _ => unreachable!(),
    };

    let mut remaining = Vec::new();
    for pred in predicates {
        let tables = pred.involved_tables();
        // Constant conditions stay where they are.
        let pushed = !tables.is_empty()
            && !op.children.is_empty()
            && try_push_down(&mut op.children[0], &pred, &tables);
        if pushed {
            log::debug!("pushed down predicate {}", pred.name());
            changed = true;
        } else {
            remaining.push(pred);
        }
    }

    if remaining.is_empty() && op.children.len() == 1 {
        // Every conjunct moved: splice the Predicate node out.
        let child = op.children.pop().unwrap();
        *op = child;
        changed = true;
    } else {
        match &mut op.node {
            LogicalNode::Predicate { predicates } => *predicates = remaining,
            _ => unreachable!(),
        }
    }
    Ok(changed)
}

fn is_subset(tables: &BTreeSet<String>, of: &BTreeSet<String>) -> bool {
    tables.iter().all(|t| of.contains(t))
}

/// Push one conjunct as deep as its table set allows. Joins try their
/// children before claiming the condition themselves.
fn try_push_down(op: &mut LogicalOperator, pred: &Expr, tables: &BTreeSet<String>) -> bool {
    match &op.node {
        LogicalNode::TableGet { table, .. } => {
            if !is_subset(tables, &BTreeSet::from([table.name()])) {
                return false;
            }
            if let LogicalNode::TableGet { predicates, .. } = &mut op.node {
                predicates.push(pred.clone());
            }
            true
        }
        LogicalNode::Join { .. } => {
            for child in &mut op.children {
                if is_subset(tables, &child.involved_tables()) && try_push_down(child, pred, tables)
                {
                    return true;
                }
            }
            if !is_subset(tables, &op.involved_tables()) {
                return false;
            }
            if let LogicalNode::Join { condition } = &mut op.node {
                *condition = Some(match condition.take() {
                    None => pred.clone(),
                    Some(Expr::Conjunction { conj: ConjType::And, mut children }) => {
                        children.push(pred.clone());
                        Expr::Conjunction { conj: ConjType::And, children }
                    }
                    Some(existing) => Expr::Conjunction {
                        conj: ConjType::And,
                        children: vec![existing, pred.clone()],
                    },
                });
            }
            true
        }
        LogicalNode::Predicate { .. } => {
            // A lower Predicate forwards the push to its own child.
            if op.children.is_empty() {
                return false;
            }
            try_push_down(&mut op.children[0], pred, tables)
        }
        _ => false,
    }
}

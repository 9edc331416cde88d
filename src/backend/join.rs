//! Scan and join stages.
//!
//! Rows flowing through the pipeline are [`ScopeRow`]s: one slot per bound
//! alias, `None` where an outer join found nothing.

use crate::backend::eval::{Evaluator, Scope};
use crate::backend::memory::{table, Table};
use crate::compiler::{ColumnRef, ExecutablePlan, JoinKind, JoinSpec, TableRef, TieBreak};
use crate::expression::{ExpressionError, ExpressionResult};
use crate::value::Value;
use anyhow::Result;
use std::cmp::Ordering;
use std::collections::HashMap;

pub(crate) type ScopeRow = Vec<Option<Vec<Value>>>;

/// Alias -> (slot, column names) for every table bound by a plan
#[derive(Debug, Default)]
pub(crate) struct ScopeLayout {
    slots: HashMap<String, (usize, Vec<String>)>,
}

impl ScopeLayout {
    pub fn for_plan(plan: &ExecutablePlan, tables: &HashMap<String, Table>) -> Result<Self> {
        let mut layout = Self::default();
        layout.bind(&plan.base.alias, table(tables, &plan.base.table)?);
        for join in &plan.joins {
            for step in &join.steps {
                layout.bind(&step.alias, table(tables, &step.table)?);
            }
        }
        Ok(layout)
    }

    fn bind(&mut self, alias: &str, table: &Table) {
        let slot = self.slots.len();
        self.slots
            .insert(alias.to_string(), (slot, table.column_names()));
    }

    pub fn width(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, alias: &str) -> ExpressionResult<usize> {
        self.slots
            .get(alias)
            .map(|(slot, _)| *slot)
            .ok_or_else(|| ExpressionError::EvaluationError {
                message: format!("alias {} is not bound", alias),
            })
    }

    fn resolve(&self, col: &ColumnRef) -> ExpressionResult<(usize, usize)> {
        let unbound = || ExpressionError::UnboundColumn {
            alias: col.alias.clone(),
            column: col.column.clone(),
        };
        let (slot, columns) = self.slots.get(&col.alias).ok_or_else(unbound)?;
        let idx = columns
            .iter()
            .position(|c| c == &col.column)
            .ok_or_else(unbound)?;
        Ok((*slot, idx))
    }

    /// Value of `col` in `row`; NULL when the alias was outer-joined away
    pub fn value(&self, row: &ScopeRow, col: &ColumnRef) -> ExpressionResult<Value> {
        let (slot, idx) = self.resolve(col)?;
        Ok(row
            .get(slot)
            .and_then(|r| r.as_ref())
            .and_then(|r| r.get(idx))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// One scope row per stored row of the base table
pub(crate) fn scan(
    base: &TableRef,
    layout: &ScopeLayout,
    tables: &HashMap<String, Table>,
) -> Result<Vec<ScopeRow>> {
    let slot = layout.slot(&base.alias)?;
    Ok(table(tables, &base.table)?
        .rows
        .iter()
        .map(|stored| {
            let mut row: ScopeRow = vec![None; layout.width()];
            row[slot] = Some(stored.clone());
            row
        })
        .collect())
}

/// Extend every row through `join`
pub(crate) fn apply(
    rows: Vec<ScopeRow>,
    join: &JoinSpec,
    layout: &ScopeLayout,
    tables: &HashMap<String, Table>,
    evaluator: &Evaluator<'_>,
) -> Result<Vec<ScopeRow>> {
    let mut output = Vec::with_capacity(rows.len());
    for row in rows {
        let mut matches = vec![row.clone()];
        for step in &join.steps {
            let target = table(tables, &step.table)?;
            let right = target.column_index(&step.right_column)?;
            let slot = layout.slot(&step.alias)?;
            let mut next = Vec::new();
            for partial in matches {
                let left = layout.value(&partial, &step.left)?;
                if left.is_null() {
                    continue;
                }
                for stored in target.rows.iter().filter(|r| r[right].sql_eq(&left)) {
                    let mut extended = partial.clone();
                    extended[slot] = Some(stored.clone());
                    next.push(extended);
                }
            }
            matches = next;
        }

        if let Some(restriction) = &join.restriction {
            let mut kept = Vec::with_capacity(matches.len());
            for candidate in matches {
                if evaluator.is_true(restriction, &Scope::Row(&candidate))? {
                    kept.push(candidate);
                }
            }
            matches = kept;
        }

        if let Some(single) = &join.single_match {
            matches = pick_one(matches, &single.key, single.tie_break, layout)?;
        }

        if matches.is_empty() {
            match join.kind {
                JoinKind::Inner => {}
                JoinKind::LeftOuter => output.push(row),
            }
        } else {
            output.extend(matches);
        }
    }
    Ok(output)
}

fn pick_one(
    matches: Vec<ScopeRow>,
    key: &ColumnRef,
    tie_break: TieBreak,
    layout: &ScopeLayout,
) -> Result<Vec<ScopeRow>> {
    let wanted = match tie_break {
        TieBreak::LowestKey => Ordering::Less,
        TieBreak::HighestKey => Ordering::Greater,
    };
    let mut best: Option<(Value, ScopeRow)> = None;
    for candidate in matches {
        let value = layout.value(&candidate, key)?;
        let replace = match &best {
            None => true,
            Some((current, _)) => value.compare(current) == Some(wanted),
        };
        if replace {
            best = Some((value, candidate));
        }
    }
    Ok(best.into_iter().map(|(_, row)| row).collect())
}

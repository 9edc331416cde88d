//! Storage collaborator interface.
//!
//! The query layer hands fully compiled plans to a [`StorageBackend`] and
//! reads results back through a [`Cursor`]. [`MemoryStore`] is the bundled
//! in-memory implementation; its pipeline stages live in the submodules.

use crate::compiler::{ExecutablePlan, PointLookup, UpdatePlan};
use crate::value::Value;
use anyhow::Result;

pub mod aggregate;
pub mod eval;
pub mod join;
pub mod memory;
pub mod sort;

pub use memory::{MemoryStore, TableColumn};

/// Forward-only stream of result tuples
pub trait Cursor: Send {
    /// Get the next row. Returns None when the result is exhausted.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>>;
}

/// Executes compiled plans. Implementations must be shareable across threads.
pub trait StorageBackend: Send + Sync {
    /// Run a read plan; tuples follow `plan.columns` position by position
    fn execute(&self, plan: &ExecutablePlan) -> Result<Box<dyn Cursor>>;

    /// Run an update plan and return the number of matched rows
    fn execute_update(&self, plan: &UpdatePlan) -> Result<usize>;

    /// Fetch one column of one row by key, None when no row matches
    fn fetch_value(&self, lookup: &PointLookup) -> Result<Option<Value>>;
}

/// Cursor over rows that were fully computed up front
pub struct VecCursor {
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl VecCursor {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

impl Cursor for VecCursor {
    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(self.rows.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_cursor_drains_in_order() -> Result<()> {
        let mut cursor = VecCursor::new(vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]);
        assert_eq!(cursor.next_row()?, Some(vec![Value::Int32(1)]));
        assert_eq!(cursor.next_row()?, Some(vec![Value::Int32(2)]));
        assert_eq!(cursor.next_row()?, None);
        assert_eq!(cursor.next_row()?, None);
        Ok(())
    }
}

//! Lazy record stream over a storage cursor.

use crate::backend::{Cursor, StorageBackend};
use crate::compiler::{CompiledQuery, ExecutablePlan};
use crate::error::{QueryError, QueryResult};
use crate::materialize::layout::RowLayout;
use crate::materialize::record::Record;
use anyhow::anyhow;
use std::sync::Arc;

enum RowsState {
    /// Compiled but not yet sent to storage
    Pending(ExecutablePlan),
    Open(Box<dyn Cursor>),
    Done,
}

/// Iterator of records. The plan is executed on the first call to `next`.
pub struct Rows {
    layout: Arc<RowLayout>,
    storage: Arc<dyn StorageBackend>,
    state: RowsState,
}

impl Rows {
    pub(crate) fn new(compiled: CompiledQuery, storage: Arc<dyn StorageBackend>) -> Self {
        let layout = Arc::new(RowLayout::new(&compiled));
        Self {
            layout,
            storage,
            state: RowsState::Pending(compiled.plan),
        }
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    fn advance(&mut self) -> QueryResult<Option<Record>> {
        loop {
            match std::mem::replace(&mut self.state, RowsState::Done) {
                RowsState::Pending(plan) => {
                    self.state = RowsState::Open(self.storage.execute(&plan)?);
                }
                RowsState::Open(mut cursor) => {
                    let Some(values) = cursor.next_row()? else {
                        return Ok(None);
                    };
                    if values.len() != self.layout.width() {
                        return Err(QueryError::Storage(anyhow!(
                            "storage returned {} values for a {} column plan",
                            values.len(),
                            self.layout.width()
                        )));
                    }
                    self.state = RowsState::Open(cursor);
                    return Ok(Some(Record::new(
                        self.layout.clone(),
                        values,
                        self.storage.clone(),
                    )));
                }
                RowsState::Done => return Ok(None),
            }
        }
    }
}

impl Iterator for Rows {
    type Item = QueryResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.advance().transpose()
    }
}

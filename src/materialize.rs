//! Materialization of storage tuples into records.

pub mod layout;
pub mod record;
pub mod rows;

pub use layout::{LayoutColumn, RowLayout};
pub use record::{Record, RelatedRecord};
pub use rows::Rows;

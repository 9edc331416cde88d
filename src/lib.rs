pub mod backend;
pub mod compiler;
pub mod config;
pub mod demo;
pub mod engine;
pub mod error;
pub mod expression;
pub mod materialize;
pub mod query;
pub mod schema;
pub mod value;

pub use backend::{MemoryStore, StorageBackend};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{QueryError, QueryResult};
pub use expression::{func, Expression, Lookup, F, Q};
pub use materialize::{Record, RelatedRecord};
pub use query::Query;
pub use schema::{EntityDef, FieldDef, Schema};
pub use value::{DataType, Value};

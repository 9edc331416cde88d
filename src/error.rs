//! Errors surfaced by query building, compilation and materialization.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Cannot resolve keyword '{keyword}' into field. Choices are: {}", .choices.join(", "))]
    UnresolvableField {
        keyword: String,
        choices: Vec<String>,
    },

    #[error("{entity} has no field named '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("The annotation '{0}' conflicts with a field on the model")]
    AnnotationConflict(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("{0} matching query does not exist")]
    DoesNotExist(String),

    #[error("get() returned more than one {entity} -- it returned {count}")]
    MultipleObjectsReturned { entity: String, count: usize },

    #[error("Failed to serialize plan: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Errors raised by the storage collaborator, passed through untouched
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

//! Engine entry point tying a schema to a storage backend.

use crate::backend::StorageBackend;
use crate::config::EngineConfig;
use crate::error::{QueryError, QueryResult};
use crate::query::Query;
use crate::schema::Schema;
use log::info;
use std::sync::Arc;

/// Everything a query needs besides its own state
pub struct EngineContext {
    pub schema: Schema,
    pub storage: Arc<dyn StorageBackend>,
    pub config: EngineConfig,
}

#[derive(Clone)]
pub struct Engine {
    context: Arc<EngineContext>,
}

impl Engine {
    pub fn new(schema: Schema, storage: Arc<dyn StorageBackend>) -> Self {
        Self::with_config(schema, storage, EngineConfig::default())
    }

    pub fn with_config(
        schema: Schema,
        storage: Arc<dyn StorageBackend>,
        config: EngineConfig,
    ) -> Self {
        info!(
            "engine ready with {} entities, tie break {:?}",
            schema.entities().count(),
            config.conditional_tie_break
        );
        Self {
            context: Arc::new(EngineContext {
                schema,
                storage,
                config,
            }),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.context.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.context.config
    }

    /// Start a query over every row of `entity`
    pub fn query(&self, entity: &str) -> QueryResult<Query> {
        let def = self
            .context
            .schema
            .entity(entity)
            .cloned()
            .ok_or_else(|| QueryError::UnknownEntity(entity.to_string()))?;
        Ok(Query::new(self.context.clone(), def))
    }
}

//! Schema graph: entities, their fields and the relations between them.
//!
//! Entities are declared with [`EntityDef`] and assembled by [`SchemaBuilder`],
//! which derives the reverse side of every foreign key, many-to-many and
//! inheritance link so that paths can be walked in both directions.

pub mod entity;
pub mod relation;

pub use entity::{EntityDef, FieldDef};
pub use relation::{Cardinality, RelationDef, RelationKind};

use crate::error::{QueryError, QueryResult};
use crate::value::DataType;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Immutable, validated set of entities
#[derive(Debug, Clone)]
pub struct Schema {
    entities: Vec<Arc<EntityDef>>,
    index: HashMap<String, usize>,
}

/// Through-table layout of a many-to-many relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThroughTable {
    pub table: String,
    pub columns: Vec<String>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDef>> {
        self.index.get(name).map(|&idx| &self.entities[idx])
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDef>> {
        self.entities.iter()
    }

    pub fn parent_of(&self, entity: &EntityDef) -> Option<&Arc<EntityDef>> {
        entity.parent().and_then(|name| self.entity(name))
    }

    /// Finds a field on `entity` or one of its ancestors. The returned chain
    /// starts at `entity` and ends at the entity that declares the field.
    pub fn field_chain(
        &self,
        entity: &Arc<EntityDef>,
        name: &str,
    ) -> Option<(Vec<Arc<EntityDef>>, FieldDef)> {
        let mut chain = vec![entity.clone()];
        let mut current = entity.clone();
        loop {
            if let Some(field) = current.local_field(name) {
                return Some((chain, field.clone()));
            }
            current = self.parent_of(&current)?.clone();
            chain.push(current.clone());
        }
    }

    /// Finds a relation on `entity` or one of its ancestors, see [`Schema::field_chain`]
    pub fn relation_chain(
        &self,
        entity: &Arc<EntityDef>,
        name: &str,
    ) -> Option<(Vec<Arc<EntityDef>>, RelationDef)> {
        let mut chain = vec![entity.clone()];
        let mut current = entity.clone();
        loop {
            if let Some(relation) = current.local_relation(name) {
                return Some((chain, relation.clone()));
            }
            current = self.parent_of(&current)?.clone();
            chain.push(current.clone());
        }
    }

    /// All storage-backed fields of an entity, ancestors first
    pub fn concrete_fields(&self, entity: &EntityDef) -> Vec<FieldDef> {
        let mut fields = match self.parent_of(entity) {
            Some(parent) => self.concrete_fields(parent),
            None => Vec::new(),
        };
        fields.extend(entity.fields().iter().cloned());
        fields
    }

    /// Names usable as the first segment of a path on `entity`
    pub fn choices(&self, entity: &EntityDef) -> Vec<String> {
        let mut names = BTreeSet::new();
        let mut current = Some(entity);
        while let Some(def) = current {
            names.extend(def.fields().iter().map(|f| f.name.clone()));
            names.extend(def.relations().iter().map(|r| r.name.clone()));
            current = self.parent_of(def).map(|p| p.as_ref());
        }
        names.insert("pk".to_string());
        names.into_iter().collect()
    }

    /// Tables backing many-to-many relations, each listed once
    pub fn through_tables(&self) -> Vec<ThroughTable> {
        let mut seen = BTreeSet::new();
        let mut tables = Vec::new();
        for entity in &self.entities {
            for relation in entity.relations() {
                if let RelationKind::ManyToMany {
                    through,
                    source_column,
                    target_column,
                } = &relation.kind
                {
                    if seen.insert(through.clone()) {
                        tables.push(ThroughTable {
                            table: through.clone(),
                            columns: vec![
                                "id".to_string(),
                                source_column.clone(),
                                target_column.clone(),
                            ],
                        });
                    }
                }
            }
        }
        tables
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDef>,
}

impl SchemaBuilder {
    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> QueryResult<Schema> {
        let mut defs = self.entities;
        let mut index = HashMap::new();
        for (idx, def) in defs.iter().enumerate() {
            if index.insert(def.name.clone(), idx).is_some() {
                return Err(invalid(format!("entity {} declared twice", def.name)));
            }
        }

        // Inheritance: the child's primary key doubles as the pointer to its parent
        for idx in 0..defs.len() {
            let Some(parent) = defs[idx].parent.clone() else {
                continue;
            };
            let parent_idx = *index.get(&parent).ok_or_else(|| {
                invalid(format!("{} inherits unknown entity {}", defs[idx].name, parent))
            })?;
            if defs[idx].pk().is_some() {
                return Err(invalid(format!(
                    "{} inherits {} and cannot declare its own primary key",
                    defs[idx].name, parent
                )));
            }
            let key_type = root_key_type(&defs, &index, &defs[idx].name)?;
            let column = format!("{}_ptr_id", parent.to_lowercase());
            let child_name = defs[idx].name.clone();

            let child = &mut defs[idx];
            child.fields.insert(0, FieldDef::new(column.clone(), key_type).primary_key());
            child.relations.push(RelationDef::new(
                parent.to_lowercase(),
                parent.clone(),
                RelationKind::ParentLink {
                    column: column.clone(),
                },
            ));

            add_derived(
                &mut defs[parent_idx],
                RelationDef::new(
                    child_name.to_lowercase(),
                    child_name,
                    RelationKind::ChildLink { column },
                ),
            )?;
        }

        for def in &defs {
            let keys = def.fields.iter().filter(|f| f.primary_key).count();
            if keys != 1 {
                return Err(invalid(format!(
                    "{} must have exactly one primary key, found {}",
                    def.name, keys
                )));
            }
        }

        // Foreign keys take the type of the target key; every declared relation gets its reverse
        let mut derived = Vec::new();
        for idx in 0..defs.len() {
            let declared: Vec<RelationDef> = defs[idx]
                .relations
                .iter()
                .filter(|r| {
                    matches!(
                        r.kind,
                        RelationKind::ForeignKey { .. } | RelationKind::ManyToMany { .. }
                    )
                })
                .cloned()
                .collect();
            for relation in declared {
                let target_idx = *index.get(&relation.target).ok_or_else(|| {
                    invalid(format!(
                        "{}.{} points at unknown entity {}",
                        defs[idx].name, relation.name, relation.target
                    ))
                })?;
                let source_name = defs[idx].name.clone();
                let reverse_kind = match &relation.kind {
                    RelationKind::ForeignKey { column } => {
                        let key_type = root_key_type(&defs, &index, &relation.target)?;
                        let fields = &mut defs[idx].fields;
                        if let Some(field) = fields.iter_mut().find(|f| &f.column == column) {
                            field.data_type = key_type;
                        }
                        RelationKind::Reverse {
                            column: column.clone(),
                        }
                    }
                    RelationKind::ManyToMany {
                        through,
                        source_column,
                        target_column,
                    } => RelationKind::ManyToMany {
                        through: through.clone(),
                        source_column: target_column.clone(),
                        target_column: source_column.clone(),
                    },
                    _ => continue,
                };
                derived.push((
                    target_idx,
                    RelationDef::new(source_name.to_lowercase(), source_name, reverse_kind),
                ));
            }
        }
        for (target_idx, relation) in derived {
            add_derived(&mut defs[target_idx], relation)?;
        }

        Ok(Schema {
            entities: defs.into_iter().map(Arc::new).collect(),
            index,
        })
    }
}

fn invalid(message: String) -> QueryError {
    QueryError::InvalidSchema(message)
}

fn add_derived(entity: &mut EntityDef, relation: RelationDef) -> QueryResult<()> {
    if entity.has_name(&relation.name) {
        return Err(invalid(format!(
            "reverse relation {} clashes with a member of {}",
            relation.name, entity.name
        )));
    }
    entity.relations.push(relation);
    Ok(())
}

/// Primary key type at the root of an inheritance chain
fn root_key_type(
    defs: &[EntityDef],
    index: &HashMap<String, usize>,
    name: &str,
) -> QueryResult<DataType> {
    let mut current = name;
    for _ in 0..=defs.len() {
        let def = &defs[*index
            .get(current)
            .ok_or_else(|| invalid(format!("unknown entity {}", current)))?];
        match def.parent.as_deref() {
            Some(parent) => current = parent,
            None => {
                return def
                    .pk()
                    .map(|f| f.data_type)
                    .ok_or_else(|| invalid(format!("{} has no primary key", def.name)))
            }
        }
    }
    Err(invalid(format!("inheritance cycle through {}", name)))
}

//! Entity and field definitions.

use crate::schema::relation::{RelationDef, RelationKind};
use crate::value::DataType;

/// A storage-backed field of an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub column: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            data_type,
            nullable: false,
            primary_key: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }
}

/// A named entity stored in one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) relations: Vec<RelationDef>,
    pub(crate) parent: Option<String>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
            relations: Vec::new(),
            parent: None,
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a to-one relation stored in the `<name>_id` column
    pub fn foreign_key(self, name: &str, target: &str) -> Self {
        self.add_foreign_key(name, target, false)
    }

    pub fn nullable_foreign_key(self, name: &str, target: &str) -> Self {
        self.add_foreign_key(name, target, true)
    }

    fn add_foreign_key(mut self, name: &str, target: &str, nullable: bool) -> Self {
        let column = format!("{}_id", name);
        // The key type is fixed up from the target's primary key when the schema is built
        let mut field = FieldDef::new(column.clone(), DataType::Int32);
        field.nullable = nullable;
        self.fields.push(field);
        self.relations.push(RelationDef::new(
            name,
            target,
            RelationKind::ForeignKey { column },
        ));
        self
    }

    /// Adds a many-to-many relation stored in the `through` table
    pub fn many_to_many(mut self, name: &str, target: &str, through: &str) -> Self {
        let kind = RelationKind::ManyToMany {
            through: through.to_string(),
            source_column: format!("{}_id", self.name.to_lowercase()),
            target_column: format!("{}_id", target.to_lowercase()),
        };
        self.relations.push(RelationDef::new(name, target, kind));
        self
    }

    /// Declares multi-table inheritance from `parent`
    pub fn inherits(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn pk(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Resolves a field declared on this entity. Accepts `pk` and the names of
    /// foreign-key relations, which map to their key column.
    pub fn local_field(&self, name: &str) -> Option<&FieldDef> {
        if name == "pk" {
            return self.pk();
        }
        if let Some(field) = self.fields.iter().find(|f| f.name == name) {
            return Some(field);
        }
        let column = self
            .relations
            .iter()
            .find(|r| r.name == name)
            .and_then(|r| r.local_column())?;
        self.fields.iter().find(|f| f.column == column)
    }

    pub fn local_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Name of the link relation pointing at the parent entity
    pub fn parent_link(&self) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.is_parent_link())
    }

    pub(crate) fn has_name(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name) || self.relations.iter().any(|r| r.name == name)
    }
}

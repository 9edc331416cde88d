//! Relations between entities.

use serde::Serialize;

/// How many target rows a relation can reach from one source row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// Physical shape of a relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// Local `column` holds the target's primary key
    ForeignKey { column: String },
    /// Target's `column` holds this entity's primary key
    Reverse { column: String },
    /// Rows of `through` pair this entity's key (`source_column`) with the
    /// target's key (`target_column`)
    ManyToMany {
        through: String,
        source_column: String,
        target_column: String,
    },
    /// Child-to-parent link of multi-table inheritance; `column` is the child's primary key
    ParentLink { column: String },
    /// Parent-to-child link; `column` is the child's pointer column
    ChildLink { column: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub target: String,
    pub kind: RelationKind,
}

impl RelationDef {
    pub fn new(name: impl Into<String>, target: impl Into<String>, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            kind,
        }
    }

    pub fn cardinality(&self) -> Cardinality {
        match self.kind {
            RelationKind::ForeignKey { .. }
            | RelationKind::ParentLink { .. }
            | RelationKind::ChildLink { .. } => Cardinality::ToOne,
            RelationKind::Reverse { .. } | RelationKind::ManyToMany { .. } => {
                Cardinality::ToMany
            }
        }
    }

    pub fn is_parent_link(&self) -> bool {
        matches!(self.kind, RelationKind::ParentLink { .. })
    }

    /// The local column a foreign key stores, if this is one
    pub fn local_column(&self) -> Option<&str> {
        match &self.kind {
            RelationKind::ForeignKey { column } | RelationKind::ParentLink { column } => {
                Some(column)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality() {
        let fk = RelationDef::new(
            "publisher",
            "Publisher",
            RelationKind::ForeignKey {
                column: "publisher_id".to_string(),
            },
        );
        assert_eq!(fk.cardinality(), Cardinality::ToOne);
        assert_eq!(fk.local_column(), Some("publisher_id"));

        let m2m = RelationDef::new(
            "authors",
            "Author",
            RelationKind::ManyToMany {
                through: "book_authors".to_string(),
                source_column: "book_id".to_string(),
                target_column: "author_id".to_string(),
            },
        );
        assert_eq!(m2m.cardinality(), Cardinality::ToMany);
        assert_eq!(m2m.local_column(), None);
    }
}

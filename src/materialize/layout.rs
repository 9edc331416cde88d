//! Mapping from output positions to record attributes.

use crate::compiler::{CompiledQuery, DeferredField, Zone};
use std::collections::HashMap;
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutColumn {
    pub name: String,
    pub zone: Zone,
}

/// Shared by every record produced from one compiled query
#[derive(Debug, Clone)]
pub struct RowLayout {
    entity: String,
    columns: Vec<LayoutColumn>,
    deferred: Vec<DeferredField>,
    key_index: Option<usize>,
    /// Attribute name -> position. Annotations win over extra columns,
    /// which win over fields.
    lookup: HashMap<String, usize>,
    related: Vec<(String, Range<usize>)>,
}

impl RowLayout {
    pub fn new(compiled: &CompiledQuery) -> Self {
        let columns: Vec<LayoutColumn> = compiled
            .plan
            .columns
            .iter()
            .map(|c| LayoutColumn {
                name: c.name.clone(),
                zone: c.zone.clone(),
            })
            .collect();

        let mut lookup = HashMap::new();
        for zone in [Zone::Base, Zone::Extra, Zone::Annotation] {
            for (idx, column) in columns.iter().enumerate().filter(|(_, c)| c.zone == zone) {
                lookup.insert(column.name.clone(), idx);
            }
        }
        if let Some(idx) = compiled.key_index {
            lookup.entry("pk".to_string()).or_insert(idx);
        }

        let mut related: Vec<(String, Range<usize>)> = Vec::new();
        for (idx, column) in columns.iter().enumerate() {
            if let Zone::Related { path } = &column.zone {
                match related.last_mut() {
                    Some((last, range)) if last == path => range.end = idx + 1,
                    _ => related.push((path.clone(), idx..idx + 1)),
                }
            }
        }

        Self {
            entity: compiled.plan.entity.clone(),
            columns,
            deferred: compiled.deferred.clone(),
            key_index: compiled.key_index,
            lookup,
            related,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[LayoutColumn] {
        &self.columns
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    pub fn key_index(&self) -> Option<usize> {
        self.key_index
    }

    pub fn deferred(&self, name: &str) -> Option<&DeferredField> {
        self.deferred.iter().find(|d| d.name == name)
    }

    pub fn deferred_fields(&self) -> &[DeferredField] {
        &self.deferred
    }

    /// Output positions of a selected related entity
    pub fn related(&self, path: &str) -> Option<Range<usize>> {
        self.related
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, range)| range.clone())
    }
}

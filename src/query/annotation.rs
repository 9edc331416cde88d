//! Named annotations attached to a query.

use crate::expression::{Expression, Q};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub name: String,
    pub expression: Arc<Expression>,
}

/// Ordered annotation registry of one query snapshot.
///
/// Expressions are stored with references to earlier annotations already
/// expanded, so an entry never depends on what is defined after it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationSet {
    entries: Vec<Annotation>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define or redefine `name`. A redefinition keeps its original position.
    pub fn add(&mut self, name: &str, expression: &Expression) {
        let expression = Arc::new(self.inline(expression));
        match self.entries.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.expression = expression,
            None => self.entries.push(Annotation {
                name: name.to_string(),
                expression,
            }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Expression> {
        self.entries
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.expression.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|a| a.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|a| a.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_aggregate(&self) -> bool {
        self.entries.iter().any(|a| a.expression.contains_aggregate())
    }

    /// Expand references to annotations of this set inside `expression`
    pub fn inline(&self, expression: &Expression) -> Expression {
        expression.inline_fields(&|name| self.get(name))
    }

    /// Expand annotation references on both sides of a predicate
    pub fn inline_q(&self, q: &Q) -> Q {
        q.inline(&|name| self.get(name))
    }
}

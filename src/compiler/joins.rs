//! Join allocation. Every relation hop is joined once per path; hops with a
//! restriction are shared only between identical restrictions.

use crate::compiler::plan::{
    ColumnRef, JoinKind, JoinSpec, JoinStep, PlanExpr, SingleMatch, TieBreak,
};
use crate::error::{QueryError, QueryResult};
use crate::schema::{Cardinality, EntityDef, RelationDef, RelationKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Alias standing in for the target table while a restriction is compiled
pub(crate) const TARGET_PLACEHOLDER: &str = "__target__";

/// Placeholder for the target (`depth` 0) or one of its ancestors
pub(crate) fn placeholder(depth: usize) -> String {
    match depth {
        0 => TARGET_PLACEHOLDER.to_string(),
        _ => format!("{}{}", TARGET_PLACEHOLDER, depth),
    }
}

/// Result of joining one hop
#[derive(Debug, Clone)]
pub(crate) struct JoinedHop {
    pub alias: String,
    /// Aliases of the target's ancestors joined along with it, nearest first
    pub ancestors: Vec<String>,
    /// Whether rows of this hop may be NULL-extended
    pub nullable: bool,
}

#[derive(Debug)]
pub(crate) struct JoinBuilder {
    base_alias: String,
    joins: Vec<JoinSpec>,
    index: HashMap<String, usize>,
    next_alias: usize,
}

impl JoinBuilder {
    pub fn new(base_alias: &str) -> Self {
        Self {
            base_alias: base_alias.to_string(),
            joins: Vec::new(),
            index: HashMap::new(),
            next_alias: 1,
        }
    }

    pub fn base_alias(&self) -> &str {
        &self.base_alias
    }

    /// Join `relation` from `source_alias`, reusing the join already made for `key`
    pub fn join(
        &mut self,
        key: &str,
        source: &EntityDef,
        source_alias: &str,
        relation: &RelationDef,
        target: &EntityDef,
        nullable: bool,
    ) -> QueryResult<JoinedHop> {
        if let Some(&idx) = self.index.get(key) {
            return Ok(self.hop(idx));
        }
        let steps = self.steps(source, source_alias, relation, target)?;
        let spec = JoinSpec {
            path: key.to_string(),
            cardinality: relation.cardinality(),
            kind: join_kind(relation, nullable),
            target_step: steps.len().saturating_sub(1),
            steps,
            restriction: None,
            single_match: None,
        };
        Ok(self.push(key.to_string(), spec))
    }

    /// Join `relation` keeping only target rows matching `restriction`, which
    /// refers to the target through [`placeholder`]. `lineage` starts at the
    /// target and lists the ancestors the restriction or the caller reads;
    /// their tables are joined inside the same hop.
    #[allow(clippy::too_many_arguments)]
    pub fn join_restricted(
        &mut self,
        key: &str,
        source: &EntityDef,
        source_alias: &str,
        relation: &RelationDef,
        target: &EntityDef,
        lineage: &[Arc<EntityDef>],
        restriction: PlanExpr,
        tie_break: TieBreak,
    ) -> QueryResult<JoinedHop> {
        let depth = lineage.len().saturating_sub(1);
        let restricted_key = format!("{}[{:?}]^{}", key, restriction, depth);
        if let Some(&idx) = self.index.get(&restricted_key) {
            return Ok(self.hop(idx));
        }
        let target_pk = pk_column(target)?;
        let mut steps = self.steps(source, source_alias, relation, target)?;
        let target_step = steps.len().saturating_sub(1);
        let target_alias = steps
            .last()
            .map(|s| s.alias.clone())
            .unwrap_or_default();

        let mut restriction = restriction.rename_alias(TARGET_PLACEHOLDER, &target_alias);
        let mut child_alias = target_alias.clone();
        for (level, pair) in lineage.windows(2).enumerate() {
            let (child, parent) = (&pair[0], &pair[1]);
            let link = child.parent_link().ok_or_else(|| {
                QueryError::InvalidSchema(format!("{} has no parent link", child.name))
            })?;
            let parent_steps = self.steps(child, &child_alias, link, parent)?;
            if let Some(step) = parent_steps.last() {
                child_alias = step.alias.clone();
            }
            restriction = restriction.rename_alias(&placeholder(level + 1), &child_alias);
            steps.extend(parent_steps);
        }

        let single_match = (relation.cardinality() == Cardinality::ToMany).then(|| SingleMatch {
            key: ColumnRef::new(target_alias.clone(), target_pk),
            tie_break,
        });
        let spec = JoinSpec {
            path: key.to_string(),
            cardinality: relation.cardinality(),
            kind: JoinKind::LeftOuter,
            steps,
            target_step,
            restriction: Some(restriction),
            single_match,
        };
        Ok(self.push(restricted_key, spec))
    }

    pub fn into_joins(self) -> Vec<JoinSpec> {
        self.joins
    }

    fn hop(&self, idx: usize) -> JoinedHop {
        let spec = &self.joins[idx];
        JoinedHop {
            alias: spec.target_alias().to_string(),
            ancestors: spec
                .steps
                .iter()
                .skip(spec.target_step + 1)
                .map(|s| s.alias.clone())
                .collect(),
            nullable: spec.kind == JoinKind::LeftOuter,
        }
    }

    fn push(&mut self, key: String, spec: JoinSpec) -> JoinedHop {
        self.joins.push(spec);
        let idx = self.joins.len() - 1;
        self.index.insert(key, idx);
        self.hop(idx)
    }

    fn alias(&mut self) -> String {
        let alias = format!("T{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    fn steps(
        &mut self,
        source: &EntityDef,
        source_alias: &str,
        relation: &RelationDef,
        target: &EntityDef,
    ) -> QueryResult<Vec<JoinStep>> {
        let steps = match &relation.kind {
            RelationKind::ForeignKey { column } | RelationKind::ParentLink { column } => {
                vec![JoinStep {
                    table: target.table.clone(),
                    alias: self.alias(),
                    left: ColumnRef::new(source_alias, column.as_str()),
                    right_column: pk_column(target)?,
                }]
            }
            RelationKind::Reverse { column } | RelationKind::ChildLink { column } => {
                vec![JoinStep {
                    table: target.table.clone(),
                    alias: self.alias(),
                    left: ColumnRef::new(source_alias, pk_column(source)?),
                    right_column: column.clone(),
                }]
            }
            RelationKind::ManyToMany {
                through,
                source_column,
                target_column,
            } => {
                let link = self.alias();
                let target_alias = self.alias();
                vec![
                    JoinStep {
                        table: through.clone(),
                        alias: link.clone(),
                        left: ColumnRef::new(source_alias, pk_column(source)?),
                        right_column: source_column.clone(),
                    },
                    JoinStep {
                        table: target.table.clone(),
                        alias: target_alias,
                        left: ColumnRef::new(link, target_column.as_str()),
                        right_column: pk_column(target)?,
                    },
                ]
            }
        };
        Ok(steps)
    }
}

/// Parent links are inner joins unless an outer join precedes them
fn join_kind(relation: &RelationDef, nullable: bool) -> JoinKind {
    if relation.is_parent_link() && !nullable {
        JoinKind::Inner
    } else {
        JoinKind::LeftOuter
    }
}

pub(crate) fn pk_column(entity: &EntityDef) -> QueryResult<String> {
    entity
        .pk()
        .map(|f| f.column.clone())
        .ok_or_else(|| QueryError::InvalidSchema(format!("{} has no primary key", entity.name)))
}

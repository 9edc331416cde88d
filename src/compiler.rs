//! Query compilation: validation, field resolution, join allocation and plan
//! assembly. Nothing here touches storage.

pub mod compile;
pub mod joins;
pub mod plan;
pub mod resolve;

pub use compile::{CompiledQuery, DeferredField};
pub use plan::{
    ColumnRef, ExecutablePlan, JoinKind, JoinSpec, JoinStep, OrderTerm, PlanColumn, PlanExpr,
    PointLookup, SingleMatch, TableRef, TieBreak, UpdatePlan, UpdateTarget, Zone,
};

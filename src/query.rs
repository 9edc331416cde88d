//! Query construction.
//!
//! A [`Query`] is an immutable value: annotations, filters, deferrals and
//! orderings accumulate across builder calls, each call producing a fresh
//! snapshot. Compilation and execution happen only in terminal operations.

pub mod annotation;
pub mod builder;

pub use annotation::{Annotation, AnnotationSet};
pub use builder::Query;

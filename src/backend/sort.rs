//! Ordering stage.
//!
//! Ascending terms put NULLs last and descending terms put them first. The
//! sort is stable, so rows with equal keys keep their input order.

use crate::value::Value;
use std::cmp::Ordering;

/// Sort direction of one term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn from_descending(descending: bool) -> Self {
        if descending {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }
}

/// Compare two values according to sort order
fn compare_values(v1: &Value, v2: &Value, order: SortOrder) -> Ordering {
    let ascending = match (v1, v2) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        // Values that cannot be ordered against each other tie
        (v1, v2) => v1.compare(v2).unwrap_or(Ordering::Equal),
    };
    match order {
        SortOrder::Asc => ascending,
        SortOrder::Desc => ascending.reverse(),
    }
}

pub(crate) fn compare_keys(a: &[Value], b: &[Value], orders: &[SortOrder]) -> Ordering {
    a.iter()
        .zip(b)
        .zip(orders)
        .map(|((x, y), order)| compare_values(x, y, *order))
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Stable sort of `items` by their precomputed keys
pub(crate) fn sort_by_keys<T>(items: Vec<(Vec<Value>, T)>, orders: &[SortOrder]) -> Vec<T> {
    let mut items = items;
    items.sort_by(|(a, _), (b, _)| compare_keys(a, b, orders));
    items.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nulls_last_ascending_first_descending() {
        let items = vec![
            (vec![Value::Int32(2)], "b"),
            (vec![Value::Null], "null"),
            (vec![Value::Int32(1)], "a"),
        ];
        assert_eq!(
            sort_by_keys(items.clone(), &[SortOrder::Asc]),
            vec!["a", "b", "null"]
        );
        assert_eq!(
            sort_by_keys(items, &[SortOrder::Desc]),
            vec!["null", "b", "a"]
        );
    }

    #[test]
    fn test_multi_key_and_stability() {
        let items = vec![
            (vec![Value::from("x"), Value::Int32(1)], 1),
            (vec![Value::from("y"), Value::Int32(1)], 2),
            (vec![Value::from("x"), Value::Int32(2)], 3),
            (vec![Value::from("x"), Value::Int32(1)], 4),
        ];
        assert_eq!(
            sort_by_keys(items, &[SortOrder::Asc, SortOrder::Desc]),
            vec![3, 1, 4, 2]
        );
    }
}

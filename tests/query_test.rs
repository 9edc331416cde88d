use anyhow::Result;
use rust_decimal::Decimal;
use vibeorm::demo;
use vibeorm::{Engine, EngineConfig, Expression, QueryError, Record, Value, F, Q};

fn engine() -> Result<Engine> {
    Ok(demo::bookstore(EngineConfig::default())?.0)
}

fn dec(value: i64, scale: u32) -> Value {
    Value::Decimal(Decimal::new(value, scale))
}

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

fn keys(records: &[Record]) -> Vec<Value> {
    records.iter().filter_map(|r| r.pk().cloned()).collect()
}

fn ints(values: &[i32]) -> Vec<Value> {
    values.iter().map(|v| Value::Int32(*v)).collect()
}

#[test]
fn test_builder_calls_leave_receiver_untouched() -> Result<()> {
    let engine = engine()?;
    let base = engine.query("Book")?;
    let first = base
        .annotate("x", Expression::value(1))
        .annotate("y", Expression::value(2));
    let second = first.annotate("x", Expression::value(3));
    let _filtered = base.filter(Q::new("pk", 1));

    assert_eq!(base.count()?, 6);
    assert!(base.annotation_names().is_empty());
    assert_eq!(first.annotation("x"), Some(&Expression::value(1)));
    assert_eq!(second.annotation_names(), vec!["x", "y"]);

    let record = second.get(Q::new("pk", 1))?;
    assert_eq!(record.get("x")?, Value::Int32(3));
    let record = first.get(Q::new("pk", 1))?;
    assert_eq!(record.get("x")?, Value::Int32(1));
    Ok(())
}

#[test]
fn test_annotation_may_reference_earlier_annotation() -> Result<()> {
    let engine = engine()?;
    let book = engine
        .query("Book")?
        .annotate("double_pages", F("pages") * 2)
        .annotate("quad_pages", F("double_pages") * 2)
        .get(Q::new("pk", 3))?;
    assert_eq!(book.get("quad_pages")?, Value::Int32(1200));

    let err = engine
        .query("Book")?
        .annotate("quad_pages", F("double_pages") * 2)
        .all()
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::UnresolvableField { ref keyword, .. } if keyword == "double_pages"
    ));
    Ok(())
}

#[test]
fn test_annotation_conflicts_with_field() -> Result<()> {
    let engine = engine()?;
    let err = engine
        .query("Book")?
        .annotate("rating", F("price"))
        .all()
        .unwrap_err();
    assert!(matches!(err, QueryError::AnnotationConflict(ref name) if name == "rating"));

    let config = EngineConfig {
        allow_annotation_shadowing: true,
        ..EngineConfig::default()
    };
    let (engine, _) = demo::bookstore(config)?;
    let book = engine
        .query("Book")?
        .annotate("rating", F("price"))
        .get(Q::new("pk", 1))?;
    assert_eq!(book.get("rating")?, dec(3000, 2));
    Ok(())
}

#[test]
fn test_unknown_entity_and_attribute() -> Result<()> {
    let engine = engine()?;
    assert!(matches!(
        engine.query("Nope").unwrap_err(),
        QueryError::UnknownEntity(_)
    ));
    let book = engine.query("Book")?.get(Q::new("pk", 1))?;
    assert!(matches!(
        book.get("nope").unwrap_err(),
        QueryError::UnknownField { .. }
    ));
    Ok(())
}

#[test]
fn test_get_outcomes() -> Result<()> {
    let engine = engine()?;
    let books = engine.query("Book")?;
    let err = books.get(Q::new("pk", 99)).unwrap_err();
    assert_eq!(err.to_string(), "Book matching query does not exist");

    let err = books.get(Q::new("rating", 4)).unwrap_err();
    assert!(matches!(
        err,
        QueryError::MultipleObjectsReturned { count: 3, .. }
    ));
    Ok(())
}

#[test]
fn test_lookups() -> Result<()> {
    let engine = engine()?;
    let books = engine.query("Book")?.order_by(&["pk"]);

    let found = books.filter(Q::new("name__icontains", "django")).all()?;
    assert_eq!(keys(&found), ints(&[1, 2, 3, 4]));

    let found = books.filter(Q::list("pages__range", [300, 450])).all()?;
    assert_eq!(keys(&found), ints(&[1, 3, 4]));

    let found = books.filter(Q::new("isbn__startswith", "159")).all()?;
    assert_eq!(keys(&found), ints(&[1, 3]));

    let found = books.filter(Q::list("pk__in", [1, 2, 9])).all()?;
    assert_eq!(keys(&found), ints(&[1, 2]));

    let found = books
        .filter(Q::new("pages__gt", 1000) | Q::new("pages__lt", 310))
        .all()?;
    assert_eq!(keys(&found), ints(&[3, 5]));

    let found = books.exclude(Q::new("rating__lt", 4)).all()?;
    assert_eq!(keys(&found), ints(&[1, 3, 4, 5, 6]));

    let found = books.filter(Q::new("publisher__name", "Apress")).all()?;
    assert_eq!(keys(&found), ints(&[1, 3]));

    let mottos = engine
        .query("Company")?
        .filter(Q::new("motto__isnull", true))
        .count()?;
    assert_eq!(mottos, 3);
    Ok(())
}

#[test]
fn test_pattern_lookups_match_wildcards_literally() -> Result<()> {
    let engine = engine()?;
    let books = engine.query("Book")?;
    assert_eq!(books.filter(Q::new("name__contains", "_")).count()?, 0);
    assert_eq!(books.filter(Q::new("name__contains", "%")).count()?, 0);
    assert_eq!(books.filter(Q::new("name__icontains", "\\")).count()?, 0);
    assert_eq!(books.filter(Q::new("name__startswith", "Pr_ctical")).count()?, 0);
    assert_eq!(books.filter(Q::new("name__startswith", "Practical")).count()?, 1);

    // Field operands are escaped per row; a NULL operand matches nothing
    let found = engine
        .query("Company")?
        .filter(Q::new("name__icontains", F("ticker_name")))
        .order_by(&["name"])
        .all()?;
    let names = found
        .iter()
        .map(|r| r.get("name"))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(names, vec![text("Apple"), text("Google")]);
    Ok(())
}

#[test]
fn test_ordering_places_nulls() -> Result<()> {
    let engine = engine()?;
    let companies = engine.query("Company")?;

    let ascending = companies.order_by(&["motto", "name"]).all()?;
    assert_eq!(ascending[0].get("name")?, text("Google"));
    assert_eq!(ascending[1].get("name")?, text("Apple"));

    let descending = companies.order_by(&["-motto", "name"]).all()?;
    assert_eq!(descending[0].get("name")?, text("Apple"));
    assert_eq!(descending[3].get("name")?, text("Google"));

    let err = companies.order_by(&["?"]).all().unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));
    Ok(())
}

#[test]
fn test_first_count_exists() -> Result<()> {
    let engine = engine()?;
    let books = engine.query("Book")?;

    let first = books.first()?.expect("books exist");
    assert_eq!(first.pk(), Some(&Value::Int32(1)));
    let best = books.order_by(&["-rating"]).first()?.expect("books exist");
    assert_eq!(best.get("isbn")?, text("155860191"));

    // Each author link produces its own row
    let fanned = books.annotate("author_age", F("authors__age")).count()?;
    assert_eq!(fanned, 10);

    assert!(books.filter(Q::new("isbn", "159059725")).exists()?);
    assert!(!books.filter(Q::new("isbn", "000000000")).exists()?);
    assert!(books.filter(Q::new("pk", 99)).first()?.is_none());
    Ok(())
}

#[test]
fn test_slicing() -> Result<()> {
    let engine = engine()?;
    let books = engine.query("Book")?.order_by(&["pk"]);
    assert_eq!(keys(&books.offset(2).limit(2).all()?), ints(&[3, 4]));
    assert_eq!(keys(&books.limit(3).offset(1).all()?), ints(&[2, 3]));
    assert_eq!(keys(&books.offset(5).all()?), ints(&[6]));

    let err = books
        .limit(2)
        .aggregate(&[("n", Expression::count_all())])
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));

    let err = books
        .offset(1)
        .filter(Q::new("rating", 4))
        .all()
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));
    let err = books.limit(3).get(Q::new("pk", 2)).unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));
    // Filtering first and slicing afterwards is fine
    let sliced = books.filter(Q::new("rating", 4)).offset(1).all()?;
    assert_eq!(keys(&sliced), ints(&[4, 5]));
    Ok(())
}

#[test]
fn test_values_and_distinct() -> Result<()> {
    let engine = engine()?;
    let publishers = engine
        .query("Book")?
        .values(&["publisher"])
        .distinct()
        .count()?;
    assert_eq!(publishers, 4);

    let grouped = engine
        .query("Book")?
        .values(&["publisher"])
        .annotate("books", Expression::count_all())
        .order_by(&["publisher"])
        .all()?;
    let counts = grouped
        .iter()
        .map(|r| -> Result<_, QueryError> { Ok((r.get("publisher")?, r.get("books")?)) })
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(
        counts,
        vec![
            (Value::Int32(1), Value::Int64(2)),
            (Value::Int32(2), Value::Int64(1)),
            (Value::Int32(3), Value::Int64(2)),
            (Value::Int32(4), Value::Int64(1)),
        ]
    );
    Ok(())
}

#[test]
fn test_only_defers_the_rest() -> Result<()> {
    let (engine, store) = demo::bookstore(EngineConfig::default())?;
    let book = engine
        .query("Book")?
        .only(&["name"])
        .get(Q::new("pk", 3))?;
    let names: Vec<String> = book.to_pairs().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["id", "name"]);
    assert!(book.is_deferred("isbn"));

    let before = store.statement_count();
    assert_eq!(book.get("isbn")?, text("159059996"));
    assert_eq!(book.get("isbn")?, text("159059996"));
    assert_eq!(store.statement_count() - before, 1);

    let err = engine.query("Book")?.defer(&["pk"]).all().unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));
    Ok(())
}

#[test]
fn test_aggregates() -> Result<()> {
    let engine = engine()?;
    let result = engine.query("Book")?.aggregate(&[
        ("max_rating", Expression::max(F("rating"))),
        ("min_pages", Expression::min(F("pages"))),
        ("avg_price", Expression::avg(F("price"))),
        ("publishers", Expression::count_distinct(F("publisher"))),
    ])?;
    assert_eq!(result["max_rating"], dec(5, 0));
    assert_eq!(result["min_pages"], Value::Int32(300));
    assert_eq!(result["avg_price"], dec(45045, 3));
    assert_eq!(result["publishers"], Value::Int64(4));

    let err = engine
        .query("Book")?
        .aggregate(&[("pages", F("pages"))])
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));
    Ok(())
}

#[test]
fn test_select_related_rejects_to_many() -> Result<()> {
    let engine = engine()?;
    let err = engine
        .query("Book")?
        .select_related("authors")
        .all()
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));
    Ok(())
}

#[test]
fn test_update_inherited_field_targets_parent() -> Result<()> {
    let engine = engine()?;
    let updated = engine
        .query("DepartmentStore")?
        .filter(Q::new("chain", "Westfield"))
        .update(&[("name", Expression::value("A&R"))])?;
    assert_eq!(updated, 1);

    let store = engine.query("Store")?.get(Q::new("pk", 4))?;
    assert_eq!(store.get("name")?, text("A&R"));
    let others = engine
        .query("Store")?
        .filter(Q::new("name", "A&R"))
        .count()?;
    assert_eq!(others, 1);
    Ok(())
}

#[test]
fn test_explain_serializes_plan() -> Result<()> {
    let engine = engine()?;
    let plan = engine
        .query("Book")?
        .select_related("publisher")
        .annotate("num_awards", F("publisher__num_awards"))
        .explain()?;
    let json: serde_json::Value = serde_json::from_str(&plan)?;
    assert_eq!(json["entity"], "Book");
    assert_eq!(json["base"]["table"], "books");
    // publisher is joined once for both the annotation and select_related
    assert_eq!(json["joins"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[test]
fn test_storage_errors_pass_through() -> Result<()> {
    let engine = engine()?;
    let err = engine
        .query("Book")?
        .annotate("sound", vibeorm::func("SOUNDEX", vec![F("name")]))
        .all()
        .unwrap_err();
    assert!(matches!(err, QueryError::Storage(_)));
    Ok(())
}

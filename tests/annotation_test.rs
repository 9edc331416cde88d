use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;
use vibeorm::compiler::TieBreak;
use vibeorm::demo::{self, day};
use vibeorm::{func, Engine, EngineConfig, Expression, MemoryStore, QueryError, Value, F, Q};

fn bookstore() -> Result<(Engine, Arc<MemoryStore>)> {
    demo::bookstore(EngineConfig::default())
}

fn dec(value: i64, scale: u32) -> Value {
    Value::Decimal(Decimal::new(value, scale))
}

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

#[test]
fn test_basic_annotation() -> Result<()> {
    let (engine, _) = bookstore()?;
    let books = engine
        .query("Book")?
        .annotate("is_book", Expression::value(1))
        .all()?;
    assert_eq!(books.len(), 6);
    for book in &books {
        assert_eq!(book.get("is_book")?, Value::Int32(1));
    }
    Ok(())
}

#[test]
fn test_basic_f_annotation() -> Result<()> {
    let (engine, _) = bookstore()?;
    for book in engine
        .query("Book")?
        .annotate("another_rating", F("rating"))
        .all()?
    {
        assert_eq!(book.get("another_rating")?, book.get("rating")?);
    }
    Ok(())
}

#[test]
fn test_joined_annotation() -> Result<()> {
    let (engine, _) = bookstore()?;
    let books = engine
        .query("Book")?
        .select_related("publisher")
        .annotate("num_awards", F("publisher__num_awards"))
        .all()?;
    assert_eq!(books.len(), 6);
    for book in &books {
        let publisher = book.related("publisher")?.expect("every book has a publisher");
        assert_eq!(Some(&book.get("num_awards")?), publisher.get("num_awards"));
    }
    Ok(())
}

#[test]
fn test_annotate_with_aggregation() -> Result<()> {
    let (engine, _) = bookstore()?;
    let books = engine
        .query("Book")?
        .annotate("is_book", Expression::value(1))
        .annotate("rating_count", Expression::count(F("rating")))
        .all()?;
    assert_eq!(books.len(), 6);
    for book in &books {
        assert_eq!(book.get("is_book")?, Value::Int32(1));
        assert_eq!(book.get("rating_count")?, Value::Int64(1));
    }
    Ok(())
}

#[test]
fn test_aggregate_over_annotation() -> Result<()> {
    let (engine, _) = bookstore()?;
    let annotated = engine
        .query("Author")?
        .annotate("other_age", F("age"))
        .aggregate(&[("otherage_sum", Expression::sum(F("other_age")))])?;
    let plain = engine
        .query("Author")?
        .aggregate(&[("age_sum", Expression::sum(F("age")))])?;
    assert_eq!(annotated["otherage_sum"], plain["age_sum"]);
    assert_eq!(plain["age_sum"], Value::Int64(337));
    Ok(())
}

#[test]
fn test_aggregate_of_empty_set_is_null() -> Result<()> {
    let (engine, _) = bookstore()?;
    let result = engine
        .query("Author")?
        .filter(Q::new("age__gt", 100))
        .aggregate(&[
            ("age_sum", Expression::sum(F("age"))),
            ("authors", Expression::count_all()),
        ])?;
    assert_eq!(result["age_sum"], Value::Null);
    assert_eq!(result["authors"], Value::Int64(0));
    Ok(())
}

#[test]
fn test_filter_annotation() -> Result<()> {
    let (engine, _) = bookstore()?;
    let books = engine
        .query("Book")?
        .annotate("is_book", Expression::value(1))
        .filter(Q::new("is_book", 1))
        .all()?;
    assert_eq!(books.len(), 6);
    Ok(())
}

#[test]
fn test_filter_annotation_with_f() -> Result<()> {
    let (engine, _) = bookstore()?;
    let books = engine
        .query("Book")?
        .annotate("other_rating", F("rating"))
        .filter(Q::new("other_rating", dec(40, 1)))
        .order_by(&["pk"])
        .all()?;
    let keys: Vec<Value> = books.iter().filter_map(|b| b.pk().cloned()).collect();
    assert_eq!(keys, vec![Value::Int32(3), Value::Int32(4), Value::Int32(5)]);
    for book in &books {
        assert_eq!(book.get("other_rating")?, dec(4, 0));
    }
    Ok(())
}

#[test]
fn test_filter_annotation_with_double_f() -> Result<()> {
    let (engine, _) = bookstore()?;
    let books = engine
        .query("Book")?
        .annotate("other_rating", F("rating"))
        .filter(Q::new("other_rating", F("rating")))
        .all()?;
    assert_eq!(books.len(), 6);
    for book in &books {
        assert_eq!(book.get("other_rating")?, book.get("rating")?);
    }
    Ok(())
}

#[test]
fn test_filter_agg_with_double_f() -> Result<()> {
    let (engine, _) = bookstore()?;
    let query = engine
        .query("Book")?
        .annotate("sum_rating", Expression::sum(F("rating")))
        .filter(Q::new("sum_rating", F("sum_rating")));
    let plan = query.compile()?.plan;
    assert!(plan.filter.is_none());
    assert!(plan.having.is_some());

    let books = query.all()?;
    assert_eq!(books.len(), 6);
    for book in &books {
        assert_eq!(book.get("sum_rating")?, book.get("rating")?);
    }
    Ok(())
}

#[test]
fn test_filter_wrong_annotation() -> Result<()> {
    let (engine, _) = bookstore()?;
    let err = engine
        .query("Book")?
        .annotate("sum_rating", Expression::sum(F("rating")))
        .filter(Q::new("sum_rating", F("nope")))
        .all()
        .unwrap_err();
    assert!(matches!(err, QueryError::UnresolvableField { .. }));
    assert!(err.to_string().starts_with("Cannot resolve keyword 'nope' into field"));
    Ok(())
}

#[test]
fn test_update_with_annotation() -> Result<()> {
    let (engine, _) = bookstore()?;
    let before = engine.query("Book")?.get(Q::new("pk", 2))?.get("rating")?;
    let updated = engine
        .query("Book")?
        .annotate("other_rating", F("rating") - 1)
        .update(&[("rating", F("other_rating"))])?;
    assert_eq!(updated, 6);

    let after = engine.query("Book")?.get(Q::new("pk", 2))?.get("rating")?;
    assert_eq!(before, dec(30, 1));
    assert_eq!(after, dec(20, 1));
    Ok(())
}

#[test]
fn test_update_rejects_joined_values() -> Result<()> {
    let (engine, _) = bookstore()?;
    let err = engine
        .query("Book")?
        .update(&[("pages", F("publisher__num_awards"))])
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));

    let err = engine
        .query("Book")?
        .update(&[("nope", Expression::value(1))])
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownField { .. }));
    Ok(())
}

#[test]
fn test_failed_update_leaves_rows_untouched() -> Result<()> {
    let (engine, store) = bookstore()?;
    let before = store.rows("companies")?;

    // Apple has a ticker but the next companies do not, and name is required
    let err = engine
        .query("Company")?
        .update(&[("name", F("ticker_name"))])
        .unwrap_err();
    assert!(matches!(err, QueryError::Storage(_)));

    assert_eq!(store.rows("companies")?, before);
    let apple = engine.query("Company")?.get(Q::new("ticker_name", "APPL"))?;
    assert_eq!(apple.get("name")?, text("Apple"));
    Ok(())
}

#[test]
fn test_annotation_with_m2m() -> Result<()> {
    let (engine, _) = bookstore()?;
    let books = engine
        .query("Book")?
        .annotate("author_age", F("authors__age"))
        .filter(Q::new("pk", 1))
        .order_by(&["author_age"])
        .all()?;
    assert_eq!(books.len(), 2);
    assert_eq!(books[0].get("author_age")?, Value::Int32(34));
    assert_eq!(books[1].get("author_age")?, Value::Int32(35));
    Ok(())
}

#[test]
fn test_annotation_reverse_m2m() -> Result<()> {
    let (engine, _) = bookstore()?;
    let names = engine
        .query("Book")?
        .annotate("store_name", F("store__name"))
        .filter(Q::new("name", "Practical Django Projects"))
        .order_by(&["store_name"])
        .iter()?
        .map(|book| book.and_then(|b| b.get("store_name")))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(
        names,
        vec![
            text("Amazon.com"),
            text("Books.com"),
            text("Mamma and Pappa's Books")
        ]
    );
    Ok(())
}

#[test]
fn test_values_annotation() -> Result<()> {
    let (engine, _) = bookstore()?;
    let query = engine
        .query("Book")?
        .values(&["rating"])
        .annotate("other_rating", F("rating") - 1);

    let book = query.get(Q::new("pk", 1))?;
    assert_eq!(book.get("rating")?, dec(45, 1));
    assert_eq!(book.get("other_rating")?, dec(35, 1));
    let names: Vec<String> = book.to_pairs().into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, vec!["rating", "other_rating"]);

    let book = query.get(Q::new("other_rating", 4))?;
    assert_eq!(book.get("other_rating")?, dec(4, 0));

    let book = query
        .annotate("other_isbn", F("isbn"))
        .get(Q::new("other_rating", 4))?;
    assert_eq!(book.get("other_rating")?, dec(4, 0));
    assert_eq!(book.get("other_isbn")?, text("155860191"));
    Ok(())
}

#[test]
fn test_defer_annotation() -> Result<()> {
    let (engine, store) = bookstore()?;
    let query = engine
        .query("Book")?
        .defer(&["rating"])
        .annotate("other_rating", F("rating") - 1);

    let before = store.statement_count();
    let book = query.get(Q::new("other_rating", 4))?;
    assert!(book.is_deferred("rating"));
    assert_eq!(book.get("rating")?, dec(5, 0));
    assert_eq!(book.get("other_rating")?, dec(4, 0));
    // A second read comes from the record itself
    assert_eq!(book.get("rating")?, dec(5, 0));
    assert_eq!(store.statement_count() - before, 2);

    let err = query
        .defer(&["other_rating"])
        .get(Q::new("other_rating", 4))
        .unwrap_err();
    assert_eq!(err.to_string(), "Book has no field named 'other_rating'");
    Ok(())
}

#[test]
fn test_mti_annotations() -> Result<()> {
    let (engine, _) = bookstore()?;
    let stores = engine
        .query("DepartmentStore")?
        .annotate("other_name", F("name"))
        .annotate("other_chain", F("chain"))
        .annotate("is_open", Expression::value(true))
        .annotate("book_isbn", F("books__isbn"))
        .select_related("store")
        .order_by(&["book_isbn"])
        .filter(Q::new("chain", "Westfield"))
        .all()?;

    let rows = stores
        .iter()
        .map(|d| -> Result<_, QueryError> {
            Ok((
                d.get("other_name")?,
                d.get("other_chain")?,
                d.get("is_open")?,
                d.get("book_isbn")?,
            ))
        })
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(
        rows,
        vec![
            (
                text("Angus & Robinson"),
                text("Westfield"),
                Value::Boolean(true),
                text("155860191")
            ),
            (
                text("Angus & Robinson"),
                text("Westfield"),
                Value::Boolean(true),
                text("159059725")
            ),
        ]
    );
    let parent = stores[0].related("store")?.expect("parent row is loaded");
    assert_eq!(parent.get("name"), Some(&text("Angus & Robinson")));
    assert_eq!(stores[0].pk(), Some(&Value::Int32(4)));
    Ok(())
}

#[test]
fn test_conditional_value_through_inherited_field() -> Result<()> {
    let (engine, _) = bookstore()?;
    let stores = engine
        .query("Store")?
        .annotate(
            "westfield_name",
            Expression::conditional(
                "departmentstore__name",
                Q::new("departmentstore__chain", "Westfield"),
            ),
        )
        .annotate(
            "angus_chain",
            Expression::conditional(
                "departmentstore__chain",
                Q::new("departmentstore__name__startswith", "Angus"),
            ),
        )
        .order_by(&["pk"])
        .all()?;
    assert_eq!(stores.len(), 4);
    for store in &stores[..3] {
        assert_eq!(store.get("westfield_name")?, Value::Null);
        assert_eq!(store.get("angus_chain")?, Value::Null);
    }
    assert_eq!(stores[3].get("westfield_name")?, text("Angus & Robinson"));
    assert_eq!(stores[3].get("angus_chain")?, text("Westfield"));
    Ok(())
}

#[test]
fn test_column_field_ordering() -> Result<()> {
    let (engine, _) = bookstore()?;
    let employees = engine
        .query("Employee")?
        .extra_select("random_value", Expression::value(42))
        .select_related("store")
        .annotate("annotated_value", Expression::value(17))
        .order_by(&["id"])
        .all()?;
    assert_eq!(employees.len(), 2);

    let names: Vec<String> = employees[0].to_pairs().into_iter().map(|(n, _)| n).collect();
    assert_eq!(
        names,
        vec![
            "random_value",
            "id",
            "store_id",
            "first_name",
            "manager",
            "last_name",
            "age",
            "salary",
            "annotated_value"
        ]
    );

    let expected = [
        (1, "Max", true, "Paine", 23, 50_000),
        (2, "Buffy", false, "Summers", 18, 40_000),
    ];
    for (employee, (id, first, manager, last, age, salary)) in employees.iter().zip(expected) {
        assert_eq!(employee.get("id")?, Value::Int32(id));
        assert_eq!(employee.get("first_name")?, text(first));
        assert_eq!(employee.get("manager")?, Value::Boolean(manager));
        assert_eq!(employee.get("random_value")?, Value::Int32(42));
        assert_eq!(employee.get("last_name")?, text(last));
        assert_eq!(employee.get("age")?, Value::Int32(age));
        assert_eq!(employee.get("salary")?, dec(salary, 0));
        let store = employee.related("store")?.expect("employee has a store");
        assert_eq!(store.get("name"), Some(&text("Amazon.com")));
        assert_eq!(employee.get("annotated_value")?, Value::Int32(17));
    }
    Ok(())
}

#[test]
fn test_column_field_ordering_with_deferred() -> Result<()> {
    let (engine, store) = bookstore()?;
    let employees = engine
        .query("Employee")?
        .extra_select("random_value", Expression::value(42))
        .select_related("store")
        .annotate("annotated_value", Expression::value(17))
        .defer(&["age"])
        .order_by(&["id"])
        .all()?;

    let names: Vec<String> = employees[0].to_pairs().into_iter().map(|(n, _)| n).collect();
    assert!(!names.contains(&"age".to_string()));
    assert_eq!(names.last().map(String::as_str), Some("annotated_value"));

    let before = store.statement_count();
    assert_eq!(employees[0].get("age")?, Value::Int32(23));
    assert_eq!(employees[1].get("age")?, Value::Int32(18));
    assert_eq!(store.statement_count() - before, 2);
    assert_eq!(employees[1].get("random_value")?, Value::Int32(42));
    assert_eq!(employees[1].get("annotated_value")?, Value::Int32(17));
    Ok(())
}

#[test]
fn test_column_layout_ignores_builder_order() -> Result<()> {
    let (engine, _) = bookstore()?;
    let employees = engine.query("Employee")?;
    let extra = |q: vibeorm::Query| q.extra_select("random_value", Expression::value(42));
    let related = |q: vibeorm::Query| q.select_related("store");
    let annotate = |q: vibeorm::Query| q.annotate("annotated_value", F("age") + 1);
    let defer = |q: vibeorm::Query| q.defer(&["last_name"]);

    let orders = [
        annotate(related(extra(defer(employees.clone())))),
        extra(defer(related(annotate(employees.clone())))),
        related(annotate(defer(extra(employees.clone())))),
        defer(extra(annotate(related(employees)))),
    ];
    let mut layouts = Vec::new();
    for query in &orders {
        let rows = query.order_by(&["id"]).all()?;
        let layout = rows
            .iter()
            .map(|r| -> Result<_, QueryError> {
                Ok((r.to_pairs(), r.values().to_vec(), r.related("store")?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        layouts.push(layout);
    }

    let names: Vec<String> = layouts[0][0].0.iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(names.first().map(String::as_str), Some("random_value"));
    assert_eq!(names.last().map(String::as_str), Some("annotated_value"));
    assert!(!names.contains(&"last_name".to_string()));
    for layout in &layouts[1..] {
        assert_eq!(layout, &layouts[0]);
    }
    Ok(())
}

#[test]
fn test_custom_functions() -> Result<()> {
    let (engine, _) = bookstore()?;
    let companies = engine
        .query("Company")?
        .annotate(
            "tagline",
            func(
                "COALESCE",
                vec![
                    F("motto"),
                    F("ticker_name"),
                    F("description"),
                    Expression::value("No Tag"),
                ],
            ),
        )
        .annotate("tagline_lower", func("LOWER", vec![F("tagline")]))
        .order_by(&["name"])
        .all()?;

    let expected = [
        ("Apple", "APPL"),
        ("Django Software Foundation", "No Tag"),
        ("Google", "Do No Evil"),
        ("Yahoo", "Internet Company"),
    ];
    assert_eq!(companies.len(), expected.len());
    for (company, (name, tagline)) in companies.iter().zip(expected) {
        assert_eq!(company.get("name")?, text(name));
        assert_eq!(company.get("tagline")?, text(tagline));
        assert_eq!(company.get("tagline_lower")?, text(&tagline.to_lowercase()));
    }
    Ok(())
}

#[test]
fn test_registered_function() -> Result<()> {
    let (engine, store) = bookstore()?;
    store.register_function("initials", |args| match args {
        [Value::String(s)] => Ok(Value::String(
            s.split_whitespace().filter_map(|w| w.chars().next()).collect(),
        )),
        _ => Ok(Value::Null),
    });
    let author = engine
        .query("Author")?
        .annotate("initials", func("initials", vec![F("name")]))
        .get(Q::new("pk", 1))?;
    assert_eq!(author.get("initials")?, text("AH"));
    Ok(())
}

fn best_prices(engine: &Engine, condition: Q) -> Result<Vec<(Value, Value)>> {
    let products = engine
        .query("Product")?
        .annotate(
            "best_price",
            func(
                "LEAST",
                vec![
                    F("price"),
                    Expression::conditional("specialprice__price", condition),
                ],
            ),
        )
        .order_by(&["best_price"])
        .all()?;
    let rows = products
        .iter()
        .map(|p| -> Result<_, QueryError> { Ok((p.get("name")?, p.get("best_price")?)) })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[test]
fn test_sort_products_special_price_for_user() -> Result<()> {
    let (engine, _) = bookstore()?;
    let tom = engine.query("ShopUser")?.get(Q::new("username", "tom"))?;
    let tom = tom.pk().cloned().expect("user key is selected");

    let rows = best_prices(&engine, Q::new("specialprice__user", tom))?;
    assert_eq!(
        rows,
        vec![
            (text("Flowers"), dec(800, 2)),
            (text("Sunflower"), dec(999, 2)),
            (text("Shrub"), dec(3000, 2)),
            (text("Bonsai"), dec(12199, 2)),
        ]
    );
    // The restricted join never multiplies products
    assert_eq!(engine.query("Product")?.count()?, rows.len());
    Ok(())
}

#[test]
fn test_multiple_join_conditions() -> Result<()> {
    let (engine, _) = bookstore()?;
    let now = day(2015, 6, 1)?;
    let condition = Q::new("specialprice__user", 1)
        & Q::new("specialprice__valid_from__lte", now)
        & Q::new("specialprice__valid_until__gte", now);
    let rows = best_prices(&engine, condition)?;
    let names: Vec<Value> = rows.iter().map(|(n, _)| n.clone()).collect();
    assert_eq!(
        names,
        vec![text("Flowers"), text("Sunflower"), text("Shrub"), text("Bonsai")]
    );
    assert_eq!(rows[0].1, dec(800, 2));

    // Outside the validity window no special price applies
    let later = day(2016, 6, 1)?;
    let condition = Q::new("specialprice__user", 1)
        & Q::new("specialprice__valid_from__lte", later)
        & Q::new("specialprice__valid_until__gte", later);
    let rows = best_prices(&engine, condition)?;
    assert_eq!(rows[0], (text("Sunflower"), dec(999, 2)));
    assert_eq!(rows[1], (text("Flowers"), dec(1199, 2)));
    Ok(())
}

#[test]
fn test_conditional_tie_break() -> Result<()> {
    // Both users have a special price for Flowers below 10.00
    let condition = || Q::new("specialprice__price__lt", dec(1000, 2));
    let flowers = |engine: &Engine| -> Result<Value> {
        Ok(engine
            .query("Product")?
            .annotate(
                "special",
                Expression::conditional("specialprice__price", condition()),
            )
            .get(Q::new("name", "Flowers"))?
            .get("special")?)
    };

    let (lowest, _) = bookstore()?;
    assert_eq!(flowers(&lowest)?, dec(800, 2));

    let config = EngineConfig {
        conditional_tie_break: TieBreak::HighestKey,
        ..EngineConfig::default()
    };
    let (highest, _) = demo::bookstore(config)?;
    assert_eq!(flowers(&highest)?, dec(900, 2));
    Ok(())
}

#[test]
fn test_language_data_is_loaded() -> Result<()> {
    let (engine, _) = bookstore()?;
    let articles = engine
        .query("Article")?
        .annotate(
            "text",
            Expression::conditional(
                "articletranslation__text",
                Q::new("articletranslation__lang", "de"),
            ),
        )
        .annotate(
            "text2",
            Expression::conditional(
                "articletranslation__text2",
                Q::new("articletranslation__lang", "de"),
            ),
        )
        .order_by(&["pk"]);

    let compiled = articles.compile()?;
    assert_eq!(compiled.plan.joins.len(), 1);

    let rows = articles
        .all()?
        .iter()
        .map(|a| -> Result<_, QueryError> { Ok((a.get("text")?, a.get("text2")?)) })
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(
        rows,
        vec![
            (text("hallo"), text("zusammen")),
            (text("guten"), text("abend")),
        ]
    );
    Ok(())
}

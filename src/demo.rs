//! Sample bookstore schema and data set.
//!
//! Used by the command line binary and by the integration tests. The data
//! covers plain foreign keys, many-to-many links, multi-table inheritance and
//! the per-user price lists that conditional values are built for.

use crate::backend::MemoryStore;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::QueryResult;
use crate::schema::{EntityDef, FieldDef, Schema};
use crate::value::{DataType, Value};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use log::info;
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn bookstore_schema() -> QueryResult<Schema> {
    Schema::builder()
        .entity(
            EntityDef::new("Author", "authors")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .field(FieldDef::new("name", DataType::Varchar))
                .field(FieldDef::new("age", DataType::Int32)),
        )
        .entity(
            EntityDef::new("Publisher", "publishers")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .field(FieldDef::new("name", DataType::Varchar))
                .field(FieldDef::new("num_awards", DataType::Int32)),
        )
        .entity(
            EntityDef::new("Book", "books")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .field(FieldDef::new("isbn", DataType::Varchar))
                .field(FieldDef::new("name", DataType::Varchar))
                .field(FieldDef::new("pages", DataType::Int32))
                .field(FieldDef::new("rating", DataType::Decimal))
                .field(FieldDef::new("price", DataType::Decimal))
                .many_to_many("authors", "Author", "book_authors")
                .foreign_key("publisher", "Publisher"),
        )
        .entity(
            EntityDef::new("Store", "stores")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .field(FieldDef::new("name", DataType::Varchar))
                .many_to_many("books", "Book", "store_books"),
        )
        .entity(
            EntityDef::new("DepartmentStore", "department_stores")
                .inherits("Store")
                .field(FieldDef::new("chain", DataType::Varchar)),
        )
        .entity(
            EntityDef::new("Employee", "employees")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .foreign_key("store", "Store")
                .field(FieldDef::new("first_name", DataType::Varchar))
                .field(FieldDef::new("manager", DataType::Boolean))
                .field(FieldDef::new("last_name", DataType::Varchar))
                .field(FieldDef::new("age", DataType::Int32))
                .field(FieldDef::new("salary", DataType::Decimal)),
        )
        .entity(
            EntityDef::new("Company", "companies")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .field(FieldDef::new("name", DataType::Varchar))
                .field(FieldDef::new("motto", DataType::Varchar).nullable())
                .field(FieldDef::new("ticker_name", DataType::Varchar).nullable())
                .field(FieldDef::new("description", DataType::Varchar).nullable()),
        )
        .entity(
            EntityDef::new("ShopUser", "shop_users")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .field(FieldDef::new("username", DataType::Varchar)),
        )
        .entity(
            EntityDef::new("Product", "products")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .field(FieldDef::new("name", DataType::Varchar))
                .field(FieldDef::new("price", DataType::Decimal)),
        )
        .entity(
            EntityDef::new("SpecialPrice", "special_prices")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .foreign_key("product", "Product")
                .foreign_key("user", "ShopUser")
                .field(FieldDef::new("price", DataType::Decimal))
                .field(FieldDef::new("valid_from", DataType::Timestamp))
                .field(FieldDef::new("valid_until", DataType::Timestamp)),
        )
        .entity(
            EntityDef::new("Article", "articles")
                .field(FieldDef::new("id", DataType::Int32).primary_key()),
        )
        .entity(
            EntityDef::new("ArticleTranslation", "article_translations")
                .field(FieldDef::new("id", DataType::Int32).primary_key())
                .foreign_key("article", "Article")
                .field(FieldDef::new("lang", DataType::Varchar))
                .field(FieldDef::new("text", DataType::Varchar))
                .field(FieldDef::new("text2", DataType::Varchar)),
        )
        .build()
}

/// Midnight of the given day
pub fn day(year: i32, month: u32, date: u32) -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, date)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .with_context(|| format!("Invalid date {}-{}-{}", year, month, date))
}

fn money(cents: i64) -> Value {
    Value::Decimal(Decimal::new(cents, 2))
}

fn rating(tenths: i64) -> Value {
    Value::Decimal(Decimal::new(tenths, 1))
}

const AUTHORS: [(&str, i32); 9] = [
    ("Adrian Holovaty", 34),
    ("Jacob Kaplan-Moss", 35),
    ("Brad Dayley", 45),
    ("James Bennett", 29),
    ("Jeffrey Forcier", 37),
    ("Paul Bissex", 29),
    ("Wesley J. Chun", 25),
    ("Peter Norvig", 57),
    ("Stuart Russell", 46),
];

const PUBLISHERS: [(&str, i32); 5] = [
    ("Apress", 3),
    ("Sams", 1),
    ("Prentice Hall", 7),
    ("Morgan Kaufmann", 9),
    ("Jonno's House of Books", 0),
];

struct BookRow {
    isbn: &'static str,
    name: &'static str,
    pages: i32,
    rating_tenths: i64,
    price_cents: i64,
    publisher: i32,
    authors: &'static [i32],
}

const BOOKS: [BookRow; 6] = [
    BookRow {
        isbn: "159059725",
        name: "The Definitive Guide to Django: Web Development Done Right",
        pages: 447,
        rating_tenths: 45,
        price_cents: 3000,
        publisher: 1,
        authors: &[1, 2],
    },
    BookRow {
        isbn: "067232959",
        name: "Sams Teach Yourself Django in 24 Hours",
        pages: 528,
        rating_tenths: 30,
        price_cents: 2309,
        publisher: 2,
        authors: &[3],
    },
    BookRow {
        isbn: "159059996",
        name: "Practical Django Projects",
        pages: 300,
        rating_tenths: 40,
        price_cents: 2969,
        publisher: 1,
        authors: &[4],
    },
    BookRow {
        isbn: "013235613",
        name: "Python Web Development with Django",
        pages: 350,
        rating_tenths: 40,
        price_cents: 2969,
        publisher: 3,
        authors: &[5, 6, 7],
    },
    BookRow {
        isbn: "013790395",
        name: "Artificial Intelligence: A Modern Approach",
        pages: 1132,
        rating_tenths: 40,
        price_cents: 8280,
        publisher: 3,
        authors: &[8, 9],
    },
    BookRow {
        isbn: "155860191",
        name: "Paradigms of Artificial Intelligence Programming: Case Studies in Common Lisp",
        pages: 946,
        rating_tenths: 50,
        price_cents: 7500,
        publisher: 4,
        authors: &[8],
    },
];

const STORES: [(&str, &[i32]); 3] = [
    ("Amazon.com", &[1, 2, 3, 4, 5, 6]),
    ("Books.com", &[1, 3, 5, 6]),
    ("Mamma and Pappa's Books", &[3, 4, 6]),
];

/// Fill a store created from [`bookstore_schema`] with the sample rows
pub fn load_bookstore(store: &MemoryStore) -> Result<()> {
    for (name, age) in AUTHORS {
        store.insert("authors", &[("name", name.into()), ("age", age.into())])?;
    }
    for (name, awards) in PUBLISHERS {
        store.insert(
            "publishers",
            &[("name", name.into()), ("num_awards", awards.into())],
        )?;
    }
    for book in &BOOKS {
        let id = store.insert(
            "books",
            &[
                ("isbn", book.isbn.into()),
                ("name", book.name.into()),
                ("pages", book.pages.into()),
                ("rating", rating(book.rating_tenths)),
                ("price", money(book.price_cents)),
                ("publisher_id", book.publisher.into()),
            ],
        )?;
        for author in book.authors {
            store.insert(
                "book_authors",
                &[("book_id", id.clone()), ("author_id", (*author).into())],
            )?;
        }
    }
    for (name, books) in STORES {
        let id = store.insert("stores", &[("name", name.into())])?;
        link_books(store, &id, books)?;
    }

    let angus = store.insert("stores", &[("name", "Angus & Robinson".into())])?;
    store.insert(
        "department_stores",
        &[("store_ptr_id", angus.clone()), ("chain", "Westfield".into())],
    )?;
    link_books(store, &angus, &[1, 6])?;

    let employees: [(&str, bool, &str, i32, i64); 2] = [
        ("Max", true, "Paine", 23, 50_000),
        ("Buffy", false, "Summers", 18, 40_000),
    ];
    for (first_name, manager, last_name, age, salary) in employees {
        store.insert(
            "employees",
            &[
                ("store_id", 1.into()),
                ("first_name", first_name.into()),
                ("manager", manager.into()),
                ("last_name", last_name.into()),
                ("age", age.into()),
                ("salary", Value::Decimal(Decimal::from(salary))),
            ],
        )?;
    }

    let companies: [(&str, Option<&str>, Option<&str>, Option<&str>); 4] = [
        ("Apple", None, Some("APPL"), Some("Beautiful Devices")),
        ("Django Software Foundation", None, None, None),
        ("Google", Some("Do No Evil"), Some("GOOG"), Some("Internet Company")),
        ("Yahoo", None, None, Some("Internet Company")),
    ];
    for (name, motto, ticker, description) in companies {
        let optional = |v: Option<&str>| v.map_or(Value::Null, Value::from);
        store.insert(
            "companies",
            &[
                ("name", name.into()),
                ("motto", optional(motto)),
                ("ticker_name", optional(ticker)),
                ("description", optional(description)),
            ],
        )?;
    }

    load_price_lists(store)?;
    load_translations(store)?;
    info!("bookstore data loaded");
    Ok(())
}

fn link_books(store: &MemoryStore, id: &Value, books: &[i32]) -> Result<()> {
    for book in books {
        store.insert(
            "store_books",
            &[("store_id", id.clone()), ("book_id", (*book).into())],
        )?;
    }
    Ok(())
}

fn load_price_lists(store: &MemoryStore) -> Result<()> {
    let tom = store.insert("shop_users", &[("username", "tom".into())])?;
    let brad = store.insert("shop_users", &[("username", "brad".into())])?;

    let products = [
        ("Sunflower", 999),
        ("Flowers", 1199),
        ("Shrub", 3199),
        ("Bonsai", 12199),
    ];
    let mut ids = Vec::new();
    for (name, cents) in products {
        ids.push(store.insert("products", &[("name", name.into()), ("price", money(cents))])?);
    }

    let valid_from = Value::Timestamp(day(2015, 1, 1)?);
    let valid_until = Value::Timestamp(day(2015, 12, 31)?);
    let special = [(&ids[1], &tom, 800), (&ids[2], &tom, 3000), (&ids[1], &brad, 900)];
    for (product, user, cents) in special {
        store.insert(
            "special_prices",
            &[
                ("product_id", product.clone()),
                ("user_id", user.clone()),
                ("price", money(cents)),
                ("valid_from", valid_from.clone()),
                ("valid_until", valid_until.clone()),
            ],
        )?;
    }
    Ok(())
}

fn load_translations(store: &MemoryStore) -> Result<()> {
    let rows = [
        [("de", "hallo", "zusammen"), ("en", "hello", "all")],
        [("de", "guten", "abend"), ("en", "good", "evening")],
    ];
    for translations in rows {
        let article = store.insert("articles", &[])?;
        for (lang, text, text2) in translations {
            store.insert(
                "article_translations",
                &[
                    ("article_id", article.clone()),
                    ("lang", lang.into()),
                    ("text", text.into()),
                    ("text2", text2.into()),
                ],
            )?;
        }
    }
    Ok(())
}

/// Engine over a freshly loaded bookstore. The store is returned as well so
/// callers can inspect it directly.
pub fn bookstore(config: EngineConfig) -> Result<(Engine, Arc<MemoryStore>)> {
    let schema = bookstore_schema()?;
    let store = Arc::new(MemoryStore::for_schema(&schema)?);
    load_bookstore(&store)?;
    let engine = Engine::with_config(schema, store.clone(), config);
    Ok((engine, store))
}

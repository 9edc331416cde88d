//! VibeORM demo - annotated queries over a sample bookstore

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use rust_decimal::Decimal;
use std::path::PathBuf;
use vibeorm::demo;
use vibeorm::{func, EngineConfig, Expression, Query, Value, F, Q};

/// VibeORM - run annotated queries against the sample bookstore
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print each compiled plan before its rows
    #[arg(short, long)]
    explain: bool,

    /// Username whose special prices are applied to the product list
    #[arg(short, long, default_value = "tom")]
    user: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let (engine, _store) = demo::bookstore(config).context("Failed to load the bookstore")?;

    let books = engine
        .query("Book")?
        .select_related("publisher")
        .annotate("num_awards", F("publisher__num_awards"))
        .annotate("discounted", F("price") * Decimal::new(9, 1))
        .order_by(&["-num_awards", "isbn"]);
    show("Books by publisher awards", &books, args.explain)?;

    let user = engine
        .query("ShopUser")?
        .get(Q::new("username", args.user.as_str()))
        .with_context(|| format!("Unknown user {}", args.user))?;
    let user_id = user.pk().cloned().unwrap_or(Value::Null);
    let products = engine
        .query("Product")?
        .annotate(
            "best_price",
            func(
                "LEAST",
                vec![
                    F("price"),
                    Expression::conditional(
                        "specialprice__price",
                        Q::new("specialprice__user", user_id),
                    ),
                ],
            ),
        )
        .order_by(&["best_price"]);
    show(&format!("Product prices for {}", args.user), &products, args.explain)?;

    Ok(())
}

fn show(title: &str, query: &Query, explain: bool) -> Result<()> {
    println!("== {} ==", title);
    if explain {
        println!("{}", query.explain()?);
    }
    for record in query.iter()? {
        let record = record?;
        let line: Vec<String> = record
            .to_pairs()
            .into_iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        println!("  {}", line.join(", "));
    }
    println!();
    Ok(())
}

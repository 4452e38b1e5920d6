use std::fs;
use std::io::Read;
use std::path::PathBuf;

use clap::Parser;

mod builder;
mod dates;
mod error;
mod ir;
mod normalize;
mod query;
mod sql;
mod xml;

use query::{Query, QueryOptions};

#[derive(Parser)]
#[command(name = "obsquery")]
#[command(about = "Compile a nested-map query (JSON) to a SQL WHERE fragment")]
struct Args {
    /// Query file (JSON object); reads stdin when omitted
    query: Option<PathBuf>,

    /// Top-level keys to omit from the WHERE fragment
    #[arg(short, long)]
    skip: Vec<String>,

    /// Also print full-text relevance expressions
    #[arg(short, long)]
    relevance: bool,

    /// Default result-set cap for queries that carry none
    #[arg(long, default_value = "500")]
    default_count: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let input = match &args.query {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let value: serde_json::Value = serde_json::from_str(&input)?;
    let options = QueryOptions {
        default_result_count: args.default_count,
    };
    let query = Query::from_map_with(&value, options)?;

    let skip: Vec<&str> = args.skip.iter().map(String::as_str).collect();
    match query.sql_with_skips(&skip)? {
        Some(fragment) => println!("{fragment}"),
        None => tracing::info!("query compiles to no constraint"),
    }

    if args.relevance {
        for expression in query.relevance() {
            println!("{expression}");
        }
    }

    Ok(())
}

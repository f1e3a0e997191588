use crate::store_factory::{Backend, DEFAULT_DATABASE, DEFAULT_MONGO_URI, StoreConfig};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Order analytics over a document store: aggregation reports and index usage from explain plans
#[derive(Parser, Debug, Clone)]
#[command(name = "orders-analytics")]
#[command(about = "Aggregation reports over customer orders", long_about = None)]
#[command(version)]
pub struct Args {
    /// Use in-memory database for testing
    #[arg(long, global = true)]
    pub test: bool,

    /// Custom SQLite database file path
    #[arg(long, value_name = "PATH", env = "ORDERS_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Override current date (YYYY-MM-DD format)
    #[arg(long, value_name = "DATE", global = true)]
    pub override_date: Option<String>,

    #[arg(long, value_enum, default_value_t = Backend::Sqlite, global = true)]
    pub backend: Backend,

    #[arg(long, value_name = "URI", env = "MONGO_URI", default_value = DEFAULT_MONGO_URI, hide_env_values = true, global = true)]
    pub mongo_uri: String,

    #[arg(long, env = "ORDERS_DATABASE", default_value = DEFAULT_DATABASE, global = true)]
    pub database: String,

    #[arg(long, env = "ORDERS_COLLECTION", default_value = crate::repository::DEFAULT_COLLECTION, global = true)]
    pub collection: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Upper bound of `--days`, roughly a century
pub const MAX_DAYS: i64 = 36_500;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Replace the collection with generated sample orders
    Seed {
        #[arg(long, default_value_t = 1000)]
        count: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Run the three aggregations and show which indexes they used
    Report {
        #[arg(
            long,
            default_value_t = 180,
            value_parser = clap::value_parser!(i64).range(1..=MAX_DAYS)
        )]
        days: i64,
        #[arg(long, default_value = "US")]
        country: String,
        #[arg(long, default_value_t = 10)]
        limit: u64,
        /// Seed this many sample orders first (useful with --test)
        #[arg(long, value_name = "N")]
        seed_count: Option<usize>,
        #[arg(long)]
        no_color: bool,
    },
    /// Print the explain plan of one aggregation
    Explain {
        #[arg(value_enum)]
        query: QueryName,
        #[arg(
            long,
            default_value_t = 180,
            value_parser = clap::value_parser!(i64).range(1..=MAX_DAYS)
        )]
        days: i64,
        #[arg(long, default_value = "US")]
        country: String,
        #[arg(long, default_value_t = 10)]
        limit: u64,
    },
    /// List the indexes declared on the collection
    Indexes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryName {
    GmvByDay,
    TopSkus,
    ChannelEfficiency,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Validate the override_date argument if provided
    pub fn validate_override_date(&self) -> Result<Option<NaiveDate>, String> {
        match &self.override_date {
            Some(date_str) => NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| {
                    format!(
                        "Invalid date format for --override-date: '{}'. Expected YYYY-MM-DD",
                        date_str
                    )
                }),
            None => Ok(None),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        let mut config = if self.test {
            StoreConfig::test_mode()
        } else {
            StoreConfig::default()
        };
        if let Some(path) = &self.db_path {
            config = config.with_sqlite_path(path.to_string_lossy());
        }
        config
            .with_backend(self.backend)
            .with_mongo(&self.mongo_uri, &self.database)
            .with_collection(&self.collection)
    }
}

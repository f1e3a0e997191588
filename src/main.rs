use colored::Colorize;
use log::info;
use orders_analytics::cli::{Args, Command, QueryName};
use orders_analytics::date_provider::date_provider_for;
use orders_analytics::date_range::DateRange;
use orders_analytics::order::OrderStatus;
use orders_analytics::report::build_report;
use orders_analytics::repository::OrdersRepository;
use orders_analytics::seed::generate_orders;
use orders_analytics::store::DocumentStore;
use orders_analytics::store_factory::StoreFactory;

/// Seed used by `report --seed-count`
const REPORT_SEED: u64 = 42;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse_args();
    let date_provider = date_provider_for(args.validate_override_date()?);
    let now = date_provider.now();

    let config = args.store_config();
    let store = StoreFactory::create(&config)?;
    let repo: OrdersRepository<'_, dyn DocumentStore> =
        OrdersRepository::new(store.as_ref(), config.repository_config());

    match args.command {
        Command::Seed { count, seed } => {
            let inserted = repo.replace_all(&generate_orders(count, seed, now))?;
            println!("Inserted documents: {}", inserted);
            println!("Database: {}", config.database);
            println!("Collection: {}", repo.collection());
        }
        Command::Report {
            days,
            country,
            limit,
            seed_count,
            no_color,
        } => {
            if no_color {
                colored::control::set_override(false);
            }
            if let Some(count) = seed_count {
                let inserted = repo.replace_all(&generate_orders(count, REPORT_SEED, now))?;
                info!("Seeded {} orders before report", inserted);
            }
            repo.ensure_indexes()?;

            let range = DateRange::last_days(now, days)?;
            println!("{} {}", "Orders report".bold(), range);
            for block in build_report(&repo, &range, &country, limit)? {
                print!("{}", block);
            }
        }
        Command::Explain {
            query,
            days,
            country,
            limit,
        } => {
            repo.ensure_indexes()?;
            let range = DateRange::last_days(now, days)?;
            let plan = match query {
                QueryName::GmvByDay => {
                    repo.explain_gmv_by_day(&range, Some(&OrderStatus::REVENUE[..]))?
                }
                QueryName::TopSkus => repo.explain_top_skus_by_revenue(&range, limit)?,
                QueryName::ChannelEfficiency => {
                    repo.explain_country_channel_efficiency(&range, &country)?
                }
            };
            println!("{}", plan.to_pretty_json()?);
            let indexes = OrdersRepository::<dyn DocumentStore>::extract_used_indexes(&plan);
            if indexes.is_empty() {
                println!("Indexes used (from explain): NOT DETECTED");
            } else {
                println!("Indexes used (from explain): {}", indexes.join(", "));
            }
        }
        Command::Indexes => {
            for index in repo.indexes()? {
                println!(
                    "{}{} {}",
                    index.name,
                    if index.unique { " (unique)" } else { "" },
                    index.keys_to_json()
                );
            }
        }
    }

    Ok(())
}

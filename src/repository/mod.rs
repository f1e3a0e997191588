pub mod analytics;
pub mod indexes;
pub mod orders;

use crate::date_range::DateRange;
use crate::order::OrderRecord;
use crate::pipeline::HintedPipeline;
use crate::plan::ExplainPlan;
use crate::store::{AggregateOptions, Document, DocumentStore, IndexSpec, StoreError};
use chrono::{DateTime, Utc};
use log::{debug, info};
use thiserror::Error;

pub use analytics::{ChannelEfficiencyRow, GmvByDayRow, SkuRevenueRow};

pub const DEFAULT_COLLECTION: &str = "customer_orders";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid date range: {from} is after {to}")]
    InvalidRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    #[error("limit must be at least 1")]
    InvalidLimit,
    #[error("could not encode order {order_id}")]
    Encode {
        order_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected {what} document")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Which collection the repository owns
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryConfig {
    pub collection: String,
}

impl RepositoryConfig {
    pub fn new(collection: &str) -> Self {
        RepositoryConfig {
            collection: collection.to_string(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        RepositoryConfig::new(DEFAULT_COLLECTION)
    }
}

/// Repository over the customer orders collection.
///
/// Stateless between calls: everything it holds is the borrowed store and the
/// collection name fixed at construction.
pub struct OrdersRepository<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    config: RepositoryConfig,
}

impl<'a, S: DocumentStore + ?Sized> OrdersRepository<'a, S> {
    pub fn new(store: &'a S, config: RepositoryConfig) -> Self {
        OrdersRepository { store, config }
    }

    pub fn collection(&self) -> &str {
        &self.config.collection
    }

    /// Declares the five order indexes. Safe to call repeatedly.
    pub fn ensure_indexes(&self) -> Result<(), RepositoryError> {
        for index in indexes::order_indexes() {
            self.store.create_index(self.collection(), &index)?;
        }
        debug!("Indexes ensured on {}", self.collection());
        Ok(())
    }

    pub fn indexes(&self) -> Result<Vec<IndexSpec>, RepositoryError> {
        Ok(self.store.list_indexes(self.collection())?)
    }

    /// Drops the collection, rebuilds its indexes and bulk-inserts `orders`.
    ///
    /// The three steps are not atomic: readers running concurrently may see a
    /// missing collection, missing indexes or a partial insert.
    pub fn replace_all(&self, orders: &[OrderRecord]) -> Result<usize, RepositoryError> {
        let docs = orders
            .iter()
            .map(|order| {
                order.to_document().map_err(|source| RepositoryError::Encode {
                    order_id: order.order_id.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<Document>, _>>()?;

        self.store.drop_collection(self.collection())?;
        self.ensure_indexes()?;
        if docs.is_empty() {
            info!("Replaced {} with no documents", self.collection());
            return Ok(0);
        }

        let inserted = self.store.insert_many(self.collection(), &docs)?;
        info!("Replaced {} with {} orders", self.collection(), inserted);
        Ok(inserted)
    }

    pub fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.store.count_documents(self.collection())?)
    }

    /// Sorted, duplicate-free names of the indexes scanned in `plan`
    pub fn extract_used_indexes(plan: &ExplainPlan) -> Vec<String> {
        plan.used_indexes()
    }

    /// Executes a query for data. Large intermediate results may spill to disk.
    fn run(&self, query: &HintedPipeline) -> Result<Vec<Document>, RepositoryError> {
        debug!(
            "{} on {} hint={} pipeline={}",
            query.name,
            self.collection(),
            query.hint,
            query.pipeline.to_json_string()
        );
        let options = AggregateOptions {
            hint: query.hint.clone(),
            allow_disk_use: true,
        };
        let docs = self
            .store
            .aggregate(self.collection(), &query.pipeline, &options)?;
        debug!("{} returned {} rows", query.name, docs.len());
        Ok(docs)
    }

    /// Asks the store for the plan of exactly the pipeline and hint `run` would use
    fn explain(&self, query: &HintedPipeline) -> Result<ExplainPlan, RepositoryError> {
        debug!("explain {} hint={}", query.name, query.hint);
        let plan = self
            .store
            .explain_aggregate(self.collection(), &query.pipeline, &query.hint)?;
        Ok(ExplainPlan::from(plan))
    }
}

fn check_range(range: &DateRange) -> Result<(), RepositoryError> {
    if range.is_valid() {
        Ok(())
    } else {
        Err(RepositoryError::InvalidRange {
            from: range.from,
            to: range.to,
        })
    }
}

fn check_limit(limit: u64) -> Result<(), RepositoryError> {
    if limit == 0 {
        Err(RepositoryError::InvalidLimit)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{
        Channel, Customer, CustomerProfile, Geo, LineItem, Money, OrderBody, OrderStatus, Risk,
    };
    use crate::pipeline::Pipeline;
    use crate::query::{Filter, FindQuery, Update};
    use crate::store::SqliteStore;
    use chrono::{NaiveDate, TimeZone};
    use std::cell::RefCell;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("Failed to create test store")
    }

    fn order(id: &str, at: DateTime<Utc>, status: OrderStatus, amount: f64) -> OrderRecord {
        OrderRecord {
            order_id: id.to_string(),
            customer: Customer {
                id: "C-1".to_string(),
                profile: CustomerProfile {
                    segment: "retail".to_string(),
                    geo: Geo {
                        country: "US".to_string(),
                    },
                },
            },
            order: OrderBody {
                created_at: at,
                status,
                channel: Channel::Web,
                items: vec![LineItem {
                    sku: "SKU-1".to_string(),
                    quantity: 1,
                    unit_price: amount,
                    net_unit_price: amount,
                }],
                total: Money {
                    amount,
                    currency: "USD".to_string(),
                },
                status_changed_at: None,
                timeline: Vec::new(),
                notes: Vec::new(),
            },
            risk: Risk { score: 10 },
        }
    }

    #[test]
    fn test_replace_all_with_no_orders_keeps_indexes() {
        let store = store();
        let repo = OrdersRepository::new(&store, RepositoryConfig::default());

        assert_eq!(repo.replace_all(&[]).unwrap(), 0);
        assert_eq!(repo.indexes().unwrap().len(), 5);
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_replace_all_drops_previous_contents() {
        let store = store();
        let repo = OrdersRepository::new(&store, RepositoryConfig::default());
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

        repo.replace_all(&[
            order("ORD-1", at, OrderStatus::Paid, 10.0),
            order("ORD-2", at, OrderStatus::Paid, 10.0),
        ])
        .unwrap();
        let inserted = repo
            .replace_all(&[order("ORD-3", at, OrderStatus::New, 5.0)])
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn test_replace_all_rejects_duplicate_order_ids() {
        let store = store();
        let repo = OrdersRepository::new(&store, RepositoryConfig::default());
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

        let result = repo.replace_all(&[
            order("ORD-1", at, OrderStatus::Paid, 10.0),
            order("ORD-1", at, OrderStatus::Paid, 20.0),
        ]);
        assert!(matches!(
            result,
            Err(RepositoryError::Store(StoreError::DuplicateKey(_)))
        ));
    }

    #[test]
    fn test_ensure_indexes_is_idempotent() {
        let store = store();
        let repo = OrdersRepository::new(&store, RepositoryConfig::new("orders_a"));
        repo.ensure_indexes().unwrap();
        repo.ensure_indexes().unwrap();
        assert_eq!(repo.indexes().unwrap().len(), 5);
    }

    #[test]
    fn test_collections_are_independent() {
        let store = store();
        let a = OrdersRepository::new(&store, RepositoryConfig::new("orders_a"));
        let b = OrdersRepository::new(&store, RepositoryConfig::new("orders_b"));
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

        a.replace_all(&[order("ORD-1", at, OrderStatus::Paid, 1.0)])
            .unwrap();
        b.replace_all(&[]).unwrap();

        assert_eq!(a.count().unwrap(), 1);
        assert_eq!(b.count().unwrap(), 0);
    }

    #[test]
    fn test_collection_may_share_the_index_catalog_name() {
        let store = store();
        let repo = OrdersRepository::new(&store, RepositoryConfig::new("store_indexes"));
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

        let inserted = repo
            .replace_all(&[order("ORD-1", at, OrderStatus::Paid, 1.0)])
            .unwrap();

        assert_eq!(inserted, 1);
        assert_eq!(repo.indexes().unwrap().len(), 5);
        assert_eq!(repo.count().unwrap(), 1);
    }

    /// Store that records what the repository sends and returns nothing
    #[derive(Default)]
    struct RecordingStore {
        aggregated: RefCell<Vec<(Pipeline, AggregateOptions)>>,
        explained: RefCell<Vec<(Pipeline, String)>>,
    }

    impl DocumentStore for RecordingStore {
        fn create_index(&self, _: &str, _: &IndexSpec) -> Result<(), StoreError> {
            Ok(())
        }

        fn list_indexes(&self, _: &str) -> Result<Vec<IndexSpec>, StoreError> {
            Ok(Vec::new())
        }

        fn drop_collection(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }

        fn insert_many(&self, _: &str, docs: &[Document]) -> Result<usize, StoreError> {
            Ok(docs.len())
        }

        fn aggregate(
            &self,
            _: &str,
            pipeline: &Pipeline,
            options: &AggregateOptions,
        ) -> Result<Vec<Document>, StoreError> {
            self.aggregated
                .borrow_mut()
                .push((pipeline.clone(), options.clone()));
            Ok(Vec::new())
        }

        fn explain_aggregate(
            &self,
            _: &str,
            pipeline: &Pipeline,
            hint: &str,
        ) -> Result<serde_json::Value, StoreError> {
            self.explained
                .borrow_mut()
                .push((pipeline.clone(), hint.to_string()));
            Ok(serde_json::json!({}))
        }

        fn find(&self, _: &str, _: &FindQuery) -> Result<Vec<Document>, StoreError> {
            Ok(Vec::new())
        }

        fn update_one(&self, _: &str, _: &Filter, _: &Update) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn count_documents(&self, _: &str) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    #[test]
    fn test_explain_sends_the_pipeline_and_hint_that_run_sends() {
        let store = RecordingStore::default();
        let repo = OrdersRepository::new(&store, RepositoryConfig::default());
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let range = DateRange::days(day, day);
        let revenue = Some(&OrderStatus::REVENUE[..]);

        repo.gmv_by_day(&range, revenue).unwrap();
        repo.explain_gmv_by_day(&range, revenue).unwrap();
        repo.top_skus_by_revenue(&range, 7).unwrap();
        repo.explain_top_skus_by_revenue(&range, 7).unwrap();
        repo.country_channel_efficiency(&range, "US").unwrap();
        repo.explain_country_channel_efficiency(&range, "US").unwrap();

        let aggregated = store.aggregated.borrow();
        let explained = store.explained.borrow();
        assert_eq!(aggregated.len(), 3);
        assert_eq!(explained.len(), 3);
        for ((run_pipeline, options), (explain_pipeline, hint)) in aggregated.iter().zip(explained.iter()) {
            assert_eq!(run_pipeline, explain_pipeline);
            assert_eq!(&options.hint, hint);
            assert!(options.allow_disk_use);
        }

        let hints: Vec<&str> = explained.iter().map(|(_, hint)| hint.as_str()).collect();
        assert_eq!(
            hints,
            vec![
                indexes::IDX_CREATED_STATUS,
                indexes::IDX_CREATED_STATUS,
                indexes::IDX_COUNTRY_CHANNEL_CREATED
            ]
        );
    }
}

use super::indexes::{IDX_CUSTOMER_CREATED, UX_ORDER_ID};
use super::{OrdersRepository, RepositoryError, check_limit, check_range};
use crate::date_range::DateRange;
use crate::order::{OrderNote, OrderRecord, OrderStatus, TimelineEntry, format_timestamp};
use crate::query::{Filter, FindQuery, SortKey, Update};
use crate::store::{Document, DocumentStore};
use chrono::{DateTime, Utc};
use log::debug;
use serde_json::json;

pub const DEFAULT_CUSTOMER_ORDERS_LIMIT: u64 = 50;

/// Timeline source for status changes made through the repository
pub const SYSTEM_SOURCE: &str = "system";

fn decode_order(doc: Document) -> Result<OrderRecord, RepositoryError> {
    OrderRecord::from_document(doc).map_err(|source| RepositoryError::Decode {
        what: "order",
        source,
    })
}

fn by_order_id(order_id: &str) -> Filter {
    Filter::new().eq("order_id", order_id)
}

// ===== Single-order lookups and in-place updates =====

impl<S: DocumentStore + ?Sized> OrdersRepository<'_, S> {
    pub fn get_by_order_id(&self, order_id: &str) -> Result<Option<OrderRecord>, RepositoryError> {
        let query = FindQuery {
            filter: by_order_id(order_id),
            hint: Some(UX_ORDER_ID.to_string()),
            sort: Vec::new(),
            limit: Some(1),
        };
        self.store
            .find(self.collection(), &query)?
            .into_iter()
            .next()
            .map(decode_order)
            .transpose()
    }

    /// A customer's orders in the window, newest first.
    /// `limit` defaults to 50; an empty status list means any status.
    pub fn find_customer_orders(
        &self,
        customer_id: &str,
        range: &DateRange,
        statuses: Option<&[OrderStatus]>,
        limit: Option<u64>,
    ) -> Result<Vec<OrderRecord>, RepositoryError> {
        check_range(range)?;
        let limit = limit.unwrap_or(DEFAULT_CUSTOMER_ORDERS_LIMIT);
        check_limit(limit)?;

        let mut filter = Filter::new()
            .eq("customer.id", customer_id)
            .between("order.created_at", range.from, range.to);
        if let Some(statuses) = statuses.filter(|s| !s.is_empty()) {
            filter = filter.is_in("order.status", statuses.iter().map(OrderStatus::as_str));
        }

        let query = FindQuery {
            filter,
            hint: Some(IDX_CUSTOMER_CREATED.to_string()),
            sort: vec![SortKey::desc("order.created_at")],
            limit: Some(limit),
        };
        self.store
            .find(self.collection(), &query)?
            .into_iter()
            .map(decode_order)
            .collect()
    }

    /// Moves an order to `status` and records the change on its timeline.
    /// Returns false when no order has that id.
    pub fn set_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        changed_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let entry = TimelineEntry {
            at: changed_at,
            status,
            source: SYSTEM_SOURCE.to_string(),
        };
        let entry = serde_json::to_value(&entry).map_err(|source| RepositoryError::Encode {
            order_id: order_id.to_string(),
            source,
        })?;
        let update = Update::new()
            .set("order.status", json!(status.as_str()))
            .set("order.status_changed_at", json!(format_timestamp(changed_at)))
            .push("order.timeline", entry);

        let modified = self
            .store
            .update_one(self.collection(), &by_order_id(order_id), &update)?;
        debug!("set_order_status {} -> {}: modified={}", order_id, status, modified);
        Ok(modified)
    }

    pub fn add_order_note(&self, order_id: &str, note: &OrderNote) -> Result<bool, RepositoryError> {
        let note = serde_json::to_value(note).map_err(|source| RepositoryError::Encode {
            order_id: order_id.to_string(),
            source,
        })?;
        let update = Update::new().push("order.notes", note);
        Ok(self
            .store
            .update_one(self.collection(), &by_order_id(order_id), &update)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Channel, Customer, CustomerProfile, Geo, Money, OrderBody, Risk};
    use crate::repository::RepositoryConfig;
    use crate::store::{SqliteStore, StoreError};
    use chrono::TimeZone;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("Failed to create test store")
    }

    fn order(id: &str, customer: &str, day: u32, status: OrderStatus) -> OrderRecord {
        OrderRecord {
            order_id: id.to_string(),
            customer: Customer {
                id: customer.to_string(),
                profile: CustomerProfile {
                    segment: "retail".to_string(),
                    geo: Geo {
                        country: "PL".to_string(),
                    },
                },
            },
            order: OrderBody {
                created_at: Utc.with_ymd_and_hms(2025, 5, day, 12, 0, 0).unwrap(),
                status,
                channel: Channel::Partner,
                items: Vec::new(),
                total: Money {
                    amount: 12.5,
                    currency: "PLN".to_string(),
                },
                status_changed_at: None,
                timeline: Vec::new(),
                notes: Vec::new(),
            },
            risk: Risk { score: 40 },
        }
    }

    fn may() -> DateRange {
        DateRange::new(
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 5, 31, 23, 59, 59).unwrap(),
        )
    }

    fn seeded(store: &SqliteStore) -> OrdersRepository<'_, SqliteStore> {
        let repo = OrdersRepository::new(store, RepositoryConfig::default());
        repo.replace_all(&[
            order("ORD-1", "C-1", 1, OrderStatus::Paid),
            order("ORD-2", "C-1", 3, OrderStatus::New),
            order("ORD-3", "C-1", 2, OrderStatus::Paid),
            order("ORD-4", "C-2", 2, OrderStatus::Paid),
        ])
        .unwrap();
        repo
    }

    #[test]
    fn test_get_by_order_id_round_trips_the_record() {
        let store = store();
        let repo = seeded(&store);

        let found = repo.get_by_order_id("ORD-3").unwrap();
        assert_eq!(found, Some(order("ORD-3", "C-1", 2, OrderStatus::Paid)));
        assert_eq!(repo.get_by_order_id("ORD-404").unwrap(), None);
    }

    #[test]
    fn test_find_customer_orders_newest_first() {
        let store = store();
        let repo = seeded(&store);

        let ids: Vec<_> = repo
            .find_customer_orders("C-1", &may(), None, None)
            .unwrap()
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        assert_eq!(ids, vec!["ORD-2", "ORD-3", "ORD-1"]);
    }

    #[test]
    fn test_find_customer_orders_filters_status_and_limits() {
        let store = store();
        let repo = seeded(&store);

        let orders = repo
            .find_customer_orders("C-1", &may(), Some(&[OrderStatus::Paid][..]), Some(1))
            .unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id, "ORD-3");
    }

    #[test]
    fn test_find_customer_orders_requires_index() {
        let store = store();
        let repo = OrdersRepository::new(&store, RepositoryConfig::default());
        assert!(matches!(
            repo.find_customer_orders("C-1", &may(), None, None),
            Err(RepositoryError::Store(StoreError::IndexNotFound { .. }))
        ));
    }

    #[test]
    fn test_set_order_status_appends_timeline_entry() {
        let store = store();
        let repo = seeded(&store);
        let changed_at = Utc.with_ymd_and_hms(2025, 5, 4, 8, 30, 0).unwrap();

        assert!(repo
            .set_order_status("ORD-2", OrderStatus::Paid, changed_at)
            .unwrap());

        let updated = repo.get_by_order_id("ORD-2").unwrap().unwrap();
        assert_eq!(updated.order.status, OrderStatus::Paid);
        assert_eq!(updated.order.status_changed_at, Some(changed_at));
        assert_eq!(
            updated.order.timeline,
            vec![TimelineEntry {
                at: changed_at,
                status: OrderStatus::Paid,
                source: SYSTEM_SOURCE.to_string(),
            }]
        );
    }

    #[test]
    fn test_set_order_status_of_unknown_order() {
        let store = store();
        let repo = seeded(&store);
        let changed = repo
            .set_order_status("ORD-404", OrderStatus::Cancelled, Utc::now())
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_add_order_note() {
        let store = store();
        let repo = seeded(&store);
        let note = OrderNote {
            at: Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap(),
            author: "support".to_string(),
            text: "customer called".to_string(),
        };

        assert!(repo.add_order_note("ORD-4", &note).unwrap());
        assert!(repo.add_order_note("ORD-4", &note).unwrap());

        let updated = repo.get_by_order_id("ORD-4").unwrap().unwrap();
        assert_eq!(updated.order.notes, vec![note.clone(), note]);
    }
}

use crate::store::IndexSpec;

pub const UX_ORDER_ID: &str = "ux_order_id";
/// Time + status range scans
pub const IDX_CREATED_STATUS: &str = "idx_created_status";
/// Per-customer order history
pub const IDX_CUSTOMER_CREATED: &str = "idx_customer_created";
pub const IDX_ITEMS_SKU: &str = "idx_items_sku";
/// Segmented analytics by country and channel
pub const IDX_COUNTRY_CHANNEL_CREATED: &str = "idx_country_channel_created";

/// The five indexes declared on the orders collection
pub fn order_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new(UX_ORDER_ID).asc("order_id").unique(),
        IndexSpec::new(IDX_CREATED_STATUS)
            .desc("order.created_at")
            .asc("order.status"),
        IndexSpec::new(IDX_CUSTOMER_CREATED)
            .asc("customer.id")
            .desc("order.created_at"),
        IndexSpec::new(IDX_ITEMS_SKU).asc("order.items.sku"),
        IndexSpec::new(IDX_COUNTRY_CHANNEL_CREATED)
            .asc("customer.profile.geo.country")
            .asc("order.channel")
            .desc("order.created_at"),
    ]
}

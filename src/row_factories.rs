use crate::repository::RepositoryError;
use crate::repository::analytics::{ChannelEfficiencyRow, GmvByDayRow, SkuRevenueRow};
use crate::store::Document;
use serde::Deserialize;
use serde::de::DeserializeOwned;

fn decode<T: DeserializeOwned>(what: &'static str, doc: Document) -> Result<T, RepositoryError> {
    serde_json::from_value(serde_json::Value::Object(doc))
        .map_err(|source| RepositoryError::Decode { what, source })
}

#[derive(Deserialize)]
struct DayStatusKey {
    day: String,
    status: String,
}

#[derive(Deserialize)]
struct GmvGroup {
    #[serde(rename = "_id")]
    key: DayStatusKey,
    orders: i64,
    gmv: f64,
}

/// Factory for creating GmvByDayRow objects from group documents
pub struct GmvByDayRowFactory;

impl GmvByDayRowFactory {
    /// Expected shape: `{_id: {day, status}, orders, gmv}`
    pub fn from_document(doc: Document) -> Result<GmvByDayRow, RepositoryError> {
        let group: GmvGroup = decode("gmv_by_day", doc)?;
        Ok(GmvByDayRow {
            day: group.key.day,
            status: group.key.status,
            orders: group.orders,
            gmv: group.gmv,
        })
    }
}

#[derive(Deserialize)]
struct SkuGroup {
    #[serde(rename = "_id")]
    sku: String,
    units: i64,
    revenue: f64,
}

/// Factory for creating SkuRevenueRow objects from group documents
pub struct SkuRevenueRowFactory;

impl SkuRevenueRowFactory {
    /// Expected shape: `{_id: sku, units, revenue}`
    pub fn from_document(doc: Document) -> Result<SkuRevenueRow, RepositoryError> {
        let group: SkuGroup = decode("top_skus_by_revenue", doc)?;
        Ok(SkuRevenueRow {
            sku: group.sku,
            units: group.units,
            revenue: group.revenue,
        })
    }
}

#[derive(Deserialize)]
struct ChannelGroup {
    #[serde(rename = "_id")]
    channel: String,
    orders: i64,
    avg_check: f64,
    high_risk_share: f64,
}

/// Factory for creating ChannelEfficiencyRow objects from group documents
pub struct ChannelEfficiencyRowFactory;

impl ChannelEfficiencyRowFactory {
    /// Expected shape: `{_id: channel, orders, avg_check, high_risk_share}`
    pub fn from_document(doc: Document) -> Result<ChannelEfficiencyRow, RepositoryError> {
        let group: ChannelGroup = decode("country_channel_efficiency", doc)?;
        Ok(ChannelEfficiencyRow {
            channel: group.channel,
            orders: group.orders,
            avg_check: group.avg_check,
            high_risk_share: group.high_risk_share,
        })
    }
}

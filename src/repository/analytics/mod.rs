pub mod channel_efficiency;
pub mod gmv_by_day;
pub mod top_skus;

pub use channel_efficiency::ChannelEfficiencyRow;
pub use gmv_by_day::GmvByDayRow;
pub use top_skus::SkuRevenueRow;

use super::{OrdersRepository, RepositoryError, check_limit, check_range};
use crate::date_range::DateRange;
use crate::order::OrderStatus;
use crate::plan::ExplainPlan;
use crate::query::Filter;
use crate::row_factories::{ChannelEfficiencyRowFactory, GmvByDayRowFactory, SkuRevenueRowFactory};
use crate::store::DocumentStore;

/// `order.created_at` within the inclusive range
fn created_within(range: &DateRange) -> Filter {
    Filter::new().between("order.created_at", range.from, range.to)
}

// ===== Aggregations: each query has a data path and an explain path over the same builder =====

impl<S: DocumentStore + ?Sized> OrdersRepository<'_, S> {
    /// Order count and gross total per (day, status), ordered by day then status
    pub fn gmv_by_day(
        &self,
        range: &DateRange,
        statuses: Option<&[OrderStatus]>,
    ) -> Result<Vec<GmvByDayRow>, RepositoryError> {
        check_range(range)?;
        self.run(&gmv_by_day::pipeline(range, statuses))?
            .into_iter()
            .map(GmvByDayRowFactory::from_document)
            .collect()
    }

    pub fn explain_gmv_by_day(
        &self,
        range: &DateRange,
        statuses: Option<&[OrderStatus]>,
    ) -> Result<ExplainPlan, RepositoryError> {
        check_range(range)?;
        self.explain(&gmv_by_day::pipeline(range, statuses))
    }

    /// Best-selling SKUs of paid, shipped and delivered orders, highest revenue first
    pub fn top_skus_by_revenue(
        &self,
        range: &DateRange,
        limit: u64,
    ) -> Result<Vec<SkuRevenueRow>, RepositoryError> {
        check_range(range)?;
        check_limit(limit)?;
        self.run(&top_skus::pipeline(range, limit))?
            .into_iter()
            .map(SkuRevenueRowFactory::from_document)
            .collect()
    }

    pub fn explain_top_skus_by_revenue(
        &self,
        range: &DateRange,
        limit: u64,
    ) -> Result<ExplainPlan, RepositoryError> {
        check_range(range)?;
        check_limit(limit)?;
        self.explain(&top_skus::pipeline(range, limit))
    }

    /// Per-channel volume, average check and high-risk share for one country
    pub fn country_channel_efficiency(
        &self,
        range: &DateRange,
        country: &str,
    ) -> Result<Vec<ChannelEfficiencyRow>, RepositoryError> {
        check_range(range)?;
        self.run(&channel_efficiency::pipeline(range, country))?
            .into_iter()
            .map(ChannelEfficiencyRowFactory::from_document)
            .collect()
    }

    pub fn explain_country_channel_efficiency(
        &self,
        range: &DateRange,
        country: &str,
    ) -> Result<ExplainPlan, RepositoryError> {
        check_range(range)?;
        self.explain(&channel_efficiency::pipeline(range, country))
    }
}

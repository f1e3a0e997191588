use crate::date_range::DateRange;
use crate::order::OrderStatus;
use crate::pipeline::{Accumulator, Expr, Group, GroupKey, HintedPipeline, Pipeline, Stage};
use crate::query::SortKey;
use crate::repository::indexes::IDX_CREATED_STATUS;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct SkuRevenueRow {
    pub sku: String,
    pub units: i64,
    pub revenue: f64,
}

impl fmt::Display for SkuRevenueRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} units={:<5} revenue={:.2}",
            self.sku, self.units, self.revenue
        )
    }
}

/// Revenue-status orders in the window, one row per line item, summed per SKU.
///
/// Hinted with the created_at + status index even though most of the cost is the
/// grouping after `$unwind`; the hint only narrows the initial match.
pub(crate) fn pipeline(range: &DateRange, limit: u64) -> HintedPipeline {
    let filter = super::created_within(range).is_in(
        "order.status",
        OrderStatus::REVENUE.iter().map(OrderStatus::as_str),
    );

    let pipeline = Pipeline::new()
        .stage(Stage::Match(filter))
        .stage(Stage::Unwind("order.items".into()))
        .stage(Stage::Group(Group {
            key: GroupKey::Single(Expr::field("order.items.sku")),
            accumulators: vec![
                (
                    "units".to_string(),
                    Accumulator::Sum(Expr::field("order.items.quantity")),
                ),
                (
                    "revenue".to_string(),
                    Accumulator::Sum(Expr::Multiply(vec![
                        Expr::field("order.items.quantity"),
                        Expr::field("order.items.unit_price"),
                    ])),
                ),
            ],
        }))
        // SKU breaks revenue ties so a larger limit only ever extends the result
        .stage(Stage::Sort(vec![SortKey::desc("revenue"), SortKey::asc("_id")]))
        .stage(Stage::Limit(limit));

    HintedPipeline::new("top_skus_by_revenue", pipeline, IDX_CREATED_STATUS)
}

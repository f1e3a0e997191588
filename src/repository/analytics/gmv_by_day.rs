use crate::date_range::DateRange;
use crate::order::OrderStatus;
use crate::pipeline::{Accumulator, Expr, Group, GroupKey, HintedPipeline, Pipeline, Stage};
use crate::query::SortKey;
use crate::repository::indexes::IDX_CREATED_STATUS;
use std::fmt;

/// Gross merchandise value of one status on one calendar day
#[derive(Debug, Clone, PartialEq)]
pub struct GmvByDayRow {
    pub day: String,
    pub status: String,
    pub orders: i64,
    pub gmv: f64,
}

impl fmt::Display for GmvByDayRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:<10} orders={:<4} gmv={:.2}",
            self.day, self.status, self.orders, self.gmv
        )
    }
}

/// Match the window (and statuses, when any are given), group by (day, status), sort by both ascending.
/// An empty status list means no status filter.
pub(crate) fn pipeline(range: &DateRange, statuses: Option<&[OrderStatus]>) -> HintedPipeline {
    let mut filter = super::created_within(range);
    if let Some(statuses) = statuses.filter(|s| !s.is_empty()) {
        filter = filter.is_in("order.status", statuses.iter().map(OrderStatus::as_str));
    }

    let pipeline = Pipeline::new()
        .stage(Stage::Match(filter))
        .stage(Stage::Group(Group {
            key: GroupKey::Compound(vec![
                ("day".to_string(), Expr::DayOf("order.created_at".into())),
                ("status".to_string(), Expr::field("order.status")),
            ]),
            accumulators: vec![
                ("orders".to_string(), Accumulator::count()),
                (
                    "gmv".to_string(),
                    Accumulator::Sum(Expr::field("order.total.amount")),
                ),
            ],
        }))
        .stage(Stage::Sort(vec![
            SortKey::asc("_id.day"),
            SortKey::asc("_id.status"),
        ]));

    HintedPipeline::new("gmv_by_day", pipeline, IDX_CREATED_STATUS)
}

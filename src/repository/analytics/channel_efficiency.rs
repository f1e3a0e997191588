use crate::date_range::DateRange;
use crate::pipeline::{Accumulator, Expr, Group, GroupKey, HintedPipeline, Pipeline, Stage};
use crate::query::{Filter, SortKey};
use crate::repository::indexes::IDX_COUNTRY_CHANNEL_CREATED;
use std::fmt;

/// Risk score at or above which an order counts as high risk
pub const HIGH_RISK_SCORE: i64 = 70;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEfficiencyRow {
    pub channel: String,
    pub orders: i64,
    pub avg_check: f64,
    /// Fraction of the channel's orders with a high risk score, in `[0, 1]`
    pub high_risk_share: f64,
}

impl fmt::Display for ChannelEfficiencyRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} orders={:<4} avg_check={:.2} high_risk_share={:.3}",
            self.channel, self.orders, self.avg_check, self.high_risk_share
        )
    }
}

pub(crate) fn pipeline(range: &DateRange, country: &str) -> HintedPipeline {
    let filter = Filter::new()
        .eq("customer.profile.geo.country", country)
        .between("order.created_at", range.from, range.to);

    let high_risk = Expr::IfGte {
        lhs: Box::new(Expr::field("risk.score")),
        rhs: Box::new(Expr::int(HIGH_RISK_SCORE)),
        then: Box::new(Expr::int(1)),
        otherwise: Box::new(Expr::int(0)),
    };

    let pipeline = Pipeline::new()
        .stage(Stage::Match(filter))
        .stage(Stage::Group(Group {
            key: GroupKey::Single(Expr::field("order.channel")),
            accumulators: vec![
                ("orders".to_string(), Accumulator::count()),
                (
                    "avg_check".to_string(),
                    Accumulator::Avg(Expr::field("order.total.amount")),
                ),
                ("high_risk_share".to_string(), Accumulator::Avg(high_risk)),
            ],
        }))
        .stage(Stage::Sort(vec![SortKey::desc("orders")]));

    HintedPipeline::new(
        "country_channel_efficiency",
        pipeline,
        IDX_COUNTRY_CHANNEL_CREATED,
    )
}

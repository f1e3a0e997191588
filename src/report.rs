//! Console report: each aggregation's leading rows and the indexes its plan used.

use crate::date_range::DateRange;
use crate::order::OrderStatus;
use crate::plan::ExplainPlan;
use crate::repository::{OrdersRepository, RepositoryError};
use crate::store::DocumentStore;
use colored::Colorize;
use std::fmt::{self, Display};

/// Rows printed per block
pub const MAX_ROWS: usize = 10;

pub struct ReportBlock {
    pub title: String,
    pub rows: Vec<String>,
    pub used_indexes: Vec<String>,
}

impl ReportBlock {
    fn new<R: Display>(title: &str, rows: &[R], plan: &ExplainPlan) -> Self {
        ReportBlock {
            title: title.to_string(),
            rows: rows.iter().take(MAX_ROWS).map(ToString::to_string).collect(),
            used_indexes: plan.used_indexes(),
        }
    }
}

impl fmt::Display for ReportBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n{}", self.title.bold())?;
        writeln!(f, "Results:")?;
        if self.rows.is_empty() {
            writeln!(f, "  {}", "(no rows)".dimmed())?;
        }
        for row in &self.rows {
            writeln!(f, "  {}", row)?;
        }
        let indexes = if self.used_indexes.is_empty() {
            "NOT DETECTED".red()
        } else {
            self.used_indexes.join(", ").green()
        };
        writeln!(f, "Indexes used (from explain): {}", indexes)
    }
}

/// Runs every aggregation and its explain over `range`
pub fn build_report<S: DocumentStore + ?Sized>(
    repo: &OrdersRepository<'_, S>,
    range: &DateRange,
    country: &str,
    limit: u64,
) -> Result<Vec<ReportBlock>, RepositoryError> {
    let statuses = &OrderStatus::REVENUE[..];

    let gmv = repo.gmv_by_day(range, Some(statuses))?;
    let gmv_plan = repo.explain_gmv_by_day(range, Some(statuses))?;

    let skus = repo.top_skus_by_revenue(range, limit)?;
    let skus_plan = repo.explain_top_skus_by_revenue(range, limit)?;

    let channels = repo.country_channel_efficiency(range, country)?;
    let channels_plan = repo.explain_country_channel_efficiency(range, country)?;

    Ok(vec![
        ReportBlock::new("1) GMV by day and status", &gmv, &gmv_plan),
        ReportBlock::new("2) Top SKUs by revenue", &skus, &skus_plan),
        ReportBlock::new(
            &format!("3) Channel efficiency for {}", country),
            &channels,
            &channels_plan,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_render_lists_rows_and_indexes() {
        plain();
        let plan = ExplainPlan::from(json!({"stage": "IXSCAN", "indexName": "idx_created_status"}));
        let block = ReportBlock::new("Top", &["a", "b"][..], &plan);
        assert_eq!(
            block.to_string(),
            "\nTop\nResults:\n  a\n  b\nIndexes used (from explain): idx_created_status\n"
        );
    }

    #[test]
    fn test_render_without_index_scan() {
        plain();
        let plan = ExplainPlan::from(json!({"stage": "COLLSCAN"}));
        let block = ReportBlock::new::<&str>("Empty", &[], &plan);
        let rendered = block.to_string();
        assert!(rendered.contains("(no rows)"));
        assert!(rendered.contains("Indexes used (from explain): NOT DETECTED"));
    }

    #[test]
    fn test_blocks_write_back_to_back() {
        use std::fmt::Write;

        plain();
        let plan = ExplainPlan::from(json!({"stage": "IXSCAN", "indexName": "idx_a"}));
        let first = ReportBlock::new("One", &[1][..], &plan);
        let second = ReportBlock::new::<i32>("Two", &[], &plan);

        let mut out = String::new();
        for block in [&first, &second] {
            write!(out, "{}", block).unwrap();
        }
        assert_eq!(out, format!("{}{}", first, second));
        assert_eq!(out.matches("Indexes used (from explain): idx_a\n").count(), 2);
    }

    #[test]
    fn test_rows_are_capped() {
        let rows: Vec<i32> = (0..25).collect();
        let plan = ExplainPlan::from(json!({}));
        assert_eq!(ReportBlock::new("Many", &rows, &plan).rows.len(), MAX_ROWS);
    }
}

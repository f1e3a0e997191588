//! Turns `EXPLAIN QUERY PLAN` rows into a nested plan document.
//!
//! Node vocabulary follows the document-store convention (`IXSCAN`, `COLLSCAN`, `inputStages`)
//! so plan consumers do not need to know which backend produced it.

use crate::store::sqlite::compile::UNWIND_ALIAS;
use regex::Regex;
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

static INDEX_USE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"USING (?:COVERING )?INDEX (\S+)").unwrap());

/// One row of `EXPLAIN QUERY PLAN`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlanRow {
    pub id: i64,
    pub parent: i64,
    pub detail: String,
}

fn stage_node(detail: &str, collection: &str) -> Map<String, Value> {
    let mut node = Map::new();
    let is_scan = detail.starts_with("SEARCH ") || detail.starts_with("SCAN ");

    let stage = if is_scan {
        if let Some(caps) = INDEX_USE.captures(detail) {
            let physical = &caps[1];
            let prefix = format!("{}.", collection);
            let name = physical.strip_prefix(&prefix).unwrap_or(physical);
            node.insert("indexName".to_string(), json!(name));
            "IXSCAN"
        } else if detail.contains("PRIMARY KEY") {
            "IDHACK"
        } else if detail.contains(&format!("SCAN {} VIRTUAL TABLE", UNWIND_ALIAS)) {
            "UNWIND"
        } else {
            "COLLSCAN"
        }
    } else if detail.contains("GROUP BY") {
        "GROUP"
    } else if detail.contains("ORDER BY") {
        "SORT"
    } else {
        "OTHER"
    };

    let mut ordered = Map::new();
    ordered.insert("stage".to_string(), json!(stage));
    ordered.append(&mut node);
    ordered.insert("detail".to_string(), json!(detail));
    ordered
}

fn build_children(rows: &[PlanRow], parent: i64, collection: &str) -> Vec<Value> {
    rows.iter()
        .filter(|row| row.parent == parent && row.id != parent)
        .map(|row| {
            let mut node = stage_node(&row.detail, collection);
            let children = build_children(rows, row.id, collection);
            if !children.is_empty() {
                node.insert("inputStages".to_string(), Value::Array(children));
            }
            Value::Object(node)
        })
        .collect()
}

pub(crate) fn plan_document(rows: &[PlanRow], collection: &str, hint: &str, sql: &str) -> Value {
    json!({
        "queryPlanner": {
            "namespace": format!("sqlite.{}", collection),
            "hint": hint,
            "winningPlan": {
                "stage": "QUERY_PLAN",
                "inputStages": build_children(rows, 0, collection)
            },
            "rejectedPlans": []
        },
        "command": {"sql": sql}
    })
}

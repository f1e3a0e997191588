//! Execution plans returned by the store's explain mode, and index introspection over them.
//!
//! Plan shape belongs to the store and varies across versions, so the tree is kept generic:
//! every value is an object, an array or a scalar, and the walk never fails on unexpected fields.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;
use std::collections::BTreeSet;

/// Stage marker identifying an index scan
pub const INDEX_SCAN_STAGE: &str = "IXSCAN";

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    Object(Vec<(String, PlanNode)>),
    Array(Vec<PlanNode>),
    Scalar(Value),
}

impl PlanNode {
    pub fn get(&self, key: &str) -> Option<&PlanNode> {
        match self {
            PlanNode::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PlanNode::Scalar(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Index name when this node is an index-scan stage that names one
    fn index_scan_name(&self) -> Option<&str> {
        let stage = self.get("stage")?.as_str()?;
        if stage != INDEX_SCAN_STAGE {
            return None;
        }
        self.get("indexName")?.as_str().filter(|name| !name.is_empty())
    }
}

impl From<Value> for PlanNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                PlanNode::Object(map.into_iter().map(|(k, v)| (k, PlanNode::from(v))).collect())
            }
            Value::Array(items) => PlanNode::Array(items.into_iter().map(PlanNode::from).collect()),
            scalar => PlanNode::Scalar(scalar),
        }
    }
}

impl Serialize for PlanNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PlanNode::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            PlanNode::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            PlanNode::Scalar(value) => value.serialize(serializer),
        }
    }
}

/// Sorted, duplicate-free names of every index an index-scan stage in `plan` used.
/// An empty result means no index was used, i.e. the store fell back to a collection scan.
pub fn extract_used_indexes(plan: &PlanNode) -> Vec<String> {
    let mut indexes = BTreeSet::new();
    let mut pending = vec![plan];

    while let Some(node) = pending.pop() {
        match node {
            PlanNode::Object(fields) => {
                if let Some(name) = node.index_scan_name() {
                    indexes.insert(name.to_string());
                }
                pending.extend(fields.iter().map(|(_, child)| child));
            }
            PlanNode::Array(items) => pending.extend(items.iter()),
            PlanNode::Scalar(_) => {}
        }
    }

    indexes.into_iter().collect()
}

/// Plan document for one pipeline + hint pair. Consumed once, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainPlan {
    root: PlanNode,
}

impl ExplainPlan {
    pub fn new(root: impl Into<PlanNode>) -> Self {
        ExplainPlan { root: root.into() }
    }

    pub fn root(&self) -> &PlanNode {
        &self.root
    }

    pub fn used_indexes(&self) -> Vec<String> {
        extract_used_indexes(&self.root)
    }

    pub fn is_collection_scan(&self) -> bool {
        self.used_indexes().is_empty()
    }

    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.root)
    }
}

impl From<Value> for ExplainPlan {
    fn from(value: Value) -> Self {
        ExplainPlan::new(value)
    }
}

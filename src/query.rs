//! Filters, sorts and updates shared by `find`, `update_one` and the `$match` stage.

use crate::order::format_timestamp;
use crate::store::Document;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use std::fmt;

/// Dotted path into a document, e.g. `order.created_at`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Self {
        FieldPath(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path relative to `prefix` if this path lies underneath it
    pub fn relative_to(&self, prefix: &FieldPath) -> Option<&str> {
        self.0
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath::new(path)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_i32(&self) -> i32 {
        match self {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        }
    }

    pub fn from_i32(value: i64) -> Option<Self> {
        match value {
            1 => Some(Direction::Ascending),
            -1 => Some(Direction::Descending),
            _ => None,
        }
    }

    pub fn sql_keyword(&self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

/// Scalar value used in filters and expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Timestamp(DateTime<Utc>),
}

impl Literal {
    pub fn to_json(&self) -> Value {
        match self {
            Literal::Str(s) => Value::String(s.clone()),
            Literal::Int(i) => json!(i),
            Literal::Timestamp(at) => Value::String(format_timestamp(*at)),
        }
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Str(s.to_string())
    }
}

impl From<String> for Literal {
    fn from(s: String) -> Self {
        Literal::Str(s)
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Int(i)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(at: DateTime<Utc>) -> Self {
        Literal::Timestamp(at)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cmp {
    Eq(Literal),
    Gte(Literal),
    Lte(Literal),
    In(Vec<Literal>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: FieldPath,
    pub cmp: Cmp,
}

/// Conjunction of field conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Literal>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            cmp: Cmp::Eq(value.into()),
        });
        self
    }

    pub fn gte(mut self, field: &str, value: impl Into<Literal>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            cmp: Cmp::Gte(value.into()),
        });
        self
    }

    pub fn lte(mut self, field: &str, value: impl Into<Literal>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            cmp: Cmp::Lte(value.into()),
        });
        self
    }

    pub fn between(self, field: &str, from: impl Into<Literal>, to: impl Into<Literal>) -> Self {
        self.gte(field, from).lte(field, to)
    }

    pub fn is_in<L: Into<Literal>>(mut self, field: &str, values: impl IntoIterator<Item = L>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            cmp: Cmp::In(values.into_iter().map(Into::into).collect()),
        });
        self
    }

    /// Mongo query document. Conditions on the same field merge into one operator object.
    pub fn to_mongo(&self) -> Value {
        let mut fields: Vec<(&str, Vec<&Cmp>)> = Vec::new();
        for condition in &self.conditions {
            match fields.iter_mut().find(|(f, _)| *f == condition.field.as_str()) {
                Some((_, cmps)) => cmps.push(&condition.cmp),
                None => fields.push((condition.field.as_str(), vec![&condition.cmp])),
            }
        }

        let mut query = Map::new();
        for (field, cmps) in fields {
            let value = match cmps.as_slice() {
                [Cmp::Eq(literal)] => literal.to_json(),
                _ => {
                    let mut ops = Map::new();
                    for cmp in cmps {
                        let (op, value) = match cmp {
                            Cmp::Eq(l) => ("$eq", l.to_json()),
                            Cmp::Gte(l) => ("$gte", l.to_json()),
                            Cmp::Lte(l) => ("$lte", l.to_json()),
                            Cmp::In(ls) => ("$in", Value::Array(ls.iter().map(Literal::to_json).collect())),
                        };
                        ops.insert(op.to_string(), value);
                    }
                    Value::Object(ops)
                }
            };
            query.insert(field.to_string(), value);
        }
        Value::Object(query)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: FieldPath,
    pub direction: Direction,
}

impl SortKey {
    pub fn asc(field: &str) -> Self {
        SortKey {
            field: field.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(field: &str) -> Self {
        SortKey {
            field: field.into(),
            direction: Direction::Descending,
        }
    }
}

pub fn sort_to_mongo(keys: &[SortKey]) -> Value {
    let mut sort = Map::new();
    for key in keys {
        sort.insert(key.field.to_string(), json!(key.direction.as_i32()));
    }
    Value::Object(sort)
}

/// Plain document lookup: filter, optional index hint, sort and limit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Filter,
    pub hint: Option<String>,
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
}

/// `$set` / `$push` style modification of a single document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Vec<(FieldPath, Value)>,
    pub push: Vec<(FieldPath, Value)>,
}

impl Update {
    pub fn new() -> Self {
        Update::default()
    }

    pub fn set(mut self, field: &str, value: Value) -> Self {
        self.set.push((field.into(), value));
        self
    }

    pub fn push(mut self, field: &str, value: Value) -> Self {
        self.push.push((field.into(), value));
        self
    }

    pub fn to_mongo(&self) -> Value {
        let mut update = Map::new();
        if !self.set.is_empty() {
            let set: Map<String, Value> = self
                .set
                .iter()
                .map(|(field, value)| (field.to_string(), value.clone()))
                .collect();
            update.insert("$set".to_string(), Value::Object(set));
        }
        if !self.push.is_empty() {
            let push: Map<String, Value> = self
                .push
                .iter()
                .map(|(field, value)| (field.to_string(), value.clone()))
                .collect();
            update.insert("$push".to_string(), Value::Object(push));
        }
        Value::Object(update)
    }

    /// Applies the update in place. Returns whether the document changed.
    /// Intermediate objects are created as needed; pushing onto a non-array value leaves it untouched.
    pub fn apply(&self, doc: &mut Document) -> bool {
        let mut modified = false;

        for (field, value) in &self.set {
            let slot = slot_mut(doc, field);
            if *slot != *value {
                *slot = value.clone();
                modified = true;
            }
        }

        for (field, value) in &self.push {
            let slot = slot_mut(doc, field);
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            if let Value::Array(items) = slot {
                items.push(value.clone());
                modified = true;
            }
        }

        modified
    }
}

fn slot_mut<'d>(doc: &'d mut Document, field: &FieldPath) -> &'d mut Value {
    let (parents, last) = match field.as_str().rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, field.as_str()),
    };

    let mut current = doc;
    for segment in parents.into_iter().flat_map(|p| p.split('.')) {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => unreachable!("entry was just replaced with an object"),
        };
    }
    current.entry(last.to_string()).or_insert(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_filter_merges_range_on_same_field() {
        let filter = Filter::new()
            .between("order.created_at", 1i64, 5i64)
            .eq("customer.id", "C-1");
        assert_eq!(
            filter.to_mongo(),
            json!({
                "order.created_at": {"$gte": 1, "$lte": 5},
                "customer.id": "C-1"
            })
        );
    }

    #[test]
    fn test_filter_renders_in_list() {
        let filter = Filter::new().is_in("order.status", ["paid", "shipped"]);
        assert_eq!(
            filter.to_mongo(),
            json!({"order.status": {"$in": ["paid", "shipped"]}})
        );
    }

    #[test]
    fn test_update_set_replaces_nested_value() {
        let mut d = doc(json!({"order": {"status": "new"}}));
        let modified = Update::new()
            .set("order.status", json!("paid"))
            .apply(&mut d);
        assert!(modified);
        assert_eq!(d["order"]["status"], "paid");
    }

    #[test]
    fn test_update_set_same_value_is_not_a_modification() {
        let mut d = doc(json!({"order": {"status": "paid"}}));
        let modified = Update::new()
            .set("order.status", json!("paid"))
            .apply(&mut d);
        assert!(!modified);
    }

    #[test]
    fn test_update_push_creates_missing_array() {
        let mut d = doc(json!({"order": {}}));
        Update::new()
            .push("order.notes", json!({"text": "a"}))
            .push("order.notes", json!({"text": "b"}))
            .apply(&mut d);
        assert_eq!(d["order"]["notes"], json!([{"text": "a"}, {"text": "b"}]));
    }

    #[test]
    fn test_update_push_onto_scalar_is_ignored() {
        let mut d = doc(json!({"order": {"notes": "oops"}}));
        let modified = Update::new()
            .push("order.notes", json!("x"))
            .apply(&mut d);
        assert!(!modified);
        assert_eq!(d["order"]["notes"], "oops");
    }

    #[test]
    fn test_relative_path() {
        let path = FieldPath::from("order.items.sku");
        assert_eq!(path.relative_to(&"order.items".into()), Some("sku"));
        assert_eq!(path.relative_to(&"order.item".into()), None);
    }
}

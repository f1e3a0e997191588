//! Aggregation pipelines as typed, immutable stage descriptors.

use crate::query::{FieldPath, Filter, Literal, SortKey, sort_to_mongo};
use serde_json::{Map, Value, json};

/// Calendar-day format used when truncating timestamps
pub const DAY_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(FieldPath),
    Literal(Literal),
    /// UTC calendar day (`YYYY-MM-DD`) of a timestamp field
    DayOf(FieldPath),
    Multiply(Vec<Expr>),
    /// `then` when `lhs >= rhs`, otherwise `otherwise`
    IfGte {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    pub fn field(path: &str) -> Self {
        Expr::Field(path.into())
    }

    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Int(value))
    }

    pub fn to_mongo(&self) -> Value {
        match self {
            Expr::Field(path) => Value::String(format!("${}", path)),
            Expr::Literal(literal) => literal.to_json(),
            Expr::DayOf(path) => json!({
                "$dateToString": {
                    "format": DAY_FORMAT,
                    "date": format!("${}", path)
                }
            }),
            Expr::Multiply(factors) => {
                json!({"$multiply": factors.iter().map(Expr::to_mongo).collect::<Vec<_>>()})
            }
            Expr::IfGte {
                lhs,
                rhs,
                then,
                otherwise,
            } => json!({
                "$cond": [
                    {"$gte": [lhs.to_mongo(), rhs.to_mongo()]},
                    then.to_mongo(),
                    otherwise.to_mongo()
                ]
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Expr),
    Avg(Expr),
}

impl Accumulator {
    pub fn count() -> Self {
        Accumulator::Sum(Expr::int(1))
    }

    pub fn to_mongo(&self) -> Value {
        match self {
            Accumulator::Sum(expr) => json!({"$sum": expr.to_mongo()}),
            Accumulator::Avg(expr) => json!({"$avg": expr.to_mongo()}),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    Single(Expr),
    /// Named parts of a composite `_id`
    Compound(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    pub accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Unwind(FieldPath),
    Group(Group),
    Sort(Vec<SortKey>),
    Limit(u64),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Unwind(_) => "$unwind",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
        }
    }

    pub fn to_mongo(&self) -> Value {
        match self {
            Stage::Match(filter) => json!({"$match": filter.to_mongo()}),
            Stage::Unwind(path) => json!({"$unwind": format!("${}", path)}),
            Stage::Group(group) => {
                let mut spec = Map::new();
                let id = match &group.key {
                    GroupKey::Single(expr) => expr.to_mongo(),
                    GroupKey::Compound(parts) => Value::Object(
                        parts
                            .iter()
                            .map(|(name, expr)| (name.clone(), expr.to_mongo()))
                            .collect(),
                    ),
                };
                spec.insert("_id".to_string(), id);
                for (name, accumulator) in &group.accumulators {
                    spec.insert(name.clone(), accumulator.to_mongo());
                }
                json!({"$group": spec})
            }
            Stage::Sort(keys) => json!({"$sort": sort_to_mongo(keys)}),
            Stage::Limit(n) => json!({"$limit": n}),
        }
    }
}

/// Ordered sequence of stages, built fresh for every query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn to_mongo(&self) -> Vec<Value> {
        self.stages.iter().map(Stage::to_mongo).collect()
    }

    /// Compact JSON rendering, used for logging
    pub fn to_json_string(&self) -> String {
        Value::Array(self.to_mongo()).to_string()
    }
}

/// A pipeline bound to the index it must run under.
/// Both the data path and the explain path take this, so a plan always describes the query that would run.
#[derive(Debug, Clone, PartialEq)]
pub struct HintedPipeline {
    pub name: &'static str,
    pub pipeline: Pipeline,
    pub hint: String,
}

impl HintedPipeline {
    pub fn new(name: &'static str, pipeline: Pipeline, hint: &str) -> Self {
        HintedPipeline {
            name,
            pipeline,
            hint: hint.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortKey;

    #[test]
    fn test_group_renders_compound_id_first() {
        let stage = Stage::Group(Group {
            key: GroupKey::Compound(vec![
                ("day".to_string(), Expr::DayOf("order.created_at".into())),
                ("status".to_string(), Expr::field("order.status")),
            ]),
            accumulators: vec![("orders".to_string(), Accumulator::count())],
        });

        let rendered = stage.to_mongo();
        let group = rendered["$group"].as_object().unwrap();
        assert_eq!(group.keys().next().unwrap(), "_id");
        assert_eq!(group["_id"]["status"], "$order.status");
        assert_eq!(group["orders"], json!({"$sum": 1}));
    }

    #[test]
    fn test_day_of_reads_the_date_field_directly() {
        assert_eq!(
            Expr::DayOf("order.created_at".into()).to_mongo(),
            json!({"$dateToString": {"format": "%Y-%m-%d", "date": "$order.created_at"}})
        );
    }

    #[test]
    fn test_cond_renders_as_mongo_cond_array() {
        let expr = Expr::IfGte {
            lhs: Box::new(Expr::field("risk.score")),
            rhs: Box::new(Expr::int(70)),
            then: Box::new(Expr::int(1)),
            otherwise: Box::new(Expr::int(0)),
        };
        assert_eq!(
            expr.to_mongo(),
            json!({"$cond": [{"$gte": ["$risk.score", 70]}, 1, 0]})
        );
    }

    #[test]
    fn test_sort_keeps_key_order() {
        let stage = Stage::Sort(vec![SortKey::desc("revenue"), SortKey::asc("_id")]);
        assert_eq!(
            stage.to_mongo().to_string(),
            r#"{"$sort":{"revenue":-1,"_id":1}}"#
        );
    }

    #[test]
    fn test_pipeline_keeps_stage_order() {
        let pipeline = Pipeline::new()
            .stage(Stage::Unwind("order.items".into()))
            .stage(Stage::Limit(3));
        let names: Vec<_> = pipeline.stages().iter().map(Stage::name).collect();
        assert_eq!(names, vec!["$unwind", "$limit"]);
        assert_eq!(pipeline.to_json_string(), r#"[{"$unwind":"$order.items"},{"$limit":3}]"#);
    }
}

//! Compiles pipelines into a single SQLite statement over the JSON `doc` column.
//!
//! Field paths are embedded as literals rather than bound, so that the expressions in
//! WHERE clauses are the same expressions the collection's indexes were declared on.

use crate::order::format_timestamp;
use crate::pipeline::{Accumulator, Expr, Group, GroupKey, Pipeline, Stage};
use crate::query::{Cmp, FieldPath, Filter, FindQuery, Literal, SortKey};
use crate::store::StoreError;
use rusqlite::types::Value as SqlValue;

/// Alias of the `json_each` join produced by `$unwind`
pub(crate) const UNWIND_ALIAS: &str = "item";

const TABLE_PREFIX: &str = "coll_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputShape {
    /// Columns `(id, doc)`
    Documents,
    /// One column per group output; dotted names nest under their prefix
    Groups,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub shape: OutputShape,
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn json_path(relative: &str) -> String {
    quote_str(&format!("$.{}", relative))
}

/// `json_extract` over the stored document; index definitions use the same expression
pub(crate) fn document_field(path: &FieldPath) -> String {
    format!("json_extract(doc, {})", json_path(path.as_str()))
}

/// Collection tables carry a prefix so that no collection name can shadow the store's own tables
pub(crate) fn table_name(collection: &str) -> String {
    quote_ident(&format!("{}{}", TABLE_PREFIX, collection))
}

/// SQLite index names share one namespace per database, so they carry the collection as a prefix
pub(crate) fn physical_index_name(collection: &str, name: &str) -> String {
    format!("{}.{}", collection, name)
}

fn literal_sql(literal: &Literal) -> String {
    match literal {
        Literal::Str(s) => quote_str(s),
        Literal::Int(i) => i.to_string(),
        Literal::Timestamp(at) => quote_str(&format_timestamp(*at)),
    }
}

fn literal_param(literal: &Literal) -> SqlValue {
    match literal {
        Literal::Str(s) => SqlValue::Text(s.clone()),
        Literal::Int(i) => SqlValue::Integer(*i),
        Literal::Timestamp(at) => SqlValue::Text(format_timestamp(*at)),
    }
}

#[derive(Default)]
struct Scope<'p> {
    unwound: Option<&'p FieldPath>,
}

impl Scope<'_> {
    fn field(&self, path: &FieldPath) -> String {
        if let Some(unwound) = self.unwound {
            if path == unwound {
                return format!("{}.value", UNWIND_ALIAS);
            }
            if let Some(rest) = path.relative_to(unwound) {
                return format!("json_extract({}.value, {})", UNWIND_ALIAS, json_path(rest));
            }
        }
        document_field(path)
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Field(path) => self.field(path),
            Expr::Literal(literal) => literal_sql(literal),
            Expr::DayOf(path) => format!(
                "strftime({}, {})",
                quote_str(crate::pipeline::DAY_FORMAT),
                self.field(path)
            ),
            Expr::Multiply(factors) => {
                let factors: Vec<String> = factors.iter().map(|f| self.expr(f)).collect();
                format!("({})", factors.join(" * "))
            }
            Expr::IfGte {
                lhs,
                rhs,
                then,
                otherwise,
            } => format!(
                "CASE WHEN {} >= {} THEN {} ELSE {} END",
                self.expr(lhs),
                self.expr(rhs),
                self.expr(then),
                self.expr(otherwise)
            ),
        }
    }

    fn filter(&self, filter: &Filter, params: &mut Vec<SqlValue>) -> Vec<String> {
        filter
            .conditions
            .iter()
            .map(|condition| {
                let field = self.field(&condition.field);
                match &condition.cmp {
                    Cmp::Eq(value) => {
                        params.push(literal_param(value));
                        format!("{} = ?", field)
                    }
                    Cmp::Gte(value) => {
                        params.push(literal_param(value));
                        format!("{} >= ?", field)
                    }
                    Cmp::Lte(value) => {
                        params.push(literal_param(value));
                        format!("{} <= ?", field)
                    }
                    // matches nothing, like `$in: []`
                    Cmp::In(values) if values.is_empty() => "0".to_string(),
                    Cmp::In(values) => {
                        params.extend(values.iter().map(literal_param));
                        let placeholders = vec!["?"; values.len()].join(", ");
                        format!("{} IN ({})", field, placeholders)
                    }
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Filtering,
    Grouped,
    Sorted,
    Limited,
}

struct GroupColumns {
    select: Vec<String>,
    group_by: Vec<String>,
    outputs: Vec<String>,
}

fn group_columns(scope: &Scope<'_>, group: &Group) -> GroupColumns {
    let mut columns = GroupColumns {
        select: Vec::new(),
        group_by: Vec::new(),
        outputs: Vec::new(),
    };

    let key_parts: Vec<(String, &Expr)> = match &group.key {
        GroupKey::Single(expr) => vec![("_id".to_string(), expr)],
        GroupKey::Compound(parts) => parts
            .iter()
            .map(|(name, expr)| (format!("_id.{}", name), expr))
            .collect(),
    };
    for (alias, expr) in key_parts {
        let sql = scope.expr(expr);
        columns.select.push(format!("{} AS {}", sql, quote_ident(&alias)));
        columns.group_by.push(sql);
        columns.outputs.push(alias);
    }

    for (name, accumulator) in &group.accumulators {
        let sql = match accumulator {
            Accumulator::Sum(expr) => format!("SUM({})", scope.expr(expr)),
            Accumulator::Avg(expr) => format!("AVG({})", scope.expr(expr)),
        };
        columns.select.push(format!("{} AS {}", sql, quote_ident(name)));
        columns.outputs.push(name.clone());
    }

    columns
}

fn unsupported(message: impl Into<String>) -> StoreError {
    StoreError::UnsupportedPipeline(message.into())
}

/// Supported stage order: `$match`/`$unwind` in any order (one `$unwind`), then optionally
/// `$group`, then optionally `$sort`, then optionally `$limit`.
pub(crate) fn compile_pipeline(
    collection: &str,
    pipeline: &Pipeline,
    hint: Option<&str>,
) -> Result<CompiledQuery, StoreError> {
    let mut scope = Scope::default();
    let mut phase = Phase::Filtering;
    let mut params = Vec::new();
    let mut where_clauses = Vec::new();
    let mut group: Option<GroupColumns> = None;
    let mut order_by: Vec<String> = Vec::new();
    let mut limit: Option<u64> = None;

    for stage in pipeline.stages() {
        match stage {
            Stage::Match(filter) => {
                if phase != Phase::Filtering {
                    return Err(unsupported("$match after $group, $sort or $limit"));
                }
                where_clauses.extend(scope.filter(filter, &mut params));
            }
            Stage::Unwind(path) => {
                if phase != Phase::Filtering || scope.unwound.is_some() {
                    return Err(unsupported("only a single $unwind before $group is supported"));
                }
                scope.unwound = Some(path);
            }
            Stage::Group(spec) => {
                if phase != Phase::Filtering {
                    return Err(unsupported("$group after $group, $sort or $limit"));
                }
                group = Some(group_columns(&scope, spec));
                phase = Phase::Grouped;
            }
            Stage::Sort(keys) => {
                if phase >= Phase::Sorted {
                    return Err(unsupported("$sort after $sort or $limit"));
                }
                order_by = sort_terms(&scope, group.as_ref(), keys)?;
                phase = Phase::Sorted;
            }
            Stage::Limit(n) => {
                if phase == Phase::Limited {
                    return Err(unsupported("multiple $limit stages"));
                }
                limit = Some(*n);
                phase = Phase::Limited;
            }
        }
    }

    let table = table_name(collection);
    let mut sql = String::from("SELECT ");
    let shape = match &group {
        Some(columns) => {
            sql.push_str(&columns.select.join(", "));
            OutputShape::Groups
        }
        None => {
            let doc = match scope.unwound {
                Some(path) => format!(
                    "json_set(doc, {}, CASE WHEN {a}.type IN ('object', 'array') THEN json({a}.value) ELSE {a}.value END)",
                    json_path(path.as_str()),
                    a = UNWIND_ALIAS
                ),
                None => "doc".to_string(),
            };
            sql.push_str(&format!("{}.id, {} AS doc", table, doc));
            OutputShape::Documents
        }
    };

    sql.push_str(&format!(" FROM {}", table));
    if let Some(hint) = hint {
        sql.push_str(&format!(
            " INDEXED BY {}",
            quote_ident(&physical_index_name(collection, hint))
        ));
    }
    if let Some(path) = scope.unwound {
        sql.push_str(&format!(
            ", json_each(doc, {}) AS {}",
            json_path(path.as_str()),
            UNWIND_ALIAS
        ));
    }
    if !where_clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clauses.join(" AND "));
    }
    if let Some(columns) = &group {
        sql.push_str(" GROUP BY ");
        sql.push_str(&columns.group_by.join(", "));
    }
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by.join(", "));
    } else if group.is_none() {
        // natural order is insertion order
        sql.push_str(&format!(" ORDER BY {}.id", table));
    }
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }

    Ok(CompiledQuery { sql, params, shape })
}

fn sort_terms(
    scope: &Scope<'_>,
    group: Option<&GroupColumns>,
    keys: &[SortKey],
) -> Result<Vec<String>, StoreError> {
    keys.iter()
        .map(|key| {
            let term = match group {
                Some(columns) => {
                    if !columns.outputs.iter().any(|o| o == key.field.as_str()) {
                        return Err(unsupported(format!(
                            "$sort on {} which $group does not produce",
                            key.field
                        )));
                    }
                    quote_ident(key.field.as_str())
                }
                None => scope.field(&key.field),
            };
            Ok(format!("{} {}", term, key.direction.sql_keyword()))
        })
        .collect()
}

/// `find` is a `$match` / `$sort` / `$limit` pipeline over whole documents
pub(crate) fn compile_find(collection: &str, query: &FindQuery) -> Result<CompiledQuery, StoreError> {
    let mut pipeline = Pipeline::new().stage(Stage::Match(query.filter.clone()));
    if !query.sort.is_empty() {
        pipeline = pipeline.stage(Stage::Sort(query.sort.clone()));
    }
    if let Some(n) = query.limit {
        pipeline = pipeline.stage(Stage::Limit(n));
    }
    compile_pipeline(collection, &pipeline, query.hint.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortKey;

    #[test]
    fn test_match_compiles_to_indexable_expressions() {
        let pipeline = Pipeline::new().stage(Stage::Match(
            Filter::new()
                .between("order.created_at", "a", "b")
                .is_in("order.status", ["paid"]),
        ));
        let compiled = compile_pipeline("orders", &pipeline, Some("idx_created_status")).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT \"coll_orders\".id, doc AS doc FROM \"coll_orders\" INDEXED BY \"orders.idx_created_status\" \
             WHERE json_extract(doc, '$.order.created_at') >= ? AND json_extract(doc, '$.order.created_at') <= ? \
             AND json_extract(doc, '$.order.status') IN (?) ORDER BY \"coll_orders\".id"
        );
        assert_eq!(compiled.params.len(), 3);
        assert_eq!(compiled.shape, OutputShape::Documents);
    }

    #[test]
    fn test_unwound_fields_read_from_array_element() {
        let pipeline = Pipeline::new()
            .stage(Stage::Unwind("order.items".into()))
            .stage(Stage::Group(Group {
                key: GroupKey::Single(Expr::field("order.items.sku")),
                accumulators: vec![(
                    "units".to_string(),
                    Accumulator::Sum(Expr::field("order.items.quantity")),
                )],
            }));
        let compiled = compile_pipeline("orders", &pipeline, None).unwrap();
        assert!(compiled.sql.contains("json_each(doc, '$.order.items') AS item"));
        assert!(compiled.sql.contains("json_extract(item.value, '$.sku') AS \"_id\""));
        assert!(compiled.sql.contains("SUM(json_extract(item.value, '$.quantity')) AS \"units\""));
        assert_eq!(compiled.shape, OutputShape::Groups);
    }

    #[test]
    fn test_sort_after_group_uses_output_aliases() {
        let pipeline = Pipeline::new()
            .stage(Stage::Group(Group {
                key: GroupKey::Single(Expr::field("order.channel")),
                accumulators: vec![("orders".to_string(), Accumulator::count())],
            }))
            .stage(Stage::Sort(vec![SortKey::desc("orders")]))
            .stage(Stage::Limit(5));
        let compiled = compile_pipeline("orders", &pipeline, None).unwrap();
        assert!(compiled.sql.ends_with("ORDER BY \"orders\" DESC LIMIT 5"));
    }

    #[test]
    fn test_sort_on_unknown_group_output_is_rejected() {
        let pipeline = Pipeline::new()
            .stage(Stage::Group(Group {
                key: GroupKey::Single(Expr::field("order.channel")),
                accumulators: vec![],
            }))
            .stage(Stage::Sort(vec![SortKey::desc("revenue")]));
        assert!(matches!(
            compile_pipeline("orders", &pipeline, None),
            Err(StoreError::UnsupportedPipeline(_))
        ));
    }

    #[test]
    fn test_match_after_group_is_rejected() {
        let pipeline = Pipeline::new()
            .stage(Stage::Group(Group {
                key: GroupKey::Single(Expr::field("order.channel")),
                accumulators: vec![],
            }))
            .stage(Stage::Match(Filter::new().eq("_id", "web")));
        assert!(compile_pipeline("orders", &pipeline, None).is_err());
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let pipeline = Pipeline::new().stage(Stage::Match(
            Filter::new().is_in("order.status", Vec::<&str>::new()),
        ));
        let compiled = compile_pipeline("orders", &pipeline, None).unwrap();
        assert!(compiled.sql.contains("WHERE 0"));
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn test_collection_named_like_the_catalog_gets_its_own_table() {
        let pipeline = Pipeline::new().stage(Stage::Limit(1));
        let compiled = compile_pipeline("store_indexes", &pipeline, None).unwrap();
        assert!(compiled.sql.contains("FROM \"coll_store_indexes\""));
        assert!(!compiled.sql.contains("FROM \"store_indexes\""));
    }

    #[test]
    fn test_string_literals_are_escaped() {
        assert_eq!(quote_str("it's"), "'it''s'");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}

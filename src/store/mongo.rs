//! MongoDB backend.
//!
//! Timestamps cross the store interface in their stored string form. This backend keeps
//! them as BSON dates, so range filters compare dates and `$dateToString` reads the field as is.

use crate::order::{format_timestamp, parse_stored_timestamp};
use crate::pipeline::Pipeline;
use crate::query::{Direction, Filter, FindQuery, Update, sort_to_mongo};
use crate::store::{AggregateOptions, Document, DocumentStore, IndexKey, IndexSpec, StoreError};
use chrono::{DateTime, Utc};
use log::debug;
use mongodb::IndexModel;
use mongodb::bson::{self, Bson, Document as BsonDocument, doc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{
    AggregateOptions as MongoAggregateOptions, FindOptions, Hint, IndexOptions,
};
use mongodb::sync::{Client, Collection, Database};
use serde_json::{Map, Value};

const DUPLICATE_KEY: i32 = 11000;
const INDEX_OPTIONS_CONFLICT: i32 = 85;
const INDEX_KEY_SPECS_CONFLICT: i32 = 86;

const MISSING_HINT_INDEX: &str = "hint provided does not correspond to an existing index";

/// Document store backed by a MongoDB database through the synchronous driver
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).map_err(StoreError::unavailable)?;
        let db = client.database(database);
        // fail early on bad hosts or credentials
        db.run_command(doc! {"ping": 1}, None)
            .map_err(StoreError::unavailable)?;
        Ok(MongoStore { db })
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.db.collection(name)
    }
}

/// Stored timestamp strings become BSON dates; everything else maps one to one
fn to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Bson::Int64(i),
            None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => match parse_stored_timestamp(s) {
            Some(at) => Bson::DateTime(bson::DateTime::from_millis(at.timestamp_millis())),
            None => Bson::String(s.clone()),
        },
        Value::Array(items) => Bson::Array(items.iter().map(to_bson).collect()),
        Value::Object(map) => Bson::Document(to_bson_map(map)),
    }
}

fn to_bson_map(map: &Map<String, Value>) -> BsonDocument {
    map.iter()
        .map(|(key, value)| (key.clone(), to_bson(value)))
        .collect()
}

fn to_bson_document(value: &Value) -> Result<BsonDocument, StoreError> {
    match value {
        Value::Object(map) => Ok(to_bson_map(map)),
        other => Err(StoreError::Serialization(format!(
            "expected a document, got {}",
            other
        ))),
    }
}

fn to_bson_pipeline(pipeline: &Pipeline) -> Result<Vec<BsonDocument>, StoreError> {
    pipeline.to_mongo().iter().map(to_bson_document).collect()
}

/// BSON dates come back in the stored string form
fn from_bson(value: Bson) -> Value {
    match value {
        Bson::DateTime(at) => match DateTime::<Utc>::from_timestamp_millis(at.timestamp_millis()) {
            Some(at) => Value::String(format_timestamp(at)),
            None => Bson::DateTime(at).into_relaxed_extjson(),
        },
        Bson::Document(doc) => Value::Object(from_bson_map(doc)),
        Bson::Array(items) => Value::Array(items.into_iter().map(from_bson).collect()),
        other => other.into_relaxed_extjson(),
    }
}

fn from_bson_map(doc: BsonDocument) -> Document {
    doc.into_iter()
        .map(|(key, value)| (key, from_bson(value)))
        .collect()
}

/// Name of the missing index when `message` is the server's complaint about `hint`
fn missing_hint_index(message: &str, hint: Option<&str>) -> Option<String> {
    match hint {
        Some(hint) if message.contains(MISSING_HINT_INDEX) => Some(hint.to_string()),
        _ => None,
    }
}

fn classify(err: mongodb::error::Error) -> StoreError {
    classify_with_hint(err, None)
}

/// Maps driver failures onto the store taxonomy. `hint` is the index the failed command was told to use.
fn classify_with_hint(err: mongodb::error::Error, hint: Option<&str>) -> StoreError {
    let (code, message) = match err.kind.as_ref() {
        ErrorKind::Command(command) => (Some(command.code), command.message.clone()),
        ErrorKind::Write(WriteFailure::WriteError(write)) => (Some(write.code), write.message.clone()),
        ErrorKind::BulkWrite(failure) => {
            let first = failure
                .write_errors
                .as_ref()
                .and_then(|errors| errors.first());
            (first.map(|e| e.code), first.map(|e| e.message.clone()).unwrap_or_default())
        }
        ErrorKind::ServerSelection { .. } | ErrorKind::Authentication { .. } | ErrorKind::Io(_) => {
            return StoreError::unavailable(err);
        }
        _ => (None, String::new()),
    };

    if code == Some(DUPLICATE_KEY) {
        return StoreError::DuplicateKey(Box::new(err));
    }
    match missing_hint_index(&message, hint) {
        Some(name) => StoreError::IndexNotFound {
            name,
            source: Box::new(err),
        },
        None => StoreError::Mongo(err),
    }
}

impl DocumentStore for MongoStore {
    fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        let model = IndexModel::builder()
            .keys(to_bson_document(&index.keys_to_json())?)
            .options(
                IndexOptions::builder()
                    .name(index.name.clone())
                    .unique(index.unique)
                    .build(),
            )
            .build();

        match self.collection(collection).create_index(model, None) {
            Ok(_) => {
                debug!("Ensured index {}.{}", collection, index.name);
                Ok(())
            }
            Err(err) => match err.kind.as_ref() {
                ErrorKind::Command(command)
                    if command.code == INDEX_OPTIONS_CONFLICT
                        || command.code == INDEX_KEY_SPECS_CONFLICT =>
                {
                    Err(StoreError::IndexConflict {
                        name: index.name.clone(),
                    })
                }
                _ => Err(classify(err)),
            },
        }
    }

    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        let cursor = self
            .collection(collection)
            .list_indexes(None)
            .map_err(classify)?;

        let mut indexes = Vec::new();
        for model in cursor {
            let model = model.map_err(classify)?;
            let options = model.options.unwrap_or_default();
            let Some(name) = options.name else { continue };
            if name == "_id_" {
                continue;
            }
            let keys = model
                .keys
                .iter()
                .filter_map(|(field, direction)| {
                    let direction = match direction {
                        Bson::Int32(d) => Direction::from_i32(i64::from(*d)),
                        Bson::Int64(d) => Direction::from_i32(*d),
                        Bson::Double(d) => Direction::from_i32(*d as i64),
                        _ => None,
                    }?;
                    Some(IndexKey {
                        field: field.as_str().into(),
                        direction,
                    })
                })
                .collect();
            indexes.push(IndexSpec {
                name,
                keys,
                unique: options.unique.unwrap_or(false),
            });
        }
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(indexes)
    }

    fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.collection(collection).drop(None).map_err(classify)
    }

    fn insert_many(&self, collection: &str, docs: &[Document]) -> Result<usize, StoreError> {
        if docs.is_empty() {
            return Ok(0);
        }
        let docs: Vec<BsonDocument> = docs.iter().map(to_bson_map).collect();
        let result = self
            .collection(collection)
            .insert_many(docs, None)
            .map_err(classify)?;
        Ok(result.inserted_ids.len())
    }

    fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        options: &AggregateOptions,
    ) -> Result<Vec<Document>, StoreError> {
        let stages = to_bson_pipeline(pipeline)?;
        let hint = options.hint.as_str();
        let options = MongoAggregateOptions::builder()
            .hint(Hint::Name(hint.to_string()))
            .allow_disk_use(options.allow_disk_use)
            .build();

        let cursor = self
            .collection(collection)
            .aggregate(stages, options)
            .map_err(|e| classify_with_hint(e, Some(hint)))?;
        cursor
            .map(|doc| {
                doc.map(from_bson_map)
                    .map_err(|e| classify_with_hint(e, Some(hint)))
            })
            .collect()
    }

    fn explain_aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        hint: &str,
    ) -> Result<Value, StoreError> {
        let command = doc! {
            "aggregate": collection,
            "pipeline": to_bson_pipeline(pipeline)?,
            "cursor": {},
            "hint": hint,
            "explain": true,
        };
        let plan = self
            .db
            .run_command(command, None)
            .map_err(|e| classify_with_hint(e, Some(hint)))?;
        Ok(Value::Object(from_bson_map(plan)))
    }

    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError> {
        let mut options = FindOptions::builder()
            .projection(doc! {"_id": 0})
            .build();
        if let Some(hint) = &query.hint {
            options.hint = Some(Hint::Name(hint.clone()));
        }
        if !query.sort.is_empty() {
            options.sort = Some(to_bson_document(&sort_to_mongo(&query.sort))?);
        }
        options.limit = query.limit.map(|n| n as i64);

        let hint = query.hint.as_deref();
        let cursor = self
            .collection(collection)
            .find(to_bson_document(&query.filter.to_mongo())?, options)
            .map_err(|e| classify_with_hint(e, hint))?;
        cursor
            .map(|doc| doc.map(from_bson_map).map_err(|e| classify_with_hint(e, hint)))
            .collect()
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<bool, StoreError> {
        let result = self
            .collection(collection)
            .update_one(
                to_bson_document(&filter.to_mongo())?,
                to_bson_document(&update.to_mongo())?,
                None,
            )
            .map_err(classify)?;
        Ok(result.modified_count > 0)
    }

    fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        self.collection(collection)
            .count_documents(None, None)
            .map_err(classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Accumulator, Expr, Group, GroupKey, Stage};
    use chrono::TimeZone;
    use serde_json::json;

    fn millis(y: i32, m: u32, d: u32, h: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().timestamp_millis()
    }

    #[test]
    fn test_stored_timestamps_become_dates() {
        let doc = to_bson_document(&json!({
            "order_id": "ORD-1",
            "order": {
                "created_at": "2025-06-01T10:00:00.000Z",
                "timeline": [{"status": "paid", "at": "2025-06-02T10:00:00.000Z"}],
                "total": {"amount": 12.5}
            },
            "note": "2025-06-01"
        }))
        .unwrap();

        let order = doc.get_document("order").unwrap();
        assert_eq!(
            order.get("created_at"),
            Some(&Bson::DateTime(bson::DateTime::from_millis(millis(2025, 6, 1, 10))))
        );
        let timeline = order.get_array("timeline").unwrap();
        assert!(matches!(
            timeline[0].as_document().unwrap().get("at"),
            Some(Bson::DateTime(_))
        ));
        assert_eq!(doc.get_str("note").unwrap(), "2025-06-01");
        assert_eq!(doc.get_str("order_id").unwrap(), "ORD-1");
    }

    #[test]
    fn test_dates_read_back_in_stored_form() {
        let original = json!({
            "order": {
                "created_at": "2025-06-01T10:00:00.000Z",
                "status_changed_at": null,
                "items": [{"sku": "SKU-1", "quantity": 2}]
            }
        });
        let doc = to_bson_document(&original).unwrap();
        assert_eq!(Value::Object(from_bson_map(doc)), original);
    }

    #[test]
    fn test_range_filter_compares_dates() {
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 1, 31, 23, 0, 0).unwrap();
        let filter = Filter::new().between("order.created_at", from, to);

        let rendered = to_bson_document(&filter.to_mongo()).unwrap();
        let range = rendered.get_document("order.created_at").unwrap();
        assert_eq!(
            range.get("$gte"),
            Some(&Bson::DateTime(bson::DateTime::from_millis(from.timestamp_millis())))
        );
        assert_eq!(
            range.get("$lte"),
            Some(&Bson::DateTime(bson::DateTime::from_millis(to.timestamp_millis())))
        );
    }

    #[test]
    fn test_update_sets_dates() {
        let update = Update::new()
            .set("order.status_changed_at", json!("2025-06-03T08:00:00.000Z"))
            .push("order.notes", json!({"text": "hi", "at": "2025-06-03T08:00:00.000Z"}));
        let rendered = to_bson_document(&update.to_mongo()).unwrap();
        assert!(matches!(
            rendered.get_document("$set").unwrap().get("order.status_changed_at"),
            Some(Bson::DateTime(_))
        ));
        let note = rendered.get_document("$push").unwrap().get_document("order.notes").unwrap();
        assert!(matches!(note.get("at"), Some(Bson::DateTime(_))));
    }

    #[test]
    fn test_day_grouping_reads_the_date_field() {
        let pipeline = Pipeline::new().stage(Stage::Group(Group {
            key: GroupKey::Single(Expr::DayOf("order.created_at".into())),
            accumulators: vec![("orders".to_string(), Accumulator::count())],
        }));
        let stages = to_bson_pipeline(&pipeline).unwrap();
        let day = stages[0]
            .get_document("$group")
            .unwrap()
            .get_document("_id")
            .unwrap()
            .get_document("$dateToString")
            .unwrap();
        assert_eq!(day.get_str("date").unwrap(), "$order.created_at");
    }

    #[test]
    fn test_missing_hint_reports_the_hint_name() {
        let message = "error processing query: ns=shop.customer_orders planner returned error :: \
                       caused by :: hint provided does not correspond to an existing index";
        assert_eq!(
            missing_hint_index(message, Some("idx_created_status")),
            Some("idx_created_status".to_string())
        );
        assert_eq!(missing_hint_index(message, None), None);
        assert_eq!(
            missing_hint_index("E11000 duplicate key error", Some("idx_created_status")),
            None
        );
    }

    #[test]
    fn test_non_document_is_rejected() {
        assert!(matches!(
            to_bson_document(&json!([1, 2])),
            Err(StoreError::Serialization(_))
        ));
    }
}

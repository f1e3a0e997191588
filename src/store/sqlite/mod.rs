mod compile;
mod explain;

use crate::pipeline::{Pipeline, Stage};
use crate::query::{Direction, Filter, FindQuery, Update};
use crate::store::connection::init_connection;
use crate::store::{AggregateOptions, Document, DocumentStore, IndexKey, IndexSpec, StoreError};
use compile::{CompiledQuery, OutputShape, compile_find, compile_pipeline, document_field, physical_index_name, quote_ident, table_name};
use explain::{PlanRow, plan_document};
use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde_json::{Map, Value};

// `PRAGMA temp_store` values
const TEMP_STORE_FILE: i64 = 1;
const TEMP_STORE_MEMORY: i64 = 2;

/// Document store over SQLite's JSON functions: one table per collection, one JSON document per row
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &str) -> Result<Self, StoreError> {
        let conn = init_connection(db_path)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Collections come into existence on first use
    fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                doc TEXT NOT NULL CHECK (json_valid(doc))
            )",
            table_name(collection)
        ))?;
        Ok(())
    }

    fn catalog_entry(&self, collection: &str, name: &str) -> Result<Option<IndexSpec>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT name, keys, is_unique FROM store_indexes WHERE collection = ?1 AND name = ?2",
                params![collection, name],
                catalog_row,
            )
            .optional()?;
        row.map(|(name, keys, unique)| index_from_catalog(name, &keys, unique))
            .transpose()
    }

    fn query_documents(&self, collection: &str, compiled: &CompiledQuery) -> Result<Vec<Document>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&compiled.sql)
            .map_err(|e| classify(e, collection))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(compiled.params.iter()))?;

        let mut docs = Vec::new();
        while let Some(row) = rows.next()? {
            let doc = match compiled.shape {
                OutputShape::Documents => {
                    let text: String = row.get(1)?;
                    serde_json::from_str(&text)?
                }
                OutputShape::Groups => group_row(row, &columns)?,
            };
            docs.push(doc);
        }
        Ok(docs)
    }
}

fn catalog_row(row: &Row) -> rusqlite::Result<(String, String, bool)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn index_from_catalog(name: String, keys: &str, unique: bool) -> Result<IndexSpec, StoreError> {
    let pairs: Vec<(String, i64)> = serde_json::from_str(keys)?;
    let keys = pairs
        .into_iter()
        .map(|(field, direction)| {
            let direction = Direction::from_i32(direction).ok_or_else(|| {
                StoreError::Serialization(format!("bad direction {} in index {}", direction, name))
            })?;
            Ok(IndexKey {
                field: field.as_str().into(),
                direction,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(IndexSpec { name, keys, unique })
}

fn index_to_catalog(index: &IndexSpec) -> Result<String, StoreError> {
    let pairs: Vec<(&str, i32)> = index
        .keys
        .iter()
        .map(|key| (key.field.as_str(), key.direction.as_i32()))
        .collect();
    Ok(serde_json::to_string(&pairs)?)
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

/// Group outputs named `_id.day` nest as `{"_id": {"day": ..}}`
fn group_row(row: &Row, columns: &[String]) -> rusqlite::Result<Document> {
    let mut doc = Document::new();
    for (i, name) in columns.iter().enumerate() {
        let value = sql_to_json(row.get_ref(i)?);
        match name.split_once('.') {
            Some((parent, child)) => {
                let entry = doc
                    .entry(parent.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(fields) = entry {
                    fields.insert(child.to_string(), value);
                }
            }
            None => {
                doc.insert(name.clone(), value);
            }
        }
    }
    Ok(doc)
}

/// Maps SQLite failures onto the store taxonomy, keeping the original error as the source
fn classify(err: rusqlite::Error, collection: &str) -> StoreError {
    let missing_index = match &err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message
            .strip_prefix("no such index:")
            .map(|name| name.trim().to_string()),
        _ => None,
    };
    if let Some(physical) = missing_index {
        let prefix = format!("{}.", collection);
        let name = physical
            .strip_prefix(&prefix)
            .unwrap_or(&physical)
            .to_string();
        return StoreError::IndexNotFound {
            name,
            source: Box::new(err),
        };
    }

    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::DuplicateKey(Box::new(err))
        }
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::NotADatabase
                    | rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::PermissionDenied
            ) =>
        {
            StoreError::unavailable(err)
        }
        _ => StoreError::Query(err),
    }
}

impl DocumentStore for SqliteStore {
    fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.ensure_collection(collection)?;

        if let Some(existing) = self.catalog_entry(collection, &index.name)? {
            if existing == *index {
                debug!("Index {}.{} already present", collection, index.name);
                return Ok(());
            }
            return Err(StoreError::IndexConflict {
                name: index.name.clone(),
            });
        }

        let columns: Vec<String> = index
            .keys
            .iter()
            .map(|key| format!("{} {}", document_field(&key.field), key.direction.sql_keyword()))
            .collect();
        let sql = format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            quote_ident(&physical_index_name(collection, &index.name)),
            table_name(collection),
            columns.join(", ")
        );

        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&sql).map_err(|e| classify(e, collection))?;
        tx.execute(
            "INSERT INTO store_indexes (collection, name, keys, is_unique) VALUES (?1, ?2, ?3, ?4)",
            params![collection, index.name, index_to_catalog(index)?, index.unique],
        )?;
        tx.commit()?;

        debug!("Created index {}.{}", collection, index.name);
        Ok(())
    }

    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, keys, is_unique FROM store_indexes WHERE collection = ?1 ORDER BY name",
        )?;
        let rows = stmt
            .query_map([collection], catalog_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(name, keys, unique)| index_from_catalog(name, &keys, unique))
            .collect()
    }

    fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", table_name(collection)))?;
        tx.execute("DELETE FROM store_indexes WHERE collection = ?1", [collection])?;
        tx.commit()?;
        debug!("Dropped collection {}", collection);
        Ok(())
    }

    fn insert_many(&self, collection: &str, docs: &[Document]) -> Result<usize, StoreError> {
        if docs.is_empty() {
            return Ok(0);
        }
        self.ensure_collection(collection)?;

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (doc) VALUES (?1)",
                table_name(collection)
            ))?;
            for doc in docs {
                let text = serde_json::to_string(doc)?;
                stmt.execute([text]).map_err(|e| classify(e, collection))?;
            }
        }
        tx.commit()?;

        debug!("Inserted {} documents into {}", docs.len(), collection);
        Ok(docs.len())
    }

    fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        options: &AggregateOptions,
    ) -> Result<Vec<Document>, StoreError> {
        self.ensure_collection(collection)?;
        let temp_store = if options.allow_disk_use {
            TEMP_STORE_FILE
        } else {
            TEMP_STORE_MEMORY
        };
        self.conn.pragma_update(None, "temp_store", temp_store)?;

        let compiled = compile_pipeline(collection, pipeline, Some(&options.hint))?;
        debug!("aggregate {}: {}", collection, compiled.sql);
        self.query_documents(collection, &compiled)
    }

    fn explain_aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        hint: &str,
    ) -> Result<Value, StoreError> {
        self.ensure_collection(collection)?;
        let compiled = compile_pipeline(collection, pipeline, Some(hint))?;
        debug!("explain {}: {}", collection, compiled.sql);

        let mut stmt = self
            .conn
            .prepare(&format!("EXPLAIN QUERY PLAN {}", compiled.sql))
            .map_err(|e| classify(e, collection))?;
        let rows = stmt
            .query_map(params_from_iter(compiled.params.iter()), |row| {
                Ok(PlanRow {
                    id: row.get(0)?,
                    parent: row.get(1)?,
                    detail: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(plan_document(&rows, collection, hint, &compiled.sql))
    }

    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError> {
        self.ensure_collection(collection)?;
        let compiled = compile_find(collection, query)?;
        debug!("find {}: {}", collection, compiled.sql);
        self.query_documents(collection, &compiled)
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<bool, StoreError> {
        self.ensure_collection(collection)?;
        let pipeline = Pipeline::new()
            .stage(Stage::Match(filter.clone()))
            .stage(Stage::Limit(1));
        let compiled = compile_pipeline(collection, &pipeline, None)?;

        let found = self
            .conn
            .query_row(&compiled.sql, params_from_iter(compiled.params.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        let Some((id, text)) = found else {
            return Ok(false);
        };

        let mut doc: Document = serde_json::from_str(&text)?;
        if !update.apply(&mut doc) {
            return Ok(false);
        }
        self.conn
            .execute(
                &format!("UPDATE {} SET doc = ?1 WHERE id = ?2", table_name(collection)),
                params![serde_json::to_string(&doc)?, id],
            )
            .map_err(|e| classify(e, collection))?;
        Ok(true)
    }

    fn count_documents(&self, collection: &str) -> Result<u64, StoreError> {
        self.ensure_collection(collection)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table_name(collection)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

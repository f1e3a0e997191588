pub mod connection;
#[cfg(feature = "mongo")]
pub mod mongo;
pub mod sqlite;

use crate::pipeline::Pipeline;
use crate::query::{Direction, FieldPath, Filter, FindQuery, Update};
use thiserror::Error;

#[cfg(feature = "mongo")]
pub use mongo::MongoStore;
pub use sqlite::SqliteStore;

/// A stored document: a JSON object
pub type Document = serde_json::Map<String, serde_json::Value>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: BoxError,
    },
    #[error("index not found: {name}")]
    IndexNotFound {
        name: String,
        #[source]
        source: BoxError,
    },
    #[error("index {name} already exists with a different definition")]
    IndexConflict { name: String },
    #[error("duplicate key")]
    DuplicateKey(#[source] BoxError),
    #[error("unsupported pipeline: {0}")]
    UnsupportedPipeline(String),
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[cfg(feature = "mongo")]
    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),
}

impl StoreError {
    pub(crate) fn unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Unavailable {
            message: err.to_string(),
            source: Box::new(err),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexKey {
    pub field: FieldPath,
    pub direction: Direction,
}

/// Named, ordered list of (field, direction) pairs
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<IndexKey>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: &str) -> Self {
        IndexSpec {
            name: name.to_string(),
            keys: Vec::new(),
            unique: false,
        }
    }

    pub fn asc(mut self, field: &str) -> Self {
        self.keys.push(IndexKey {
            field: field.into(),
            direction: Direction::Ascending,
        });
        self
    }

    pub fn desc(mut self, field: &str) -> Self {
        self.keys.push(IndexKey {
            field: field.into(),
            direction: Direction::Descending,
        });
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Key pattern as Mongo writes it, e.g. `{"order.created_at": -1, "order.status": 1}`
    pub fn keys_to_json(&self) -> serde_json::Value {
        let keys: Document = self
            .keys
            .iter()
            .map(|key| {
                (
                    key.field.to_string(),
                    serde_json::Value::from(key.direction.as_i32()),
                )
            })
            .collect();
        serde_json::Value::Object(keys)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOptions {
    pub hint: String,
    /// Whether the store may spill intermediate results out of memory
    pub allow_disk_use: bool,
}

/// Command interface of the document store the repository runs against
pub trait DocumentStore {
    /// Idempotent: an identical definition under the same name is a no-op
    fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError>;

    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError>;

    /// Drops documents and indexes. A missing collection is not an error.
    fn drop_collection(&self, collection: &str) -> Result<(), StoreError>;

    fn insert_many(&self, collection: &str, docs: &[Document]) -> Result<usize, StoreError>;

    fn aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        options: &AggregateOptions,
    ) -> Result<Vec<Document>, StoreError>;

    /// Plan the store would use for `pipeline` under `hint`, without running it for data
    fn explain_aggregate(
        &self,
        collection: &str,
        pipeline: &Pipeline,
        hint: &str,
    ) -> Result<serde_json::Value, StoreError>;

    fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Document>, StoreError>;

    /// Modifies the first matching document; returns whether anything changed
    fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<bool, StoreError>;

    fn count_documents(&self, collection: &str) -> Result<u64, StoreError>;
}

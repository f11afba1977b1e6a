//! Typed entity persistence over a filtered-query document store.
//!
//! Entities are stored as JSON documents under a `(kind, key)` pair; queries
//! filter on top-level document fields. Timestamps inside documents are
//! serialized as unix seconds so they order correctly as plain numbers in
//! every backend.

pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// The underlying substrate caps a single delete batch; `delete_many`
/// chunks transparently.
pub const MAX_BATCH_DELETE: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity not found")]
    NotFound,
    #[error("store backend: {0}")]
    Backend(String),
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter comparison operators supported by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Lt,
    Gt,
}

impl Op {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Lt => "<",
            Op::Gt => ">",
        }
    }
}

/// A filtered query over one entity kind. Ordering is ascending on the
/// named field.
#[derive(Debug, Clone)]
pub struct Query {
    pub kind: &'static str,
    pub filters: Vec<(&'static str, Op, Value)>,
    pub order: Option<&'static str>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn new(kind: &'static str) -> Self {
        Query {
            kind,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, field: &'static str, op: Op, value: impl Into<Value>) -> Self {
        self.filters.push((field, op, value.into()));
        self
    }

    pub fn order(mut self, field: &'static str) -> Self {
        self.order = Some(field);
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }
}

/// Document store over `(kind, key, doc)`. "No rows" is an empty result
/// from `run`, distinct from a backend failure; `get` on an absent key is
/// `StoreError::NotFound`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update; `key = None` allocates a fresh one.
    async fn put(&self, kind: &'static str, key: Option<Uuid>, doc: Value) -> StoreResult<Uuid>;
    async fn get(&self, kind: &'static str, key: Uuid) -> StoreResult<Value>;
    async fn run(&self, query: &Query) -> StoreResult<Vec<(Uuid, Value)>>;
    async fn count(&self, query: &Query) -> StoreResult<i64>;
    async fn delete_many(&self, kind: &'static str, keys: &[Uuid]) -> StoreResult<()>;
}

/// A storable type with a fixed kind name.
pub trait Entity: Serialize + DeserializeOwned + Send {
    const KIND: &'static str;
}

pub async fn put_entity<E: Entity + Sync>(
    store: &dyn Store,
    key: Option<Uuid>,
    entity: &E,
) -> StoreResult<Uuid> {
    store.put(E::KIND, key, serde_json::to_value(entity)?).await
}

pub async fn get_entity<E: Entity>(store: &dyn Store, key: Uuid) -> StoreResult<E> {
    Ok(serde_json::from_value(store.get(E::KIND, key).await?)?)
}

/// First match of a query, or `None` on a clean "no rows".
pub async fn query_one<E: Entity>(
    store: &dyn Store,
    query: Query,
) -> StoreResult<Option<(Uuid, E)>> {
    let rows = store.run(&query.limit(1)).await?;
    match rows.into_iter().next() {
        Some((key, doc)) => Ok(Some((key, serde_json::from_value(doc)?))),
        None => Ok(None),
    }
}

pub async fn query_all<E: Entity>(store: &dyn Store, query: &Query) -> StoreResult<Vec<(Uuid, E)>> {
    let rows = store.run(query).await?;
    let mut out = Vec::with_capacity(rows.len());
    for (key, doc) in rows {
        out.push((key, serde_json::from_value(doc)?));
    }
    Ok(out)
}

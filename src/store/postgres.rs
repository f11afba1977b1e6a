//! Postgres store backend: one JSONB table, filters pushed down as
//! `doc -> 'Field'` comparisons. Queries are built at runtime so the crate
//! compiles without a live database.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{Query, Store, StoreError, StoreResult, MAX_BATCH_DELETE};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS entities (\
     kind TEXT NOT NULL, key UUID NOT NULL, doc JSONB NOT NULL, \
     PRIMARY KEY (kind, key))";
const DOC_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS entities_doc_idx ON entities USING gin (doc)";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(backend)?;
        sqlx::query(SCHEMA).execute(&pool).await.map_err(backend)?;
        sqlx::query(DOC_INDEX).execute(&pool).await.map_err(backend)?;
        Ok(PgStore { pool })
    }

    fn where_clause(query: &Query) -> StoreResult<String> {
        let mut sql = String::from(" WHERE kind = $1");
        for (i, (field, op, _)) in query.filters.iter().enumerate() {
            check_field(field)?;
            sql.push_str(&format!(" AND doc->'{}' {} ${}", field, op.sql(), i + 2));
        }
        Ok(sql)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn put(&self, kind: &'static str, key: Option<Uuid>, doc: Value) -> StoreResult<Uuid> {
        let key = key.unwrap_or_else(Uuid::new_v4);
        sqlx::query(
            "INSERT INTO entities (kind, key, doc) VALUES ($1, $2, $3) \
             ON CONFLICT (kind, key) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(kind)
        .bind(key)
        .bind(doc)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(key)
    }

    async fn get(&self, kind: &'static str, key: Uuid) -> StoreResult<Value> {
        let row = sqlx::query("SELECT doc FROM entities WHERE kind = $1 AND key = $2")
            .bind(kind)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match row {
            Some(row) => Ok(row.get("doc")),
            None => Err(StoreError::NotFound),
        }
    }

    async fn run(&self, query: &Query) -> StoreResult<Vec<(Uuid, Value)>> {
        let mut sql = String::from("SELECT key, doc FROM entities");
        sql.push_str(&Self::where_clause(query)?);
        if let Some(field) = query.order {
            check_field(field)?;
            sql.push_str(&format!(" ORDER BY doc->'{}' ASC", field));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut q = sqlx::query(&sql).bind(query.kind);
        for (_, _, value) in &query.filters {
            q = q.bind(value.clone());
        }
        let rows = q.fetch_all(&self.pool).await.map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("key"), row.get("doc")))
            .collect())
    }

    async fn count(&self, query: &Query) -> StoreResult<i64> {
        let mut inner = String::from("SELECT 1 FROM entities");
        inner.push_str(&Self::where_clause(query)?);
        if let Some(limit) = query.limit {
            inner.push_str(&format!(" LIMIT {}", limit));
        }
        let sql = format!("SELECT COUNT(*) FROM ({}) matched", inner);

        let mut q = sqlx::query_scalar::<_, i64>(&sql).bind(query.kind);
        for (_, _, value) in &query.filters {
            q = q.bind(value.clone());
        }
        q.fetch_one(&self.pool).await.map_err(backend)
    }

    async fn delete_many(&self, kind: &'static str, keys: &[Uuid]) -> StoreResult<()> {
        for chunk in keys.chunks(MAX_BATCH_DELETE) {
            sqlx::query("DELETE FROM entities WHERE kind = $1 AND key = ANY($2)")
                .bind(kind)
                .bind(chunk.to_vec())
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }
}

/// Field names come from our own call sites, but they are interpolated into
/// SQL, so reject anything that isn't a plain identifier.
fn check_field(field: &str) -> StoreResult<()> {
    if !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::Backend(format!("bad field name {:?}", field)))
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

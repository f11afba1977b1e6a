//! In-memory store backend. Serves local runs without Postgres and every
//! integration test.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use super::{Op, Query, Store, StoreError, StoreResult};

#[derive(Default)]
pub struct MemStore {
    kinds: DashMap<&'static str, BTreeMap<Uuid, Value>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matching(&self, query: &Query) -> Vec<(Uuid, Value)> {
        let mut rows: Vec<(Uuid, Value)> = match self.kinds.get(query.kind) {
            Some(map) => map
                .iter()
                .filter(|(_, doc)| {
                    query
                        .filters
                        .iter()
                        .all(|(field, op, value)| field_matches(doc, field, *op, value))
                })
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            None => Vec::new(),
        };

        if let Some(field) = query.order {
            // Stable sort keeps key order for ties, so limit 1 is deterministic.
            rows.sort_by(|(_, a), (_, b)| {
                cmp_fields(a.get(field), b.get(field)).unwrap_or(Ordering::Equal)
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }
        rows
    }
}

#[async_trait]
impl Store for MemStore {
    async fn put(&self, kind: &'static str, key: Option<Uuid>, doc: Value) -> StoreResult<Uuid> {
        let key = key.unwrap_or_else(Uuid::new_v4);
        self.kinds.entry(kind).or_default().insert(key, doc);
        Ok(key)
    }

    async fn get(&self, kind: &'static str, key: Uuid) -> StoreResult<Value> {
        self.kinds
            .get(kind)
            .and_then(|map| map.get(&key).cloned())
            .ok_or(StoreError::NotFound)
    }

    async fn run(&self, query: &Query) -> StoreResult<Vec<(Uuid, Value)>> {
        Ok(self.matching(query))
    }

    async fn count(&self, query: &Query) -> StoreResult<i64> {
        Ok(self.matching(query).len() as i64)
    }

    async fn delete_many(&self, kind: &'static str, keys: &[Uuid]) -> StoreResult<()> {
        if let Some(mut map) = self.kinds.get_mut(kind) {
            for key in keys {
                map.remove(key);
            }
        }
        Ok(())
    }
}

fn field_matches(doc: &Value, field: &str, op: Op, value: &Value) -> bool {
    match cmp_fields(doc.get(field), Some(value)) {
        Some(ord) => match op {
            Op::Eq => ord == Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Gt => ord == Ordering::Greater,
        },
        None => false,
    }
}

/// Compare two JSON field values; mismatched or missing types don't order.
fn cmp_fields(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
    match (a?, b?) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

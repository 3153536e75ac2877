// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

//! In-process hash store with the same merge semantics as the Redis script.
//! The store-wide write lock plays the part of Redis' single-threaded script
//! execution.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::{
    error::{Result, StoreError},
    sparse::json_kind,
    store::{HashCommand, HashConnection},
};

type Hashes = HashMap<String, HashMap<String, String>>;

#[derive(Clone, Default)]
pub struct MemoryStore {
    hashes: Arc<RwLock<Hashes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> MemoryConnection {
        MemoryConnection {
            store: self.clone(),
        }
    }

    /// Stores `value` verbatim, bypassing merge semantics
    pub async fn insert_raw(&self, key: &str, id: &str, value: impl Into<String>) {
        let mut hashes = self.hashes.write().await;
        hashes
            .entry(key.to_string())
            .or_default()
            .insert(id.to_string(), value.into());
    }

    pub async fn raw(&self, key: &str, id: &str) -> Option<String> {
        let hashes = self.hashes.read().await;
        hashes.get(key).and_then(|fields| fields.get(id)).cloned()
    }

    /// Number of fields under `key`
    pub async fn len(&self, key: &str) -> usize {
        let hashes = self.hashes.read().await;
        hashes.get(key).map(HashMap::len).unwrap_or(0)
    }
}

pub struct MemoryConnection {
    store: MemoryStore,
}

fn delete(hashes: &mut Hashes, key: &str, id: &str) -> bool {
    let Some(fields) = hashes.get_mut(key) else {
        return false;
    };
    let removed = fields.remove(id).is_some();
    if fields.is_empty() {
        hashes.remove(key);
    }
    removed
}

fn merge(hashes: &mut Hashes, key: &str, id: &str, patch: &str) -> Result<()> {
    let patch = match serde_json::from_str::<Value>(patch) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            return Err(StoreError::StoreCallFailed(
                "ERR merge patch must be a JSON object".to_string(),
            ));
        }
        Err(e) => {
            return Err(StoreError::StoreCallFailed(format!(
                "ERR merge patch is not valid JSON: {}",
                e
            )));
        }
    };

    let mut document = match hashes.get(key).and_then(|fields| fields.get(id)) {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                tracing::warn!(key = %key, id = %id, found = json_kind(&other), "Stored value is not a JSON object");
                return Err(StoreError::StoreCallFailed(
                    "ERR stored value is not a JSON object".to_string(),
                ));
            }
            Err(e) => {
                return Err(StoreError::StoreCallFailed(format!(
                    "ERR stored value is not valid JSON: {}",
                    e
                )));
            }
        },
        None => Map::new(),
    };

    for (field, value) in patch {
        document.insert(field, value);
    }

    let encoded = serde_json::to_string(&document)?;
    hashes
        .entry(key.to_string())
        .or_default()
        .insert(id.to_string(), encoded);
    Ok(())
}

#[async_trait]
impl HashConnection for MemoryConnection {
    async fn hash_get(&mut self, key: &str, id: &str) -> Result<Option<String>> {
        Ok(self.store.raw(key, id).await)
    }

    async fn hash_delete(&mut self, key: &str, id: &str) -> Result<bool> {
        let mut hashes = self.store.hashes.write().await;
        Ok(delete(&mut hashes, key, id))
    }

    async fn hash_merge(&mut self, key: &str, id: &str, patch: &str) -> Result<()> {
        let mut hashes = self.store.hashes.write().await;
        merge(&mut hashes, key, id, patch)
    }

    async fn execute(&mut self, commands: &[HashCommand]) -> Result<()> {
        let mut hashes = self.store.hashes.write().await;
        let mut first_error = None;

        for command in commands {
            let outcome = match command {
                HashCommand::Delete { key, id } => {
                    delete(&mut hashes, key, id);
                    Ok(())
                }
                HashCommand::Merge { key, id, patch } => merge(&mut hashes, key, id, patch),
            };
            if let Err(e) = outcome
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

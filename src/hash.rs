// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

//! Partial updates and reads of JSON objects kept in a hash, addressed by
//! (object key, field id).

use serde::de::DeserializeOwned;

use crate::{
    error::{Result, StoreError},
    sparse::SparseUpdate,
    store::{HashCommand, HashConnection},
};

/// Merges the set fields of `update` into the object at (`key`, `id`) in one
/// atomic step, creating the object if it does not exist yet.
///
/// `None` deletes the object instead.
pub async fn merge_update<C, S>(conn: &mut C, update: Option<&S>, key: &str, id: &str) -> Result<()>
where
    C: HashConnection + ?Sized,
    S: SparseUpdate + ?Sized,
{
    let Some(update) = update else {
        delete(conn, key, id).await?;
        return Ok(());
    };

    let patch = encode_patch(update, key, id)?;

    if let Err(e) = conn.hash_merge(key, id, &patch).await {
        tracing::error!(error = %e, key = %key, id = %id, "Failed to merge update into Redis hash");
        return Err(e);
    }

    tracing::debug!(key = %key, id = %id, "Merged update");
    Ok(())
}

/// Removes the object at (`key`, `id`). Returns whether it existed.
pub async fn delete<C>(conn: &mut C, key: &str, id: &str) -> Result<bool>
where
    C: HashConnection + ?Sized,
{
    match conn.hash_delete(key, id).await {
        Ok(removed) => {
            tracing::debug!(key = %key, id = %id, removed, "Deleted object");
            Ok(removed)
        }
        Err(e) => {
            tracing::error!(error = %e, key = %key, id = %id, "Failed to delete object from Redis hash");
            Err(e)
        }
    }
}

/// Reads the object at (`key`, `id`).
pub async fn get<T, C>(conn: &mut C, key: &str, id: &str) -> Result<T>
where
    T: DeserializeOwned,
    C: HashConnection + ?Sized,
{
    get_optional(conn, key, id)
        .await?
        .ok_or_else(|| StoreError::not_found(key, id))
}

/// Like [`get`], with a missing object reported as `Ok(None)`.
pub async fn get_optional<T, C>(conn: &mut C, key: &str, id: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    C: HashConnection + ?Sized,
{
    let raw = match conn.hash_get(key, id).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Ok(None),
        Err(e) => {
            tracing::error!(error = %e, key = %key, id = %id, "Failed to get object from Redis hash");
            return Err(e);
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(error = %e, key = %key, id = %id, "Failed to deserialize stored object");
            Err(StoreError::DeserializationFailed(e))
        }
    }
}

fn encode_patch<S>(update: &S, key: &str, id: &str) -> Result<String>
where
    S: SparseUpdate + ?Sized,
{
    update
        .to_patch()
        .and_then(|patch| patch.to_json())
        .inspect_err(|e| {
            tracing::warn!(error = %e, key = %key, id = %id, "Refusing to merge malformed sparse update");
        })
}

/// Writes queued for a single round trip. Nothing reaches the store until
/// [`Batch::flush`].
#[derive(Debug, Default)]
pub struct Batch {
    commands: Vec<HashCommand>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the pipelined form of [`merge_update`]. A malformed update is
    /// rejected here and nothing is queued.
    pub fn merge_update<S>(&mut self, update: Option<&S>, key: &str, id: &str) -> Result<()>
    where
        S: SparseUpdate + ?Sized,
    {
        let command = match update {
            None => HashCommand::Delete {
                key: key.to_string(),
                id: id.to_string(),
            },
            Some(update) => HashCommand::Merge {
                key: key.to_string(),
                id: id.to_string(),
                patch: encode_patch(update, key, id)?,
            },
        };
        self.commands.push(command);
        Ok(())
    }

    pub fn delete(&mut self, key: &str, id: &str) {
        self.commands.push(HashCommand::Delete {
            key: key.to_string(),
            id: id.to_string(),
        });
    }

    pub fn commands(&self) -> &[HashCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sends every queued command. The queue is emptied even when a command
    /// fails, since the others may already have been applied.
    pub async fn flush<C>(&mut self, conn: &mut C) -> Result<()>
    where
        C: HashConnection + ?Sized,
    {
        if self.commands.is_empty() {
            return Ok(());
        }

        let commands = std::mem::take(&mut self.commands);
        if let Err(e) = conn.execute(&commands).await {
            tracing::error!(error = %e, commands = commands.len(), "Failed to flush Redis batch");
            return Err(e);
        }

        tracing::debug!(commands = commands.len(), "Flushed Redis batch");
        Ok(())
    }
}

// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

pub mod memory;
pub mod redis_adapter;

use async_trait::async_trait;

use crate::error::Result;

/// A write queued for batched submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashCommand {
    Delete { key: String, id: String },
    Merge { key: String, id: String, patch: String },
}

/// The hash primitives the merge-updater needs from a store connection.
#[async_trait]
pub trait HashConnection: Send {
    /// Raw stored text at (key, id), if any
    async fn hash_get(&mut self, key: &str, id: &str) -> Result<Option<String>>;

    /// Removes (key, id); returns whether it existed
    async fn hash_delete(&mut self, key: &str, id: &str) -> Result<bool>;

    /// Atomically overlays the JSON object `patch` onto the record at
    /// (key, id), creating it if missing
    async fn hash_merge(&mut self, key: &str, id: &str, patch: &str) -> Result<()>;

    /// Submits all commands in one round trip. Each command is applied on its
    /// own; the first failure is reported.
    async fn execute(&mut self, commands: &[HashCommand]) -> Result<()>;
}

// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists at (object key, field id)
    #[error("object {key}/{id} does not exist")]
    NotFound { key: String, id: String },

    /// Transport failure, unexpected reply or a script error reply
    #[error("redis call failed: {0}")]
    StoreCallFailed(String),

    #[error("failed to deserialize object: {0}")]
    DeserializationFailed(#[from] serde_json::Error),

    /// A sparse update or projection target does not have the expected shape
    #[error("sparse update shape violation: {0}")]
    ShapeViolation(String),
}

impl StoreError {
    pub fn not_found(key: &str, id: &str) -> Self {
        Self::NotFound {
            key: key.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreCallFailed(err.to_string())
    }
}

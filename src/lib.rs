// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

//! Atomic partial-field updates for JSON objects stored in Redis hashes.
//!
//! Objects live at (object key, field id): the object key names a hash such
//! as `"orders"`, the field id names one object in it. A sparse update only
//! carries the fields that change, and [`hash::merge_update`] overlays them on
//! the stored object inside a single Lua script, so concurrent writers that
//! touch different fields never lose each other's changes.
//!
//! ```no_run
//! use hashpatch::{SparseUpdate, StoreConfig, hash, pool::RedisPool};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! struct Order {
//!     price: i64,
//!     qty: u32,
//! }
//!
//! #[derive(Default, SparseUpdate)]
//! #[sparse(normal = Order)]
//! struct OrderUpdate {
//!     price: Option<i64>,
//!     qty: Option<u32>,
//! }
//!
//! # async fn run() -> hashpatch::Result<()> {
//! let pool = RedisPool::connect(&StoreConfig::default()).await?;
//! let mut conn = pool.acquire().await?;
//!
//! let update = OrderUpdate { price: Some(12), ..Default::default() };
//! hash::merge_update(&mut conn, Some(&update), "orders", "o1").await?;
//!
//! let order: Order = hash::get(&mut conn, "orders", "o1").await?;
//! # let _ = order;
//! # Ok(())
//! # }
//! ```
//!
//! Every field of a sparse update has to be optional; anything else does not
//! compile:
//!
//! ```compile_fail
//! use hashpatch::SparseUpdate;
//!
//! #[derive(SparseUpdate)]
//! struct OrderUpdate {
//!     price: i64,
//! }
//! ```
//!
//! Nor does a serde option that would store the field under a shape the
//! patch cannot name:
//!
//! ```compile_fail
//! use hashpatch::SparseUpdate;
//! use std::collections::HashMap;
//!
//! #[derive(SparseUpdate)]
//! struct OrderUpdate {
//!     #[serde(flatten)]
//!     extra: Option<HashMap<String, i64>>,
//! }
//! ```

extern crate self as hashpatch;

pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod pool;
pub mod sparse;
pub mod store;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use sparse::{Patch, Projection, SparseUpdate, project, wrap};
pub use sparse_macros::SparseUpdate;
pub use store::{HashCommand, HashConnection, memory::MemoryStore};

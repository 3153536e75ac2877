// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use redis::{Client, IntoConnectionInfo, RedisResult, aio::ConnectionManager};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::timeout,
};

use crate::{
    config::StoreConfig,
    error::{Result, StoreError},
};

/// Bounded pool of Redis connection managers, each bound to the configured
/// database. A manager reconnects on its own, and the client re-selects the
/// database on every reconnect.
///
/// Cloning is cheap and shares the same connections.
#[derive(Clone)]
pub struct RedisPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    client: Client,
    redis_url: String,
    db: i64,
    max_size: usize,
    connect_timeout: Duration,
    idle: Mutex<Vec<ConnectionManager>>,
    permits: Arc<Semaphore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
}

impl RedisPool {
    /// Builds the pool and opens a first connection, so a bad address or an
    /// unselectable database fails here rather than on first use.
    ///
    /// `config.db` takes precedence over a database given in the URL path.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| StoreError::StoreCallFailed(format!("invalid store config: {}", e)))?;

        let mut info = config.redis_url.as_str().into_connection_info()?;
        info.redis.db = config.db;
        let client = Client::open(info)?;

        let inner = Arc::new(PoolInner {
            client,
            redis_url: config.redis_url.clone(),
            db: config.db,
            max_size: config.pool_size,
            connect_timeout: config.connect_timeout(),
            idle: Mutex::new(Vec::with_capacity(config.pool_size)),
            permits: Arc::new(Semaphore::new(config.pool_size)),
        });

        let first = inner.dial().await?;
        inner.release(first);

        tracing::info!(
            redis_url = %config.redis_url,
            db = config.db,
            pool_size = config.pool_size,
            "Redis pool ready"
        );

        Ok(Self { inner })
    }

    /// Borrows a connection, waiting while `pool_size` are already out.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::StoreCallFailed("connection pool is closed".to_string()))?;

        let conn = match self.inner.take_idle() {
            Some(conn) => self.inner.recycle(conn).await?,
            None => self.inner.dial().await?,
        };

        Ok(PooledConnection {
            conn,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            max_size: self.inner.max_size,
            idle: self.inner.idle_list().len(),
            in_use: self.inner.max_size - self.inner.permits.available_permits(),
        }
    }

    pub fn db(&self) -> i64 {
        self.inner.db
    }
}

impl PoolInner {
    /// Opens a connection manager. The client runs `SELECT` as part of every
    /// connection setup, so a rejected database fails the dial.
    async fn dial(&self) -> Result<ConnectionManager> {
        let conn = timeout(self.connect_timeout, self.client.get_connection_manager())
            .await
            .map_err(|_| {
                tracing::error!(redis_url = %self.redis_url, timeout = ?self.connect_timeout, "Redis connection timed out");
                StoreError::StoreCallFailed(format!(
                    "Redis connection timed out after {:?}. Please ensure Redis is running at: {}",
                    self.connect_timeout, self.redis_url
                ))
            })?
            .map_err(|e| {
                tracing::error!(error = %e, redis_url = %self.redis_url, db = self.db, "Failed to connect to Redis");
                StoreError::StoreCallFailed(format!(
                    "Failed to connect to Redis at {} (db {}): {}",
                    self.redis_url, self.db, e
                ))
            })?;

        tracing::debug!(redis_url = %self.redis_url, db = self.db, "Opened Redis connection");
        Ok(conn)
    }

    /// Checks an idle manager with `PING` before lending it out. One that
    /// fails is replaced by a fresh dial, so a caller never gets a connection
    /// that died while idle.
    async fn recycle(&self, mut conn: ConnectionManager) -> Result<ConnectionManager> {
        let ping = timeout(
            self.connect_timeout,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await;

        match ping {
            Ok(Ok(_)) => Ok(conn),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, db = self.db, "Idle Redis connection failed health check, reconnecting");
                self.dial().await
            }
            Err(_) => {
                tracing::warn!(db = self.db, timeout = ?self.connect_timeout, "Idle Redis connection health check timed out, reconnecting");
                self.dial().await
            }
        }
    }

    fn idle_list(&self) -> MutexGuard<'_, Vec<ConnectionManager>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_idle(&self) -> Option<ConnectionManager> {
        self.idle_list().pop()
    }

    fn release(&self, conn: ConnectionManager) {
        self.idle_list().push(conn);
    }
}

/// A connection on loan from [`RedisPool`]. It goes back to the pool on drop.
pub struct PooledConnection {
    conn: ConnectionManager,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub(crate) fn connection(&mut self) -> &mut ConnectionManager {
        &mut self.conn
    }

    /// Converts a command result. The manager reconnects by itself after a
    /// lost connection, so the loss is only logged.
    pub(crate) fn observe<T>(&mut self, result: RedisResult<T>) -> Result<T> {
        result.map_err(|e| {
            if e.is_io_error() || e.is_connection_dropped() {
                tracing::warn!(error = %e, db = self.pool.db, "Redis connection lost");
            }
            StoreError::from(e)
        })
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(self.conn.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_pool() -> Option<RedisPool> {
        let config = StoreConfig {
            connect_timeout_ms: 500,
            ..StoreConfig::default()
        }
        .with_env_overrides();

        match RedisPool::connect(&config).await {
            Ok(pool) => Some(pool),
            Err(err) => {
                eprintln!("Skipping Redis pool tests: {err}");
                None
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_acquire_replaces_connection_killed_while_idle() {
        let Some(pool) = create_pool().await else {
            return;
        };

        let mut victim = pool.acquire().await.unwrap();
        let mut killer = pool.acquire().await.unwrap();
        let victim_id: i64 = redis::cmd("CLIENT")
            .arg("ID")
            .query_async(victim.connection())
            .await
            .unwrap();

        let killed: i64 = redis::cmd("CLIENT")
            .arg("KILL")
            .arg("ID")
            .arg(victim_id)
            .query_async(killer.connection())
            .await
            .unwrap();
        assert_eq!(killed, 1);

        // The last connection released is the next one handed out
        drop(killer);
        drop(victim);

        let mut conn = pool.acquire().await.unwrap();
        let pong: String = redis::cmd("PING")
            .query_async(conn.connection())
            .await
            .unwrap();
        assert_eq!(pong, "PONG");
        assert_eq!(pool.status().in_use, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_database_fails_construction() {
        if create_pool().await.is_none() {
            return;
        }
        let config = StoreConfig {
            db: 100_000,
            connect_timeout_ms: 500,
            ..StoreConfig::default()
        }
        .with_env_overrides();

        let err = RedisPool::connect(&config).await.err().unwrap();
        assert!(matches!(err, StoreError::StoreCallFailed(ref m) if m.contains("db 100000")));
    }
}

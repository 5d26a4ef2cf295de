//! Redis-backed cache backend.
//!
//! # Responsibilities
//! - Share cache state across processes and restarts
//! - Bound every command by a timeout
//! - Classify Redis failures into `CacheError`
//!
//! # Design Decisions
//! - One `ConnectionManager` per process; it reconnects on its own
//! - Expiry is native (`PSETEX`), so reads never see dead entries
//! - Pattern deletes walk `SCAN MATCH` rather than blocking on `KEYS`

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};

use crate::cache::{BackendKind, CacheBackend, CacheError};

const SCAN_BATCH: usize = 200;

pub struct RedisBackend {
    conn: ConnectionManager,
    command_timeout: Duration,
}

impl RedisBackend {
    /// Open a client, establish the managed connection and verify it with PING.
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = match tokio::time::timeout(command_timeout, ConnectionManager::new(client)).await {
            Ok(conn) => conn?,
            Err(_) => return Err(CacheError::Timeout(command_timeout)),
        };

        let backend = Self {
            conn,
            command_timeout,
        };
        backend.ping().await?;
        Ok(backend)
    }

    async fn run<T>(&self, fut: impl Future<Output = RedisResult<T>>) -> Result<T, CacheError> {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout(self.command_timeout)),
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        self.run(async move {
            let value: Option<String> = conn.get(key).await?;
            Ok::<_, redis::RedisError>(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        self.run(async move {
            let _: () = conn.pset_ex(key, value, ttl_ms).await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        self.run(async move {
            let _: () = conn.del(key).await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let mut conn = self.conn.clone();
            let (next, batch): (u64, Vec<String>) = self
                .run(async move {
                    let page: (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    Ok::<_, redis::RedisError>(page)
                })
                .await?;

            if !batch.is_empty() {
                let mut conn = self.conn.clone();
                removed += self
                    .run(async move {
                        let n: u64 = conn.del(batch).await?;
                        Ok::<_, redis::RedisError>(n)
                    })
                    .await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(pattern, removed, "Deleted keys by pattern");
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        self.run(async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(())
        })
        .await
    }
}

//! RedisJobStore - Redis adapter
//!
//! | primitive | command |
//! |---|---|
//! | field_exists | `HEXISTS` |
//! | read_fields | `HMGET` |
//! | execute | `MULTI` / `HSET`, `HDEL`, `LREM key 0 v`, `LPUSH` / `EXEC` |
//! | blocking_move | `BLMOVE src dst RIGHT LEFT timeout` |
//! | list_len | `LLEN` |
//!
//! Blocking moves run on their own connection: a blocking command on the
//! shared multiplexed connection would stall every other caller.
//!
//! `close` sends `CLIENT UNBLOCK <id> ERROR` for that connection (its id is
//! captured at connect time), so a `BLMOVE` still parked on the server fails
//! instead of moving a later item into processing. Both connections are
//! dropped afterwards.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::ports::{Batch, BatchOp, JobStore, StoreError};

pub struct RedisJobStore {
    conn: Mutex<Option<ConnectionManager>>,
    blocking: Mutex<Option<MultiplexedConnection>>,
    /// `CLIENT ID` of the blocking connection.
    blocking_client_id: i64,
}

impl RedisJobStore {
    /// Connect to `redis://host:port/`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let mut blocking = client.get_multiplexed_async_connection().await?;
        let blocking_client_id: i64 = redis::cmd("CLIENT")
            .arg("ID")
            .query_async(&mut blocking)
            .await?;
        debug!(url, blocking_client_id, "connected to redis");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            blocking: Mutex::new(Some(blocking)),
            blocking_client_id,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        self.conn.lock().await.clone().ok_or(StoreError::Closed)
    }
}

fn unblock_command(client_id: i64) -> redis::Cmd {
    let mut cmd = redis::cmd("CLIENT");
    cmd.arg("UNBLOCK").arg(client_id).arg("ERROR");
    cmd
}

fn pipeline(batch: Batch) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic();
    for op in batch.into_ops() {
        match op {
            BatchOp::SetFields { key, fields } => {
                pipe.cmd("HSET").arg(key);
                for (field, value) in fields {
                    pipe.arg(field).arg(value);
                }
                pipe.ignore();
            }
            BatchOp::DeleteField { key, field } => {
                pipe.cmd("HDEL").arg(key).arg(field).ignore();
            }
            BatchOp::RemoveValue { list, value } => {
                pipe.cmd("LREM").arg(list).arg(0).arg(value).ignore();
            }
            BatchOp::Push { list, value } => {
                pipe.cmd("LPUSH").arg(list).arg(value).ignore();
            }
        }
    }
    pipe
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn field_exists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let exists: bool = redis::cmd("HEXISTS")
            .arg(key)
            .arg(field)
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn read_fields(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<String>>, StoreError> {
        let mut conn = self.connection().await?;
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(fields)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn execute(&self, batch: Batch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let () = pipeline(batch).query_async(&mut conn).await?;
        Ok(())
    }

    async fn blocking_move(
        &self,
        source: &str,
        destination: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError> {
        // 0 blocks indefinitely
        let seconds = timeout.map_or(0.0, |t| t.as_secs_f64());
        let mut guard = self.blocking.lock().await;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        let moved: Option<String> = redis::cmd("BLMOVE")
            .arg(source)
            .arg(destination)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(seconds)
            .query_async(conn)
            .await
            .map_err(|err| match err.code() {
                Some("UNBLOCKED") => StoreError::Closed,
                _ => StoreError::from(err),
            })?;
        Ok(moved)
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.connection().await?;
        let len: usize = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.lock().await.clone() else {
            return Ok(());
        };
        // Fail the parked BLMOVE; the blocking lock is free once it returns.
        // Nothing is released until this succeeds, so a failed close can be retried.
        let unblocked: i64 = unblock_command(self.blocking_client_id)
            .query_async(&mut conn)
            .await?;
        if unblocked == 0 {
            debug!("no blocking move pending at close");
        }
        self.conn.lock().await.take();
        if self.blocking.lock().await.take().is_none() {
            warn!("blocking connection already released");
        }
        Ok(())
    }
}

//! Redis [`SharedStore`] backend.
//!
//! [`RedisStore`] maps each primitive onto a single Redis command:
//!
//! | Operation | Command |
//! |-----------|---------|
//! | `ping` | `PING` |
//! | `set_with_expiry` | `SET key value EX ttl` |
//! | `get` / `exists` | `GET` / `EXISTS` |
//! | `delete` | `DEL k1 k2 ...` |
//! | `push_back` / `pop_front` / `list_len` | `RPUSH` / `LPOP` / `LLEN` |
//! | `publish` / `subscribe` | `PUBLISH` / `SUBSCRIBE` |
//!
//! Commands share one [`MultiplexedConnection`], which is cheap to clone; each
//! call clones it so concurrent relays never contend on a lock. Subscriptions
//! open a dedicated pub/sub connection since a subscribed connection cannot
//! issue regular commands.

use super::{RedisTarget, SharedStore, StoreError, Subscription};
use ::redis::AsyncCommands;
use ::redis::aio::MultiplexedConnection;
use async_trait::async_trait;
use core::time::Duration;
use futures::StreamExt;

/// Redis-backed shared store.
#[derive(Clone)]
pub struct RedisStore {
    client: ::redis::Client,
    conn: MultiplexedConnection,
    target: String,
}

impl core::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStore")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to `target` and verifies the connection with `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the client cannot be created, the
    /// connection cannot be established, or the server does not answer.
    pub async fn connect(target: &RedisTarget) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(target.to_url())
            .map_err(|e| backend_error("failed to create Redis client", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| backend_error("failed to connect to Redis", e))?;

        let store = Self {
            client,
            conn,
            target: target.to_string(),
        };
        store.ping().await?;
        Ok(store)
    }

    /// The `host:port/db` this store talks to, without credentials.
    pub fn target(&self) -> &str {
        &self.target
    }
}

fn backend_error(context: &str, err: ::redis::RedisError) -> StoreError {
    StoreError::Backend {
        message: format!("{context}: {err}"),
        source: Some(Box::new(err)),
    }
}

fn command_error(key: &str) -> impl FnOnce(::redis::RedisError) -> StoreError + '_ {
    move |err| {
        if err.code() == Some("WRONGTYPE") {
            StoreError::WrongType {
                key: key.to_string(),
            }
        } else {
            backend_error(&format!("Redis error for key {key}"), err)
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("PING failed", e))?;
        Ok(())
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        // `EX 0` is rejected by Redis.
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key, value, seconds)
            .await
            .map_err(command_error(key))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(command_error(key))?;
        Ok(value)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await.map_err(command_error(key))?;
        Ok(exists)
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let joined = keys.join(" ");
        let removed: usize = conn
            .del(keys.to_vec())
            .await
            .map_err(command_error(&joined))?;
        Ok(removed)
    }

    async fn push_back(&self, key: &str, value: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.rpush(key, value).await.map_err(command_error(key))?;
        Ok(len)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.lpop(key, None).await.map_err(command_error(key))?;
        Ok(value)
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let len: usize = conn.llen(key).await.map_err(command_error(key))?;
        Ok(len)
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let receivers: usize = conn
            .publish(channel, message)
            .await
            .map_err(command_error(channel))?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| backend_error("failed to open pub/sub connection", e))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| backend_error(&format!("SUBSCRIBE {channel} failed"), e))?;

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let payload = msg.get_payload::<String>();
            if let Err(ref _e) = payload {
                tracing::debug!("Dropping non-UTF-8 pub/sub payload: {_e}");
            }
            futures::future::ready(payload.ok())
        });
        Ok(stream.boxed())
    }
}

use std::collections::HashMap;

use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;

/// Pooled Redis access shared by the store and slow-mode backends.
///
/// Commands go through a cloned `ConnectionManager` (it reconnects on its
/// own); pub/sub needs a dedicated connection, opened per subscriber.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisClient {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!(url = %url, "connected to Redis");
        Ok(Self { client, conn })
    }

    pub async fn ping(&self) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await
    }

    /// Runs a pipeline as one `MULTI`/`EXEC` transaction.
    pub async fn exec_atomic(&self, mut pipe: redis::Pipeline) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        pipe.atomic();
        pipe.query_async::<_, ()>(&mut conn).await
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await
    }

    pub async fn run_script<T: redis::FromRedisValue>(
        &self,
        script: &redis::Script,
        keys: &[&str],
        args: &[String],
    ) -> Result<T, redis::RedisError> {
        let mut conn = self.conn.clone();
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(*key);
        }
        for arg in args {
            invocation.arg(arg.as_str());
        }
        invocation.invoke_async(&mut conn).await
    }

    pub async fn del(&self, key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.del(key).await
    }

    /// Opens a dedicated pub/sub connection subscribed to `channel`.
    #[allow(deprecated)]
    pub async fn subscribe(&self, channel: &str) -> Result<PubSub, redis::RedisError> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(channel).await?;
        tracing::info!(channel = %channel, "subscribed to Redis channel");
        Ok(pubsub)
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

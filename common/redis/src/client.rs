use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;

use crate::{Client, CustomRedisError};

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Create a new RedisClient without command or connection timeouts.
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_config(addr, None, None).await
    }

    /// Create a new RedisClient with explicit timeouts.
    ///
    /// `None` means no timeout (blocks indefinitely). Passing `Some(Duration::ZERO)`
    /// is rejected with `CustomRedisError::InvalidConfiguration`.
    ///
    /// ```no_run
    /// use common_redis::RedisClient;
    /// use std::time::Duration;
    ///
    /// # async fn example() {
    /// let client = RedisClient::with_config(
    ///     "redis://localhost:6379/0".to_string(),
    ///     Some(Duration::from_millis(100)),
    ///     Some(Duration::from_millis(5000)),
    /// ).await.unwrap();
    /// # }
    /// ```
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        if response_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis response timeout cannot be Duration::ZERO - use None for no timeout"
                    .to_string(),
            ));
        }
        if connection_timeout.is_some_and(|t| t.is_zero()) {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis connection timeout cannot be Duration::ZERO - use None for no timeout"
                    .to_string(),
            ));
        }

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { connection })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let bytes = self.get_raw_bytes(k).await?;
        Ok(String::from_utf8(bytes)?)
    }

    async fn get_raw_bytes(&self, k: String) -> Result<Vec<u8>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let raw_bytes: Vec<u8> = conn.get(k).await?;

        // nil and empty values both come back as an empty vec
        if raw_bytes.is_empty() {
            return Err(CustomRedisError::NotFound);
        }
        Ok(raw_bytes)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(k, v).await?;
        Ok(())
    }

    async fn set_bytes(
        &self,
        k: String,
        v: Vec<u8>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        match ttl_seconds {
            Some(seconds) => conn.set_ex::<_, _, ()>(k, v, seconds).await?,
            None => conn.set::<_, _, ()>(k, v).await?,
        }
        Ok(())
    }

    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let results = conn.lrange(k, start, stop).await?;
        Ok(results)
    }

    async fn hget(&self, k: String, field: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Option<String> = conn.hget(k, field).await?;

        match result {
            Some(value) => Ok(value),
            None => Err(CustomRedisError::NotFound),
        }
    }

    async fn hgetall(&self, k: String) -> Result<HashMap<String, String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let results = conn.hgetall(k).await?;
        Ok(results)
    }

    async fn hset_nx(
        &self,
        k: String,
        field: String,
        v: String,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let set: bool = conn.hset_nx(k, field, v).await?;
        Ok(set)
    }

    async fn sadd(&self, k: String, member: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let added: i64 = conn.sadd(k, member).await?;
        Ok(added > 0)
    }

    async fn smembers(&self, k: String) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let members = conn.smembers(k).await?;
        Ok(members)
    }

    async fn zrangebyscore(
        &self,
        k: String,
        min: String,
        max: String,
    ) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let results = conn.zrangebyscore(k, min, max).await?;
        Ok(results)
    }

    async fn zremrangebyscore(
        &self,
        k: String,
        min: f64,
        max: f64,
    ) -> Result<u64, CustomRedisError> {
        let mut conn = self.connection.clone();
        let removed = conn.zrembyscore(k, min, max).await?;
        Ok(removed)
    }

    async fn zadd_nx(
        &self,
        k: String,
        member: String,
        score: f64,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();

        // ZADD with NX reports the number of new members, 0 when it already existed
        let added: i64 = redis::cmd("ZADD")
            .arg(&k)
            .arg("NX")
            .arg(score)
            .arg(&member)
            .query_async(&mut conn)
            .await?;

        Ok(added > 0)
    }
}

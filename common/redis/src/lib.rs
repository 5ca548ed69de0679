use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// Re-export ErrorKind and RetryMethod so consumers can construct CustomRedisError in tests
// and decide between retrying and giving up
pub use redis::ErrorKind as RedisErrorKind;
pub use redis::RetryMethod;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl From<std::string::FromUtf8Error> for CustomRedisError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        CustomRedisError::ParseError(err.to_string())
    }
}

impl CustomRedisError {
    /// Create a Redis error from an ErrorKind (primarily for testing)
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }

    /// Determine if this error is unrecoverable and should not be retried
    ///
    /// Configuration errors, parse errors and missing keys are permanent.
    /// Timeouts and transient connection problems are not.
    pub fn is_unrecoverable_error(&self) -> bool {
        match self {
            CustomRedisError::Timeout => false,
            CustomRedisError::InvalidConfiguration(_) => true,
            CustomRedisError::ParseError(_) => true,
            CustomRedisError::NotFound => true,
            CustomRedisError::Redis(err) => {
                Self::is_config_error(err) || err.is_unrecoverable_error()
            }
        }
    }

    fn is_config_error(err: &redis::RedisError) -> bool {
        matches!(
            err.kind(),
            redis::ErrorKind::InvalidClientConfig | redis::ErrorKind::AuthenticationFailed
        )
    }

    /// Determine the appropriate retry strategy for this error.
    /// Delegates to the redis crate for wire-level errors.
    pub fn retry_method(&self) -> RetryMethod {
        match self {
            CustomRedisError::Timeout => RetryMethod::WaitAndRetry,
            CustomRedisError::InvalidConfiguration(_) => RetryMethod::NoRetry,
            CustomRedisError::ParseError(_) => RetryMethod::NoRetry,
            CustomRedisError::NotFound => RetryMethod::NoRetry,
            CustomRedisError::Redis(err) => {
                if Self::is_config_error(err) {
                    RetryMethod::NoRetry
                } else {
                    err.retry_method()
                }
            }
        }
    }
}

/// The subset of redis commands the forwarder and the registry tool need.
///
/// Missing keys on the collection reads (`lrange`, `hgetall`, `smembers`,
/// `zrangebyscore`) yield empty collections, as redis does. Point reads
/// (`get`, `get_raw_bytes`, `hget`) return `CustomRedisError::NotFound`.
#[async_trait]
pub trait Client {
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn get_raw_bytes(&self, k: String) -> Result<Vec<u8>, CustomRedisError>;
    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError>;
    /// Set raw bytes, with an expiry when `ttl_seconds` is given.
    async fn set_bytes(
        &self,
        k: String,
        v: Vec<u8>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CustomRedisError>;

    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError>;

    async fn hget(&self, k: String, field: String) -> Result<String, CustomRedisError>;
    async fn hgetall(&self, k: String) -> Result<HashMap<String, String>, CustomRedisError>;
    /// Set a hash field only if it does not exist yet. Returns whether it was set.
    async fn hset_nx(&self, k: String, field: String, v: String)
        -> Result<bool, CustomRedisError>;

    async fn sadd(&self, k: String, member: String) -> Result<bool, CustomRedisError>;
    async fn smembers(&self, k: String) -> Result<Vec<String>, CustomRedisError>;

    async fn zrangebyscore(
        &self,
        k: String,
        min: String,
        max: String,
    ) -> Result<Vec<String>, CustomRedisError>;
    async fn zremrangebyscore(&self, k: String, min: f64, max: f64)
        -> Result<u64, CustomRedisError>;
    /// `ZADD key NX score member`: adds the member only if it is absent and never
    /// touches the score of an existing member. Returns whether it was added.
    async fn zadd_nx(&self, k: String, member: String, score: f64)
        -> Result<bool, CustomRedisError>;
}

mod client;
mod mock;

pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};

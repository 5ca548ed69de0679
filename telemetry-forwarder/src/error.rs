use common_redis::CustomRedisError;
use thiserror::Error;

/// Errors that stop the forwarder. Dropped or suppressed messages are not
/// errors; they are reported as a pipeline `Outcome`.
#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("store error: {0}")]
    Store(#[from] CustomRedisError),
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("http server error: {0}")]
    Server(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

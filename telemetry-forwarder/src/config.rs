use std::fs;
use std::time::Duration;

use envconfig::Envconfig;

use crate::error::ForwarderError;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "FOR_BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "FOR_BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(from = "FOR_MQTT_HOST", default = "127.0.0.1")]
    pub mqtt_host: String,

    #[envconfig(from = "FOR_MQTT_PORT", default = "1883")]
    pub mqtt_port: u16,

    #[envconfig(from = "FOR_MQTT_BASE_TOPIC", default = "zigbee2mqtt")]
    pub mqtt_base_topic: String,

    #[envconfig(from = "FOR_MQTT_CLIENT_ID", default = "telemetry-forwarder")]
    pub mqtt_client_id: String,

    #[envconfig(from = "FOR_MQTT_KEEP_ALIVE_SECS", default = "60")]
    pub mqtt_keep_alive_secs: u64,

    #[envconfig(from = "FOR_MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    #[envconfig(from = "FOR_MQTT_USERNAME_FILE")]
    pub mqtt_username_file: Option<String>,

    #[envconfig(from = "FOR_MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    #[envconfig(from = "FOR_MQTT_PASSWORD_FILE")]
    pub mqtt_password_file: Option<String>,

    #[envconfig(from = "FOR_REDIS_HOST", default = "localhost")]
    pub redis_host: String,

    #[envconfig(from = "FOR_REDIS_PORT", default = "6379")]
    pub redis_port: u16,

    #[envconfig(from = "FOR_REDIS_DB", default = "0")]
    pub redis_db: u32,

    /// Dedup window and lifetime of queued messages, in seconds.
    #[envconfig(from = "FOR_MSG_TTL", default = "3600")]
    pub msg_ttl: u64,

    #[envconfig(from = "FOR_RESOLVE_IDENTITY_FIRST", default = "false")]
    pub resolve_identity_first: bool,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive_secs)
    }

    /// Username and password for the broker, if any. A `_FILE` variable wins
    /// over the plain one. A password without a username is rejected.
    pub fn mqtt_credentials(&self) -> Result<Option<(String, String)>, ForwarderError> {
        let username = secret(&self.mqtt_username, &self.mqtt_username_file)?;
        let password = secret(&self.mqtt_password, &self.mqtt_password_file)?;

        match (username, password) {
            (Some(username), password) => Ok(Some((username, password.unwrap_or_default()))),
            (None, Some(_)) => Err(ForwarderError::Config(
                "FOR_MQTT_PASSWORD is set without FOR_MQTT_USERNAME".to_string(),
            )),
            (None, None) => Ok(None),
        }
    }

    pub fn validate(&self) -> Result<(), ForwarderError> {
        if self.msg_ttl == 0 {
            return Err(ForwarderError::Config(
                "FOR_MSG_TTL must be greater than zero".to_string(),
            ));
        }
        if self.mqtt_keep_alive_secs == 0 {
            return Err(ForwarderError::Config(
                "FOR_MQTT_KEEP_ALIVE_SECS must be greater than zero".to_string(),
            ));
        }
        self.mqtt_credentials()?;
        Ok(())
    }
}

fn secret(value: &Option<String>, file: &Option<String>) -> Result<Option<String>, ForwarderError> {
    match file {
        Some(path) => fs::read_to_string(path)
            .map(|content| Some(content.trim().to_string()))
            .map_err(|e| ForwarderError::Config(format!("failed to read {path}: {e}"))),
        None => Ok(value.clone()),
    }
}

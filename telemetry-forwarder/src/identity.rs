use std::sync::Arc;

use common_redis::{Client, CustomRedisError};
use tracing::warn;

use crate::device::{DeviceId, WireId};
use crate::keys;

/// Looks up the internal id the registry assigned to a wire id.
#[derive(Clone)]
pub struct DeviceIdentityResolver {
    client: Arc<dyn Client + Send + Sync>,
}

impl DeviceIdentityResolver {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self { client }
    }

    /// `Ok(None)` when the device is not registered, or registered with an id
    /// that is not an integer.
    pub async fn resolve(&self, wire: &WireId) -> Result<Option<DeviceId>, CustomRedisError> {
        let raw = match self
            .client
            .hget(keys::DEVICE_REGISTRY.to_string(), wire.to_string())
            .await
        {
            Ok(raw) => raw,
            Err(CustomRedisError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        match raw.trim().parse::<i64>() {
            Ok(id) => Ok(Some(DeviceId(id))),
            Err(e) => {
                warn!(
                    wire_id = %wire,
                    registered = %raw,
                    error = %e,
                    "registry entry is not an integer id"
                );
                Ok(None)
            }
        }
    }
}

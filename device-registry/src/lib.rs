//! Administration of the wire id to device id registry the forwarder reads.
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use common_redis::{Client, CustomRedisError};
use telemetry_forwarder::device::{DeviceId, WireId};
use telemetry_forwarder::keys;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{0} is not a device address, expected 0x followed by 16 hex digits")]
    InvalidWireId(String),
    #[error("registry entry for {wire_id} is not an integer id: {value}")]
    CorruptEntry { wire_id: String, value: String },
    #[error("store error: {0}")]
    Store(#[from] CustomRedisError),
    #[error("failed to write backup: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize backup: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added(DeviceId),
    AlreadyRegistered(DeviceId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub wire_id: String,
    pub device_id: DeviceId,
    /// The forwarder has queued telemetry for this device at least once.
    pub seen: bool,
}

pub struct DeviceRegistry {
    client: Arc<dyn Client + Send + Sync>,
    key: String,
}

impl DeviceRegistry {
    pub fn new(client: Arc<dyn Client + Send + Sync>, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    /// Registry under the key the forwarder resolves against.
    pub fn standard(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self::new(client, keys::DEVICE_REGISTRY)
    }

    /// Register `raw` with the next free id, one above the highest assigned.
    ///
    /// A device that is already registered keeps its id. The write only
    /// happens when the field is still absent, so a concurrent registration
    /// of the same device is reported instead of overwritten.
    pub async fn add(&self, raw: &str) -> Result<Registration, RegistryError> {
        let wire = parse(raw)?;
        let entries = self.entries().await?;
        if let Some(id) = entries.get(wire.as_str()) {
            return Ok(Registration::AlreadyRegistered(*id));
        }

        let next = entries.values().map(|id| id.0).max().unwrap_or(0) + 1;
        let inserted = self
            .client
            .hset_nx(self.key.clone(), wire.to_string(), next.to_string())
            .await?;
        if !inserted {
            let current = self.lookup(&wire).await?;
            return Ok(Registration::AlreadyRegistered(current));
        }

        info!(wire_id = %wire, device_id = next, "registered device");
        Ok(Registration::Added(DeviceId(next)))
    }

    pub async fn exists(&self, raw: &str) -> Result<bool, RegistryError> {
        let wire = parse(raw)?;
        match self.client.hget(self.key.clone(), wire.to_string()).await {
            Ok(_) => Ok(true),
            Err(CustomRedisError::NotFound) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All registered devices, ordered by id.
    pub async fn list(&self) -> Result<Vec<Entry>, RegistryError> {
        let seen: HashSet<String> = self
            .client
            .smembers(keys::DEVICE_INDEX.to_string())
            .await?
            .into_iter()
            .collect();

        let mut entries: Vec<Entry> = self
            .entries()
            .await?
            .into_iter()
            .map(|(wire_id, device_id)| Entry {
                seen: seen.contains(&device_id.to_string()),
                wire_id,
                device_id,
            })
            .collect();
        entries.sort_by(|a, b| (a.device_id, &a.wire_id).cmp(&(b.device_id, &b.wire_id)));
        Ok(entries)
    }

    /// Write the registry to `path` as one JSON object of wire id to id.
    /// Returns the number of devices written.
    pub async fn backup(&self, path: &Path) -> Result<usize, RegistryError> {
        let raw = self.client.hgetall(self.key.clone()).await?;
        let ordered: BTreeMap<String, String> = raw.into_iter().collect();

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &ordered)?;
        writer.flush()?;

        info!(path = %path.display(), devices = ordered.len(), "wrote registry backup");
        Ok(ordered.len())
    }

    async fn entries(&self) -> Result<BTreeMap<String, DeviceId>, RegistryError> {
        self.client
            .hgetall(self.key.clone())
            .await?
            .into_iter()
            .map(|(wire_id, value)| match value.trim().parse::<i64>() {
                Ok(id) => Ok((wire_id, DeviceId(id))),
                Err(_) => Err(RegistryError::CorruptEntry { wire_id, value }),
            })
            .collect()
    }

    async fn lookup(&self, wire: &WireId) -> Result<DeviceId, RegistryError> {
        let value = self.client.hget(self.key.clone(), wire.to_string()).await?;
        value
            .trim()
            .parse::<i64>()
            .map(DeviceId)
            .map_err(|_| RegistryError::CorruptEntry {
                wire_id: wire.to_string(),
                value,
            })
    }
}

/// Addresses are stored lowercase, the way the gateway publishes them in topics.
fn parse(raw: &str) -> Result<WireId, RegistryError> {
    WireId::parse(&raw.to_ascii_lowercase())
        .ok_or_else(|| RegistryError::InvalidWireId(raw.to_string()))
}

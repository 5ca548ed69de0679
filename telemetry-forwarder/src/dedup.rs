use std::fmt;
use std::sync::Arc;

use common_redis::{Client, CustomRedisError};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::attributes::Attributes;
use crate::device::DeviceId;
use crate::error::ForwarderError;
use crate::keys;
use crate::time::TimeSource;

/// XXH3-64 of a message's encoded bytes. Only used to spot repeats, so
/// collision resistance beyond that is not a concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Fingerprint(xxh3_64(bytes))
    }
}

/// Sixteen lowercase hex digits.
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Canonical msgpack encoding of a message. `Attributes` is ordered, so the
/// same content always yields the same bytes.
pub fn encode_message(message: &Attributes) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec(message)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Stored(Fingerprint),
    /// Already queued within the window; nothing was written.
    Duplicate(Fingerprint),
}

/// A message waiting for downstream consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub device_id: DeviceId,
    pub fingerprint: String,
    pub payload: Vec<u8>,
}

impl QueuedMessage {
    pub fn decode(&self) -> Result<Attributes, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }
}

/// Writes each distinct message of a device at most once per window.
///
/// Per device, a sorted set holds the fingerprints queued recently, scored by
/// the time they were queued. Entries older than the window are pruned before
/// every insert, and the insert itself is an atomic add-if-absent, so a
/// repeat inside the window neither stores a message nor extends its own
/// window.
#[derive(Clone)]
pub struct ContentDedupQueue {
    client: Arc<dyn Client + Send + Sync>,
    clock: Arc<dyn TimeSource + Send + Sync>,
    ttl_seconds: u64,
}

impl ContentDedupQueue {
    pub fn new(
        client: Arc<dyn Client + Send + Sync>,
        clock: Arc<dyn TimeSource + Send + Sync>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            client,
            clock,
            ttl_seconds,
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub async fn enqueue(
        &self,
        device: DeviceId,
        message: &Attributes,
    ) -> Result<EnqueueOutcome, ForwarderError> {
        let payload = encode_message(message)?;
        Ok(self.enqueue_bytes(device, payload).await?)
    }

    pub async fn enqueue_bytes(
        &self,
        device: DeviceId,
        payload: Vec<u8>,
    ) -> Result<EnqueueOutcome, CustomRedisError> {
        let fingerprint = Fingerprint::of(&payload);
        let queue = keys::queue(device);
        let now = self.clock.unix_seconds();

        self.client
            .zremrangebyscore(queue.clone(), 0.0, self.window_start(now))
            .await?;

        let inserted = self
            .client
            .zadd_nx(queue, fingerprint.to_string(), now)
            .await?;
        if !inserted {
            debug!(device_id = %device, %fingerprint, "duplicate within window");
            return Ok(EnqueueOutcome::Duplicate(fingerprint));
        }

        self.client
            .set_bytes(
                keys::message(device, &fingerprint),
                payload,
                Some(self.ttl_seconds),
            )
            .await?;
        Ok(EnqueueOutcome::Stored(fingerprint))
    }

    /// Messages of a device still inside the window, oldest first. Fingerprints
    /// whose message already expired are skipped.
    pub async fn pending(&self, device: DeviceId) -> Result<Vec<QueuedMessage>, CustomRedisError> {
        let cutoff = self.window_start(self.clock.unix_seconds());
        let fingerprints = self
            .client
            .zrangebyscore(keys::queue(device), format!("({cutoff}"), "+inf".to_string())
            .await?;

        let mut messages = Vec::with_capacity(fingerprints.len());
        for fingerprint in fingerprints {
            match self
                .client
                .get_raw_bytes(keys::message(device, &fingerprint))
                .await
            {
                Ok(payload) => messages.push(QueuedMessage {
                    device_id: device,
                    fingerprint,
                    payload,
                }),
                Err(CustomRedisError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    fn window_start(&self, now: f64) -> f64 {
        now - self.ttl_seconds as f64
    }
}

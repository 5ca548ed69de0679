use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use common_redis::Client;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::attributes::{AttrKey, AttributeCodeTable, AttributeNormalizer};
use crate::dedup::{ContentDedupQueue, EnqueueOutcome};
use crate::device::{DeviceId, WireId};
use crate::error::ForwarderError;
use crate::identity::DeviceIdentityResolver;
use crate::keys;
use crate::snapshot::StateDiffEngine;
use crate::time::TimeSource;
use crate::topic::DeviceTopic;

/// Key carrying the internal device id in a queued message. Table codes are
/// never negative and unknown names stay strings, so it cannot collide.
pub const DEVICE_ID_KEY: AttrKey = AttrKey::Code(-1);

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not a per-device telemetry topic.
    IgnoredTopic,
    /// Payload is not a JSON object.
    MalformedPayload,
    /// No attribute changed since the last snapshot.
    Unchanged,
    /// The device is not in the registry. Its snapshot may still have been updated.
    UnknownDevice(WireId),
    Enqueued {
        device_id: DeviceId,
        fingerprint: String,
    },
    /// Same content already queued for this device within the window.
    Duplicate {
        device_id: DeviceId,
        fingerprint: String,
    },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::IgnoredTopic => "ignored_topic",
            Outcome::MalformedPayload => "malformed_payload",
            Outcome::Unchanged => "unchanged",
            Outcome::UnknownDevice(_) => "unknown_device",
            Outcome::Enqueued { .. } => "enqueued",
            Outcome::Duplicate { .. } => "duplicate",
        }
    }
}

/// Runs one message at a time through normalize, diff, resolve and dedup.
pub struct ForwarderPipeline {
    client: Arc<dyn Client + Send + Sync>,
    topics: DeviceTopic,
    normalizer: AttributeNormalizer,
    snapshots: StateDiffEngine,
    resolver: DeviceIdentityResolver,
    queue: ContentDedupQueue,
    resolve_identity_first: bool,
}

impl ForwarderPipeline {
    pub fn new(
        client: Arc<dyn Client + Send + Sync>,
        base_topic: &str,
        ttl_seconds: u64,
        clock: Arc<dyn TimeSource + Send + Sync>,
    ) -> Result<Self, ForwarderError> {
        let topics = DeviceTopic::new(base_topic)
            .map_err(|e| ForwarderError::Config(format!("invalid base topic: {e}")))?;

        Ok(Self {
            topics,
            normalizer: AttributeNormalizer::new(AttributeCodeTable::standard()),
            snapshots: StateDiffEngine::new(client.clone()),
            resolver: DeviceIdentityResolver::new(client.clone()),
            queue: ContentDedupQueue::new(client.clone(), clock, ttl_seconds),
            client,
            resolve_identity_first: false,
        })
    }

    /// Resolve the device id before the snapshot is touched, so telemetry of
    /// unregistered devices leaves no trace in the store.
    pub fn resolve_identity_first(mut self, enabled: bool) -> Self {
        self.resolve_identity_first = enabled;
        self
    }

    pub fn subscription(&self) -> String {
        self.topics.subscription()
    }

    pub fn queue(&self) -> &ContentDedupQueue {
        &self.queue
    }

    pub fn table(&self) -> &AttributeCodeTable {
        self.normalizer.table()
    }

    #[instrument(skip_all, fields(topic = topic))]
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Result<Outcome, ForwarderError> {
        let start = Instant::now();
        let result = self.process(topic, payload).await;

        match &result {
            Ok(outcome) => {
                metrics::counter!("forwarder_messages_total", "outcome" => outcome.label())
                    .increment(1)
            }
            Err(_) => metrics::counter!("forwarder_store_errors_total").increment(1),
        }
        metrics::histogram!("forwarder_message_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        result
    }

    async fn process(&self, topic: &str, payload: &[u8]) -> Result<Outcome, ForwarderError> {
        let Some(wire) = self.topics.wire_id(topic) else {
            return Ok(Outcome::IgnoredTopic);
        };

        let raw = match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(raw)) => raw,
            Ok(_) | Err(_) => {
                debug!(wire_id = %wire, "dropping payload that is not a JSON object");
                return Ok(Outcome::MalformedPayload);
            }
        };

        let disabled = self.disabled_attributes(&wire).await?;
        let normalized = self.normalizer.normalize(raw, &disabled);

        let resolved_early = if self.resolve_identity_first {
            match self.resolver.resolve(&wire).await? {
                Some(device_id) => Some(device_id),
                None => return Ok(self.unknown_device(wire)),
            }
        } else {
            None
        };

        let Some(mut changed) = self.snapshots.apply(&wire, &normalized).await? else {
            return Ok(Outcome::Unchanged);
        };

        // Without resolve_identity_first the snapshot above is already written
        // even when the device turns out to be unregistered.
        let device_id = match resolved_early {
            Some(device_id) => device_id,
            None => match self.resolver.resolve(&wire).await? {
                Some(device_id) => device_id,
                None => return Ok(self.unknown_device(wire)),
            },
        };
        changed.insert(DEVICE_ID_KEY, Value::from(device_id.0));

        self.client
            .sadd(keys::DEVICE_INDEX.to_string(), device_id.to_string())
            .await?;

        let outcome = match self.queue.enqueue(device_id, &changed).await? {
            EnqueueOutcome::Stored(fingerprint) => Outcome::Enqueued {
                device_id,
                fingerprint: fingerprint.to_string(),
            },
            EnqueueOutcome::Duplicate(fingerprint) => Outcome::Duplicate {
                device_id,
                fingerprint: fingerprint.to_string(),
            },
        };
        debug!(wire_id = %wire, device_id = %device_id, outcome = outcome.label(), "processed");
        Ok(outcome)
    }

    async fn disabled_attributes(&self, wire: &WireId) -> Result<HashSet<String>, ForwarderError> {
        let names = self
            .client
            .lrange(keys::disabled_attributes(wire), 0, -1)
            .await?;
        Ok(names.into_iter().collect())
    }

    fn unknown_device(&self, wire: WireId) -> Outcome {
        info!(wire_id = %wire, "telemetry for unregistered device");
        Outcome::UnknownDevice(wire)
    }
}

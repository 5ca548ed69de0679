#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use common_redis::MockRedisClient;
use serde_json::{Map, Value};
use telemetry_forwarder::dedup::QueuedMessage;
use telemetry_forwarder::device::DeviceId;
use telemetry_forwarder::pipeline::ForwarderPipeline;
use telemetry_forwarder::time::TimeSource;
use time::OffsetDateTime;

pub const BASE_TOPIC: &str = "zigbee2mqtt";
pub const REGISTERED: &str = "0x0000000000000001";
pub const UNREGISTERED: &str = "0x00000000000000ff";
pub const TTL: u64 = 3600;

/// A clock that only moves when told to.
pub struct ManualTime {
    now: Mutex<OffsetDateTime>,
}

impl ManualTime {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()),
        }
    }

    pub fn advance(&self, seconds: i64) {
        *self.now.lock().unwrap() += time::Duration::seconds(seconds);
    }
}

impl TimeSource for ManualTime {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }
}

pub struct TestContext {
    pub client: MockRedisClient,
    pub clock: Arc<ManualTime>,
    pub pipeline: ForwarderPipeline,
}

impl TestContext {
    /// A store where `REGISTERED` is device 5 and nothing else is known.
    pub fn new() -> Self {
        Self::with_client(MockRedisClient::new().with_hash_field(
            "lorabridge:device:registry:ieee",
            REGISTERED,
            "5",
        ))
    }

    pub fn with_client(client: MockRedisClient) -> Self {
        let clock = Arc::new(ManualTime::new());
        let pipeline =
            ForwarderPipeline::new(Arc::new(client.clone()), BASE_TOPIC, TTL, clock.clone())
                .unwrap();
        Self {
            client,
            clock,
            pipeline,
        }
    }

    pub async fn pending(&self, device: i64) -> Vec<QueuedMessage> {
        self.pipeline
            .queue()
            .pending(DeviceId(device))
            .await
            .unwrap()
    }

    /// Queued messages of a device with attribute codes mapped back to names.
    pub async fn pending_named(&self, device: i64) -> Vec<Map<String, Value>> {
        self.pending(device)
            .await
            .iter()
            .map(|m| self.pipeline.table().denormalize(&m.decode().unwrap()))
            .collect()
    }
}

pub fn topic(wire: &str) -> String {
    format!("{BASE_TOPIC}/{wire}")
}

pub fn payload(value: Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

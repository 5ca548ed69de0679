use assert_json_diff::assert_json_eq;
use common_redis::{CustomRedisError, MockRedisClient};
use serde_json::{json, Value};
use telemetry_forwarder::attributes::AttrKey;
use telemetry_forwarder::device::DeviceId;
use telemetry_forwarder::error::ForwarderError;
use telemetry_forwarder::pipeline::{Outcome, DEVICE_ID_KEY};
use telemetry_forwarder::snapshot::decode_snapshot;

mod common;
use common::*;

const SNAPSHOT: &str = "lorabridge:device:0x0000000000000001:stats:old";

async fn send(ctx: &TestContext, wire: &str, body: Value) -> Outcome {
    ctx.pipeline
        .handle(&topic(wire), &payload(body))
        .await
        .unwrap()
}

#[tokio::test]
async fn first_reading_is_queued_in_full() {
    let ctx = TestContext::new();

    let outcome = send(&ctx, REGISTERED, json!({"temperature": 21.5, "battery": 80})).await;

    assert!(matches!(
        outcome,
        Outcome::Enqueued {
            device_id: DeviceId(5),
            ..
        }
    ));

    let snapshot = decode_snapshot(&ctx.client.string_value(SNAPSHOT).unwrap()).unwrap();
    assert_eq!(snapshot.get(&AttrKey::Code(95)), Some(&json!(21.5)));
    assert_eq!(snapshot.get(&AttrKey::Code(11)), Some(&json!(80)));
    assert!(!snapshot.contains_key(&DEVICE_ID_KEY));

    let pending = ctx.pending(5).await;
    assert_eq!(pending.len(), 1);
    let message = pending[0].decode().unwrap();
    assert_eq!(message.len(), 3);
    assert_eq!(message.get(&DEVICE_ID_KEY), Some(&json!(5)));
    assert_eq!(pending[0].device_id, DeviceId(5));
    assert_json_eq!(
        Value::Object(ctx.pending_named(5).await.remove(0)),
        json!({"temperature": 21.5, "battery": 80})
    );
    let message_key = format!("lorabridge:device:5:message:{}", pending[0].fingerprint);
    assert_eq!(ctx.client.ttl_of(&message_key), Some(TTL));
}

#[tokio::test]
async fn identical_reading_writes_nothing() {
    let ctx = TestContext::new();
    send(&ctx, REGISTERED, json!({"temperature": 21.5, "battery": 80})).await;
    ctx.client.clear_calls();

    let outcome = send(&ctx, REGISTERED, json!({"battery": 80, "temperature": 21.5})).await;

    assert_eq!(outcome, Outcome::Unchanged);
    assert!(ctx.client.calls_for("set").is_empty());
    assert!(ctx.client.calls_for("set_bytes").is_empty());
    assert!(ctx.client.calls_for("zremrangebyscore").is_empty());
    assert!(ctx.client.calls_for("zadd_nx").is_empty());
    assert!(ctx.client.calls_for("sadd").is_empty());
    assert_eq!(ctx.pending(5).await.len(), 1);
}

#[tokio::test]
async fn changed_reading_queues_only_the_change() {
    let ctx = TestContext::new();
    let first = send(&ctx, REGISTERED, json!({"temperature": 21.5, "battery": 80})).await;

    let second = send(&ctx, REGISTERED, json!({"temperature": 22.0, "battery": 80})).await;

    let (
        Outcome::Enqueued {
            fingerprint: first, ..
        },
        Outcome::Enqueued {
            fingerprint: second,
            ..
        },
    ) = (first, second)
    else {
        panic!("both readings should be queued");
    };
    assert_ne!(first, second);

    let snapshot = decode_snapshot(&ctx.client.string_value(SNAPSHOT).unwrap()).unwrap();
    assert_eq!(snapshot.get(&AttrKey::Code(95)), Some(&json!(22.0)));
    assert_eq!(snapshot.get(&AttrKey::Code(11)), Some(&json!(80)));

    let named = ctx.pending_named(5).await;
    assert_eq!(named.len(), 2);
    assert_json_eq!(
        Value::Object(named[1].clone()),
        json!({"temperature": 22.0})
    );
}

#[tokio::test]
async fn unregistered_device_updates_snapshot_but_queues_nothing() {
    let ctx = TestContext::new();

    let outcome = send(&ctx, UNREGISTERED, json!({"temperature": 19.0})).await;

    assert!(matches!(outcome, Outcome::UnknownDevice(_)));
    let snapshot = ctx
        .client
        .string_value("lorabridge:device:0x00000000000000ff:stats:old")
        .and_then(|raw| decode_snapshot(&raw))
        .unwrap();
    assert_eq!(snapshot.get(&AttrKey::Code(95)), Some(&json!(19.0)));
    let stored = ctx.client.string_keys("lorabridge:device:");
    assert!(stored.iter().all(|key| !key.contains(":message:")));
    assert!(ctx.client.calls_for("zadd_nx").is_empty());
    assert!(ctx.client.set_members("lorabridge:device:index").is_empty());
}

#[tokio::test]
async fn unregistered_device_leaves_no_trace_when_resolving_first() {
    let client = MockRedisClient::new();
    let ctx = TestContext::with_client(client);
    let pipeline = ctx.pipeline.resolve_identity_first(true);

    let outcome = pipeline
        .handle(&topic(UNREGISTERED), &payload(json!({"temperature": 19.0})))
        .await
        .unwrap();

    assert!(matches!(outcome, Outcome::UnknownDevice(_)));
    assert!(ctx.client.calls_for("set").is_empty());
    assert!(ctx.client.string_keys("").is_empty());
}

#[tokio::test]
async fn replay_after_window_is_stored_again() {
    let ctx = TestContext::new();
    send(&ctx, REGISTERED, json!({"temperature": 21.5, "battery": 80})).await;
    let original = send(&ctx, REGISTERED, json!({"temperature": 22.0, "battery": 80})).await;

    ctx.clock.advance(TTL as i64 + 1);
    send(&ctx, REGISTERED, json!({"temperature": 21.5, "battery": 80})).await;
    let replay = send(&ctx, REGISTERED, json!({"temperature": 22.0, "battery": 80})).await;

    let (
        Outcome::Enqueued {
            fingerprint: original,
            ..
        },
        Outcome::Enqueued {
            fingerprint: replay,
            ..
        },
    ) = (original, replay)
    else {
        panic!("both should be queued, the window had passed");
    };
    assert_eq!(original, replay);
    assert_eq!(ctx.client.calls_for("set_bytes").len(), 4);
}

#[tokio::test]
async fn repeated_change_within_window_is_suppressed() {
    let ctx = TestContext::new();
    send(&ctx, REGISTERED, json!({"temperature": 21.5})).await;
    let warm = send(&ctx, REGISTERED, json!({"temperature": 22.0})).await;
    send(&ctx, REGISTERED, json!({"temperature": 21.5})).await;
    ctx.client.clear_calls();

    let again = send(&ctx, REGISTERED, json!({"temperature": 22.0})).await;

    let (
        Outcome::Enqueued {
            fingerprint: queued,
            ..
        },
        Outcome::Duplicate {
            device_id,
            fingerprint: suppressed,
        },
    ) = (warm, again)
    else {
        panic!("the repeat should be reported as a duplicate");
    };
    assert_eq!(device_id, DeviceId(5));
    assert_eq!(queued, suppressed);
    assert!(ctx.client.calls_for("set_bytes").is_empty());
    // The snapshot still follows every reading, and the device stays indexed.
    assert_eq!(ctx.client.calls_for("set").len(), 1);
    assert_eq!(ctx.client.calls_for("sadd").len(), 1);
    assert_eq!(ctx.pending(5).await.len(), 2);
}

#[tokio::test]
async fn device_is_indexed_once() {
    let ctx = TestContext::new();

    send(&ctx, REGISTERED, json!({"temperature": 21.5})).await;
    send(&ctx, REGISTERED, json!({"temperature": 22.0})).await;

    assert_eq!(ctx.client.set_members("lorabridge:device:index"), vec!["5"]);
}

#[tokio::test]
async fn disabled_attributes_are_dropped() {
    let client = MockRedisClient::new()
        .with_hash_field("lorabridge:device:registry:ieee", REGISTERED, "5")
        .with_list("lorabridge:attributes:0x0000000000000001", &["battery", "custom"]);
    let ctx = TestContext::with_client(client);

    send(
        &ctx,
        REGISTERED,
        json!({"temperature": 21.5, "battery": 80, "custom": 1, "extra": "x"}),
    )
    .await;

    assert_json_eq!(
        Value::Object(ctx.pending_named(5).await.remove(0)),
        json!({"temperature": 21.5, "extra": "x"})
    );
    let snapshot = decode_snapshot(&ctx.client.string_value(SNAPSHOT).unwrap()).unwrap();
    assert!(!snapshot.contains_key(&AttrKey::Code(11)));
    assert_eq!(
        snapshot.get(&AttrKey::Name("extra".to_string())),
        Some(&json!("x"))
    );
}

#[tokio::test]
async fn integer_and_float_of_same_value_are_unchanged() {
    let ctx = TestContext::new();
    send(&ctx, REGISTERED, json!({"battery": 80})).await;
    ctx.client.clear_calls();

    let outcome = send(&ctx, REGISTERED, json!({"battery": 80.0})).await;

    assert_eq!(outcome, Outcome::Unchanged);
    assert!(ctx.client.calls_for("set").is_empty());
    assert!(ctx.client.calls_for("set_bytes").is_empty());
    assert_eq!(ctx.pending(5).await.len(), 1);
}

#[tokio::test]
async fn removed_attribute_is_not_reported() {
    let ctx = TestContext::new();
    send(&ctx, REGISTERED, json!({"temperature": 21.5, "battery": 80})).await;

    let outcome = send(&ctx, REGISTERED, json!({"battery": 80})).await;

    assert_eq!(outcome, Outcome::Unchanged);
    // Nothing changed, so the stored snapshot still has the temperature.
    let snapshot = decode_snapshot(&ctx.client.string_value(SNAPSHOT).unwrap()).unwrap();
    assert_eq!(snapshot.get(&AttrKey::Code(95)), Some(&json!(21.5)));
}

#[tokio::test]
async fn malformed_payloads_are_dropped_without_writes() {
    let ctx = TestContext::new();

    let bodies: [&[u8]; 5] = [b"not json", b"[1, 2, 3]", b"42", b"\"text\"", b""];
    for body in bodies {
        let outcome = ctx.pipeline.handle(&topic(REGISTERED), body).await.unwrap();
        assert_eq!(outcome, Outcome::MalformedPayload);
    }

    assert!(ctx.client.get_calls().is_empty());
}

#[tokio::test]
async fn foreign_topics_are_ignored() {
    let ctx = TestContext::new();
    let body = payload(json!({"temperature": 21.5}));

    for topic in [
        "zigbee2mqtt/bridge/state",
        "zigbee2mqtt/0x0000000000000001/set",
        "zigbee2mqtt/0x00000000001",
        "other/0x0000000000000001",
        "zigbee2mqtt/0x000000000000000g",
    ] {
        let outcome = ctx.pipeline.handle(topic, &body).await.unwrap();
        assert_eq!(outcome, Outcome::IgnoredTopic, "{topic}");
    }

    assert!(ctx.client.get_calls().is_empty());
}

#[tokio::test]
async fn store_errors_are_not_masked() {
    let client = MockRedisClient::new()
        .with_hash_field("lorabridge:device:registry:ieee", REGISTERED, "5")
        .fail_op("zadd_nx", CustomRedisError::Timeout);
    let ctx = TestContext::with_client(client);

    let result = ctx
        .pipeline
        .handle(&topic(REGISTERED), &payload(json!({"temperature": 21.5})))
        .await;

    assert!(matches!(
        result,
        Err(ForwarderError::Store(CustomRedisError::Timeout))
    ));
    assert!(ctx.client.calls_for("set_bytes").is_empty());
}

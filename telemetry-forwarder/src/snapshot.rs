use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common_redis::{Client, CustomRedisError};
use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::attributes::Attributes;
use crate::device::WireId;
use crate::error::ForwarderError;
use crate::keys;

/// Pairs of `new` that are not in `old`, compared by key and value together.
///
/// A changed value shows up with its new value, an unchanged one is left out,
/// and keys that only exist in `old` are never reported. Values are compared
/// with [`values_equal`].
pub fn diff(new: &Attributes, old: &Attributes) -> Attributes {
    new.iter()
        .filter(|(key, value)| {
            !old.get(*key)
                .is_some_and(|previous| values_equal(value, previous))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// JSON equality where numbers compare by value, so `80` equals `80.0`.
/// Arrays and objects are compared element by element.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(key, a)| b.get(key).is_some_and(|b| values_equal(a, b)))
        }
        _ => a == b,
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a == b;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Snapshots are stored as base64 text of their msgpack encoding.
pub fn encode_snapshot(snapshot: &Attributes) -> Result<String, rmp_serde::encode::Error> {
    Ok(STANDARD.encode(rmp_serde::to_vec(snapshot)?))
}

pub fn decode_snapshot(raw: &[u8]) -> Option<Attributes> {
    let bytes = STANDARD.decode(raw).ok()?;
    rmp_serde::from_slice(&bytes).ok()
}

/// Keeps the last-known snapshot of every device and turns each new reading
/// into the set of attributes that changed.
#[derive(Clone)]
pub struct StateDiffEngine {
    client: Arc<dyn Client + Send + Sync>,
}

impl StateDiffEngine {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self { client }
    }

    /// The stored snapshot, or an empty one when it is missing or unreadable.
    pub async fn load(&self, wire: &WireId) -> Result<Attributes, CustomRedisError> {
        let raw = match self.client.get_raw_bytes(keys::snapshot(wire)).await {
            Ok(raw) => raw,
            Err(CustomRedisError::NotFound) => return Ok(Attributes::new()),
            Err(e) => return Err(e),
        };

        match decode_snapshot(&raw) {
            Some(snapshot) => Ok(snapshot),
            None => {
                warn!(wire_id = %wire, "discarding unreadable snapshot");
                Ok(Attributes::new())
            }
        }
    }

    pub async fn store(&self, wire: &WireId, snapshot: &Attributes) -> Result<(), ForwarderError> {
        let encoded = encode_snapshot(snapshot)?;
        self.client.set(keys::snapshot(wire), encoded).await?;
        Ok(())
    }

    /// Diff `new` against the stored snapshot.
    ///
    /// Returns `None` and writes nothing when nothing changed. Otherwise the
    /// stored snapshot is replaced by the whole of `new` and only the changed
    /// attributes are returned.
    pub async fn apply(
        &self,
        wire: &WireId,
        new: &Attributes,
    ) -> Result<Option<Attributes>, ForwarderError> {
        let old = self.load(wire).await?;
        let changed = diff(new, &old);
        if changed.is_empty() {
            debug!(wire_id = %wire, "no attribute changed");
            return Ok(None);
        }

        self.store(wire, new).await?;
        Ok(Some(changed))
    }
}

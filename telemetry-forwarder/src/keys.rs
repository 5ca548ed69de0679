//! Store key layout. Everything lives under the `lorabridge:` namespace.
use std::fmt::Display;

use crate::device::{DeviceId, WireId};

/// Hash of wire id -> internal device id, maintained by the registry tool.
pub const DEVICE_REGISTRY: &str = "lorabridge:device:registry:ieee";

/// Set of every internal device id that ever produced a message.
pub const DEVICE_INDEX: &str = "lorabridge:device:index";

/// List of attribute names to drop for a device.
pub fn disabled_attributes(wire: &WireId) -> String {
    format!("lorabridge:attributes:{wire}")
}

/// Last-known full snapshot of a device.
pub fn snapshot(wire: &WireId) -> String {
    format!("lorabridge:device:{wire}:stats:old")
}

/// Sorted set of fingerprints seen within the dedup window, scored by time.
pub fn queue(device: DeviceId) -> String {
    format!("lorabridge:queue:{device}")
}

/// A queued message body.
pub fn message(device: DeviceId, fingerprint: impl Display) -> String {
    format!("lorabridge:device:{device}:message:{fingerprint}")
}

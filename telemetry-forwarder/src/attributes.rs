//! Attribute names and their compact numeric codes.
//!
//! Telemetry payloads are keyed by attribute name. Names found in the
//! [`AttributeCodeTable`] are replaced by their position in the table before
//! anything is stored or queued, which keeps the downstream messages small.
//! Names the table does not know pass through unchanged.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Known attribute names. The index of a name is its code, so this list is
/// append-only: consumers decode queued messages with the same table.
pub const ATTRIBUTE_NAMES: &[&str] = &[
    "ac_frequency",
    "action",
    "action_group",
    "angle",
    "angle_axis",
    "aqi",
    "auto_lock",
    "auto_relock_time",
    "away_mode",
    "away_preset_days",
    "away_preset_temperature",
    "battery",
    "battery_low",
    "battery_voltage",
    "boost_time",
    "button_lock",
    "carbon_monoxide",
    "child_lock",
    "co2",
    "co",
    "comfort_temperature",
    "consumer_connected",
    "contact",
    "cover_position",
    "cover_position_tilt",
    "cover_tilt",
    "cpu_temperature",
    "cube_side",
    "current",
    "current_phase_b",
    "current_phase_c",
    "deadzone_temperature",
    "device_temperature",
    "eco2",
    "eco_mode",
    "eco_temperature",
    "effect",
    "energy",
    "fan",
    "flip_indicator_light",
    "force",
    "formaldehyd",
    "gas",
    "hcho",
    "holiday_temperature",
    "humidity",
    "illuminance",
    "illuminance_lux",
    "brightness_state",
    "keypad_lockout",
    "led_disabled_night",
    "light_brightness",
    "light_brightness_color",
    "light_brightness_colorhs",
    "light_brightness_colortemp",
    "light_brightness_colortemp_color",
    "light_brightness_colortemp_colorhs",
    "light_brightness_colortemp_colorxy",
    "light_brightness_colorxy",
    "light_colorhs",
    "linkquality",
    "local_temperature",
    "lock",
    "lock_action",
    "lock_action_source_name",
    "lock_action_source_user",
    "max_temperature",
    "max_temperature_limit",
    "min_temperature",
    "noise",
    "noise_detected",
    "occupancy",
    "occupancy_level",
    "open_window",
    "open_window_temperature",
    "pm10",
    "pm25",
    "position",
    "power",
    "power_factor",
    "power_apparent",
    "power_on_behavior",
    "power_outage_count",
    "power_outage_memory",
    "presence",
    "pressure",
    "programming_operation_mode",
    "smoke",
    "soil_moisture",
    "sos",
    "sound_volume",
    "switch",
    "switch_type",
    "switch_type_2",
    "tamper",
    "temperature",
    "test",
    "valve_position",
    "valve_switch",
    "valve_state",
    "valve_detection",
    "vibration",
    "voc",
    "voltage",
    "voltage_phase_b",
    "voltage_phase_c",
    "water_leak",
    "warning",
    "week",
    "window_detection",
    "moving",
    "x_axis",
    "y_axis",
    "z_axis",
    "pincode",
    "squawk",
    "state",
];

static STANDARD_TABLE: Lazy<Arc<AttributeCodeTable>> =
    Lazy::new(|| Arc::new(AttributeCodeTable::new(ATTRIBUTE_NAMES.iter().copied())));

/// Key of a normalized attribute: a table code, or the original name when the
/// table does not list it.
///
/// Codes order before names, so an ordered map of `AttrKey` always serializes
/// the same way for the same content.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrKey {
    Code(i64),
    Name(String),
}

impl fmt::Display for AttrKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrKey::Code(code) => write!(f, "{code}"),
            AttrKey::Name(name) => f.write_str(name),
        }
    }
}

/// A normalized attribute mapping.
pub type Attributes = BTreeMap<AttrKey, Value>;

/// Immutable name <-> code table, built once and shared.
#[derive(Debug)]
pub struct AttributeCodeTable {
    names: Vec<String>,
    codes: HashMap<String, i64>,
}

impl AttributeCodeTable {
    /// Build a table from an ordered list of names. When a name is listed more
    /// than once, its first position is its code.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut codes = HashMap::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            codes.entry(name.clone()).or_insert(position as i64);
        }
        Self { names, codes }
    }

    /// The process-wide table built from [`ATTRIBUTE_NAMES`].
    pub fn standard() -> Arc<AttributeCodeTable> {
        STANDARD_TABLE.clone()
    }

    pub fn code(&self, name: &str) -> Option<i64> {
        self.codes.get(name).copied()
    }

    pub fn name(&self, code: i64) -> Option<&str> {
        usize::try_from(code)
            .ok()
            .and_then(|index| self.names.get(index))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Map a normalized mapping back to attribute names.
    ///
    /// Codes without a table name are left out. Normalization never produces
    /// them, so the only one is the device id sentinel, which consumers read
    /// from `QueuedMessage::device_id` instead. Rendering it as a string would
    /// clash with a pass-through attribute of the same spelling.
    pub fn denormalize(&self, attributes: &Attributes) -> Map<String, Value> {
        attributes
            .iter()
            .filter_map(|(key, value)| {
                let name = match key {
                    AttrKey::Code(code) => self.name(*code)?.to_owned(),
                    AttrKey::Name(name) => name.clone(),
                };
                Some((name, value.clone()))
            })
            .collect()
    }
}

/// Drops disabled attributes and encodes known names with their table code.
#[derive(Clone)]
pub struct AttributeNormalizer {
    table: Arc<AttributeCodeTable>,
}

impl AttributeNormalizer {
    pub fn new(table: Arc<AttributeCodeTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &AttributeCodeTable {
        &self.table
    }

    /// Disabled names are matched against the raw payload names, before encoding.
    pub fn normalize(&self, payload: Map<String, Value>, disabled: &HashSet<String>) -> Attributes {
        payload
            .into_iter()
            .filter(|(name, _)| !disabled.contains(name))
            .map(|(name, value)| match self.table.code(&name) {
                Some(code) => (AttrKey::Code(code), value),
                None => (AttrKey::Name(name), value),
            })
            .collect()
    }
}

impl Default for AttributeNormalizer {
    fn default() -> Self {
        Self::new(AttributeCodeTable::standard())
    }
}

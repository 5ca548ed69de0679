use regex::Regex;

use crate::device::WireId;

/// Recognizes per-device telemetry topics: `{base}/0x{16 hex digits}`.
///
/// Anything else published under the base prefix (bridge state, availability,
/// `/set` requests, group topics) is out of scope and ignored.
#[derive(Debug, Clone)]
pub struct DeviceTopic {
    base: String,
    pattern: Regex,
}

impl DeviceTopic {
    pub fn new(base: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            "^{}/(0x[0-9a-fA-F]{{16}})$",
            regex::escape(base)
        ))?;

        Ok(Self {
            base: base.to_owned(),
            pattern,
        })
    }

    /// Subscription filter covering every topic under the base prefix.
    pub fn subscription(&self) -> String {
        format!("{}/#", self.base)
    }

    pub fn wire_id(&self, topic: &str) -> Option<WireId> {
        self.pattern
            .captures(topic)
            .and_then(|captures| captures.get(1))
            .and_then(|m| WireId::parse(m.as_str()))
    }
}

use time::OffsetDateTime;

pub trait TimeSource {
    fn now(&self) -> OffsetDateTime;

    /// Unix time in seconds, with sub-second precision. Used as the dedup window score.
    fn unix_seconds(&self) -> f64 {
        let now = self.now();
        now.unix_timestamp() as f64 + f64::from(now.nanosecond()) / 1_000_000_000.0
    }
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

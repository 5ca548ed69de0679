use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Client, CustomRedisError};

/// In-memory stand-in for redis.
///
/// Unlike a canned-response mock this one keeps state, so a sequence of commands
/// behaves like it would against a server: a `zadd_nx` followed by a second one for
/// the same member reports the duplicate, `zremrangebyscore` really prunes, and so
/// on. Expiries are recorded but never enforced; tests read them back with
/// [`MockRedisClient::ttl_of`].
///
/// Clones share state, so a clone can be handed to the code under test while the
/// test keeps one to inspect the store and the recorded calls.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    state: Arc<Mutex<MockState>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

#[derive(Default)]
struct MockState {
    strings: HashMap<String, Vec<u8>>,
    ttls: HashMap<String, u64>,
    lists: HashMap<String, Vec<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    sorted_sets: HashMap<String, BTreeMap<String, f64>>,
    failures: HashMap<String, CustomRedisError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockRedisValue {
    None,
    String(String),
    Bytes(Vec<u8>),
    BytesWithTTL(Vec<u8>, u64),
    Range(String, String),
    Member(String),
    FieldValue(String, String),
    ScoredMember(String, f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_calls(&self) -> MutexGuard<'_, Vec<MockRedisCall>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record the call, then surface an injected failure for this op if one is set.
    fn record(&self, op: &str, key: &str, value: MockRedisValue) -> Result<(), CustomRedisError> {
        self.lock_calls().push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });

        match self.lock_state().failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Make every subsequent call to `op` fail with `err`.
    pub fn fail_op(&mut self, op: &str, err: CustomRedisError) -> Self {
        self.lock_state().failures.insert(op.to_owned(), err);
        self.clone()
    }

    pub fn with_string(&mut self, key: &str, value: &str) -> Self {
        self.lock_state()
            .strings
            .insert(key.to_owned(), value.as_bytes().to_vec());
        self.clone()
    }

    pub fn with_list(&mut self, key: &str, values: &[&str]) -> Self {
        self.lock_state().lists.insert(
            key.to_owned(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self.clone()
    }

    pub fn with_hash_field(&mut self, key: &str, field: &str, value: &str) -> Self {
        self.lock_state()
            .hashes
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock_calls().clone()
    }

    pub fn calls_for(&self, op: &str) -> Vec<MockRedisCall> {
        self.lock_calls()
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock_calls().clear();
    }

    pub fn string_value(&self, key: &str) -> Option<Vec<u8>> {
        self.lock_state().strings.get(key).cloned()
    }

    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        self.lock_state().ttls.get(key).copied()
    }

    /// All string keys starting with `prefix`, sorted.
    pub fn string_keys(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock_state()
            .strings
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn set_members(&self, key: &str) -> Vec<String> {
        self.lock_state()
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.lock_state()
            .sorted_sets
            .get(key)
            .and_then(|z| z.get(member).copied())
    }

    pub fn zcard(&self, key: &str) -> usize {
        self.lock_state()
            .sorted_sets
            .get(key)
            .map(|z| z.len())
            .unwrap_or(0)
    }
}

/// Parse a ZRANGEBYSCORE bound, supporting `-inf`, `+inf` and the `(` exclusive prefix.
fn parse_bound(raw: &str) -> Result<(f64, bool), CustomRedisError> {
    let (exclusive, number) = match raw.strip_prefix('(') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let value = match number {
        "-inf" => f64::NEG_INFINITY,
        "+inf" | "inf" => f64::INFINITY,
        other => other
            .parse::<f64>()
            .map_err(|e| CustomRedisError::ParseError(format!("bad score bound {raw}: {e}")))?,
    };
    Ok((value, exclusive))
}

fn within(score: f64, min: (f64, bool), max: (f64, bool)) -> bool {
    let above = if min.1 { score > min.0 } else { score >= min.0 };
    let below = if max.1 { score < max.0 } else { score <= max.0 };
    above && below
}

/// Resolve redis-style (possibly negative) list indices into a slice range.
fn list_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, key: String) -> Result<String, CustomRedisError> {
        self.record("get", &key, MockRedisValue::None)?;

        match self.lock_state().strings.get(&key) {
            Some(bytes) if !bytes.is_empty() => Ok(String::from_utf8(bytes.clone())?),
            _ => Err(CustomRedisError::NotFound),
        }
    }

    async fn get_raw_bytes(&self, key: String) -> Result<Vec<u8>, CustomRedisError> {
        self.record("get_raw_bytes", &key, MockRedisValue::None)?;

        match self.lock_state().strings.get(&key) {
            Some(bytes) if !bytes.is_empty() => Ok(bytes.clone()),
            _ => Err(CustomRedisError::NotFound),
        }
    }

    async fn set(&self, key: String, value: String) -> Result<(), CustomRedisError> {
        self.record("set", &key, MockRedisValue::String(value.clone()))?;

        let mut state = self.lock_state();
        state.ttls.remove(&key);
        state.strings.insert(key, value.into_bytes());
        Ok(())
    }

    async fn set_bytes(
        &self,
        key: String,
        value: Vec<u8>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), CustomRedisError> {
        let recorded = match ttl_seconds {
            Some(ttl) => MockRedisValue::BytesWithTTL(value.clone(), ttl),
            None => MockRedisValue::Bytes(value.clone()),
        };
        self.record("set_bytes", &key, recorded)?;

        let mut state = self.lock_state();
        match ttl_seconds {
            Some(ttl) => state.ttls.insert(key.clone(), ttl),
            None => state.ttls.remove(&key),
        };
        state.strings.insert(key, value);
        Ok(())
    }

    async fn lrange(
        &self,
        key: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError> {
        self.record(
            "lrange",
            &key,
            MockRedisValue::Range(start.to_string(), stop.to_string()),
        )?;

        let state = self.lock_state();
        let list = match state.lists.get(&key) {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        Ok(match list_range(list.len(), start, stop) {
            Some((from, to)) => list[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn hget(&self, key: String, field: String) -> Result<String, CustomRedisError> {
        self.record("hget", &key, MockRedisValue::Member(field.clone()))?;

        self.lock_state()
            .hashes
            .get(&key)
            .and_then(|h| h.get(&field).cloned())
            .ok_or(CustomRedisError::NotFound)
    }

    async fn hgetall(&self, key: String) -> Result<HashMap<String, String>, CustomRedisError> {
        self.record("hgetall", &key, MockRedisValue::None)?;

        Ok(self
            .lock_state()
            .hashes
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    async fn hset_nx(
        &self,
        key: String,
        field: String,
        value: String,
    ) -> Result<bool, CustomRedisError> {
        self.record(
            "hset_nx",
            &key,
            MockRedisValue::FieldValue(field.clone(), value.clone()),
        )?;

        let mut state = self.lock_state();
        let hash = state.hashes.entry(key).or_default();
        if hash.contains_key(&field) {
            return Ok(false);
        }
        hash.insert(field, value);
        Ok(true)
    }

    async fn sadd(&self, key: String, member: String) -> Result<bool, CustomRedisError> {
        self.record("sadd", &key, MockRedisValue::Member(member.clone()))?;

        Ok(self.lock_state().sets.entry(key).or_default().insert(member))
    }

    async fn smembers(&self, key: String) -> Result<Vec<String>, CustomRedisError> {
        self.record("smembers", &key, MockRedisValue::None)?;

        Ok(self.set_members(&key))
    }

    async fn zrangebyscore(
        &self,
        key: String,
        min: String,
        max: String,
    ) -> Result<Vec<String>, CustomRedisError> {
        self.record(
            "zrangebyscore",
            &key,
            MockRedisValue::Range(min.clone(), max.clone()),
        )?;

        let (min, max) = (parse_bound(&min)?, parse_bound(&max)?);
        let state = self.lock_state();
        let mut members: Vec<(&String, f64)> = match state.sorted_sets.get(&key) {
            Some(zset) => zset
                .iter()
                .filter(|(_, score)| within(**score, min, max))
                .map(|(member, score)| (member, *score))
                .collect(),
            None => return Ok(Vec::new()),
        };
        // redis orders by score, then lexicographically
        members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(members.into_iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zremrangebyscore(
        &self,
        key: String,
        min: f64,
        max: f64,
    ) -> Result<u64, CustomRedisError> {
        self.record(
            "zremrangebyscore",
            &key,
            MockRedisValue::Range(min.to_string(), max.to_string()),
        )?;

        let mut state = self.lock_state();
        let Some(zset) = state.sorted_sets.get_mut(&key) else {
            return Ok(0);
        };
        let before = zset.len();
        zset.retain(|_, score| !(*score >= min && *score <= max));
        Ok((before - zset.len()) as u64)
    }

    async fn zadd_nx(
        &self,
        key: String,
        member: String,
        score: f64,
    ) -> Result<bool, CustomRedisError> {
        self.record(
            "zadd_nx",
            &key,
            MockRedisValue::ScoredMember(member.clone(), score),
        )?;

        let mut state = self.lock_state();
        let zset = state.sorted_sets.entry(key).or_default();
        if zset.contains_key(&member) {
            return Ok(false);
        }
        zset.insert(member, score);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zadd_nx_keeps_original_score() {
        let client = MockRedisClient::new();

        let first = client
            .zadd_nx("queue".to_string(), "abc".to_string(), 10.0)
            .await
            .unwrap();
        let second = client
            .zadd_nx("queue".to_string(), "abc".to_string(), 20.0)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(client.zscore("queue", "abc"), Some(10.0));
    }

    #[tokio::test]
    async fn test_zremrangebyscore_is_inclusive() {
        let client = MockRedisClient::new();
        for (member, score) in [("a", 1.0), ("b", 5.0), ("c", 9.0)] {
            client
                .zadd_nx("z".to_string(), member.to_string(), score)
                .await
                .unwrap();
        }

        let removed = client
            .zremrangebyscore("z".to_string(), 0.0, 5.0)
            .await
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(client.zcard("z"), 1);
        assert_eq!(client.zscore("z", "c"), Some(9.0));
    }

    #[tokio::test]
    async fn test_zrangebyscore_orders_by_score() {
        let client = MockRedisClient::new();
        for (member, score) in [("late", 30.0), ("early", 10.0), ("middle", 20.0)] {
            client
                .zadd_nx("z".to_string(), member.to_string(), score)
                .await
                .unwrap();
        }

        let members = client
            .zrangebyscore("z".to_string(), "(10".to_string(), "+inf".to_string())
            .await
            .unwrap();

        assert_eq!(members, vec!["middle".to_string(), "late".to_string()]);
    }

    #[tokio::test]
    async fn test_point_reads_report_not_found() {
        let client = MockRedisClient::new();

        assert!(matches!(
            client.get_raw_bytes("missing".to_string()).await,
            Err(CustomRedisError::NotFound)
        ));
        assert!(matches!(
            client.hget("h".to_string(), "f".to_string()).await,
            Err(CustomRedisError::NotFound)
        ));
        assert!(client
            .lrange("missing".to_string(), 0, -1)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_lrange_negative_indices() {
        let client = MockRedisClient::new().with_list("l", &["a", "b", "c"]);

        let all = client.lrange("l".to_string(), 0, -1).await.unwrap();
        let tail = client.lrange("l".to_string(), -2, -1).await.unwrap();

        assert_eq!(all, vec!["a", "b", "c"]);
        assert_eq!(tail, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_set_bytes_records_ttl() {
        let client = MockRedisClient::new();

        client
            .set_bytes("k".to_string(), vec![1, 2, 3], Some(3600))
            .await
            .unwrap();

        assert_eq!(client.string_value("k"), Some(vec![1, 2, 3]));
        assert_eq!(client.ttl_of("k"), Some(3600));
        assert_eq!(
            client.calls_for("set_bytes")[0].value,
            MockRedisValue::BytesWithTTL(vec![1, 2, 3], 3600)
        );
    }

    #[tokio::test]
    async fn test_injected_failure_is_returned_and_recorded() {
        let client = MockRedisClient::new().fail_op("sadd", CustomRedisError::Timeout);

        let result = client.sadd("s".to_string(), "1".to_string()).await;

        assert!(matches!(result, Err(CustomRedisError::Timeout)));
        assert_eq!(client.calls_for("sadd").len(), 1);
        assert!(client.set_members("s").is_empty());
    }

    #[tokio::test]
    async fn test_hset_nx_does_not_overwrite() {
        let client = MockRedisClient::new().with_hash_field("h", "f", "1");

        let set = client
            .hset_nx("h".to_string(), "f".to_string(), "2".to_string())
            .await
            .unwrap();

        assert!(!set);
        assert_eq!(
            client.hget("h".to_string(), "f".to_string()).await.unwrap(),
            "1"
        );
    }
}

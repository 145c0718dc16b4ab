use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Client, CustomRedisError};

#[derive(Debug, Clone, PartialEq)]
enum StoredValue {
    String(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: StoredValue,
    ttl_seconds: Option<u64>,
}

#[derive(Default)]
struct MockState {
    entries: HashMap<String, Entry>,
    errors: HashMap<(String, String), CustomRedisError>,
    calls: Vec<MockRedisCall>,
}

/// In-memory stand-in for redis. Clones share the same keyspace, so a test can hand
/// one clone to the code under test and inspect the store through another.
///
/// Keys never expire on their own; call [`MockRedisClient::expire`] to simulate a TTL
/// running out.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockRedisValue {
    None,
    String(String),
    StringWithTTL(String, u64),
    Member(String),
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

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fail every `op` call on `key` with `err` until [`MockRedisClient::clear_errors`].
    pub fn with_error(&mut self, op: &str, key: &str, err: CustomRedisError) -> Self {
        self.lock()
            .errors
            .insert((op.to_owned(), key.to_owned()), err);
        self.clone()
    }

    pub fn clear_errors(&self) {
        self.lock().errors.clear();
    }

    /// Seed a plain string value without recording a call.
    pub fn with_string(&mut self, key: &str, value: &str) -> Self {
        self.lock().entries.insert(
            key.to_owned(),
            Entry {
                value: StoredValue::String(value.to_owned()),
                ttl_seconds: None,
            },
        );
        self.clone()
    }

    /// Seed set members without recording a call.
    pub fn with_members(&mut self, key: &str, members: &[&str]) -> Self {
        let mut state = self.lock();
        let entry = state.entries.entry(key.to_owned()).or_insert(Entry {
            value: StoredValue::Set(BTreeSet::new()),
            ttl_seconds: None,
        });
        if let StoredValue::Set(set) = &mut entry.value {
            set.extend(members.iter().map(|m| m.to_string()));
        }
        drop(state);
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Current string value of `key`, if any.
    pub fn string_value(&self, key: &str) -> Option<String> {
        match self.lock().entries.get(key).map(|e| &e.value) {
            Some(StoredValue::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Sorted members of the set at `key`; empty when absent.
    pub fn members(&self, key: &str) -> Vec<String> {
        match self.lock().entries.get(key).map(|e| &e.value) {
            Some(StoredValue::Set(set)) => set.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// TTL given by the last `setex` on `key`; `None` for persistent or missing keys.
    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.lock().entries.get(key).and_then(|e| e.ttl_seconds)
    }

    pub fn exists(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Drop `key` as if its TTL had elapsed.
    pub fn expire(&self, key: &str) {
        self.lock().entries.remove(key);
    }

    /// Record the call, then return the injected error for it, if any.
    fn record(
        &self,
        op: &str,
        key: &str,
        value: MockRedisValue,
    ) -> Result<MutexGuard<'_, MockState>, CustomRedisError> {
        let mut state = self.lock();
        state.calls.push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
            value,
        });
        if let Some(err) = state.errors.get(&(op.to_owned(), key.to_owned())).cloned() {
            return Err(err);
        }
        Ok(state)
    }
}

fn wrong_type(key: &str) -> CustomRedisError {
    CustomRedisError::ParseError(format!(
        "WRONGTYPE Operation against a key holding the wrong kind of value: {key}"
    ))
}

#[async_trait]
impl Client for MockRedisClient {
    async fn get(&self, key: String) -> Result<String, CustomRedisError> {
        let state = self.record("get", &key, MockRedisValue::None)?;

        match state.entries.get(&key).map(|e| &e.value) {
            Some(StoredValue::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(StoredValue::String(_)) | None => Err(CustomRedisError::NotFound),
            Some(StoredValue::Set(_)) => Err(wrong_type(&key)),
        }
    }

    async fn set(&self, key: String, value: String) -> Result<(), CustomRedisError> {
        let mut state = self.record("set", &key, MockRedisValue::String(value.clone()))?;

        state.entries.insert(
            key,
            Entry {
                value: StoredValue::String(value),
                ttl_seconds: None,
            },
        );
        Ok(())
    }

    async fn setex(&self, key: String, value: String, seconds: u64) -> Result<(), CustomRedisError> {
        let mut state = self.record(
            "setex",
            &key,
            MockRedisValue::StringWithTTL(value.clone(), seconds),
        )?;

        state.entries.insert(
            key,
            Entry {
                value: StoredValue::String(value),
                ttl_seconds: Some(seconds),
            },
        );
        Ok(())
    }

    async fn del(&self, key: String) -> Result<(), CustomRedisError> {
        let mut state = self.record("del", &key, MockRedisValue::None)?;

        state.entries.remove(&key);
        Ok(())
    }

    async fn sadd(&self, key: String, member: String) -> Result<(), CustomRedisError> {
        let mut state = self.record("sadd", &key, MockRedisValue::Member(member.clone()))?;

        let entry = state.entries.entry(key.clone()).or_insert(Entry {
            value: StoredValue::Set(BTreeSet::new()),
            ttl_seconds: None,
        });
        match &mut entry.value {
            StoredValue::Set(set) => {
                set.insert(member);
                Ok(())
            }
            StoredValue::String(_) => Err(wrong_type(&key)),
        }
    }

    async fn srem(&self, key: String, member: String) -> Result<(), CustomRedisError> {
        let mut state = self.record("srem", &key, MockRedisValue::Member(member.clone()))?;

        let now_empty = match state.entries.get_mut(&key).map(|e| &mut e.value) {
            Some(StoredValue::Set(set)) => {
                set.remove(&member);
                set.is_empty()
            }
            Some(StoredValue::String(_)) => return Err(wrong_type(&key)),
            None => false,
        };
        // redis deletes a set once its last member is removed
        if now_empty {
            state.entries.remove(&key);
        }
        Ok(())
    }

    async fn smembers(&self, key: String) -> Result<Vec<String>, CustomRedisError> {
        let state = self.record("smembers", &key, MockRedisValue::None)?;

        match state.entries.get(&key).map(|e| &e.value) {
            Some(StoredValue::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(StoredValue::String(_)) => Err(wrong_type(&key)),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_keyspace() {
        let mock = MockRedisClient::new();
        let other = mock.clone();

        other
            .set("state:api".to_string(), "paused".to_string())
            .await
            .unwrap();

        assert_eq!(mock.string_value("state:api").as_deref(), Some("paused"));
        assert_eq!(mock.get_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let mock = MockRedisClient::new();

        let result = mock.get("missing".to_string()).await;

        assert!(matches!(result, Err(CustomRedisError::NotFound)));
    }

    #[tokio::test]
    async fn test_setex_remembers_ttl_and_expire_drops_key() {
        let mock = MockRedisClient::new();

        mock.setex("instance".to_string(), "{}".to_string(), 30)
            .await
            .unwrap();
        assert_eq!(mock.ttl("instance"), Some(30));

        mock.set("instance".to_string(), "{}".to_string())
            .await
            .unwrap();
        assert_eq!(mock.ttl("instance"), None);

        mock.expire("instance");
        assert!(!mock.exists("instance"));
    }

    #[tokio::test]
    async fn test_set_operations() {
        let mock = MockRedisClient::new();

        mock.sadd("ids".to_string(), "b".to_string()).await.unwrap();
        mock.sadd("ids".to_string(), "a".to_string()).await.unwrap();
        mock.sadd("ids".to_string(), "a".to_string()).await.unwrap();

        assert_eq!(
            mock.smembers("ids".to_string()).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );

        mock.srem("ids".to_string(), "a".to_string()).await.unwrap();
        mock.srem("ids".to_string(), "b".to_string()).await.unwrap();

        assert!(!mock.exists("ids"));
        assert!(mock.smembers("ids".to_string()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_error_is_returned_and_call_recorded() {
        let mock = MockRedisClient::new().with_error("del", "signal", CustomRedisError::Timeout);

        let result = mock.del("signal".to_string()).await;

        assert!(matches!(result, Err(CustomRedisError::Timeout)));
        assert_eq!(
            mock.get_calls(),
            vec![MockRedisCall {
                op: "del".to_string(),
                key: "signal".to_string(),
                value: MockRedisValue::None,
            }]
        );

        mock.clear_errors();
        assert!(mock.del("signal".to_string()).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_type_access_fails() {
        let mock = MockRedisClient::new().with_string("k", "v");

        assert!(mock.sadd("k".to_string(), "m".to_string()).await.is_err());
        assert!(mock.smembers("k".to_string()).await.is_err());
    }
}

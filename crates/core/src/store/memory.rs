//! In-process store with the same semantics as the Redis backend.
//!
//! Every operation takes the single mutex, so compare-and-act operations are
//! atomic for free. Expired entries are dropped lazily on access.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{KvStore, StoreResult};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Drop `key` if it has expired and return the live entry, if any.
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn text_of(entry: &Entry) -> Option<&str> {
    match &entry.value {
        Value::Text(s) => Some(s),
        Value::List(_) => None,
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key).and_then(|e| text_of(e).map(str::to_string)))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        if live(&mut entries, key).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        let existed = live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        let matches = live(&mut entries, key).is_some_and(|e| text_of(e) == Some(expected));
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) if text_of(entry) == Some(expected) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn push_capped(
        &self,
        key: &str,
        value: &str,
        cap: usize,
        ttl: Duration,
    ) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        let expires_at = Some(Instant::now() + ttl);
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::List(list),
                expires_at: at,
            }) => {
                list.push_back(value.to_string());
                while list.len() > cap.max(1) {
                    list.pop_front();
                }
                *at = expires_at;
            }
            _ => {
                let mut list = VecDeque::new();
                list.push_back(value.to_string());
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(list),
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn list(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.lock().await;
        Ok(match live(&mut entries, key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn push_back(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => list.push_back(value.to_string()),
            _ => {
                let mut list = VecDeque::new();
                list.push_back(value.to_string());
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(list),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn pop_front(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        let (popped, now_empty) = match live(&mut entries, key) {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let popped = list.pop_front();
                (popped, list.is_empty())
            }
            _ => (None, false),
        };
        // Redis deletes a list when its last element is popped.
        if now_empty {
            entries.remove(key);
        }
        Ok(popped)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, e| e.is_live(now));
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

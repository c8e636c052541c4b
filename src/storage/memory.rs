//! In-process backend with Redis-compatible semantics
//!
//! Used by tests and by `storage.backend = "memory"` for local runs. Every
//! call takes a single lock, which makes batches trivially atomic. Expiry is
//! evaluated lazily against `tokio::time::Instant`, so tests can drive it with
//! paused time. Scores and range bounds are rounded through `f64` as Redis
//! does, so nearby scores collide here exactly as they would on a server.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use super::{check_expiries, KvBackend, ScoreBound, WriteOp};
use crate::error::StoreError;

#[derive(Debug)]
struct Entry<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Entry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Score as Redis stores it: the nearest double
fn as_stored_score(score: i64) -> i64 {
    score as f64 as i64
}

fn as_stored_bound(bound: ScoreBound) -> ScoreBound {
    match bound {
        ScoreBound::Unbounded => ScoreBound::Unbounded,
        ScoreBound::Inclusive(score) => ScoreBound::Inclusive(as_stored_score(score)),
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        let score = as_stored_score(score);
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn range(&self, min: ScoreBound, max: ScoreBound) -> Vec<String> {
        let (min, max) = (as_stored_bound(min), as_stored_bound(max));
        self.ordered
            .iter()
            .filter(|(score, _)| min.admits_above(*score) && max.admits_below(*score))
            .map(|(_, member)| member.clone())
            .collect()
    }
}

#[derive(Debug, Default)]
struct State {
    hashes: HashMap<String, Entry<HashMap<String, String>>>,
    sorted: HashMap<String, Entry<SortedSet>>,
    poisoned: HashSet<String>,
}

impl State {
    fn purge_expired(&mut self, now: Instant) {
        self.hashes.retain(|_, entry| entry.is_live(now));
        self.sorted.retain(|_, entry| entry.is_live(now));
    }

    fn check_batch(&self, ops: &[WriteOp], now: Instant) -> Result<(), StoreError> {
        check_expiries(ops)?;
        for op in ops {
            let conflict = match op {
                WriteOp::SetFields { key, .. } => self.sorted.contains_key(key),
                WriteOp::SortedAdd { key, .. } => self.hashes.contains_key(key),
                WriteOp::Expire { key, ttl } => {
                    if now.checked_add(*ttl).is_none() {
                        return Err(StoreError::Unavailable(format!(
                            "invalid expire time for {}",
                            key
                        )));
                    }
                    false
                }
            };
            if conflict {
                return Err(StoreError::Unavailable(
                    "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn apply(&mut self, op: WriteOp, now: Instant) {
        match op {
            WriteOp::SetFields { key, fields } => {
                let entry = self
                    .hashes
                    .entry(key)
                    .or_insert_with(|| Entry::new(HashMap::new()));
                entry.value.extend(fields);
            }
            WriteOp::SortedAdd { key, member, score } => {
                let entry = self
                    .sorted
                    .entry(key)
                    .or_insert_with(|| Entry::new(SortedSet::default()));
                entry.value.insert(&member, score);
            }
            WriteOp::Expire { key, ttl } => {
                if ttl.is_zero() {
                    self.hashes.remove(&key);
                    self.sorted.remove(&key);
                    return;
                }
                // Deadline overflow is rejected by check_batch
                let Some(deadline) = now.checked_add(ttl) else {
                    return;
                };
                let expires_at = Some(deadline);
                if let Some(entry) = self.hashes.get_mut(&key) {
                    entry.expires_at = expires_at;
                }
                if let Some(entry) = self.sorted.get_mut(&key) {
                    entry.expires_at = expires_at;
                }
            }
        }
    }
}

/// Key-value backend held entirely in process memory
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    unavailable: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the backend were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make fetches of `key` fail individually
    pub fn poison_key(&self, key: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.poisoned.insert(key.to_string());
        }
    }

    /// Drop `key` immediately, as an eviction would
    pub fn evict(&self, key: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.hashes.remove(key);
            state.sorted.remove(key);
        }
    }

    /// Whether `key` currently holds a live value
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        match self.state.lock() {
            Ok(state) => {
                state.hashes.get(key).is_some_and(|e| e.is_live(now))
                    || state.sorted.get(key).is_some_and(|e| e.is_live(now))
            }
            Err(_) => false,
        }
    }

    /// Number of live keys of any type
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        match self.state.lock() {
            Ok(state) => {
                state.hashes.values().filter(|e| e.is_live(now)).count()
                    + state.sorted.values().filter(|e| e.is_live(now)).count()
            }
            Err(_) => 0,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("backend closed".to_string()));
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("backend state poisoned".to_string()))?;
        state.purge_expired(Instant::now());
        Ok(state)
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn execute_atomic(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let now = Instant::now();
        state.check_batch(&ops, now)?;

        for op in ops {
            state.apply(op, now);
        }
        Ok(())
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<String>, StoreError> {
        let state = self.lock()?;
        if state.hashes.contains_key(key) {
            return Err(StoreError::Unavailable(
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
            ));
        }
        Ok(state
            .sorted
            .get(key)
            .map(|entry| entry.value.range(min, max))
            .unwrap_or_default())
    }

    async fn fetch_fields(
        &self,
        keys: &[String],
    ) -> Result<Vec<Option<HashMap<String, String>>>, StoreError> {
        let state = self.lock()?;
        Ok(keys
            .iter()
            .map(|key| {
                if state.poisoned.contains(key) || state.sorted.contains_key(key) {
                    return None;
                }
                Some(
                    state
                        .hashes
                        .get(key)
                        .map(|entry| entry.value.clone())
                        .unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut state) = self.state.lock() {
            *state = State::default();
        }
        Ok(())
    }
}

//! Single-flight result cache.
//!
//! For any key at most one producer runs at a time. The first caller claims the
//! key and runs the producer on its own task; concurrent callers subscribe to
//! the claim's completion signal instead of starting duplicate work. Completed
//! values are kept in an LRU so later callers get them immediately.
//!
//! ```text
//! caller A ─┐                      ┌──► producer (one task)
//! caller B ─┼──► SingleFlightCache ┤          │
//! caller C ─┘    (pending/ready)   └──◄───────┘ broadcast to A, B, C
//! ```
//!
//! Failures remove the entry so the next caller retries from scratch. A value
//! that fails after it was stored (see [`Cacheable::is_failed`]) is dropped on
//! the next lookup the same way.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{ModelId, Mode, ScraperProvider};
use crate::error::{Result, TranslateError};
use crate::state_machine::{record_transition, EntryState};

/// Default number of completed entries kept.
pub const DEFAULT_CAPACITY: usize = 512;
/// Default time a caller waits on someone else's in-flight producer.
pub const DEFAULT_WAIT_BUDGET: Duration = Duration::from_secs(120);

/// Identity of a translation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub url: String,
    pub mode: Mode,
    pub model: ModelId,
    pub scraper: ScraperProvider,
}

impl CacheKey {
    pub fn new(url: impl Into<String>, mode: Mode, model: ModelId, scraper: ScraperProvider) -> Self {
        Self {
            url: url.into(),
            mode,
            model,
            scraper,
        }
    }

    /// Same mode/model/scraper, different document.
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }

    /// `url|mode|model|scraper` using wire names.
    pub fn canonical(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.url,
            self.mode.as_str(),
            self.model.as_str(),
            self.scraper.as_str()
        )
    }

    /// blake3 of the canonical form; used as the map key.
    pub fn digest(&self) -> [u8; 32] {
        *blake3::hash(self.canonical().as_bytes()).as_bytes()
    }

    /// Short hex prefix of the digest for log lines.
    pub fn fingerprint(&self) -> String {
        self.digest()[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Values the cache can hold.
pub trait Cacheable: Clone + Send + Sync + 'static {
    /// True once the value can no longer be served, e.g. a generation that
    /// broke off after it was cached.
    fn is_failed(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Completed entries kept before the least recently used is dropped.
    pub capacity: usize,
    /// Completed entries older than this are dropped on lookup. `None` keeps
    /// them for the life of the process.
    pub ttl: Option<Duration>,
    pub wait_budget: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: None,
            wait_budget: DEFAULT_WAIT_BUDGET,
        }
    }
}

#[derive(Clone)]
enum Completion<V> {
    Ready(V),
    Failed(String),
}

struct ReadyEntry<V> {
    value: V,
    inserted_at: Instant,
}

struct Slots<V> {
    ready: LruCache<[u8; 32], ReadyEntry<V>>,
    pending: HashMap<[u8; 32], broadcast::Sender<Completion<V>>>,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    hits: AtomicU64,
    coalesced: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_requests: u64,
    pub hits: u64,
    pub coalesced: u64,
    pub misses: u64,
    pub bypassed: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub evictions: u64,
    pub pending: usize,
    pub ready: usize,
}

impl CacheStats {
    /// Share of cached requests that did not start their own producer.
    pub fn dedup_ratio(&self) -> f64 {
        // Counters are read one by one; a concurrent bypass can land between.
        let cached = self.total_requests.saturating_sub(self.bypassed);
        if cached == 0 {
            0.0
        } else {
            (self.hits + self.coalesced) as f64 / cached as f64
        }
    }
}

struct Shared<V> {
    slots: Mutex<Slots<V>>,
    counters: Counters,
    config: CacheConfig,
}

/// Outcome of the locked lookup step.
enum Lookup<V> {
    Hit(V),
    Wait(broadcast::Receiver<Completion<V>>),
    Claimed(broadcast::Sender<Completion<V>>),
}

/// Shared, cheaply cloneable single-flight cache.
pub struct SingleFlightCache<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for SingleFlightCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V: Cacheable> SingleFlightCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(Slots {
                    ready: LruCache::new(capacity),
                    pending: HashMap::new(),
                }),
                counters: Counters::default(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Return the value for `key`, producing it at most once across callers.
    ///
    /// With `bypass_cache` the producer always runs and the key's entry is
    /// neither read nor written.
    pub async fn resolve<F, Fut>(&self, key: &CacheKey, producer: F, bypass_cache: bool) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let counters = &self.shared.counters;
        counters.total.fetch_add(1, Ordering::Relaxed);
        let fingerprint = key.fingerprint();

        if bypass_cache {
            counters.bypassed.fetch_add(1, Ordering::Relaxed);
            info!(key = %fingerprint, url = %key.url, decision = "bypass", "cache_resolve");
            return producer().await;
        }

        let digest = key.digest();
        match self.lookup_or_claim(digest, &fingerprint) {
            Lookup::Hit(value) => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
                info!(key = %fingerprint, url = %key.url, decision = "hit", "cache_resolve");
                Ok(value)
            }
            Lookup::Wait(rx) => {
                counters.coalesced.fetch_add(1, Ordering::Relaxed);
                info!(key = %fingerprint, url = %key.url, decision = "coalesced", "cache_resolve");
                self.wait_for(rx, &fingerprint).await
            }
            Lookup::Claimed(tx) => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
                info!(key = %fingerprint, url = %key.url, decision = "miss", "cache_resolve");
                // Guard first so a panicking producer still releases the key.
                let claim = Claim {
                    shared: Arc::clone(&self.shared),
                    digest,
                    fingerprint,
                    tx: Some(tx),
                };
                let work = producer();
                self.produce(claim, work).await
            }
        }
    }

    /// Check-then-claim under one lock acquisition.
    fn lookup_or_claim(&self, digest: [u8; 32], fingerprint: &str) -> Lookup<V> {
        let mut slots = self.shared.slots.lock();

        let stale = match slots.ready.get(&digest) {
            Some(entry) if entry.value.is_failed() => Some("failed after caching"),
            Some(entry) => match self.shared.config.ttl {
                Some(ttl) if entry.inserted_at.elapsed() >= ttl => Some("expired"),
                _ => return Lookup::Hit(entry.value.clone()),
            },
            None => None,
        };
        if let Some(reason) = stale {
            slots.ready.pop(&digest);
            self.shared.counters.evictions.fetch_add(1, Ordering::Relaxed);
            record_transition(fingerprint, EntryState::Success, EntryState::Absent);
            debug!(key = fingerprint, reason, "cache entry dropped");
        }

        if let Some(tx) = slots.pending.get(&digest) {
            return Lookup::Wait(tx.subscribe());
        }

        // One message is ever sent per claim.
        let (tx, _) = broadcast::channel(1);
        slots.pending.insert(digest, tx.clone());
        record_transition(fingerprint, EntryState::Absent, EntryState::Pending);
        Lookup::Claimed(tx)
    }

    async fn produce<Fut>(&self, mut claim: Claim<V>, work: Fut) -> Result<V>
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        // The producer outlives a caller that stops waiting.
        let task = tokio::spawn(async move {
            let outcome = work.await;
            claim.complete(&outcome);
            outcome
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(TranslateError::ProducerFailed {
                reason: format!("producer task ended abnormally: {e}"),
            }),
        }
    }

    async fn wait_for(&self, mut rx: broadcast::Receiver<Completion<V>>, fingerprint: &str) -> Result<V> {
        let budget = self.shared.config.wait_budget;
        let started = Instant::now();
        match tokio::time::timeout(budget, rx.recv()).await {
            Ok(Ok(Completion::Ready(value))) => {
                debug!(
                    key = fingerprint,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "in-flight result received"
                );
                Ok(value)
            }
            Ok(Ok(Completion::Failed(reason))) => Err(TranslateError::ProducerFailed { reason }),
            Ok(Err(_)) => Err(TranslateError::ProducerFailed {
                reason: "in-flight producer went away".into(),
            }),
            Err(_) => {
                self.shared.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = fingerprint,
                    budget_ms = budget.as_millis() as u64,
                    "timed out waiting for in-flight translation"
                );
                Err(TranslateError::Timeout { waited: budget })
            }
        }
    }

    /// Current state of `key`. Does not touch LRU order. A stored value that
    /// has since failed reports `Absent`: the next lookup replaces it.
    pub fn status(&self, key: &CacheKey) -> EntryState {
        let digest = key.digest();
        let slots = self.shared.slots.lock();
        if slots.pending.contains_key(&digest) {
            return EntryState::Pending;
        }
        match slots.ready.peek(&digest) {
            Some(entry) if !entry.value.is_failed() => EntryState::Success,
            _ => EntryState::Absent,
        }
    }

    /// Drop a completed entry. Pending entries are left alone.
    pub fn evict(&self, key: &CacheKey) -> bool {
        let removed = self.shared.slots.lock().ready.pop(&key.digest()).is_some();
        if removed {
            self.shared.counters.evictions.fetch_add(1, Ordering::Relaxed);
            record_transition(&key.fingerprint(), EntryState::Success, EntryState::Absent);
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.shared.counters;
        let (pending, ready) = {
            let slots = self.shared.slots.lock();
            (slots.pending.len(), slots.ready.len())
        };
        CacheStats {
            total_requests: c.total.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            bypassed: c.bypassed.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            pending,
            ready,
        }
    }
}

/// Ownership of a pending entry. Completing it publishes the outcome;
/// dropping it unfinished (panic, runtime shutdown) releases the key.
struct Claim<V> {
    shared: Arc<Shared<V>>,
    digest: [u8; 32],
    fingerprint: String,
    tx: Option<broadcast::Sender<Completion<V>>>,
}

impl<V: Clone> Claim<V> {
    fn complete(&mut self, outcome: &Result<V>) {
        let Some(tx) = self.tx.take() else { return };
        let message = {
            let mut slots = self.shared.slots.lock();
            slots.pending.remove(&self.digest);
            match outcome {
                Ok(value) => {
                    record_transition(&self.fingerprint, EntryState::Pending, EntryState::Success);
                    let entry = ReadyEntry {
                        value: value.clone(),
                        inserted_at: Instant::now(),
                    };
                    if let Some((evicted, _)) = slots.ready.push(self.digest, entry) {
                        if evicted != self.digest {
                            self.shared.counters.evictions.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %self.fingerprint, "capacity reached, least recently used entry dropped");
                        }
                    }
                    Completion::Ready(value.clone())
                }
                Err(e) => {
                    record_transition(&self.fingerprint, EntryState::Pending, EntryState::Absent);
                    self.shared.counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %self.fingerprint, error = %e, "producer failed, entry evicted");
                    Completion::Failed(e.to_string())
                }
            }
        };
        // No receivers is fine: nobody was waiting.
        let _ = tx.send(message);
    }
}

impl<V> Drop for Claim<V> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.shared.slots.lock().pending.remove(&self.digest);
            self.shared.counters.failures.fetch_add(1, Ordering::Relaxed);
            record_transition(&self.fingerprint, EntryState::Pending, EntryState::Absent);
            warn!(key = %self.fingerprint, "producer abandoned, entry evicted");
            let _ = tx.send(Completion::Failed("producer abandoned".into()));
        }
    }
}

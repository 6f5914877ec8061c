//! In-memory result cache with a time and size bound
//!
//! [`Cache`] is a plain map and does no locking of its own. [`CacheManager`]
//! owns the live cache behind a mutex-guarded reference and replaces it
//! wholesale on every sweep: the sweep copies surviving entries into a new
//! cache, then swaps the reference. Writes that land on the old cache after
//! the copy are lost, which is accepted.

use recon_common::time::now_millis;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default entry lifetime in seconds
pub const DEFAULT_LIFETIME_SECS: u64 = 1800;

/// Default entry bound
pub const DEFAULT_MAX_SIZE: usize = 10_000;

/// Default sweep wake interval
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct CacheEntry<V> {
    value: V,
    inserted_at_millis: i64,
}

/// Fingerprint-keyed map of cached values
///
/// `max_size` is only enforced by [`Cache::expired_copy`]; inserts may
/// exceed it until the next sweep.
pub struct Cache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    lifetime_secs: u64,
    max_size: usize,
}

impl<V> Default for Cache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_LIFETIME_SECS, DEFAULT_MAX_SIZE)
    }
}

impl<V> Cache<V> {
    pub fn new(lifetime_secs: u64, max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lifetime_secs,
            max_size,
        }
    }

    pub fn put(&mut self, key: impl Into<String>, value: V) {
        self.put_at(key, value, now_millis());
    }

    /// Insert with an explicit insertion timestamp
    pub fn put_at(&mut self, key: impl Into<String>, value: V, inserted_at_millis: i64) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at_millis,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lifetime_secs(&self) -> u64 {
        self.lifetime_secs
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn set_lifetime_secs(&mut self, lifetime_secs: u64) {
        self.lifetime_secs = lifetime_secs;
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }
}

impl<V: Clone> Cache<V> {
    /// Build a new cache holding the entries that survive a sweep at `now_millis`
    ///
    /// Entries are visited newest first; an entry is kept while its age is
    /// below the lifetime and fewer than `max_size` entries have been kept.
    pub fn expired_copy(&self, now_millis: i64) -> Cache<V> {
        let lifetime_millis = i64::try_from(self.lifetime_secs.saturating_mul(1000)).unwrap_or(i64::MAX);

        let mut newest_first: Vec<(&String, &CacheEntry<V>)> = self.entries.iter().collect();
        newest_first.sort_by(|a, b| b.1.inserted_at_millis.cmp(&a.1.inserted_at_millis));

        let mut fresh = Cache::new(self.lifetime_secs, self.max_size);
        for (key, entry) in newest_first {
            if fresh.len() >= self.max_size {
                break;
            }
            if now_millis - entry.inserted_at_millis >= lifetime_millis {
                // sorted newest first, so everything after this is older
                break;
            }
            fresh.put_at(key.clone(), entry.value.clone(), entry.inserted_at_millis);
        }
        fresh
    }
}

/// Counts observed by one sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub before: usize,
    pub after: usize,
    /// Live entry count when the swap happened
    pub live_at_swap: usize,
}

#[derive(Debug, Clone)]
struct CacheSettings {
    enabled: bool,
    lifetime_secs: u64,
    max_size: usize,
    sweep_interval: Duration,
}

/// Owner of the live cache reference and its background sweep
pub struct CacheManager<V> {
    name: String,
    live: Mutex<Arc<RwLock<Cache<V>>>>,
    settings: Mutex<CacheSettings>,
    sweeper: Mutex<Option<CancellationToken>>,
}

/// Shared handle to one cache instance
pub type CacheRef<V> = Arc<RwLock<Cache<V>>>;

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a disabled manager; call [`CacheManager::set_enabled`] to start sweeping
    pub fn new(name: impl Into<String>, lifetime_secs: u64, max_size: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            live: Mutex::new(Arc::new(RwLock::new(Cache::new(lifetime_secs, max_size)))),
            settings: Mutex::new(CacheSettings {
                enabled: false,
                lifetime_secs,
                max_size,
                sweep_interval: DEFAULT_SWEEP_INTERVAL,
            }),
            sweeper: Mutex::new(None),
        })
    }

    /// Current cache reference
    ///
    /// Do not hold the returned reference across a later sweep; writes to a
    /// replaced cache are discarded.
    pub fn get_cache(&self) -> CacheRef<V> {
        Arc::clone(&self.live.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_enabled(&self) -> bool {
        self.settings().enabled
    }

    /// Cached value for `key`, if enabled and present
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let cache = self.get_cache();
        let guard = cache.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(key).cloned()
    }

    /// Store `value` under `key` when enabled
    pub fn put(&self, key: impl Into<String>, value: V) {
        if !self.is_enabled() {
            return;
        }
        let cache = self.get_cache();
        let mut guard = cache.write().unwrap_or_else(PoisonError::into_inner);
        guard.put(key, value);
    }

    pub fn len(&self) -> usize {
        let cache = self.get_cache();
        let guard = cache.read().unwrap_or_else(PoisonError::into_inner);
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lifetime_secs(&self) -> u64 {
        self.settings().lifetime_secs
    }

    pub fn max_size(&self) -> usize {
        self.settings().max_size
    }

    pub fn set_lifetime(&self, lifetime_secs: u64) {
        self.settings_mut(|s| s.lifetime_secs = lifetime_secs);
        let cache = self.get_cache();
        cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_lifetime_secs(lifetime_secs);
    }

    pub fn set_max_size(&self, max_size: usize) {
        self.settings_mut(|s| s.max_size = max_size);
        let cache = self.get_cache();
        cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_max_size(max_size);
    }

    /// Change the sweep wake interval; takes effect the next time sweeping starts
    pub fn set_sweep_interval(&self, interval: Duration) {
        self.settings_mut(|s| s.sweep_interval = interval);
    }

    /// Run one sweep: copy survivors into a new cache and swap it in
    pub fn expire_cache(&self) -> SweepReport {
        self.expire_cache_at(now_millis())
    }

    pub fn expire_cache_at(&self, now_millis: i64) -> SweepReport {
        let (before, fresh) = self.copy_survivors(now_millis);
        self.swap_in(before, fresh)
    }

    /// First half of a sweep: count the live cache and copy its survivors
    fn copy_survivors(&self, now_millis: i64) -> (usize, Cache<V>) {
        let current = self.get_cache();
        let guard = current.read().unwrap_or_else(PoisonError::into_inner);
        (guard.len(), guard.expired_copy(now_millis))
    }

    /// Second half of a sweep: replace the live cache with `fresh`
    fn swap_in(&self, before: usize, fresh: Cache<V>) -> SweepReport {
        let after = fresh.len();

        let live_at_swap = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            let live_count = live.read().unwrap_or_else(PoisonError::into_inner).len();
            *live = Arc::new(RwLock::new(fresh));
            live_count
        };

        if live_at_swap != before {
            warn!(
                cache = %self.name,
                before,
                live_at_swap,
                "Cache changed during expiration, entries written mid-sweep were dropped"
            );
        }

        debug!(cache = %self.name, before, after, "Cache sweep complete");

        SweepReport {
            before,
            after,
            live_at_swap,
        }
    }

    /// Enable or disable caching; starts or stops the background sweep
    ///
    /// Starting the sweep needs a Tokio runtime. Without one the cache is
    /// still enabled but never swept.
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) {
        self.settings_mut(|s| s.enabled = enabled);

        let mut sweeper = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if enabled {
            if sweeper.is_none() {
                *sweeper = self.spawn_sweeper();
            }
        } else if let Some(token) = sweeper.take() {
            token.cancel();
            info!(cache = %self.name, "Cache sweep stopped");
        }
    }

    /// Whether a sweep task is currently running
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the sweep task without changing the enabled flag
    pub fn stop(&self) {
        if let Some(token) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }

    fn spawn_sweeper(self: &Arc<Self>) -> Option<CancellationToken> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(cache = %self.name, "No async runtime, cache sweep not started");
                return None;
            }
        };

        let interval = self.settings().sweep_interval;
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak: Weak<Self> = Arc::downgrade(self);
        let name = self.name.clone();

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first tick fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(manager) = weak.upgrade() else {
                    break;
                };

                // Run on its own task so a panic is contained and logged
                let sweep = tokio::task::spawn_blocking(move || manager.expire_cache());
                if let Err(e) = sweep.await {
                    error!(cache = %name, error = %e, "Cache sweep failed");
                }
            }
            debug!(cache = %name, "Cache sweep task exiting");
        });

        info!(cache = %self.name, interval_secs = interval.as_secs(), "Cache sweep started");
        Some(token)
    }

    fn settings(&self) -> CacheSettings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn settings_mut(&self, f: impl FnOnce(&mut CacheSettings)) {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut settings);
    }
}

impl<V> Drop for CacheManager<V> {
    fn drop(&mut self) {
        if let Some(token) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

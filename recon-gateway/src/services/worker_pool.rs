//! Adaptive worker pool
//!
//! Tasks run on the Tokio runtime but only `size()` of them make progress at
//! once; each holds a semaphore permit for its lifetime. The pool shrinks by
//! one slot when an upstream source throttles us and creeps back up to its
//! initial size slowly. Shrink and grow share one "last adjusted" timestamp,
//! so any adjustment restarts both cooldowns.
//!
//! A shrink while every slot is busy cannot take a permit immediately. It
//! records an owed retirement instead, and the next task to finish forgets
//! its permit rather than handing it to a queued task.

use recon_common::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Pool sizing and hysteresis parameters
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub initial_size: usize,
    /// Minimum time since the last adjustment before a shrink
    pub shrink_cooldown: Duration,
    /// Minimum time since the last adjustment before a grow
    pub grow_cooldown: Duration,
    /// After this long without adjustment, `submit` stops trying to grow
    pub reset_cooldown: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 4,
            shrink_cooldown: Duration::from_secs(30),
            grow_cooldown: Duration::from_secs(600),
            reset_cooldown: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&recon_common::config::PoolConfig> for PoolConfig {
    fn from(config: &recon_common::config::PoolConfig) -> Self {
        Self {
            initial_size: config.initial_size.max(1),
            shrink_cooldown: Duration::from_secs(config.shrink_cooldown_secs),
            grow_cooldown: Duration::from_secs(config.grow_cooldown_secs),
            reset_cooldown: Duration::from_secs(config.reset_cooldown_secs),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }
}

#[derive(Debug)]
struct PoolState {
    current_size: usize,
    initial_size: usize,
    /// `None` means no adjustment is pending
    last_adjusted: Option<Instant>,
    accepting: bool,
}

impl PoolState {
    fn elapsed_since_adjustment_exceeds(&self, cooldown: Duration) -> bool {
        match self.last_adjusted {
            None => true,
            Some(at) => at.elapsed() > cooldown,
        }
    }
}

/// Resizable pool of execution slots
pub struct AdaptiveWorkerPool {
    name: String,
    config: PoolConfig,
    slots: Arc<Semaphore>,
    /// Permits to forget as running tasks finish
    owed_retirements: Arc<AtomicUsize>,
    state: Mutex<PoolState>,
    tracker: TaskTracker,
}

impl AdaptiveWorkerPool {
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Self {
        let initial_size = config.initial_size.max(1);
        Self {
            name: name.into(),
            slots: Arc::new(Semaphore::new(initial_size)),
            owed_retirements: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(PoolState {
                current_size: initial_size,
                initial_size,
                last_adjusted: None,
                accepting: true,
            }),
            tracker: TaskTracker::new(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current number of execution slots
    pub fn size(&self) -> usize {
        self.lock_state().current_size
    }

    pub fn initial_size(&self) -> usize {
        self.lock_state().initial_size
    }

    /// Submit a task; it starts once a slot is free
    ///
    /// If the pool was shrunk earlier this first tries to grow it back.
    pub fn submit<F>(&self, task: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let pending_adjustment = {
            let state = self.lock_state();
            if !state.accepting {
                return Err(Error::Internal(format!(
                    "worker pool {} is shut down",
                    self.name
                )));
            }
            state.last_adjusted.is_some()
        };

        if pending_adjustment {
            self.grow();
            let mut state = self.lock_state();
            if let Some(at) = state.last_adjusted {
                if at.elapsed() > self.config.reset_cooldown {
                    debug!(pool = %self.name, "Pool stable, clearing pending adjustment");
                    state.last_adjusted = None;
                }
            }
        }

        let slots = Arc::clone(&self.slots);
        let owed = Arc::clone(&self.owed_retirements);
        Ok(self.tracker.spawn(async move {
            // the semaphore is never closed, so this only fails if it were
            let permit = slots.acquire_owned().await.ok();
            let output = task.await;
            if let Some(permit) = permit {
                if take_one(&owed) {
                    permit.forget();
                }
            }
            output
        }))
    }

    /// Remove one slot if the size is above 1 and the shrink cooldown has passed
    ///
    /// Returns true when the pool shrank.
    pub fn shrink(&self) -> bool {
        let new_size = {
            let mut state = self.lock_state();
            if state.current_size <= 1
                || !state.elapsed_since_adjustment_exceeds(self.config.shrink_cooldown)
            {
                return false;
            }
            state.current_size -= 1;
            state.last_adjusted = Some(Instant::now());
            state.current_size
        };

        // Retire one permit. If every slot is busy, the next task to finish retires its own.
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => permit.forget(),
            Err(_) => {
                self.owed_retirements.fetch_add(1, Ordering::SeqCst);
            }
        }

        info!(pool = %self.name, size = new_size, "Shrank worker pool");
        true
    }

    /// Add one slot if below the initial size and the grow cooldown has passed
    ///
    /// Returns true when the pool grew.
    pub fn grow(&self) -> bool {
        let new_size = {
            let mut state = self.lock_state();
            if state.current_size >= state.initial_size
                || !state.elapsed_since_adjustment_exceeds(self.config.grow_cooldown)
            {
                return false;
            }
            state.current_size += 1;
            state.last_adjusted = Some(Instant::now());
            state.current_size
        };

        // Cancelling an owed retirement restores the slot without a new permit
        if !take_one(&self.owed_retirements) {
            self.slots.add_permits(1);
        }
        info!(pool = %self.name, size = new_size, "Grew worker pool");
        true
    }

    /// Stop accepting work and wait for in-flight tasks, up to the shutdown timeout
    ///
    /// Returns false if tasks were still running when the timeout elapsed.
    pub async fn shutdown(&self) -> bool {
        self.lock_state().accepting = false;
        self.tracker.close();

        match tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => {
                debug!(pool = %self.name, "Worker pool drained");
                true
            }
            Err(_) => {
                warn!(
                    pool = %self.name,
                    pending = self.tracker.len(),
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Worker pool did not drain before timeout"
                );
                false
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrement `counter` if it is above zero; true when it was
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

//! Controller and worker pool.

use crate::cache::Lister;
use crate::config::ControllerConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::handler::{SyncError, SyncHandler};
use crate::informer::Informer;
use crate::notification::Notification;
use crate::queue::RateLimitingQueue;
use crate::stop::StopSignal;
use ctrlkit_api::{ObjectKey, Resource};
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle of a [`Controller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, not yet running.
    Created,
    /// Workers are processing keys.
    Running,
    /// Stop was requested; workers are finishing.
    Stopping,
    /// `run` has returned.
    Stopped,
}

impl LifecycleState {
    /// Returns true while `run` is executing.
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Stopping)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters describing handler outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Successful syncs.
    pub synced: u64,
    /// Failed syncs, including panics and permanent errors.
    pub failed: u64,
    /// Keys given up on, either after a permanent error or after
    /// exceeding `max_retries`.
    pub dropped: u64,
    /// Handler panics.
    pub panics: u64,
}

#[derive(Default)]
struct Counters {
    synced: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    panics: AtomicU64,
}

/// Drives a [`SyncHandler`] from an [`Informer`]'s notifications.
///
/// Every notification is reduced to its [`ObjectKey`] and added to a
/// [`RateLimitingQueue`]; a pool of worker threads takes keys from the
/// queue and calls the handler. Successful keys are forgotten by the rate
/// limiter; failed keys are re-added with backoff.
pub struct Controller<K: Resource> {
    config: ControllerConfig,
    informer: Arc<Informer<K>>,
    handler: Box<dyn SyncHandler<K>>,
    queue: Arc<RateLimitingQueue<ObjectKey>>,
    lister: Lister<K>,
    state: RwLock<LifecycleState>,
    counters: Counters,
}

impl<K: Resource> Controller<K> {
    /// Creates a controller and registers its notification handler on
    /// `informer`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidConfig`] if `config` does not validate, or
    /// [`RuntimeError::Spawn`] if the queue thread cannot be started.
    pub fn new(
        informer: Arc<Informer<K>>,
        handler: impl SyncHandler<K> + 'static,
        config: ControllerConfig,
    ) -> RuntimeResult<Self> {
        config.validate()?;
        let queue = Arc::new(RateLimitingQueue::with_config(
            config.name.clone(),
            &config.rate_limiter,
        )?);

        info!(controller = %config.name, kind = K::KIND, "setting up event handlers");
        let enqueue = Arc::clone(&queue);
        informer.add_event_handler(move |notification: &Notification<K>| {
            if let Notification::Updated { old, new } = notification {
                if old.resource_version() == new.resource_version() {
                    return;
                }
            }
            enqueue.add(notification.key());
        });

        Ok(Self {
            lister: informer.lister(),
            config,
            informer,
            handler: Box::new(handler),
            queue,
            state: RwLock::new(LifecycleState::Created),
            counters: Counters::default(),
        })
    }

    /// Returns the controller name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Returns the work queue.
    pub fn queue(&self) -> &RateLimitingQueue<ObjectKey> {
        &self.queue
    }

    /// Returns the cache the handler reads from.
    pub fn lister(&self) -> &Lister<K> {
        &self.lister
    }

    /// Returns a snapshot of the outcome counters.
    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            synced: self.counters.synced.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            panics: self.counters.panics.load(Ordering::Relaxed),
        }
    }

    /// Waits for the cache to sync, then runs the workers until `stop`
    /// fires.
    ///
    /// On stop the queue is shut down and `run` returns once every worker
    /// has finished its current key. The informer is not started here;
    /// run it separately with the same stop signal.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::InvalidStateTransition`] unless the controller is
    ///   in [`LifecycleState::Created`].
    /// - [`RuntimeError::CacheSyncTimeout`] if `stop` fires before the
    ///   cache has synced. No worker is started in that case.
    /// - [`RuntimeError::Spawn`] if a worker thread cannot be started.
    pub fn run(&self, stop: &StopSignal) -> RuntimeResult<()> {
        self.transition(LifecycleState::Created, LifecycleState::Running)?;
        info!(controller = %self.name(), "starting controller");

        info!(controller = %self.name(), "waiting for informer caches to sync");
        if !self.wait_for_cache_sync(stop) {
            self.queue.shut_down();
            *self.state.write() = LifecycleState::Stopped;
            return Err(RuntimeError::CacheSyncTimeout(self.config.name.clone()));
        }

        info!(controller = %self.name(), workers = self.config.workers, "starting workers");
        let result = thread::scope(|scope| {
            for id in 0..self.config.workers {
                let name = format!("{}-worker-{id}", self.config.name);
                let spawned = thread::Builder::new()
                    .name(name.clone())
                    .spawn_scoped(scope, move || self.run_worker(id));
                if let Err(source) = spawned {
                    error!(controller = %self.name(), error = %source, "failed to start worker");
                    self.queue.shut_down();
                    return Err(RuntimeError::Spawn { name, source });
                }
            }
            info!(controller = %self.name(), "started workers");

            stop.wait();
            *self.state.write() = LifecycleState::Stopping;
            info!(controller = %self.name(), "shutting down workers");
            self.queue.shut_down();
            Ok(())
        });

        *self.state.write() = LifecycleState::Stopped;
        info!(controller = %self.name(), "controller stopped");
        result
    }

    /// Takes one key from the queue and handles it.
    ///
    /// Returns false once the queue is shut down.
    pub fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get() else {
            return false;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.sync(&key, &self.lister)
        }));

        match outcome {
            Ok(Ok(())) => {
                self.queue.forget(&key);
                self.counters.synced.fetch_add(1, Ordering::Relaxed);
                info!(controller = %self.name(), key = %key, "successfully synced");
            }
            Ok(Err(SyncError::Permanent(reason))) => {
                self.queue.forget(&key);
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(controller = %self.name(), key = %key, error = %reason, "permanent sync error, dropping key");
            }
            Ok(Err(err)) => self.retry(&key, &err.to_string()),
            Err(payload) => {
                self.counters.panics.fetch_add(1, Ordering::Relaxed);
                let reason = panic_message(payload.as_ref());
                error!(controller = %self.name(), key = %key, panic = %reason, "sync handler panicked");
                self.retry(&key, &reason);
            }
        }

        self.queue.done(&key);
        true
    }

    fn retry(&self, key: &ObjectKey, reason: &str) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        let requeues = self.queue.num_requeues(key);
        if let Some(max) = self.config.rate_limiter.max_retries {
            if requeues >= max {
                self.queue.forget(key);
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(controller = %self.name(), key = %key, retries = requeues, error = %reason, "dropping key out of the queue");
                return;
            }
        }
        warn!(controller = %self.name(), key = %key, retries = requeues, error = %reason, "error syncing, requeuing");
        self.queue.add_rate_limited(key.clone());
    }

    fn run_worker(&self, id: usize) {
        debug!(controller = %self.name(), worker = id, "worker started");
        while self.process_next_item() {}
        debug!(controller = %self.name(), worker = id, "worker stopped");
    }

    fn wait_for_cache_sync(&self, stop: &StopSignal) -> bool {
        loop {
            if self.informer.has_synced() {
                return true;
            }
            if stop.wait_timeout(self.config.sync_poll_interval) {
                trace!(controller = %self.name(), "stopped before cache sync");
                return false;
            }
        }
    }

    fn transition(&self, from: LifecycleState, to: LifecycleState) -> RuntimeResult<()> {
        let mut state = self.state.write();
        if *state != from {
            return Err(RuntimeError::InvalidStateTransition {
                from: state.to_string(),
                to: to.to_string(),
            });
        }
        *state = to;
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

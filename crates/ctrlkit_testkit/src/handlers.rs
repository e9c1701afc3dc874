//! Sync handlers for tests.
//!
//! Both handlers are cheap to clone: pass one clone to a controller and
//! keep another to inspect what happened.

use ctrlkit_api::{ObjectKey, Resource};
use ctrlkit_runtime::{Lister, SyncError, SyncHandler, SyncResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// One handler invocation.
#[derive(Debug, Clone)]
pub struct SyncCall {
    /// Key the handler was called with.
    pub key: ObjectKey,
    /// Resource version found in the cache, `None` if the key was absent.
    pub resource_version: Option<u64>,
    /// When the call started.
    pub at: Instant,
}

#[derive(Default)]
struct Recording {
    calls: Vec<SyncCall>,
    in_flight: HashSet<ObjectKey>,
    overlaps: usize,
    max_concurrency: usize,
}

impl Recording {
    fn enter(&mut self, call: SyncCall) {
        if !self.in_flight.insert(call.key.clone()) {
            self.overlaps += 1;
        }
        self.max_concurrency = self.max_concurrency.max(self.in_flight.len());
        self.calls.push(call);
    }

    fn exit(&mut self, key: &ObjectKey) {
        self.in_flight.remove(key);
    }
}

/// A handler that succeeds and records every call.
///
/// It also detects two workers handling the same key at the same time.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    recording: Arc<Mutex<Recording>>,
    work: Duration,
}

impl RecordingHandler {
    /// Creates a handler that returns immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes each call sleep for `work`.
    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    /// Returns every call so far.
    pub fn calls(&self) -> Vec<SyncCall> {
        self.recording.lock().calls.clone()
    }

    /// Returns the calls made for `key`.
    pub fn calls_for(&self, key: &ObjectKey) -> Vec<SyncCall> {
        self.recording
            .lock()
            .calls
            .iter()
            .filter(|call| &call.key == key)
            .cloned()
            .collect()
    }

    /// Number of calls so far.
    pub fn call_count(&self) -> usize {
        self.recording.lock().calls.len()
    }

    /// Number of times a key was entered while already being handled.
    pub fn overlaps(&self) -> usize {
        self.recording.lock().overlaps
    }

    /// Highest number of keys handled at once.
    pub fn max_concurrency(&self) -> usize {
        self.recording.lock().max_concurrency
    }
}

impl<K: Resource> SyncHandler<K> for RecordingHandler {
    fn sync(&self, key: &ObjectKey, cache: &Lister<K>) -> SyncResult {
        let call = SyncCall {
            key: key.clone(),
            resource_version: cache.get(key).map(|obj| obj.resource_version()),
            at: Instant::now(),
        };
        self.recording.lock().enter(call);
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
        self.recording.lock().exit(key);
        Ok(())
    }
}

/// What a [`ScriptedHandler`] does on one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Return success.
    Succeed,
    /// Return a retryable error.
    Fail,
    /// Return a permanent error.
    FailPermanently,
    /// Panic.
    Panic,
}

#[derive(Default)]
struct Script {
    outcomes: HashMap<ObjectKey, VecDeque<Outcome>>,
    attempts: Vec<SyncCall>,
}

/// A handler that plays back per-key outcomes, then succeeds.
#[derive(Clone, Default)]
pub struct ScriptedHandler {
    script: Arc<Mutex<Script>>,
}

impl ScriptedHandler {
    /// Creates a handler that always succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `outcomes` for `key`, played in order.
    pub fn script(&self, key: ObjectKey, outcomes: impl IntoIterator<Item = Outcome>) -> &Self {
        self.script
            .lock()
            .outcomes
            .entry(key)
            .or_default()
            .extend(outcomes);
        self
    }

    /// Makes `key` fail `times` times before succeeding.
    pub fn fail_times(&self, key: ObjectKey, times: usize) -> &Self {
        self.script(key, std::iter::repeat(Outcome::Fail).take(times))
    }

    /// Returns every attempt so far.
    pub fn attempts(&self) -> Vec<SyncCall> {
        self.script.lock().attempts.clone()
    }

    /// Returns the start times of the attempts for `key`.
    pub fn attempt_times(&self, key: &ObjectKey) -> Vec<Instant> {
        self.script
            .lock()
            .attempts
            .iter()
            .filter(|call| &call.key == key)
            .map(|call| call.at)
            .collect()
    }
}

impl<K: Resource> SyncHandler<K> for ScriptedHandler {
    fn sync(&self, key: &ObjectKey, cache: &Lister<K>) -> SyncResult {
        let outcome = {
            let mut script = self.script.lock();
            script.attempts.push(SyncCall {
                key: key.clone(),
                resource_version: cache.get(key).map(|obj| obj.resource_version()),
                at: Instant::now(),
            });
            script
                .outcomes
                .get_mut(key)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Outcome::Succeed)
        };

        match outcome {
            Outcome::Succeed => Ok(()),
            Outcome::Fail => Err(SyncError::retry(format!("scripted failure for {key}"))),
            Outcome::FailPermanently => Err(SyncError::permanent(format!("scripted rejection of {key}"))),
            Outcome::Panic => panic!("scripted panic for {key}"),
        }
    }
}

//! List-then-watch cache maintenance.

use crate::cache::store::{Store, Upsert};
use crate::cache::Lister;
use crate::config::InformerConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::notification::{DeletedObject, EventHandler, Notification};
use crate::stop::StopSignal;
use ctrlkit_api::{ApiError, ListWatch, Resource, WatchEvent, WatchPoll, WatchStream};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Why a watch stopped delivering events.
enum WatchEnd {
    Stopped,
    Closed(Option<ApiError>),
}

/// Keeps a local cache of one resource kind in step with the control plane.
///
/// [`run`](Informer::run) lists every object to seed the cache, then
/// watches from the listed resource version. Each event updates the cache
/// before the registered handlers are called with the matching
/// [`Notification`]. When the watch ends for any reason the informer
/// relists, emitting notifications for whatever changed in between.
pub struct Informer<K: Resource> {
    client: Arc<dyn ListWatch<K>>,
    config: InformerConfig,
    store: Arc<Store<K>>,
    handlers: RwLock<Vec<Arc<dyn EventHandler<K>>>>,
    synced: AtomicBool,
    running: AtomicBool,
}

impl<K: Resource> Informer<K> {
    /// Creates an informer reading from `client`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidConfig`] if `config` does not validate.
    pub fn new(client: Arc<dyn ListWatch<K>>, config: InformerConfig) -> RuntimeResult<Self> {
        config.validate()?;
        let store = Arc::new(Store::new(config.tombstone_ttl));
        Ok(Self {
            client,
            config,
            store,
            handlers: RwLock::new(Vec::new()),
            synced: AtomicBool::new(false),
            running: AtomicBool::new(false),
        })
    }

    /// Registers a handler. Handlers added after the initial list only see
    /// later changes.
    pub fn add_event_handler(&self, handler: impl EventHandler<K> + 'static) {
        self.handlers.write().push(Arc::new(handler));
    }

    /// Returns true once the initial list has been applied. Never reverts.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Returns a read-only view of the cache.
    pub fn lister(&self) -> Lister<K> {
        Lister::new(Arc::clone(&self.store))
    }

    /// Returns the configuration.
    pub fn config(&self) -> &InformerConfig {
        &self.config
    }

    /// Runs until `stop` fires.
    ///
    /// # Errors
    ///
    /// Fails only before the first successful list: with
    /// [`RuntimeError::InitialListFailed`] when the list error is not
    /// retryable or the configured attempts are used up, and with
    /// [`RuntimeError::InvalidStateTransition`] if the informer is
    /// already running.
    pub fn run(&self, stop: &StopSignal) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::InvalidStateTransition {
                from: "running".into(),
                to: "running".into(),
            });
        }
        info!(kind = K::KIND, "starting informer");

        let mut failures = 0u32;
        let mut next_resync = self.config.resync_interval.map(|every| Instant::now() + every);

        while !stop.is_stopped() {
            let version = match self.relist() {
                Ok(version) => version,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    if !self.has_synced() {
                        let exhausted = self
                            .config
                            .initial_list_attempts
                            .is_some_and(|limit| failures >= limit);
                        if exhausted || !err.is_retryable() {
                            warn!(kind = K::KIND, attempts = failures, error = %err, "initial list failed");
                            return Err(RuntimeError::InitialListFailed {
                                attempts: failures,
                                source: err,
                            });
                        }
                    }
                    let delay = self.config.reconnect.delay_for_attempt(failures);
                    warn!(kind = K::KIND, error = %err, ?delay, "list failed, backing off");
                    if stop.wait_timeout(delay) {
                        break;
                    }
                    continue;
                }
            };

            let stream = match self.client.watch(version) {
                Ok(stream) => stream,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    if err.requires_relist() {
                        debug!(kind = K::KIND, error = %err, "watch cursor expired, relisting");
                        continue;
                    }
                    let delay = self.config.reconnect.delay_for_attempt(failures);
                    warn!(kind = K::KIND, error = %err, ?delay, "watch failed, backing off");
                    if stop.wait_timeout(delay) {
                        break;
                    }
                    continue;
                }
            };

            match self.consume(stream, stop, &mut next_resync, &mut failures) {
                WatchEnd::Stopped => break,
                WatchEnd::Closed(None) => {
                    debug!(kind = K::KIND, "watch closed, relisting");
                }
                WatchEnd::Closed(Some(err)) if err.requires_relist() => {
                    debug!(kind = K::KIND, error = %err, "watch cursor expired, relisting");
                }
                WatchEnd::Closed(Some(err)) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.reconnect.delay_for_attempt(failures);
                    warn!(kind = K::KIND, error = %err, ?delay, "watch ended with error, backing off");
                    if stop.wait_timeout(delay) {
                        break;
                    }
                }
            }
        }

        info!(kind = K::KIND, "informer stopped");
        Ok(())
    }

    /// Runs the informer on its own thread.
    pub fn start(self: Arc<Self>, stop: StopSignal) -> RuntimeResult<JoinHandle<RuntimeResult<()>>> {
        let name = format!("{}-informer", K::KIND.to_lowercase());
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(&stop))
            .map_err(|source| RuntimeError::Spawn { name, source })
    }

    /// Lists and replaces the cache content, returning the version to
    /// watch from.
    fn relist(&self) -> Result<u64, ApiError> {
        let list = self.client.list()?;
        let version = list.resource_version;
        let diff = self.store.replace(list.items);
        debug!(
            kind = K::KIND,
            version,
            added = diff.added.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            "relisted"
        );

        for obj in diff.added {
            self.dispatch(&Notification::Added(obj));
        }
        for (old, new) in diff.updated {
            self.dispatch(&Notification::Updated { old, new });
        }
        for (key, last) in diff.removed {
            self.dispatch(&Notification::Deleted(DeletedObject::FinalStateUnknown {
                key,
                last,
            }));
        }

        if !self.synced.swap(true, Ordering::AcqRel) {
            info!(kind = K::KIND, objects = self.store.len(), "cache synced");
        }
        Ok(version)
    }

    /// Applies events until the stream closes or `stop` fires. `failures`
    /// is cleared once the stream proves healthy.
    fn consume(
        &self,
        mut stream: Box<dyn WatchStream<K>>,
        stop: &StopSignal,
        next_resync: &mut Option<Instant>,
        failures: &mut u32,
    ) -> WatchEnd {
        loop {
            if stop.is_stopped() {
                return WatchEnd::Stopped;
            }

            let mut timeout = self.config.watch_poll_interval;
            if let Some(due) = *next_resync {
                let now = Instant::now();
                if now >= due {
                    self.resync();
                    *next_resync = self.config.resync_interval.map(|every| now + every);
                }
                if let Some(due) = *next_resync {
                    timeout = timeout.min(due.saturating_duration_since(now));
                }
            }

            match stream.poll_next(timeout.max(Duration::from_millis(1))) {
                WatchPoll::Event(event) => {
                    *failures = 0;
                    self.apply(event);
                }
                WatchPoll::Malformed(err) => {
                    warn!(kind = K::KIND, error = %err, "skipping malformed watch event");
                }
                WatchPoll::Idle => *failures = 0,
                WatchPoll::Closed(reason) => return WatchEnd::Closed(reason),
            }
        }
    }

    fn apply(&self, event: WatchEvent<K>) {
        trace!(kind = K::KIND, event = event.label(), key = %event.object().key(), "watch event");
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let key = obj.key();
                match self.store.upsert(obj) {
                    Upsert::Created(obj) => self.dispatch(&Notification::Added(obj)),
                    Upsert::Updated { old, new } => {
                        self.dispatch(&Notification::Updated { old, new })
                    }
                    Upsert::Unchanged => {
                        trace!(kind = K::KIND, key = %key, "resource version already cached");
                    }
                }
            }
            WatchEvent::Deleted(obj) => {
                let key = obj.key();
                if self.store.delete(&key).is_some() {
                    self.dispatch(&Notification::Deleted(DeletedObject::Known(Arc::new(obj))));
                } else {
                    trace!(kind = K::KIND, key = %key, "delete for uncached object");
                }
            }
        }
    }

    fn resync(&self) {
        let objects = self.store.list();
        debug!(kind = K::KIND, objects = objects.len(), "resync");
        for obj in objects {
            self.dispatch(&Notification::Updated {
                old: Arc::clone(&obj),
                new: obj,
            });
        }
    }

    fn dispatch(&self, notification: &Notification<K>) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            handler.on_notification(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlkit_api::{ApiResult, CronTab, CronTabSpec, ObjectList, ObjectMeta};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    fn crontab(name: &str, rv: u64) -> CronTab {
        CronTab {
            metadata: ObjectMeta::new("ns", name).with_resource_version(rv),
            spec: CronTabSpec::default(),
        }
    }

    /// Scripted client: each list pops the next result, each watch replays
    /// the next batch of polls and then idles.
    #[derive(Default)]
    struct ScriptedClient {
        lists: Mutex<VecDeque<ApiResult<ObjectList<CronTab>>>>,
        watches: Mutex<VecDeque<Vec<WatchPoll<CronTab>>>>,
        list_calls: Mutex<u32>,
    }

    struct ScriptedStream(VecDeque<WatchPoll<CronTab>>);

    impl WatchStream<CronTab> for ScriptedStream {
        fn poll_next(&mut self, timeout: Duration) -> WatchPoll<CronTab> {
            match self.0.pop_front() {
                Some(poll) => poll,
                None => {
                    thread::sleep(timeout);
                    WatchPoll::Idle
                }
            }
        }
    }

    impl ListWatch<CronTab> for ScriptedClient {
        fn list(&self) -> ApiResult<ObjectList<CronTab>> {
            *self.list_calls.lock() += 1;
            self.lists
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Unavailable("script exhausted".into())))
        }

        fn watch(&self, _resource_version: u64) -> ApiResult<Box<dyn WatchStream<CronTab>>> {
            let polls = self.watches.lock().pop_front().unwrap_or_default();
            Ok(Box::new(ScriptedStream(polls.into())))
        }
    }

    fn fast_config() -> InformerConfig {
        InformerConfig::new()
            .with_watch_poll_interval(Duration::from_millis(5))
            .with_reconnect(crate::config::BackoffConfig::new(
                Duration::from_millis(1),
                Duration::from_millis(5),
            ))
    }

    fn recorder(informer: &Informer<CronTab>) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        informer.add_event_handler(move |n: &Notification<CronTab>| {
            let entry = match n {
                Notification::Added(obj) => format!("add {}", obj.metadata.name),
                Notification::Updated { new, .. } => {
                    format!("update {}@{}", new.metadata.name, new.resource_version())
                }
                Notification::Deleted(DeletedObject::Known(obj)) => {
                    format!("delete {}", obj.metadata.name)
                }
                Notification::Deleted(DeletedObject::FinalStateUnknown { key, .. }) => {
                    format!("delete? {key}")
                }
            };
            sink.lock().push(entry);
        });
        seen
    }

    fn run_until(informer: &Arc<Informer<CronTab>>, done: impl Fn() -> bool) {
        let stop = StopSignal::new();
        let handle = Arc::clone(informer).start(stop.clone()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        stop.stop();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn watch_events_update_cache_in_order() {
        let client = ScriptedClient::default();
        client
            .lists
            .lock()
            .push_back(Ok(ObjectList::new(vec![crontab("a", 1)], 1)));
        client.watches.lock().push_back(vec![
            WatchPoll::Event(WatchEvent::Added(crontab("b", 2))),
            WatchPoll::Event(WatchEvent::Added(crontab("b", 2))),
            WatchPoll::Event(WatchEvent::Modified(crontab("a", 3))),
            WatchPoll::Malformed(ApiError::Decode("garbage".into())),
            WatchPoll::Event(WatchEvent::Deleted(crontab("b", 5))),
            WatchPoll::Event(WatchEvent::Deleted(crontab("zzz", 6))),
        ]);

        let informer = Arc::new(Informer::new(Arc::new(client), fast_config()).unwrap());
        let seen = recorder(&informer);
        assert!(!informer.has_synced());

        run_until(&informer, || seen.lock().len() >= 4);

        assert!(informer.has_synced());
        assert_eq!(
            *seen.lock(),
            vec!["add a", "add b", "update a@3", "delete b"]
        );
        let lister = informer.lister();
        assert_eq!(lister.len(), 1);
        assert_eq!(lister.get_in("ns", "a").unwrap().resource_version(), 3);
    }

    #[test]
    fn closed_watch_relists_and_infers_deletes() {
        let client = ScriptedClient::default();
        {
            let mut lists = client.lists.lock();
            lists.push_back(Ok(ObjectList::new(vec![crontab("a", 1), crontab("b", 1)], 1)));
            lists.push_back(Ok(ObjectList::new(vec![crontab("a", 4)], 4)));
        }
        client
            .watches
            .lock()
            .push_back(vec![WatchPoll::Closed(Some(ApiError::Expired {
                requested: 1,
                oldest: 3,
            }))]);

        let informer = Arc::new(Informer::new(Arc::new(client), fast_config()).unwrap());
        let seen = recorder(&informer);
        run_until(&informer, || seen.lock().len() >= 4);

        let seen = seen.lock();
        assert_eq!(seen[2..], ["update a@4", "delete? ns/b"]);
        assert!(informer.lister().tombstone(&ctrlkit_api::ObjectKey::new("ns", "b")).is_some());
    }

    #[test]
    fn list_errors_are_retried_until_success() {
        let client = Arc::new(ScriptedClient::default());
        {
            let mut lists = client.lists.lock();
            lists.push_back(Err(ApiError::Unavailable("boot".into())));
            lists.push_back(Err(ApiError::Unavailable("boot".into())));
            lists.push_back(Ok(ObjectList::new(vec![crontab("a", 1)], 1)));
        }
        let informer = Arc::new(Informer::new(client.clone(), fast_config()).unwrap());
        run_until(&informer, || informer.has_synced());
        assert!(informer.has_synced());
        assert_eq!(*client.list_calls.lock(), 3);
    }

    /// Lists always succeed; every watch fails on its first poll.
    #[derive(Default)]
    struct FlappingClient {
        list_calls: Mutex<u32>,
    }

    impl ListWatch<CronTab> for FlappingClient {
        fn list(&self) -> ApiResult<ObjectList<CronTab>> {
            *self.list_calls.lock() += 1;
            Ok(ObjectList::new(vec![crontab("a", 1)], 1))
        }

        fn watch(&self, _resource_version: u64) -> ApiResult<Box<dyn WatchStream<CronTab>>> {
            Ok(Box::new(ScriptedStream(
                vec![WatchPoll::Closed(Some(ApiError::Unavailable(
                    "connection reset".into(),
                )))]
                .into(),
            )))
        }
    }

    #[test]
    fn failing_watches_back_off_before_relisting() {
        let client = Arc::new(FlappingClient::default());
        let config = fast_config().with_reconnect(crate::config::BackoffConfig::new(
            Duration::from_millis(100),
            Duration::from_secs(1),
        ));
        let informer = Arc::new(Informer::new(client.clone(), config).unwrap());
        let stop = StopSignal::new();
        let handle = Arc::clone(&informer).start(stop.clone()).unwrap();

        thread::sleep(Duration::from_millis(300));
        stop.stop();
        handle.join().unwrap().unwrap();

        // 100ms, then 200ms: at most three lists fit in the window.
        let lists = *client.list_calls.lock();
        assert!((1..=5).contains(&lists), "{lists} lists");
    }

    #[test]
    fn synced_stays_true_when_later_lists_fail() {
        let client = Arc::new(ScriptedClient::default());
        client
            .lists
            .lock()
            .push_back(Ok(ObjectList::new(vec![crontab("a", 1)], 1)));
        client
            .watches
            .lock()
            .push_back(vec![WatchPoll::Closed(None)]);

        // A single tolerated attempt would end `run` if later failures
        // still counted against the initial list.
        let informer = Arc::new(
            Informer::new(client.clone(), fast_config().with_initial_list_attempts(1)).unwrap(),
        );
        let stop = StopSignal::new();
        let handle = Arc::clone(&informer).start(stop.clone()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while *client.list_calls.lock() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(*client.list_calls.lock() >= 4);
        assert!(informer.has_synced());
        assert_eq!(informer.lister().len(), 1);

        stop.stop();
        handle.join().unwrap().unwrap();
        assert!(informer.has_synced());
    }

    #[test]
    fn initial_list_gives_up_after_configured_attempts() {
        let client = ScriptedClient::default();
        let informer = Informer::new(
            Arc::new(client),
            fast_config().with_initial_list_attempts(3),
        )
        .unwrap();
        match informer.run(&StopSignal::new()) {
            Err(RuntimeError::InitialListFailed { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!informer.has_synced());
    }

    #[test]
    fn non_retryable_initial_list_error_is_fatal() {
        let client = ScriptedClient::default();
        client
            .lists
            .lock()
            .push_back(Err(ApiError::Decode("bad list".into())));
        let informer = Informer::new(Arc::new(client), fast_config()).unwrap();
        assert!(matches!(
            informer.run(&StopSignal::new()),
            Err(RuntimeError::InitialListFailed { attempts: 1, .. })
        ));
    }

    #[test]
    fn resync_replays_cached_objects() {
        let client = ScriptedClient::default();
        client
            .lists
            .lock()
            .push_back(Ok(ObjectList::new(vec![crontab("a", 7)], 7)));
        let informer = Arc::new(Informer::new(
            Arc::new(client),
            fast_config().with_resync_interval(Duration::from_millis(20)),
        )
        .unwrap());
        let seen = recorder(&informer);
        run_until(&informer, || seen.lock().len() >= 3);

        let seen = seen.lock();
        assert_eq!(seen[0], "add a");
        assert!(seen[1..].iter().all(|entry| entry == "update a@7"));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = fast_config().with_watch_poll_interval(Duration::ZERO);
        let result = Informer::new(Arc::new(ScriptedClient::default()), config);
        assert!(matches!(result, Err(RuntimeError::InvalidConfig(_))));
    }

    #[test]
    fn second_run_is_rejected() {
        let client = ScriptedClient::default();
        client
            .lists
            .lock()
            .push_back(Ok(ObjectList::new(Vec::new(), 0)));
        let informer = Arc::new(Informer::new(Arc::new(client), fast_config()).unwrap());
        let stop = StopSignal::new();
        let handle = Arc::clone(&informer).start(stop.clone()).unwrap();
        while !informer.has_synced() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(
            informer.run(&stop),
            Err(RuntimeError::InvalidStateTransition { .. })
        ));
        stop.stop();
        handle.join().unwrap().unwrap();
    }
}

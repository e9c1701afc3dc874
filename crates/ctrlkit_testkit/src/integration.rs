//! Cross-crate integration test helpers.
//!
//! Wires an in-memory control plane, an informer and a controller
//! together and runs them on background threads.

use crate::fixtures::TestControlPlane;
use ctrlkit_api::CronTab;
use ctrlkit_runtime::{
    Controller, ControllerConfig, ControllerStats, Informer, InformerConfig, RateLimiterConfig,
    RuntimeResult, StopSignal, SyncHandler,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Polls `cond` every couple of milliseconds until it holds or `timeout`
/// passes. Returns the final value of `cond`.
pub fn wait_for(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Informer settings tuned for fast tests.
pub fn fast_informer_config() -> InformerConfig {
    InformerConfig::new()
        .with_watch_poll_interval(Duration::from_millis(10))
        .with_reconnect(ctrlkit_runtime::BackoffConfig::new(
            Duration::from_millis(5),
            Duration::from_millis(50),
        ))
}

/// Controller settings tuned for fast tests: `base` doubling up to one
/// second, no overall bucket.
pub fn fast_controller_config(base: Duration) -> ControllerConfig {
    ControllerConfig::new("test-controller")
        .with_rate_limiter(RateLimiterConfig::exponential(base, Duration::from_secs(1)))
        .with_sync_poll_interval(Duration::from_millis(5))
}

/// A controller and its informer running on background threads.
pub struct RunningController {
    /// The control plane the informer watches.
    pub plane: TestControlPlane,
    controller: Arc<Controller<CronTab>>,
    informer: Arc<Informer<CronTab>>,
    stop: StopSignal,
    informer_thread: Option<JoinHandle<RuntimeResult<()>>>,
    controller_thread: Option<JoinHandle<RuntimeResult<()>>>,
}

impl RunningController {
    /// Starts `handler` against `plane`.
    pub fn start(
        plane: TestControlPlane,
        handler: impl SyncHandler<CronTab> + 'static,
        informer_config: InformerConfig,
        controller_config: ControllerConfig,
    ) -> Self {
        let informer = Arc::new(
            Informer::new(plane.client(), informer_config).expect("Invalid informer config"),
        );
        let controller = Arc::new(
            Controller::new(Arc::clone(&informer), handler, controller_config)
                .expect("Failed to create controller"),
        );
        let stop = StopSignal::new();

        let informer_thread = Arc::clone(&informer)
            .start(stop.clone())
            .expect("Failed to start informer");
        let controller_thread = {
            let controller = Arc::clone(&controller);
            let stop = stop.clone();
            thread::Builder::new()
                .name("test-controller".into())
                .spawn(move || controller.run(&stop))
                .expect("Failed to start controller")
        };

        Self {
            plane,
            controller,
            informer,
            stop,
            informer_thread: Some(informer_thread),
            controller_thread: Some(controller_thread),
        }
    }

    /// Returns the controller.
    pub fn controller(&self) -> &Controller<CronTab> {
        &self.controller
    }

    /// Returns the informer.
    pub fn informer(&self) -> &Informer<CronTab> {
        &self.informer
    }

    /// Waits until the informer has synced.
    pub fn wait_synced(&self, timeout: Duration) -> bool {
        wait_for(timeout, || self.informer.has_synced())
    }

    /// Fires the stop signal, joins both threads and returns the final
    /// controller stats.
    pub fn shutdown(mut self) -> RuntimeResult<ControllerStats> {
        self.stop.stop();
        self.join()?;
        Ok(self.controller.stats())
    }

    fn join(&mut self) -> RuntimeResult<()> {
        if let Some(handle) = self.controller_thread.take() {
            handle.join().expect("controller thread panicked")?;
        }
        if let Some(handle) = self.informer_thread.take() {
            handle.join().expect("informer thread panicked")?;
        }
        Ok(())
    }
}

impl Drop for RunningController {
    fn drop(&mut self) {
        self.stop.stop();
        if !thread::panicking() {
            let _ = self.join();
        }
    }
}

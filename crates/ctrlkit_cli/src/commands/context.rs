//! Wiring for a controller run.
//!
//! [`AppContext`] owns every component of a run: the control plane, the
//! informer, the controller and the reconciler. Nothing is global, so
//! tests can build as many contexts as they like.

use super::churn::{run_churn, ChurnStats};
use super::error::{CliError, CliResult};
use super::reconciler::CronTabReconciler;
use ctrlkit_api::{CronTab, CronTabSpec};
use ctrlkit_apiserver::{ApiServer, LocalClient, ServerConfig};
use ctrlkit_runtime::{
    Controller, ControllerConfig, ControllerStats, Informer, InformerConfig, QueueMetrics,
    RuntimeError, StopSignal,
};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const SCHEDULES: &[&str] = &["*/5 * * * *", "0 * * * *", "30 2 * * 1-5", "@daily"];

/// Reads a JSON array of crontabs from `path`.
pub fn load_seed(path: &Path) -> CliResult<Vec<CronTab>> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::SeedRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CliError::SeedFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Generates `count` crontabs spread over `namespaces` namespaces.
pub fn generate_seed(count: usize, namespaces: usize) -> Vec<CronTab> {
    let namespaces = namespaces.max(1);
    (0..count)
        .map(|i| {
            let spec = CronTabSpec {
                cron_spec: SCHEDULES[i % SCHEDULES.len()].to_string(),
                image: format!("registry.local/job-{}:1.0", i % 7),
                replicas: (i % 3) as i32 + 1,
            };
            CronTab::new(format!("tenant-{}", i % namespaces), format!("crontab-{i}"), spec)
        })
        .collect()
}

/// Outcome of a run, printed when the CLI exits.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Controller name.
    pub controller: String,
    /// Wall-clock run time in milliseconds.
    pub elapsed_ms: u128,
    /// Objects on the control plane at exit.
    pub objects: usize,
    /// Objects in the informer cache at exit.
    pub cached: usize,
    /// Crontabs the reconciler has recorded.
    pub observed: usize,
    /// Control plane revision at exit.
    pub revision: u64,
    /// Successful syncs.
    pub synced: u64,
    /// Failed syncs.
    pub failed: u64,
    /// Keys given up on.
    pub dropped: u64,
    /// Handler panics.
    pub panics: u64,
    /// Keys accepted by the queue.
    pub queue_adds: u64,
    /// Rate-limited re-adds.
    pub queue_retries: u64,
    /// Items completed by workers.
    pub queue_completed: u64,
    /// Objects created by churn.
    pub churn_created: u64,
    /// Objects updated by churn.
    pub churn_updated: u64,
    /// Objects deleted by churn.
    pub churn_deleted: u64,
}

impl RunSummary {
    fn collect(
        ctx: &AppContext,
        elapsed: Duration,
        stats: ControllerStats,
        queue: QueueMetrics,
        churn: ChurnStats,
    ) -> Self {
        Self {
            controller: ctx.controller.name().to_string(),
            elapsed_ms: elapsed.as_millis(),
            objects: ctx.server.len(),
            cached: ctx.controller.lister().len(),
            observed: ctx.reconciler.observed_count(),
            revision: ctx.server.revision(),
            synced: stats.synced,
            failed: stats.failed,
            dropped: stats.dropped,
            panics: stats.panics,
            queue_adds: queue.adds,
            queue_retries: queue.retries,
            queue_completed: queue.completed,
            churn_created: churn.created,
            churn_updated: churn.updated,
            churn_deleted: churn.deleted,
        }
    }

    /// Prints the summary as aligned text.
    pub fn print_text(&self) {
        println!("Controller: {}", self.controller);
        println!("Elapsed: {} ms", self.elapsed_ms);
        println!();
        println!("Control plane:");
        println!("  Objects: {}", self.objects);
        println!("  Revision: {}", self.revision);
        println!("  Cached: {}", self.cached);
        println!("  Observed: {}", self.observed);
        println!();
        println!("Syncs:");
        println!("  Succeeded: {}", self.synced);
        println!("  Failed: {}", self.failed);
        println!("  Dropped: {}", self.dropped);
        println!("  Panics: {}", self.panics);
        println!();
        println!("Queue:");
        println!("  Adds: {}", self.queue_adds);
        println!("  Retries: {}", self.queue_retries);
        println!("  Completed: {}", self.queue_completed);
        println!();
        println!("Churn:");
        println!("  Created: {}", self.churn_created);
        println!("  Updated: {}", self.churn_updated);
        println!("  Deleted: {}", self.churn_deleted);
    }
}

/// Every component of one controller run.
pub struct AppContext {
    server: Arc<ApiServer<CronTab>>,
    informer: Arc<Informer<CronTab>>,
    controller: Arc<Controller<CronTab>>,
    reconciler: CronTabReconciler,
    churn_interval: Option<Duration>,
}

impl AppContext {
    /// Seeds a control plane with `seed` and wires an informer and
    /// controller to it.
    pub fn new(
        seed: Vec<CronTab>,
        informer_config: InformerConfig,
        controller_config: ControllerConfig,
        reconciler: CronTabReconciler,
    ) -> CliResult<Self> {
        let server = Arc::new(ApiServer::with_objects(ServerConfig::default(), seed)?);
        let client = Arc::new(LocalClient::new(Arc::clone(&server)));
        let informer = Arc::new(Informer::new(client, informer_config)?);
        let controller = Arc::new(Controller::new(
            Arc::clone(&informer),
            reconciler.clone(),
            controller_config,
        )?);

        Ok(Self {
            server,
            informer,
            controller,
            reconciler,
            churn_interval: None,
        })
    }

    /// Enables random writes every `interval` while the controller runs.
    pub fn with_churn(mut self, interval: Duration) -> Self {
        self.churn_interval = Some(interval);
        self
    }

    /// Returns the control plane.
    pub fn server(&self) -> &Arc<ApiServer<CronTab>> {
        &self.server
    }

    /// Returns the controller.
    pub fn controller(&self) -> &Arc<Controller<CronTab>> {
        &self.controller
    }

    /// Returns the reconciler.
    pub fn reconciler(&self) -> &CronTabReconciler {
        &self.reconciler
    }

    /// Runs the informer, churn and controller until `stop` fires.
    ///
    /// If the controller fails on its own, `stop` is fired so that the
    /// other threads wind down before the error is returned.
    pub fn run(&self, stop: &StopSignal) -> CliResult<RunSummary> {
        let started = Instant::now();
        // An informer that gives up also ends the run.
        let informer = {
            let informer = Arc::clone(&self.informer);
            let informer_stop = stop.clone();
            let name = "crontab-informer".to_string();
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let result = informer.run(&informer_stop);
                    if result.is_err() {
                        informer_stop.stop();
                    }
                    result
                })
                .map_err(|source| RuntimeError::Spawn { name, source })?
        };

        let churn = match self.churn_interval {
            Some(interval) => {
                let server = Arc::clone(&self.server);
                let churn_stop = stop.clone();
                let name = "churn".to_string();
                let handle = thread::Builder::new()
                    .name(name.clone())
                    .spawn(move || run_churn(&server, interval, &churn_stop))
                    .map_err(|source| RuntimeError::Spawn { name, source })?;
                Some(handle)
            }
            None => None,
        };

        let result = self.controller.run(stop);
        stop.stop();

        let informer_result = informer
            .join()
            .map_err(|_| CliError::Join("informer thread panicked".into()))?;
        let churn_stats = match churn {
            Some(handle) => handle
                .join()
                .map_err(|_| CliError::Join("churn thread panicked".into()))?,
            None => ChurnStats::default(),
        };

        informer_result?;
        result?;

        let summary = RunSummary::collect(
            self,
            started.elapsed(),
            self.controller.stats(),
            self.controller.queue().metrics(),
            churn_stats,
        );
        info!(
            controller = %summary.controller,
            synced = summary.synced,
            failed = summary.failed,
            dropped = summary.dropped,
            "run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fast_configs() -> (InformerConfig, ControllerConfig) {
        let informer = InformerConfig::new().with_watch_poll_interval(Duration::from_millis(10));
        let controller = ControllerConfig::new("crontab-test")
            .with_workers(2)
            .with_sync_poll_interval(Duration::from_millis(5));
        (informer, controller)
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn generated_seed_spreads_namespaces() {
        let seed = generate_seed(7, 3);
        assert_eq!(seed.len(), 7);
        assert_eq!(seed[0].metadata.namespace, "tenant-0");
        assert_eq!(seed[4].metadata.namespace, "tenant-1");
        assert_eq!(seed[6].metadata.name, "crontab-6");
    }

    #[test]
    fn seed_file_round_trip() {
        let seed = generate_seed(3, 1);
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&seed).unwrap().as_bytes())
            .unwrap();

        let loaded = load_seed(file.path()).unwrap();
        assert_eq!(loaded, seed);
    }

    #[test]
    fn missing_seed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_seed(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CliError::SeedRead { .. }));
    }

    #[test]
    fn malformed_seed_file_is_reported() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{\"not\": \"a list\"}").unwrap();
        let err = load_seed(file.path()).unwrap_err();
        assert!(matches!(err, CliError::SeedFormat { .. }));
    }

    #[test]
    fn run_reconciles_seed_and_stops() {
        let (informer, controller) = fast_configs();
        let ctx = Arc::new(
            AppContext::new(generate_seed(5, 2), informer, controller, CronTabReconciler::new())
                .unwrap(),
        );
        let stop = StopSignal::new();

        let handle = {
            let ctx = Arc::clone(&ctx);
            let stop = stop.clone();
            thread::spawn(move || ctx.run(&stop))
        };

        assert!(wait_for(|| ctx.reconciler().observed_count() == 5));
        stop.stop();
        let summary = handle.join().unwrap().unwrap();

        assert_eq!(summary.objects, 5);
        assert_eq!(summary.cached, 5);
        assert_eq!(summary.observed, 5);
        assert!(summary.synced >= 5);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn invalid_crontab_is_dropped() {
        let mut seed = generate_seed(2, 1);
        seed[1].spec.cron_spec = "every minute".into();
        let (informer, controller) = fast_configs();
        let ctx = Arc::new(
            AppContext::new(seed, informer, controller, CronTabReconciler::new()).unwrap(),
        );
        let stop = StopSignal::new();

        let handle = {
            let ctx = Arc::clone(&ctx);
            let stop = stop.clone();
            thread::spawn(move || ctx.run(&stop))
        };

        assert!(wait_for(|| ctx.controller().stats().dropped == 1));
        stop.stop();
        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.observed, 1);
        assert_eq!(summary.dropped, 1);
    }

    #[test]
    fn informer_failure_ends_run() {
        let (informer, controller) = fast_configs();
        let ctx = AppContext::new(
            generate_seed(3, 1),
            informer.with_initial_list_attempts(1),
            controller,
            CronTabReconciler::new(),
        )
        .unwrap();
        ctx.server().fail_next_lists(1);

        // Nothing else fires the stop signal.
        let stop = StopSignal::new();
        let result = ctx.run(&stop);
        assert!(stop.is_stopped());
        assert!(matches!(
            result,
            Err(CliError::Runtime(RuntimeError::InitialListFailed { attempts: 1, .. }))
        ));
    }

    #[test]
    fn stop_before_sync_reports_timeout() {
        let (informer, controller) = fast_configs();
        let ctx = AppContext::new(Vec::new(), informer, controller, CronTabReconciler::new())
            .unwrap();
        let stop = StopSignal::new();
        stop.stop();

        match ctx.run(&stop) {
            Err(CliError::Runtime(RuntimeError::CacheSyncTimeout(name))) => {
                assert_eq!(name, "crontab-test");
            }
            // The informer may sync the empty list before the controller
            // observes the stop.
            Ok(summary) => assert_eq!(summary.objects, 0),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}

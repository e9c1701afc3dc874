//! Run command implementation.

use super::context::{generate_seed, load_seed, AppContext, RunSummary};
use super::error::{CliError, CliResult};
use super::reconciler::CronTabReconciler;
use clap::{Args, ValueEnum};
use ctrlkit_runtime::{ControllerConfig, InformerConfig, RateLimiterConfig, StopSignal};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Summary output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Flags for `ctrlkit run`.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// JSON file holding an array of crontabs to seed the control plane with
    #[arg(long, conflicts_with = "generate")]
    pub seed: Option<PathBuf>,

    /// Number of crontabs to generate when no seed file is given
    #[arg(long, default_value_t = 20)]
    pub generate: usize,

    /// Namespaces generated crontabs are spread over
    #[arg(long, default_value_t = 3)]
    pub namespaces: usize,

    /// Worker threads
    #[arg(short, long, default_value_t = 2)]
    pub workers: usize,

    /// Initial retry delay in milliseconds
    #[arg(long, default_value_t = 5)]
    pub base_delay_ms: u64,

    /// Retry delay cap in milliseconds
    #[arg(long, default_value_t = 60_000)]
    pub max_delay_ms: u64,

    /// Retries before a key is dropped (unbounded if unset)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Resync period in seconds (disabled if unset)
    #[arg(long)]
    pub resync_secs: Option<u64>,

    /// Interval between random control plane writes (disabled if unset)
    #[arg(long)]
    pub churn_interval_ms: Option<u64>,

    /// Probability that a sync fails with a retryable error
    #[arg(long, default_value_t = 0.0)]
    pub failure_rate: f64,

    /// Stop after this many seconds (runs until Ctrl-C if unset)
    #[arg(short, long)]
    pub duration_secs: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl RunArgs {
    /// Builds the informer configuration.
    pub fn informer_config(&self) -> InformerConfig {
        let config = InformerConfig::new();
        match self.resync_secs {
            Some(secs) => config.with_resync_interval(Duration::from_secs(secs)),
            None => config,
        }
    }

    /// Builds and validates the controller configuration.
    pub fn controller_config(&self) -> CliResult<ControllerConfig> {
        let mut limiter = RateLimiterConfig::exponential(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        );
        if let Some(max) = self.max_retries {
            limiter = limiter.with_max_retries(max);
        }

        let config = ControllerConfig::new("crontab-controller")
            .with_workers(self.workers)
            .with_rate_limiter(limiter);
        config
            .validate()
            .map_err(|err| CliError::InvalidArgument(err.to_string()))?;
        Ok(config)
    }

    fn check(&self) -> CliResult<()> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(CliError::InvalidArgument(format!(
                "failure rate must be between 0 and 1, got {}",
                self.failure_rate
            )));
        }
        if self.namespaces == 0 {
            return Err(CliError::InvalidArgument(
                "namespaces must be at least 1".into(),
            ));
        }
        if self.churn_interval_ms == Some(0) {
            return Err(CliError::InvalidArgument(
                "churn interval must be positive".into(),
            ));
        }
        if self.resync_secs == Some(0) {
            return Err(CliError::InvalidArgument(
                "resync interval must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Validates the flags and wires up a context.
    pub fn build_context(&self) -> CliResult<AppContext> {
        self.check()?;
        let seed = match &self.seed {
            Some(path) => load_seed(path)?,
            None => generate_seed(self.generate, self.namespaces),
        };
        info!(objects = seed.len(), "seeding control plane");

        let reconciler = CronTabReconciler::new().with_failure_rate(self.failure_rate);
        let ctx = AppContext::new(
            seed,
            self.informer_config(),
            self.controller_config()?,
            reconciler,
        )?;
        Ok(match self.churn_interval_ms {
            Some(ms) => ctx.with_churn(Duration::from_millis(ms)),
            None => ctx,
        })
    }
}

/// Runs the controller until Ctrl-C, the run duration elapses, or the
/// controller fails, then prints a summary.
pub async fn run(args: RunArgs) -> CliResult<()> {
    let ctx = args.build_context()?;
    let stop = StopSignal::new();

    let worker_stop = stop.clone();
    let mut task = tokio::task::spawn_blocking(move || ctx.run(&worker_stop));

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    let finished = tokio::select! {
        joined = &mut task => Some(joined),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping");
            None
        }
        _ = deadline => {
            info!("run duration elapsed, stopping");
            None
        }
    };

    stop.stop();
    let joined = match finished {
        Some(joined) => joined,
        None => task.await,
    };
    let summary = joined.map_err(|err| CliError::Join(err.to_string()))??;
    print_summary(&summary, args.format)
}

fn print_summary(summary: &RunSummary, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(summary)?),
        OutputFormat::Text => summary.print_text(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(argv: &[&str]) -> RunArgs {
        let mut full = vec!["ctrlkit"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).unwrap().args
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.workers, 2);
        assert_eq!(args.namespaces, 3);
        assert_eq!(args.format, OutputFormat::Text);
        assert!(args.informer_config().resync_interval.is_none());

        let config = args.controller_config().unwrap();
        assert_eq!(config.rate_limiter.base_delay, Duration::from_millis(5));
        assert!(config.rate_limiter.max_retries.is_none());
    }

    #[test]
    fn flags_reach_configs() {
        let args = parse(&[
            "--workers",
            "4",
            "--max-retries",
            "3",
            "--resync-secs",
            "30",
            "--format",
            "json",
        ]);
        let config = args.controller_config().unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.rate_limiter.max_retries, Some(3));
        assert_eq!(
            args.informer_config().resync_interval,
            Some(Duration::from_secs(30))
        );
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn zero_workers_is_invalid() {
        let args = parse(&["--workers", "0"]);
        assert!(matches!(
            args.controller_config(),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn out_of_range_failure_rate_is_invalid() {
        let args = parse(&["--failure-rate", "1.5"]);
        assert!(matches!(
            args.build_context(),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn zero_resync_is_invalid() {
        let args = parse(&["--resync-secs", "0"]);
        assert!(matches!(
            args.build_context(),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn seed_conflicts_with_generate() {
        let argv = ["ctrlkit", "--seed", "a.json", "--generate", "5"];
        assert!(Harness::try_parse_from(argv).is_err());
    }

    #[test]
    fn builds_context_from_generated_seed() {
        let ctx = parse(&["--generate", "6"]).build_context().unwrap();
        assert_eq!(ctx.server().len(), 6);
        assert_eq!(ctx.controller().name(), "crontab-controller");
    }
}

//! Fixed-interval refresh scheduler.
//!
//! Each tick spawns one refresh cycle as its own task. A tick that arrives
//! while the previous cycle is still running is dropped, never queued, so
//! at most one cycle runs at a time. On shutdown the in-flight cycle is
//! cancelled and given a grace period to roll back. Everything the
//! scheduler reports goes through the [`LogSink`] it was built with.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crime_updater_ingest_models::{RefreshReport, SchedulerStats};
use crime_updater_source::sink::{LogSink, emit};
use log::{Level, Log};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{RefreshCoordinator, RefreshError};

const TARGET: &str = module_path!();

/// Default time the scheduler waits for a cancelled cycle to wind down.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Something the scheduler can run once per tick.
#[async_trait]
pub trait RefreshTask: Send + Sync + 'static {
    /// Runs one cycle. `cancel` fires when the scheduler shuts down.
    async fn run_cycle(&self, cancel: CancellationToken) -> Result<RefreshReport, RefreshError>;
}

#[async_trait]
impl RefreshTask for RefreshCoordinator {
    async fn run_cycle(&self, cancel: CancellationToken) -> Result<RefreshReport, RefreshError> {
        self.refresh(&cancel).await
    }
}

type CycleResult = Result<RefreshReport, RefreshError>;

struct InFlight {
    handle: JoinHandle<CycleResult>,
    cancel: CancellationToken,
}

enum Event {
    Shutdown,
    Tick,
    Finished(Result<CycleResult, JoinError>),
}

/// Runs a [`RefreshTask`] every `interval` until shut down.
pub struct Scheduler<T: RefreshTask> {
    task: Arc<T>,
    interval: Duration,
    run_on_start: bool,
    shutdown_grace: Duration,
    sink: LogSink,
}

impl<T: RefreshTask> Scheduler<T> {
    /// Creates a scheduler that runs immediately and then every `interval`,
    /// reporting to `sink`.
    #[must_use]
    pub const fn new(task: Arc<T>, interval: Duration, sink: LogSink) -> Self {
        Self {
            task,
            interval,
            run_on_start: true,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            sink,
        }
    }

    /// Whether the first cycle runs at startup or after one interval.
    #[must_use]
    pub const fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// How long to wait for a cancelled cycle on shutdown.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Runs until `shutdown` is cancelled and returns lifetime counters.
    pub async fn run(&self, shutdown: CancellationToken) -> SchedulerStats {
        let mut stats = SchedulerStats::default();
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if !self.run_on_start {
            // The first tick of an interval completes immediately.
            ticker.tick().await;
        }

        self.log(
            Level::Info,
            format_args!(
                "Scheduler started: refreshing every {}",
                humantime::format_duration(self.interval)
            ),
        );

        let mut current: Option<InFlight> = None;

        loop {
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => Event::Shutdown,
                joined = join_in_flight(&mut current) => Event::Finished(joined),
                _ = ticker.tick() => Event::Tick,
            };

            match event {
                Event::Shutdown => break,
                Event::Finished(joined) => {
                    current = None;
                    record(self.sink.as_ref(), &mut stats, joined);
                }
                Event::Tick => {
                    if current.is_some() {
                        stats.skipped += 1;
                        self.log(
                            Level::Warn,
                            format_args!("Previous refresh still running, skipping this tick"),
                        );
                        continue;
                    }
                    stats.started += 1;
                    current = Some(self.spawn_cycle(&shutdown));
                }
            }
        }

        if let Some(in_flight) = current {
            self.log(
                Level::Info,
                format_args!("Shutdown requested, cancelling in-flight refresh"),
            );
            in_flight.cancel.cancel();
            let mut handle = in_flight.handle;
            if let Ok(joined) = time::timeout(self.shutdown_grace, &mut handle).await {
                record(self.sink.as_ref(), &mut stats, joined);
            } else {
                self.log(
                    Level::Warn,
                    format_args!(
                        "Refresh did not stop within {}; aborting",
                        humantime::format_duration(self.shutdown_grace)
                    ),
                );
                handle.abort();
                stats.failed += 1;
            }
        }

        self.log(
            Level::Info,
            format_args!(
                "Scheduler stopped: {} started, {} succeeded, {} failed, {} skipped",
                stats.started, stats.succeeded, stats.failed, stats.skipped
            ),
        );

        stats
    }

    fn spawn_cycle(&self, shutdown: &CancellationToken) -> InFlight {
        let cancel = shutdown.child_token();
        let task = Arc::clone(&self.task);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { task.run_cycle(token).await });
        InFlight { handle, cancel }
    }

    fn log(&self, level: Level, args: std::fmt::Arguments<'_>) {
        emit(self.sink.as_ref(), level, TARGET, args);
    }
}

async fn join_in_flight(current: &mut Option<InFlight>) -> Result<CycleResult, JoinError> {
    match current {
        Some(in_flight) => (&mut in_flight.handle).await,
        None => std::future::pending().await,
    }
}

fn record(sink: &dyn Log, stats: &mut SchedulerStats, joined: Result<CycleResult, JoinError>) {
    match joined {
        Ok(Ok(report)) => {
            stats.succeeded += 1;
            emit(
                sink,
                Level::Info,
                TARGET,
                format_args!(
                    "Refresh finished: {} is active with {} rows ({:.1}s)",
                    report.table,
                    report.rows_loaded,
                    report.duration.as_secs_f64()
                ),
            );
        }
        Ok(Err(e)) => {
            stats.failed += 1;
            emit(sink, Level::Error, TARGET, format_args!("Refresh failed: {e}"));
        }
        Err(e) => {
            stats.failed += 1;
            emit(sink, Level::Error, TARGET, format_args!("Refresh task panicked: {e}"));
        }
    }
}

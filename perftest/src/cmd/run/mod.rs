use std::time::Duration;

use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{Request, Response},
    rt::Executor,
    telemetry::tracing,
};

use clap::Args;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinSet,
    time::{Instant, MissedTickBehavior},
};

use crate::scenario::{self, BurstSleep};

pub mod client;
pub mod reporter;

use self::{client::MeteredClient, reporter::*};

const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Args)]
/// run the burst-sleep load profile with one or more virtual users
pub struct RunCommand {
    /// Amount of virtual users running the profile concurrently
    #[arg(long, value_name = "N", default_value_t = 1)]
    vus: usize,

    /// Iterations each virtual user runs (0 = until stopped)
    #[arg(long, value_name = "N", default_value_t = 1)]
    iterations: usize,

    /// Maximum duration of the entire run,
    /// in-flight requests and sleeps are abandoned once it elapses.
    #[arg(long, value_name = "SECONDS")]
    duration: Option<f64>,

    /// report json lines instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,

    /// also report every individual request, requires --json
    #[arg(long, default_value_t = false, requires = "json")]
    events: bool,

    /// Interval between intermediate reports
    #[arg(long, value_name = "SECONDS", default_value_t = 10.)]
    report_interval: f64,
}

/// How the virtual users are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPlan {
    pub vus: usize,
    /// `None` means: iterate until the deadline or shutdown.
    pub iterations: Option<usize>,
    pub duration: Option<Duration>,
}

impl LoadPlan {
    pub fn new(vus: usize, iterations: usize, duration: Option<f64>) -> Self {
        Self {
            vus: vus.max(1),
            iterations: (iterations > 0).then_some(iterations),
            duration: duration.and_then(positive_secs),
        }
    }
}

fn positive_secs(secs: f64) -> Option<Duration> {
    (secs.is_finite() && secs > 0.).then(|| Duration::from_secs_f64(secs))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Deadline,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VuSummary {
    pub vu: usize,
    pub iterations: usize,
    pub stop: StopReason,
}

pub async fn exec(guard: ShutdownGuard, args: RunCommand) -> Result<(), BoxError> {
    let client = self::client::new_web_client(Executor::graceful(guard.clone()))
        .context("create HTTP client")?;

    let plan = LoadPlan::new(args.vus, args.iterations, args.duration);
    let report_interval = positive_secs(args.report_interval).unwrap_or(DEFAULT_REPORT_INTERVAL);

    let schedule = BurstSleep::SPICY_KEBAB;
    tracing::info!(
        vus = %plan.vus,
        iterations = ?plan.iterations,
        duration = ?plan.duration,
        target = %schedule.target,
        requests_per_iteration = %schedule.request_count(),
        pause_per_iteration = ?schedule.total_pause(),
        "load plan ready",
    );
    if plan.iterations.is_none() && plan.duration.is_none() {
        tracing::warn!("no iteration limit nor duration set: run until shutdown signal");
    }

    let reporter: Box<dyn Reporter> = if args.json {
        Box::new(JsonlReporter::new(report_interval, args.events))
    } else {
        Box::new(HumanReporter::new(report_interval))
    };

    let start = Instant::now();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let (summaries, ()) = tokio::join!(
        run_virtual_users(guard, client, plan, start, events_tx),
        report_worker(reporter, report_interval, start, events_rx),
    );

    let completed: usize = summaries.iter().map(|s| s.iterations).sum();
    let stopped_early = summaries
        .iter()
        .filter(|s| s.stop != StopReason::Completed)
        .count();
    tracing::info!(
        %completed,
        %stopped_early,
        elapsed = ?start.elapsed(),
        "load run finished",
    );

    Ok(())
}

/// Run all virtual users of the plan until each one is done,
/// the plan's deadline passed or a shutdown was initiated.
pub async fn run_virtual_users<S>(
    guard: ShutdownGuard,
    client: S,
    plan: LoadPlan,
    start: Instant,
    events: UnboundedSender<RequestResultEvent>,
) -> Vec<VuSummary>
where
    S: Service<Request, Output = Response, Error: Into<BoxError>> + Clone,
{
    let deadline = plan.duration.map(|d| start + d);

    let mut set = JoinSet::new();
    for vu in 0..plan.vus {
        set.spawn(run_virtual_user(
            guard.clone(),
            client.clone(),
            vu,
            plan.iterations,
            deadline,
            start,
            events.clone(),
        ));
    }
    drop(events);

    let mut summaries = Vec::with_capacity(plan.vus);
    while let Some(result) = set.join_next().await {
        match result {
            Ok(summary) => summaries.push(summary),
            Err(err) => tracing::error!("virtual user task failed: {err}"),
        }
    }
    summaries.sort_by_key(|s| s.vu);
    summaries
}

async fn run_virtual_user<S>(
    guard: ShutdownGuard,
    client: S,
    vu: usize,
    iterations: Option<usize>,
    deadline: Option<Instant>,
    start: Instant,
    events: UnboundedSender<RequestResultEvent>,
) -> VuSummary
where
    S: Service<Request, Output = Response, Error: Into<BoxError>> + Clone,
{
    let mut summary = VuSummary {
        vu,
        iterations: 0,
        stop: StopReason::Completed,
    };

    let mut cancelled = std::pin::pin!(guard.cancelled());
    let mut deadline_reached = std::pin::pin!(async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    });

    tracing::debug!(%vu, "virtual user started");

    while iterations.is_none_or(|n| summary.iterations < n) {
        // each iteration starts from fresh state, only the client is shared
        let client = MeteredClient::new(
            client.clone(),
            vu,
            summary.iterations,
            start,
            events.clone(),
        );

        tokio::select! {
            _ = cancelled.as_mut() => {
                summary.stop = StopReason::Shutdown;
                break;
            }
            _ = deadline_reached.as_mut() => {
                summary.stop = StopReason::Deadline;
                break;
            }
            _ = scenario::run_iteration(&client) => {
                summary.iterations += 1;
            }
        }
    }

    tracing::debug!(
        %vu,
        iterations = %summary.iterations,
        stop = ?summary.stop,
        "virtual user finished",
    );
    summary
}

async fn report_worker(
    mut reporter: Box<dyn Reporter>,
    interval: Duration,
    start: Instant,
    mut events: UnboundedReceiver<RequestResultEvent>,
) {
    let mut ticker = tokio::time::interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_ev = events.recv() => {
                let Some(ev) = maybe_ev else {
                    tracing::debug!("exit report worker: result senders closed");
                    break;
                };
                reporter.on_result(&ev);
            }
            _ = ticker.tick() => {
                reporter.on_tick(start.elapsed());
            }
        }
    }

    reporter.finish();
}

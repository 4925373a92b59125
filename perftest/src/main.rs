#![cfg_attr(
    not(test),
    warn(clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

use std::{path::PathBuf, time::Duration};

use rama::{
    error::BoxError,
    graceful,
    telemetry::tracing::{self, Instrument as _},
};

#[cfg(target_family = "unix")]
use rama::error::ErrorContext as _;

use clap::{Parser, Subcommand};

pub mod cmd;
pub mod scenario;
pub mod utils;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CLI arguments for configuring perftest behavior.
#[derive(Debug, Clone, Parser)]
#[command(name = "perftest")]
#[command(bin_name = "perftest")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    cmds: CliCommands,

    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false, global = true)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false, global = true)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o', global = true)]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 0., global = true)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,

    #[cfg(target_family = "unix")]
    /// Set the limit of max open file descriptors for this process and its children.
    #[arg(long, value_name = "N", default_value_t = 65_536, global = true)]
    pub ulimit: utils::os::rlim_t,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommands {
    Run(self::cmd::run::RunCommand),
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(utils::telemetry::TelemetryConfig {
        verbose: args.verbose,
        pretty: args.pretty,
        output: args.output.as_deref(),
    })?;

    #[cfg(target_family = "unix")]
    {
        let limit = utils::os::raise_nofile(args.ulimit).context("set file descriptor limit")?;
        tracing::debug!(soft = limit.soft, hard = limit.hard, "open file descriptor limit");
    }

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// run a perftest cmd with the given args
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let (result_tx, result_rx) = tokio::sync::oneshot::channel::<Result<(), BoxError>>();
    let graceful = graceful::Shutdown::new(new_shutdown_signal(done_rx, base_shutdown_signal));

    tracing::info!(
        name = utils::env::project_name(),
        version = utils::env::project_version(),
        "starting",
    );

    graceful.spawn_task_fn(async move |guard| {
        let result = match args.cmds {
            CliCommands::Run(run_args) => {
                self::cmd::run::exec(guard, run_args)
                    .instrument(tracing::debug_span!(
                        "load run",
                        service.name = utils::env::project_name(),
                        otel.kind = "client",
                        network.protocol.name = "http",
                    ))
                    .await
            }
        };
        if let Err(err) = &result {
            tracing::error!("fatal err received: {err}; abort");
        }
        let _ = result_tx.send(result);
        drop(done_tx);
    });

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };

    tracing::debug!("gracefully shutdown with a delay of: {delay:?}");

    match result_rx.await {
        Ok(result) => result,
        // the command was abandoned by the shutdown
        Err(_) => Ok(()),
    }
}

fn new_shutdown_signal(
    done_rx: tokio::sync::oneshot::Receiver<()>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = base_shutdown_signal => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            _ = done_rx => {
                tracing::debug!("command is finished, return control");
            }
        }
    }
}

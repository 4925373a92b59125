use std::{
    io::IsTerminal as _,
    path::{Path, PathBuf},
};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing::{
        self,
        subscriber::{EnvFilter, fmt::writer::BoxMakeWriter},
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryConfig<'a> {
    pub verbose: bool,
    pub pretty: bool,
    pub output: Option<&'a Path>,
}

/// Where log lines end up.
///
/// Stdout is reserved for reports, logs never go there.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LogSink {
    Stderr,
    /// Appended to, created if missing.
    File(PathBuf),
}

impl LogSink {
    fn new(output: Option<&Path>) -> Self {
        match output {
            Some(path) => Self::File(path.to_owned()),
            None => Self::Stderr,
        }
    }

    fn ansi(&self) -> bool {
        matches!(self, Self::Stderr) && std::io::stderr().is_terminal()
    }

    fn make_writer(&self) -> Result<BoxMakeWriter, BoxError> {
        Ok(match self {
            Self::Stderr => BoxMakeWriter::new(std::io::stderr),
            Self::File(path) => {
                let file = std::fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .with_context(|| format!("open log file at '{}'", path.display()))?;
                BoxMakeWriter::new(file)
            }
        })
    }
}

/// Filter used when `RUST_LOG` is not set.
///
/// Connection level logs of the http stack are kept at warn
/// even in verbose mode: every virtual user produces them for every request.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug,rama=warn"
    } else {
        "info,rama=warn"
    }
}

/// Configures structured logging, `RUST_LOG` overrides the default filter.
pub fn init_tracing(cfg: TelemetryConfig<'_>) -> Result<(), BoxError> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => {
            EnvFilter::builder().parse_lossy(directives)
        }
        _ => EnvFilter::new(default_filter(cfg.verbose)),
    };

    let sink = LogSink::new(cfg.output);
    let subscriber = tracing::subscriber::fmt()
        .with_ansi(sink.ansi())
        .with_env_filter(filter)
        .with_writer(sink.make_writer()?);

    if cfg.pretty {
        subscriber.pretty().try_init()?;
    } else {
        subscriber.try_init()?;
    }

    tracing::debug!(?sink, "tracing is set up");
    Ok(())
}

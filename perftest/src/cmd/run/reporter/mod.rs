use std::time::{Duration, SystemTime};

mod human;
mod json;

pub use self::{human::HumanReporter, json::JsonlReporter};

pub trait Reporter: Send + Sync + 'static {
    fn on_result(&mut self, ev: &RequestResultEvent);
    fn on_tick(&mut self, now: Duration);
    fn finish(&mut self);
}

#[derive(Debug, Default, Clone)]
pub struct Counters {
    total: u64,
    ok: u64,
    http_fail: u64,
    other_fail: u64,
    latency_sum: Duration,
    latency_max: Duration,
}

impl Counters {
    pub(super) fn apply(&mut self, ev: &RequestResultEvent) {
        self.total += 1;
        self.latency_sum += ev.latency;
        self.latency_max = self.latency_max.max(ev.latency);

        if ev.outcome.ok {
            self.ok += 1;
            return;
        }
        match ev.outcome.failure {
            Some(FailureKind::HttpStatus) => self.http_fail += 1,
            _ => self.other_fail += 1,
        }
    }

    fn failed(&self) -> u64 {
        self.total - self.ok
    }

    fn latency_avg(&self) -> Duration {
        match u32::try_from(self.total) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.latency_sum / n,
            Err(_) => Duration::from_secs_f64(self.latency_sum.as_secs_f64() / self.total as f64),
        }
    }

    fn json(&self) -> serde_json::Value {
        serde_json::json!({
            "total": self.total,
            "ok": self.ok,
            "http_fail": self.http_fail,
            "other_fail": self.other_fail,
            "latency_avg_ms": self.latency_avg().as_millis(),
            "latency_max_ms": self.latency_max.as_millis(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    HttpStatus,
    Other,
}

impl FailureKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::HttpStatus => "http_status",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub ok: bool,
    pub status: Option<u16>,
    pub failure: Option<FailureKind>,
}

impl RequestOutcome {
    /// Classify a response status: 2xx and 3xx count as success.
    pub fn from_status(status: u16) -> Self {
        if (200..400).contains(&status) {
            Self {
                ok: true,
                status: Some(status),
                failure: None,
            }
        } else {
            Self {
                ok: false,
                status: Some(status),
                failure: Some(FailureKind::HttpStatus),
            }
        }
    }

    /// Outcome of a request that did not produce any response.
    pub fn transport_failure() -> Self {
        Self {
            ok: false,
            status: None,
            failure: Some(FailureKind::Other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestResultEvent {
    pub ts: SystemTime,
    pub elapsed: Duration,
    pub vu: usize,
    pub iteration: usize,
    pub index: usize,
    pub latency: Duration,
    pub outcome: RequestOutcome,
}

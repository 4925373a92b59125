use std::time::{Duration, UNIX_EPOCH};

use super::{Counters, Reporter, RequestResultEvent};

pub struct JsonlReporter {
    interval: Duration,
    last_tick: Duration,
    interval_counts: Counters,
    total_counts: Counters,
    last_pos: Option<(usize, usize, usize)>,
    emit_events: bool,
}

impl JsonlReporter {
    pub fn new(interval: Duration, emit_events: bool) -> Self {
        Self {
            interval,
            last_tick: Duration::ZERO,
            interval_counts: Counters::default(),
            total_counts: Counters::default(),
            last_pos: None,
            emit_events,
        }
    }

    fn event_line(ev: &RequestResultEvent) -> serde_json::Value {
        serde_json::json!({
            "type": "event",
            "ts_ms": ev.ts.duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default(),
            "t_ms": ev.elapsed.as_millis(),
            "vu": ev.vu,
            "iteration": ev.iteration,
            "index": ev.index,
            "latency_ms": ev.latency.as_millis(),
            "ok": ev.outcome.ok,
            "status": ev.outcome.status,
            "failure": ev.outcome.failure.map(|f| f.as_str()),
        })
    }

    fn summary_line(&mut self, now: Duration) -> Option<serde_json::Value> {
        if now.saturating_sub(self.last_tick) < self.interval {
            return None;
        }
        let window = now.saturating_sub(self.last_tick);
        self.last_tick = now;

        let rps = if window.is_zero() {
            0.
        } else {
            self.interval_counts.total as f64 / window.as_secs_f64()
        };
        let (vu, iteration, idx) = self.last_pos.unwrap_or_default();

        let line = serde_json::json!({
            "type": "summary",
            "t_ms": now.as_millis(),
            "vu": vu,
            "iteration": iteration,
            "index": idx,
            "interval_ms": window.as_millis(),
            "rps": rps,
            "interval": self.interval_counts.json(),
            "total": self.total_counts.json(),
        });

        self.interval_counts = Counters::default();
        Some(line)
    }

    fn final_line(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "final",
            "total": self.total_counts.json(),
        })
    }
}

impl Reporter for JsonlReporter {
    fn on_result(&mut self, ev: &RequestResultEvent) {
        self.interval_counts.apply(ev);
        self.total_counts.apply(ev);
        self.last_pos = Some((ev.vu, ev.iteration, ev.index));

        if self.emit_events {
            println!("{}", Self::event_line(ev));
        }
    }

    fn on_tick(&mut self, now: Duration) {
        if let Some(line) = self.summary_line(now) {
            println!("{line}");
        }
    }

    fn finish(&mut self) {
        println!("{}", self.final_line());
    }
}

#[cfg(test)]
mod tests {
    use super::super::{RequestOutcome, tests::event};
    use super::*;

    #[test]
    fn event_line_fields() {
        let line = JsonlReporter::event_line(&event(12, RequestOutcome::from_status(502)));
        assert_eq!("event", line["type"]);
        assert_eq!(12, line["latency_ms"]);
        assert_eq!(false, line["ok"]);
        assert_eq!(502, line["status"]);
        assert_eq!("http_status", line["failure"]);

        let line = JsonlReporter::event_line(&event(1, RequestOutcome::transport_failure()));
        assert!(line["status"].is_null());
        assert_eq!("other", line["failure"]);
    }

    #[test]
    fn summary_and_final_totals() {
        let mut r = JsonlReporter::new(Duration::from_secs(5), false);
        r.on_result(&event(4, RequestOutcome::from_status(200)));
        r.on_result(&event(8, RequestOutcome::from_status(200)));

        assert!(r.summary_line(Duration::from_secs(1)).is_none());

        let summary = r.summary_line(Duration::from_secs(5)).unwrap();
        assert_eq!("summary", summary["type"]);
        assert_eq!(2, summary["interval"]["ok"]);
        assert_eq!(6, summary["interval"]["latency_avg_ms"]);
        assert_eq!(8, summary["total"]["latency_max_ms"]);

        let summary = r.summary_line(Duration::from_secs(10)).unwrap();
        assert_eq!(0, summary["interval"]["total"]);
        assert_eq!(2, summary["total"]["total"]);

        let last = r.final_line();
        assert_eq!("final", last["type"]);
        assert_eq!(2, last["total"]["ok"]);
    }
}

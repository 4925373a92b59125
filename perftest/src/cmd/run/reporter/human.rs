use std::time::Duration;

use super::{Counters, Reporter, RequestResultEvent};

pub struct HumanReporter {
    interval: Duration,
    last_tick: Duration,
    interval_counts: Counters,
    total_counts: Counters,
    last_pos: Option<(usize, usize, usize)>,
}

impl HumanReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_tick: Duration::ZERO,
            interval_counts: Counters::default(),
            total_counts: Counters::default(),
            last_pos: None,
        }
    }

    fn tick_line(&mut self, now: Duration) -> Option<String> {
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
        let (vu, it, idx) = self.last_pos.unwrap_or_default();

        let line = format!(
            "t={:.1}s vu={} it={} idx={} rps={:.1} ok={} http_fail={} other_fail={} avg={:?} total_ok={} total_fail={}",
            now.as_secs_f64(),
            vu,
            it,
            idx,
            rps,
            self.interval_counts.ok,
            self.interval_counts.http_fail,
            self.interval_counts.other_fail,
            self.interval_counts.latency_avg(),
            self.total_counts.ok,
            self.total_counts.failed(),
        );

        self.interval_counts = Counters::default();
        Some(line)
    }

    fn finish_line(&self) -> String {
        format!(
            "done ok={} http_fail={} other_fail={} total={} avg={:?} max={:?}",
            self.total_counts.ok,
            self.total_counts.http_fail,
            self.total_counts.other_fail,
            self.total_counts.total,
            self.total_counts.latency_avg(),
            self.total_counts.latency_max,
        )
    }
}

impl Reporter for HumanReporter {
    fn on_result(&mut self, ev: &RequestResultEvent) {
        self.interval_counts.apply(ev);
        self.total_counts.apply(ev);
        self.last_pos = Some((ev.vu, ev.iteration, ev.index));
    }

    fn on_tick(&mut self, now: Duration) {
        if let Some(line) = self.tick_line(now) {
            println!("{line}");
        }
    }

    fn finish(&mut self) {
        println!("{}", self.finish_line());
    }
}

#[cfg(test)]
mod tests {
    use super::super::{RequestOutcome, tests::event};
    use super::*;

    #[test]
    fn ticks_only_once_per_interval() {
        let mut r = HumanReporter::new(Duration::from_secs(10));
        r.on_result(&event(5, RequestOutcome::from_status(200)));

        assert!(r.tick_line(Duration::from_secs(9)).is_none());

        let line = r.tick_line(Duration::from_secs(10)).unwrap();
        assert!(line.starts_with("t=10.0s"), "{line}");
        assert!(line.contains("rps=0.1"), "{line}");
        assert!(line.contains(" ok=1 "), "{line}");

        assert!(r.tick_line(Duration::from_secs(15)).is_none());

        // interval counters reset, totals are kept
        let line = r.tick_line(Duration::from_secs(20)).unwrap();
        assert!(line.contains(" ok=0 "), "{line}");
        assert!(line.contains("total_ok=1"), "{line}");
    }

    #[test]
    fn finish_reports_all_outcomes() {
        let mut r = HumanReporter::new(Duration::from_secs(1));
        r.on_result(&event(5, RequestOutcome::from_status(200)));
        r.on_result(&event(5, RequestOutcome::from_status(500)));
        r.on_result(&event(5, RequestOutcome::transport_failure()));

        assert_eq!(
            "done ok=1 http_fail=1 other_fail=1 total=3 avg=5ms max=5ms",
            r.finish_line(),
        );
    }
}

use std::time::Duration;

use rama::{
    Service,
    error::BoxError,
    http::{Request, Response, service::client::HttpClientExt as _},
};

/// Entry point for a single virtual-user iteration.
///
/// Uses the [`BurstSleep::SPICY_KEBAB`] schedule; the runner only supplies
/// the client used to issue the requests.
pub async fn run_iteration<S>(client: &S)
where
    S: Service<Request, Output = Response, Error = BoxError>,
{
    BurstSleep::SPICY_KEBAB.run(client).await
}

/// Phases of a single iteration.
///
/// An iteration alternates between the two, starting with [`DriverState::Bursting`],
/// and is done once the [`ElapsedBudget`] is exhausted after a sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Bursting,
    Sleeping,
}

/// Fixed burst-then-sleep request schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstSleep {
    /// URL every request of every burst is sent to.
    pub target: &'static str,
    /// Sequential requests per burst.
    pub burst_size: usize,
    /// Pause after the first burst.
    pub first_pause: Duration,
    /// Pause after every burst within the repeat loop.
    pub repeat_pause: Duration,
    /// Amount the elapsed counter advances by per repeat.
    pub step: Duration,
    /// Elapsed time after which the repeat loop stops.
    pub total: Duration,
}

impl BurstSleep {
    /// The one schedule this tool drives.
    ///
    /// NOTE: the first pause is 35s while every other pause is 30s.
    /// Most likely a typo, kept as-is so generated traffic matches earlier runs.
    pub const SPICY_KEBAB: Self = Self {
        target: "http://spicy.kebab.solutions:31000",
        burst_size: 10,
        first_pause: Duration::from_secs(35),
        repeat_pause: Duration::from_secs(30),
        step: Duration::from_secs(30),
        total: Duration::from_secs(2 * 60),
    };

    /// Amount of times the repeat loop body runs.
    pub fn repeats(&self) -> u32 {
        let mut budget = ElapsedBudget::new(self.total);
        let mut n = 0;
        while !budget.is_exhausted() {
            n += 1;
            if !budget.advance(self.step) {
                break;
            }
        }
        n
    }

    /// Total amount of requests issued by one iteration.
    pub fn request_count(&self) -> usize {
        self.burst_size * (1 + self.repeats() as usize)
    }

    /// Total time spent sleeping by one iteration, request latency excluded.
    pub fn total_pause(&self) -> Duration {
        self.first_pause + self.repeat_pause * self.repeats()
    }

    /// Run the schedule once against the given client.
    pub async fn run<S>(&self, client: &S)
    where
        S: Service<Request, Output = Response, Error = BoxError>,
    {
        let mut state = DriverState::Bursting;
        let mut budget = ElapsedBudget::new(self.total);
        let mut first = true;

        loop {
            match state {
                DriverState::Bursting => {
                    self.burst(client).await;
                    state = DriverState::Sleeping;
                }
                DriverState::Sleeping => {
                    if first {
                        tokio::time::sleep(self.first_pause).await;
                        first = false;
                    } else {
                        tokio::time::sleep(self.repeat_pause).await;
                        // a zero step can never exhaust the budget: stop after one repeat
                        if !budget.advance(self.step) {
                            return;
                        }
                    }

                    if budget.is_exhausted() {
                        return;
                    }
                    state = DriverState::Bursting;
                }
            }
        }
    }

    /// Issue `burst_size` GET requests, one after the other.
    pub async fn burst<S>(&self, client: &S)
    where
        S: Service<Request, Output = Response, Error = BoxError>,
    {
        for _ in 0..self.burst_size {
            match client.get(self.target).send().await {
                Ok(_resp) => (),
                // fire-and-forget: failures are neither retried nor surfaced
                Err(_err) => (),
            }
        }
    }
}

impl Default for BurstSleep {
    fn default() -> Self {
        Self::SPICY_KEBAB
    }
}

/// Elapsed sleep time tracked against a fixed total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElapsedBudget {
    elapsed: Duration,
    total: Duration,
}

impl ElapsedBudget {
    pub fn new(total: Duration) -> Self {
        Self {
            elapsed: Duration::ZERO,
            total,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.elapsed >= self.total
    }

    /// Advance the elapsed counter by `step`.
    ///
    /// Returns `false` if the counter did not move,
    /// in which case it can never reach the total.
    pub fn advance(&mut self, step: Duration) -> bool {
        if step.is_zero() {
            return false;
        }
        self.elapsed = self.elapsed.saturating_add(step);
        true
    }
}

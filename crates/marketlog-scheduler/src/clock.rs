use chrono::{DateTime, Local};

/// Source of wall-clock time for the dispatch loop.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Local>;
}

/// The real local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Wall clock that advances with Tokio's monotonic clock from a fixed start.
///
/// Under a paused runtime (`tokio::time::pause`) wall time then moves only
/// when Tokio's time does, which makes multi-hour schedules testable in
/// milliseconds.
#[derive(Debug, Clone)]
pub struct TokioClock {
    base: DateTime<Local>,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(base: DateTime<Local>) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Local> {
        let elapsed = chrono::Duration::from_std(self.start.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.base + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let base = Local::now();
        let clock = TokioClock::starting_at(base);
        assert_eq!(clock.now(), base);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now() - base, chrono::Duration::seconds(90));
    }
}

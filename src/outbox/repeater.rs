use std::future::Future;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::OutboxConfig;

// ============================================================================
// Repeater - Periodic Task Runner
// ============================================================================
//
// Fixed cadence (default): a ticker fires every `interval`; a run that
// overlaps the next tick makes that tick be skipped, not queued.
//
// Dynamic interval: the task runs, then the repeater sleeps a full
// `interval`, so slow runs push the schedule back.
//
// `wait_on_start` delays the first run by one interval.
// Cancellation is checked between runs; a run in progress completes.
// Intervals shorter than `MIN_INTERVAL` are raised to it.
//
// ============================================================================

pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct RepeaterConfig {
    pub interval: Duration,
    pub wait_on_start: bool,
    pub dynamic_interval: bool,
}

impl Default for RepeaterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            wait_on_start: true,
            dynamic_interval: false,
        }
    }
}

impl From<&OutboxConfig> for RepeaterConfig {
    fn from(config: &OutboxConfig) -> Self {
        Self {
            interval: config.poll_interval,
            wait_on_start: config.wait_on_start,
            dynamic_interval: config.dynamic_interval,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Repeater {
    name: String,
    config: RepeaterConfig,
}

impl Repeater {
    pub fn new(name: impl Into<String>, mut config: RepeaterConfig) -> Self {
        let name = name.into();

        if config.interval < MIN_INTERVAL {
            tracing::warn!(
                repeater = %name,
                interval_ms = config.interval.as_millis() as u64,
                min_ms = MIN_INTERVAL.as_millis() as u64,
                "Interval too short, using the minimum"
            );
            config.interval = MIN_INTERVAL;
        }

        Self { name, config }
    }

    pub fn config(&self) -> &RepeaterConfig {
        &self.config
    }

    /// Runs `task` until `cancel` fires.
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, task: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        tracing::info!(
            repeater = %self.name,
            interval_ms = self.config.interval.as_millis() as u64,
            wait_on_start = self.config.wait_on_start,
            dynamic_interval = self.config.dynamic_interval,
            "Repeater started"
        );

        if self.config.dynamic_interval {
            self.run_dynamic(&cancel, task).await;
        } else {
            self.run_fixed(&cancel, task).await;
        }

        tracing::info!(repeater = %self.name, "Repeater stopped");
    }

    async fn run_fixed<F, Fut>(&self, cancel: &CancellationToken, mut task: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut ticker = time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if self.config.wait_on_start {
            ticker.reset();
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => task().await,
            }
        }
    }

    async fn run_dynamic<F, Fut>(&self, cancel: &CancellationToken, mut task: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        if !self.config.wait_on_start {
            task().await;
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = time::sleep(self.config.interval) => task().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config(wait_on_start: bool, dynamic_interval: bool) -> RepeaterConfig {
        RepeaterConfig {
            interval: Duration::from_secs(10),
            wait_on_start,
            dynamic_interval,
        }
    }

    async fn runs_after(config: RepeaterConfig, elapsed: Duration) -> u32 {
        let runs = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let repeater = Repeater::new("test", config);
        let handle = {
            let runs = runs.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                repeater
                    .run(cancel, || {
                        runs.fetch_add(1, Ordering::SeqCst);
                        async {}
                    })
                    .await
            })
        };

        time::sleep(elapsed).await;
        cancel.cancel();
        handle.await.unwrap();

        runs.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_runs_immediately_without_wait_on_start() {
        // t=0, 10, 20
        assert_eq!(runs_after(config(false, false), Duration::from_secs(25)).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_waits_one_interval_on_start() {
        // t=10, 20
        assert_eq!(runs_after(config(true, false), Duration::from_secs(25)).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dynamic_interval() {
        assert_eq!(runs_after(config(false, true), Duration::from_secs(25)).await, 3);
        assert_eq!(runs_after(config(true, true), Duration::from_secs(25)).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_raised_to_minimum() {
        let zero = RepeaterConfig {
            interval: Duration::ZERO,
            wait_on_start: false,
            dynamic_interval: false,
        };
        assert_eq!(Repeater::new("test", zero.clone()).config().interval, MIN_INTERVAL);

        // t=0, 10ms, 20ms
        assert_eq!(runs_after(zero.clone(), Duration::from_millis(25)).await, 3);

        let dynamic = RepeaterConfig {
            dynamic_interval: true,
            ..zero
        };
        assert_eq!(runs_after(dynamic, Duration::from_millis(25)).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_never_runs() {
        assert_eq!(runs_after(config(true, false), Duration::ZERO).await, 0);
    }
}

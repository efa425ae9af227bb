//! Sleep detection.
//!
//! The monotonic clock does not advance while the machine is suspended, so
//! wall-clock time running ahead of it marks a wake-up.

use super::handle::RefreshHandle;
use crate::error::BotResult;
use crate::utils::time::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Receiver of "the system just woke up"
#[async_trait]
pub trait WakeSignal: Send + Sync + 'static {
    async fn wake(&self) -> BotResult<()>;
}

#[async_trait]
impl WakeSignal for RefreshHandle {
    async fn wake(&self) -> BotResult<()> {
        RefreshHandle::wake(self).await
    }
}

/// Whether the wall clock ran ahead of the monotonic clock by more than `threshold`
pub fn slept_between(
    wall_elapsed: chrono::Duration,
    monotonic_elapsed: Duration,
    threshold: Duration,
) -> bool {
    let Ok(wall) = wall_elapsed.to_std() else {
        return false;
    };
    wall.saturating_sub(monotonic_elapsed) > threshold
}

/// Polls both clocks and raises the wake signal after a suspend
pub struct WakeMonitor {
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    gap_threshold: Duration,
    cancel: CancellationToken,
}

impl WakeMonitor {
    pub fn new(clock: Arc<dyn Clock>, poll_interval: Duration, gap_threshold: Duration) -> Self {
        Self {
            clock,
            poll_interval,
            gap_threshold,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the monitor when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn<S: WakeSignal>(self, signal: S) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(signal).await })
    }

    pub async fn run<S: WakeSignal>(self, signal: S) {
        info!(
            "Wake monitor started (poll every {:?}, gap threshold {:?})",
            self.poll_interval, self.gap_threshold
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_wall: DateTime<Utc> = self.clock.now();
        let mut last_mono = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Wake monitor stopped");
                    return;
                }
                _ = interval.tick() => {
                    let wall = self.clock.now();
                    let mono = Instant::now();

                    let wall_elapsed = wall.signed_duration_since(last_wall);
                    let mono_elapsed = mono.duration_since(last_mono);
                    if slept_between(wall_elapsed, mono_elapsed, self.gap_threshold) {
                        info!("Detected wake from sleep, {} s passed since last poll", wall_elapsed.num_seconds());
                        if let Err(e) = signal.wake().await {
                            error!("Failed to deliver wake signal: {}", e);
                        }
                    } else {
                        debug!("No sleep gap detected");
                    }

                    last_wall = wall;
                    last_mono = mono;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_slept_between() {
        let threshold = Duration::from_secs(30);
        assert!(!slept_between(
            chrono::Duration::seconds(5),
            Duration::from_secs(5),
            threshold
        ));
        assert!(!slept_between(
            chrono::Duration::seconds(34),
            Duration::from_secs(5),
            threshold
        ));
        assert!(slept_between(
            chrono::Duration::minutes(10),
            Duration::from_secs(5),
            threshold
        ));
        // Clock set backwards is not a wake
        assert!(!slept_between(
            chrono::Duration::seconds(-600),
            Duration::from_secs(5),
            threshold
        ));
    }

    struct ShiftedClock {
        origin: DateTime<Utc>,
        started: Instant,
        shift: Mutex<chrono::Duration>,
    }

    impl Clock for ShiftedClock {
        fn now(&self) -> DateTime<Utc> {
            let elapsed = chrono::Duration::from_std(self.started.elapsed()).unwrap();
            self.origin + elapsed + *self.shift.lock().unwrap()
        }
    }

    #[derive(Clone, Default)]
    struct CountingSignal(Arc<AtomicUsize>);

    #[async_trait]
    impl WakeSignal for CountingSignal {
        async fn wake(&self) -> BotResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_signals_once_per_gap() {
        let clock = Arc::new(ShiftedClock {
            origin: Utc::now(),
            started: Instant::now(),
            shift: Mutex::new(chrono::Duration::zero()),
        });
        let monitor = WakeMonitor::new(
            clock.clone(),
            Duration::from_secs(5),
            Duration::from_secs(30),
        );
        let cancel = monitor.cancellation_token();
        let signal = CountingSignal::default();
        let task = monitor.spawn(signal.clone());

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(signal.0.load(Ordering::SeqCst), 0);

        // Suspend: wall clock jumps while monotonic time stands still
        *clock.shift.lock().unwrap() = chrono::Duration::minutes(15);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(signal.0.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(signal.0.load(Ordering::SeqCst), 1);
    }
}

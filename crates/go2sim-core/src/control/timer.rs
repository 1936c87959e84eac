//! Fixed-period tick source
//!
//! Runs a callback on its own thread once per period, with timing statistics
//! and graceful shutdown. Ticks are scheduled against absolute deadlines so
//! the rate does not drift with callback time.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Configuration for a tick timer
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Tick period
    pub period: Duration,
    /// Name for logging
    pub name: Arc<str>,
    /// Whether to warn when a tick overruns its period
    pub warn_on_overrun: bool,
}

impl TimerConfig {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            name: "tick_timer".into(),
            warn_on_overrun: true,
        }
    }

    /// Set the timer name
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Target rate in Hz
    pub fn rate_hz(&self) -> f64 {
        1.0 / self.period.as_secs_f64()
    }
}

/// Tick timing statistics
///
/// Uses Welford's online algorithm for the variance of tick execution time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerStats {
    /// Completed ticks
    pub iterations: u64,
    /// Ticks that took longer than the period
    pub overruns: u64,
    /// Total execution time
    pub total_execution_time: Duration,
    /// Maximum tick time
    pub max_iteration_time: Duration,
    /// Minimum tick time
    pub min_iteration_time: Duration,
    /// Last tick time
    pub last_iteration_time: Duration,
    welford_mean: f64,
    welford_m2: f64,
}

impl TimerStats {
    pub fn update(&mut self, execution_time: Duration, target_period: Duration) {
        self.iterations += 1;
        self.total_execution_time += execution_time;
        self.last_iteration_time = execution_time;

        let time_secs = execution_time.as_secs_f64();
        if self.iterations == 1 {
            self.min_iteration_time = execution_time;
            self.max_iteration_time = execution_time;
            self.welford_mean = time_secs;
            self.welford_m2 = 0.0;
        } else {
            self.min_iteration_time = self.min_iteration_time.min(execution_time);
            self.max_iteration_time = self.max_iteration_time.max(execution_time);

            let delta = time_secs - self.welford_mean;
            self.welford_mean += delta / self.iterations as f64;
            let delta2 = time_secs - self.welford_mean;
            self.welford_m2 += delta * delta2;
        }

        if execution_time > target_period {
            self.overruns += 1;
        }
    }

    /// Average tick time
    pub fn avg_iteration_time(&self) -> Duration {
        if self.iterations == 0 {
            Duration::ZERO
        } else {
            self.total_execution_time.div_f64(self.iterations as f64)
        }
    }

    /// Overrun ratio (0.0 to 1.0)
    pub fn overrun_ratio(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.overruns as f64 / self.iterations as f64
        }
    }

    /// Standard deviation of tick time in seconds; 0.0 below 2 ticks
    pub fn jitter_std_dev(&self) -> f64 {
        if self.iterations < 2 {
            0.0
        } else {
            (self.welford_m2 / (self.iterations - 1) as f64).sqrt()
        }
    }
}

/// Handle to a running timer
pub struct TimerHandle {
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<TimerStats>>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl TimerHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> TimerStats {
        *self.stats.lock()
    }

    /// Ask the timer to stop at the next tick boundary
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Stop and wait for the timer thread, returning the callback's error if
    /// it ended the timer
    pub fn join(mut self) -> Result<()> {
        self.stop();
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| Error::ControlLoop("timer thread panicked".into()))??;
        }
        Ok(())
    }
}

/// Fixed-period tick source
pub struct Timer;

impl Timer {
    /// Spawn a timer thread
    ///
    /// The callback receives the tick index and returns `Ok(true)` to
    /// continue, `Ok(false)` to stop, or an error that stops the timer and
    /// is handed back by [`TimerHandle::join`].
    pub fn spawn<F>(config: TimerConfig, mut callback: F) -> TimerHandle
    where
        F: FnMut(u64) -> Result<bool> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(Mutex::new(TimerStats::default()));

        let running_clone = running.clone();
        let stats_clone = stats.clone();
        let period = config.period;

        let thread = thread::spawn(move || {
            let mut iteration = 0u64;
            let mut deadline = Instant::now();

            while running_clone.load(Ordering::Relaxed) {
                let tick_start = Instant::now();
                let outcome = callback(iteration);
                let execution_time = tick_start.elapsed();

                match outcome {
                    Ok(true) => {}
                    Ok(false) => {
                        running_clone.store(false, Ordering::Relaxed);
                        break;
                    }
                    Err(e) => {
                        running_clone.store(false, Ordering::Relaxed);
                        return Err(e);
                    }
                }

                stats_clone.lock().update(execution_time, period);
                iteration += 1;

                deadline += period;
                let now = Instant::now();
                if let Some(sleep_time) = deadline.checked_duration_since(now) {
                    thread::sleep(sleep_time);
                } else {
                    if config.warn_on_overrun {
                        tracing::warn!(
                            "{}: tick overrun by {:?}",
                            config.name,
                            now.duration_since(deadline)
                        );
                    }
                    // Resynchronize rather than bursting to catch up
                    deadline = now;
                }
            }

            Ok(())
        });

        TimerHandle {
            running,
            stats,
            thread: Some(thread),
        }
    }
}

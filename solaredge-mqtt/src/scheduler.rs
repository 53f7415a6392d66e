//! Aligned, drift-corrected polling of the inverter.
//!
//! Reads happen on wall-clock multiples of the configured interval. The
//! scheduler learns how late the runtime wakes it up and starts sleeping
//! correspondingly earlier. Cycles that wake up too far from the intended
//! time are skipped rather than stamped with a misleading timestamp.

use std::time::Duration;

use solaredge_bridge_framework::{PushOutcome, QueueProducer, ShutdownSignal, TelemetryRecord};
use solaredge_common::Reading;
use tracing::{debug, error, info, warn};

use crate::config::ScheduleConfig;
use crate::inverter::{DeviceClient, DeviceError};
use crate::scale::{ScaleError, apply_scale_factors};

/// Largest tolerated distance, in seconds, between the intended and the
/// actual wake-up time.
pub const MAX_WAKE_OFFSET: f64 = 0.05;

/// Fraction of each observed wake-up offset fed back into the correction.
pub const DRIFT_GAIN: f64 = 0.1;

/// Pause after a failed read.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Source of wall-clock time in seconds since the Unix epoch.
pub trait Clock: Send {
    fn now(&self) -> f64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// Smallest multiple of `interval` that is not before `now`.
pub fn next_boundary(now: f64, interval: f64) -> f64 {
    (now / interval).ceil() * interval
}

/// Whether a cycle that woke up `delta` seconds late (negative: early)
/// must be skipped.
pub fn should_skip(delta: f64) -> bool {
    delta.abs() > MAX_WAKE_OFFSET
}

/// Record timestamp in epoch milliseconds for a read intended at `next_run`.
pub fn record_timestamp_ms(next_run: f64, time_offset: f64) -> i64 {
    ((next_run - time_offset) * 1000.0).round() as i64
}

/// Learned wake-up latency.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriftCorrection {
    epsilon: f64,
}

impl DriftCorrection {
    /// Current correction in seconds.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// How long to sleep at `now` to wake up at `next_run`.
    pub fn sleep_for(&self, now: f64, next_run: f64) -> f64 {
        next_run - now - self.epsilon
    }

    /// Account for a wake-up that happened `delta` seconds after the target.
    pub fn observe(&mut self, delta: f64) {
        self.epsilon += DRIFT_GAIN * delta;
    }
}

/// Why a cycle produced no record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    /// The computed sleep was negative.
    Overslept,
    /// Woke up more than [`MAX_WAKE_OFFSET`] away from the target.
    WakeOffset(f64),
}

/// Result of one scheduler cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// A record was handed to the delivery queue.
    Queued,
    /// A record was read but the delivery queue was full.
    Dropped,
    /// No read was attempted.
    Skipped(SkipReason),
    /// The read failed; the error backoff has elapsed.
    ReadFailed,
    /// Shutdown was signalled.
    Shutdown,
}

/// Error type for a single read.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("Malformed reading: {0}")]
    Scale(#[from] ScaleError),
}

/// Counters kept by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub queued: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Reads the device on aligned boundaries and queues the results.
pub struct PollScheduler<D, C = SystemClock> {
    device: D,
    clock: C,
    interval: f64,
    time_offset: f64,
    drift: DriftCorrection,
    queue: QueueProducer<TelemetryRecord>,
    stats: PollStats,
}

impl<D: DeviceClient> PollScheduler<D, SystemClock> {
    /// Create a scheduler driven by the system clock.
    pub fn new(device: D, schedule: &ScheduleConfig, queue: QueueProducer<TelemetryRecord>) -> Self {
        Self::with_clock(device, SystemClock, schedule, queue)
    }
}

impl<D: DeviceClient, C: Clock> PollScheduler<D, C> {
    /// Create a scheduler driven by `clock`.
    pub fn with_clock(
        device: D,
        clock: C,
        schedule: &ScheduleConfig,
        queue: QueueProducer<TelemetryRecord>,
    ) -> Self {
        Self {
            device,
            clock,
            interval: schedule.read_every,
            time_offset: schedule.time_offset,
            drift: DriftCorrection::default(),
            queue,
            stats: PollStats::default(),
        }
    }

    /// Current drift correction in seconds.
    pub fn epsilon(&self) -> f64 {
        self.drift.epsilon()
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// Poll until shutdown is signalled.
    ///
    /// Device errors never end the loop; they are logged and retried
    /// after [`ERROR_BACKOFF`].
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        info!(
            interval = self.interval,
            time_offset = self.time_offset,
            "Starting inverter polling"
        );

        while self.run_cycle(&mut shutdown).await != CycleOutcome::Shutdown {}

        info!(
            queued = self.stats.queued,
            dropped = self.stats.dropped,
            skipped = self.stats.skipped,
            failed = self.stats.failed,
            "Inverter polling stopped"
        );
        Ok(())
    }

    /// Run a single cycle: wait for the next boundary, then read and queue.
    pub async fn run_cycle(&mut self, shutdown: &mut ShutdownSignal) -> CycleOutcome {
        if shutdown.is_triggered() {
            return CycleOutcome::Shutdown;
        }

        let now = self.clock.now();
        let next_run = next_boundary(now, self.interval);
        let sleep_for = self.drift.sleep_for(now, next_run);

        if sleep_for < 0.0 {
            warn!(
                sleep_for,
                epsilon = self.drift.epsilon(),
                "Negative sleep time, restarting cycle"
            );
            self.stats.skipped += 1;
            tokio::task::yield_now().await;
            return CycleOutcome::Skipped(SkipReason::Overslept);
        }

        if !shutdown.sleep(Duration::from_secs_f64(sleep_for)).await {
            return CycleOutcome::Shutdown;
        }

        let start = self.clock.now();
        let delta = start - next_run;
        self.drift.observe(delta);
        debug!(
            start,
            next_run,
            delta,
            epsilon = self.drift.epsilon(),
            "Woke up for read"
        );

        if should_skip(delta) {
            warn!(delta, "Skipping read, wake-up offset too large");
            self.stats.skipped += 1;
            return CycleOutcome::Skipped(SkipReason::WakeOffset(delta));
        }

        match self.read().await {
            Ok(reading) => {
                let record =
                    TelemetryRecord::new(reading, record_timestamp_ms(next_run, self.time_offset));
                match self.queue.push(record) {
                    PushOutcome::Queued => {
                        self.stats.queued += 1;
                        CycleOutcome::Queued
                    }
                    PushOutcome::Dropped => {
                        self.stats.dropped += 1;
                        debug!(dropped = self.queue.dropped(), "Delivery queue full, dropping record");
                        CycleOutcome::Dropped
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Error reading from inverter");
                self.stats.failed += 1;
                if shutdown.sleep(ERROR_BACKOFF).await {
                    CycleOutcome::ReadFailed
                } else {
                    CycleOutcome::Shutdown
                }
            }
        }
    }

    async fn read(&mut self) -> Result<Reading, PollError> {
        let raw = self.device.read_all().await?;
        if raw.is_empty() {
            return Err(DeviceError::Empty.into());
        }
        debug!(fields = raw.len(), "Raw reading");
        Ok(apply_scale_factors(raw)?)
    }
}

//! Supervisor for the bridge's concurrent units.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};

/// How often unit liveness is checked.
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Default time granted to units to stop after shutdown is signalled.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// How a unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The unit returned normally.
    Returned,
    /// The unit returned an error.
    Failed(String),
    /// The unit panicked.
    Panicked,
    /// The unit was cancelled.
    Cancelled,
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Returned => write!(f, "returned"),
            UnitOutcome::Failed(e) => write!(f, "failed: {}", e),
            UnitOutcome::Panicked => write!(f, "panicked"),
            UnitOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why the supervisor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// A unit terminated on its own.
    UnitExited { unit: String, outcome: UnitOutcome },
    /// An external signal was received.
    Interrupted(&'static str),
}

impl Termination {
    /// Process exit status for this termination.
    ///
    /// The gateway is meant to run forever, so every way out is a failure.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::UnitExited { unit, outcome } => write!(f, "unit '{}' {}", unit, outcome),
            Termination::Interrupted(signal) => write!(f, "received {}", signal),
        }
    }
}

struct Unit {
    name: String,
    handle: JoinHandle<Result<(), String>>,
}

/// Runs independent units and tears all of them down as soon as one ends.
///
/// Handles:
/// - Task spawning and tracking
/// - Liveness polling at [`LIVENESS_INTERVAL`]
/// - Shutdown on Ctrl+C / SIGTERM
/// - Cooperative stop of the remaining units
///
/// # Example
///
/// ```ignore
/// let mut supervisor = Supervisor::new("solaredge-mqtt");
/// supervisor.spawn_unit("acquisition", scheduler.run(supervisor.shutdown_signal()));
/// supervisor.spawn_unit("delivery", worker.run(supervisor.shutdown_signal()));
///
/// let termination = supervisor.run().await;
/// std::process::exit(termination.exit_code());
/// ```
pub struct Supervisor {
    name: String,
    trigger: ShutdownTrigger,
    units: Vec<Unit>,
    stop_timeout: Duration,
}

impl Supervisor {
    /// Create a supervisor with no units.
    pub fn new(name: impl Into<String>) -> Self {
        let (trigger, _) = shutdown_channel();
        Self {
            name: name.into(),
            trigger,
            units: Vec::new(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Set how long units get to stop before they are aborted.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// A shutdown signal to hand to a unit.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.trigger.subscribe()
    }

    /// Number of units currently tracked.
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Spawn a unit.
    ///
    /// Any termination of the unit, successful or not, stops the bridge.
    pub fn spawn_unit<F, E>(&mut self, name: impl Into<String>, future: F)
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let name = name.into();
        tracing::info!(bridge = %self.name, unit = %name, "Starting unit");

        let handle = tokio::spawn(async move { future.await.map_err(|e| e.to_string()) });
        self.units.push(Unit { name, handle });
    }

    /// Run until a unit terminates or Ctrl+C / SIGTERM is received.
    pub async fn run(self) -> Termination {
        self.run_until(wait_for_interrupt()).await
    }

    /// Run until a unit terminates or `interrupt` completes.
    pub async fn run_until<S>(mut self, interrupt: S) -> Termination
    where
        S: Future<Output = &'static str>,
    {
        tracing::info!(
            bridge = %self.name,
            units = self.units.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(interrupt);

        let termination = loop {
            tokio::select! {
                signal = &mut interrupt => {
                    tracing::info!(bridge = %self.name, signal, "Received shutdown signal");
                    break Termination::Interrupted(signal);
                }
                _ = ticker.tick() => {
                    if let Some(index) = self.units.iter().position(|u| u.handle.is_finished()) {
                        let unit = self.units.remove(index);
                        let outcome = outcome_of(unit.handle.await);
                        tracing::error!(
                            bridge = %self.name,
                            unit = %unit.name,
                            outcome = %outcome,
                            "Unit terminated, shutting down"
                        );
                        break Termination::UnitExited { unit: unit.name, outcome };
                    }
                }
            }
        };

        self.trigger.trigger();
        self.stop_units().await;

        tracing::info!(bridge = %self.name, reason = %termination, "Bridge stopped");
        termination
    }

    async fn stop_units(&mut self) {
        for unit in self.units.drain(..) {
            let mut handle = unit.handle;
            match tokio::time::timeout(self.stop_timeout, &mut handle).await {
                Ok(result) => {
                    let outcome = outcome_of(result);
                    tracing::debug!(unit = %unit.name, outcome = %outcome, "Unit stopped");
                }
                Err(_) => {
                    tracing::warn!(unit = %unit.name, "Unit did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
    }
}

fn outcome_of(result: Result<Result<(), String>, JoinError>) -> UnitOutcome {
    match result {
        Ok(Ok(())) => UnitOutcome::Returned,
        Ok(Err(e)) => UnitOutcome::Failed(e),
        Err(e) if e.is_panic() => UnitOutcome::Panicked,
        Err(_) => UnitOutcome::Cancelled,
    }
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_interrupt() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

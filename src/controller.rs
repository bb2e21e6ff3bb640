use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::climate::{ClimateSnapshot, FieldChange};
use crate::config::ControllerConfig;
use crate::error::{ConfigError, ControllerError};
use crate::handlers::{PackedDecimalError, TargetMode, Temperature};
use crate::hw::DeviceTransport;
use crate::session::{ClimateSession, CycleOutcome, CycleOutcomeKind};

const COMMAND_QUEUE_DEPTH: usize = 16;

/// Numbered summary of a finished update cycle.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct CycleReport {
    pub number: u64,
    pub outcome: CycleOutcomeKind,
}

#[derive(Debug)]
enum ControllerCommand {
    Apply {
        change: FieldChange,
        reply: oneshot::Sender<Result<bool, PackedDecimalError>>,
    },
    RunCycle {
        reply: oneshot::Sender<CycleOutcome>,
    },
}

/// Starts the per-device controller task.
#[derive(Debug)]
pub struct ClimateController;

impl ClimateController {
    /// Spawns the task that owns the session for `transport`.
    ///
    /// The first cycle runs after `initial_delay`; the timer re-arms with
    /// `update_interval` at the start of every cycle.
    ///
    /// # Errors
    ///
    /// Returns an error when `config` does not validate.
    pub fn spawn(
        transport: Box<dyn DeviceTransport>,
        config: ControllerConfig,
    ) -> Result<ControllerHandle, ConfigError> {
        let session = ClimateSession::new(transport, &config)?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot().clone());
        let (report_tx, report_rx) = watch::channel(None);
        let shutdown = CancellationToken::new();

        let worker = ControllerWorker {
            session,
            initial_delay: config.initial_delay,
            update_interval: config.update_interval,
            update_on_change: config.update_on_change,
            commands: command_rx,
            snapshots: snapshot_tx,
            reports: report_tx,
            shutdown: shutdown.clone(),
            completed_cycles: 0,
        };
        let task = tokio::spawn(worker.run());

        Ok(ControllerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            reports: report_rx,
            shutdown,
            task,
        })
    }
}

/// Host-side handle to a running controller.
#[derive(Debug)]
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
    snapshots: watch::Receiver<ClimateSnapshot>,
    reports: watch::Receiver<Option<CycleReport>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl ControllerHandle {
    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ClimateSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified whenever the snapshot is republished.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ClimateSnapshot> {
        self.snapshots.clone()
    }

    /// Receiver notified after every finished cycle.
    #[must_use]
    pub fn cycle_reports(&self) -> watch::Receiver<Option<CycleReport>> {
        self.reports.clone()
    }

    /// Queues a local change. Returns whether the value differed.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Temperature`] for setpoints above `99.9`
    /// and [`ControllerError::Stopped`] when the task is gone.
    pub async fn apply(&self, change: FieldChange) -> Result<bool, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ControllerCommand::Apply { change, reply })
            .await
            .map_err(|_closed| ControllerError::Stopped)?;
        let changed = response.await.map_err(|_closed| ControllerError::Stopped)??;
        Ok(changed)
    }

    /// # Errors
    ///
    /// Returns [`ControllerError::Stopped`] when the task is gone.
    pub async fn set_power(&self, power: bool) -> Result<bool, ControllerError> {
        self.apply(FieldChange::Power(power)).await
    }

    /// # Errors
    ///
    /// Returns [`ControllerError::Stopped`] when the task is gone.
    pub async fn set_target_mode(&self, target_mode: TargetMode) -> Result<bool, ControllerError> {
        self.apply(FieldChange::TargetMode(target_mode)).await
    }

    /// Sets the target mode from the host's numeric code (`0` auto,
    /// `1` heat, `2` cool).
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Mode`] for any other code, before anything
    /// is queued.
    pub async fn set_target_mode_code(&self, code: u8) -> Result<bool, ControllerError> {
        let target_mode = TargetMode::try_from(code)?;
        self.set_target_mode(target_mode).await
    }

    /// # Errors
    ///
    /// Returns [`ControllerError::Temperature`] for values outside `0.0..=99.9`.
    pub async fn set_cooling_setpoint(&self, celsius: f64) -> Result<bool, ControllerError> {
        let value = Temperature::from_celsius(celsius)?;
        self.apply(FieldChange::CoolingSetpoint(value)).await
    }

    /// # Errors
    ///
    /// Returns [`ControllerError::Temperature`] for values outside `0.0..=99.9`.
    pub async fn set_heating_setpoint(&self, celsius: f64) -> Result<bool, ControllerError> {
        let value = Temperature::from_celsius(celsius)?;
        self.apply(FieldChange::HeatingSetpoint(value)).await
    }

    /// Runs a cycle now and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Stopped`] when the task is gone.
    pub async fn refresh(&self) -> Result<CycleOutcome, ControllerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(ControllerCommand::RunCycle { reply })
            .await
            .map_err(|_closed| ControllerError::Stopped)?;
        response.await.map_err(|_closed| ControllerError::Stopped)
    }

    /// Stops the timer and waits for the task. A running cycle finishes first.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::TaskFailed`] when the task panicked.
    pub async fn shutdown(self) -> Result<(), ControllerError> {
        self.shutdown.cancel();
        self.task.await?;
        Ok(())
    }
}

struct ControllerWorker {
    session: ClimateSession,
    initial_delay: Duration,
    update_interval: Duration,
    update_on_change: bool,
    commands: mpsc::Receiver<ControllerCommand>,
    snapshots: watch::Sender<ClimateSnapshot>,
    reports: watch::Sender<Option<CycleReport>>,
    shutdown: CancellationToken,
    completed_cycles: u64,
}

impl ControllerWorker {
    async fn run(mut self) {
        let mut next_cycle = Instant::now() + self.initial_delay;
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    debug!("controller shutting down");
                    break;
                }
                () = sleep_until(next_cycle) => {
                    next_cycle = Instant::now() + self.update_interval;
                    self.cycle().await;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("all controller handles dropped");
                        break;
                    };
                    match command {
                        ControllerCommand::Apply { change, reply } => {
                            let result = self.session.apply_change(change);
                            let changed = result == Ok(true);
                            if changed {
                                self.snapshots.send_replace(self.session.snapshot().clone());
                            }
                            let _ = reply.send(result);
                            if changed && self.update_on_change {
                                next_cycle = Instant::now() + self.update_interval;
                                self.cycle().await;
                            }
                        }
                        ControllerCommand::RunCycle { reply } => {
                            next_cycle = Instant::now() + self.update_interval;
                            let outcome = self.cycle().await;
                            let _ = reply.send(outcome);
                        }
                    }
                }
            }
        }
    }

    #[instrument(skip(self), level = "debug", fields(cycle = self.completed_cycles + 1))]
    async fn cycle(&mut self) -> CycleOutcome {
        let outcome = self.session.run_cycle().await;
        self.completed_cycles += 1;
        self.snapshots.send_replace(self.session.snapshot().clone());
        self.reports.send_replace(Some(CycleReport {
            number: self.completed_cycles,
            outcome: outcome.kind(),
        }));
        outcome
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::ModeError;
    use crate::hw::{FakeThermostat, FakeThermostatConfig};

    fn spawn_fake() -> ControllerHandle {
        let fake = FakeThermostat::new(FakeThermostatConfig::default());
        ClimateController::spawn(Box::new(fake), ControllerConfig::default())
            .expect("default config should validate")
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_inputs_are_rejected_before_queueing() {
        let handle = spawn_fake();

        assert_matches!(
            handle.set_target_mode_code(7).await,
            Err(ControllerError::Mode(ModeError::UnsupportedTargetMode { .. }))
        );
        assert_matches!(
            handle.set_heating_setpoint(120.0).await,
            Err(ControllerError::Temperature(_))
        );
        handle.shutdown().await.expect("controller should stop");
    }

    #[tokio::test(start_paused = true)]
    async fn raw_out_of_range_change_is_rejected_by_the_task() {
        let handle = spawn_fake();

        assert_matches!(
            handle
                .apply(FieldChange::CoolingSetpoint(Temperature::from_tenths(1_500)))
                .await,
            Err(ControllerError::Temperature(PackedDecimalError::OutOfRange { .. }))
        );
        assert_matches!(handle.refresh().await, Ok(CycleOutcome::Updated));
        assert_eq!(
            Temperature::from_tenths(240),
            handle.snapshot().cooling_setpoint
        );
        handle.shutdown().await.expect("controller should stop");
    }

    #[tokio::test(start_paused = true)]
    async fn apply_publishes_local_snapshot() {
        let handle = spawn_fake();

        assert!(handle.set_cooling_setpoint(26.5).await.expect("apply should succeed"));
        assert_eq!(
            Temperature::from_tenths(265),
            handle.snapshot().cooling_setpoint
        );
        handle.shutdown().await.expect("controller should stop");
    }

    #[test]
    fn spawn_rejects_invalid_config() {
        let fake = FakeThermostat::new(FakeThermostatConfig::default());
        let result = ClimateController::spawn(
            Box::new(fake),
            ControllerConfig::builder().pin(12_345).build(),
        );
        assert_matches!(result, Err(ConfigError::Pin(_)));
    }
}

use std::time::Duration;

use serde::Serialize;
use strum_macros::Display;
use tracing::{debug, error, info, instrument, warn};

use super::exchange::CommandExchange;
use crate::climate::{
    ClimateField, ClimateSnapshot, DeviceInfo, FieldChange, PendingChanges, decode_version_string,
};
use crate::config::ControllerConfig;
use crate::error::{ConfigError, ProtocolError, TransportError};
use crate::handlers::{
    ControlCommand, LoginHandler, PackedDecimalError, PinCode, STATUS_QUERY, SequenceId,
    StatusDecodeError, StatusReply, TargetMode, Temperature, vane_fan_byte_from_status,
};
use crate::hw::DeviceTransport;
use crate::protocol::EndpointId;
use crate::utils::format_hex;

/// Stage of one update cycle.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    #[default]
    #[strum(to_string = "idle")]
    Idle,
    #[strum(to_string = "connecting")]
    Connecting,
    #[strum(to_string = "authenticating")]
    Authenticating,
    #[strum(to_string = "syncing")]
    Syncing,
    #[strum(to_string = "querying")]
    Querying,
    #[strum(to_string = "disconnecting")]
    Disconnecting,
}

/// Result of one update cycle. Never surfaced to the host as an error.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Pending changes were pushed and a status reply was applied.
    Updated,
    /// The controller was showing a menu; the snapshot is unchanged.
    DeviceBusy,
    MalformedStatus(StatusDecodeError),
    /// The link could not be established; nothing was exchanged.
    ConnectFailed(TransportError),
    /// An exchange failed mid-cycle; the link was closed.
    Aborted {
        stage: CycleState,
        error: ProtocolError,
    },
}

/// Copyable summary of a [`CycleOutcome`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcomeKind {
    #[strum(to_string = "updated")]
    Updated,
    #[strum(to_string = "device_busy")]
    DeviceBusy,
    #[strum(to_string = "malformed_status")]
    MalformedStatus,
    #[strum(to_string = "connect_failed")]
    ConnectFailed,
    #[strum(to_string = "aborted")]
    Aborted,
}

impl CycleOutcome {
    #[must_use]
    pub fn kind(&self) -> CycleOutcomeKind {
        match self {
            Self::Updated => CycleOutcomeKind::Updated,
            Self::DeviceBusy => CycleOutcomeKind::DeviceBusy,
            Self::MalformedStatus(_) => CycleOutcomeKind::MalformedStatus,
            Self::ConnectFailed(_) => CycleOutcomeKind::ConnectFailed,
            Self::Aborted { .. } => CycleOutcomeKind::Aborted,
        }
    }
}

type StageError = (CycleState, ProtocolError);

/// A control payload ready to push, with the field it clears.
type ControlPush = (ClimateField, Vec<u8>);

/// Owns the link to one controller and its climate mirror.
///
/// Every device exchange happens inside [`ClimateSession::run_cycle`], so at
/// most one command is ever in flight.
pub struct ClimateSession {
    transport: Box<dyn DeviceTransport>,
    pin: PinCode,
    chunk_size: usize,
    reply_timeout: Duration,
    vane_fan_byte: u8,
    snapshot: ClimateSnapshot,
    pending: PendingChanges,
    sequence: SequenceId,
    state: CycleState,
}

impl std::fmt::Debug for ClimateSession {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClimateSession")
            .field("snapshot", &self.snapshot)
            .field("pending", &self.pending)
            .field("sequence", &self.sequence)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ClimateSession {
    /// Creates an idle session.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration does not validate.
    pub fn new(
        transport: Box<dyn DeviceTransport>,
        config: &ControllerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            transport,
            pin: config.pin_code()?,
            chunk_size: config.chunk_size,
            reply_timeout: config.reply_timeout,
            vane_fan_byte: config.vane_fan_byte,
            snapshot: ClimateSnapshot::default(),
            pending: PendingChanges::default(),
            sequence: SequenceId::default(),
            state: CycleState::Idle,
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> &ClimateSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn pending_changes(&self) -> &PendingChanges {
        &self.pending
    }

    #[must_use]
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Sequence id the next command will carry.
    #[must_use]
    pub fn next_sequence_id(&self) -> SequenceId {
        self.sequence
    }

    /// Applies a host change locally and marks it for the next cycle.
    ///
    /// Returns `false`, leaving nothing dirty, when the value is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the snapshot untouched, for setpoints that
    /// cannot be packed into a control command.
    pub fn apply_change(&mut self, change: FieldChange) -> Result<bool, PackedDecimalError> {
        let change = change.ensure_encodable()?;
        Ok(self.mark_change(change))
    }

    pub fn set_power(&mut self, power: bool) -> bool {
        self.mark_change(FieldChange::Power(power))
    }

    pub fn set_target_mode(&mut self, target_mode: TargetMode) -> bool {
        self.mark_change(FieldChange::TargetMode(target_mode))
    }

    /// # Errors
    ///
    /// Returns an error for values above `99.9`.
    pub fn set_cooling_setpoint(&mut self, value: Temperature) -> Result<bool, PackedDecimalError> {
        self.apply_change(FieldChange::CoolingSetpoint(value))
    }

    /// # Errors
    ///
    /// Returns an error for values above `99.9`.
    pub fn set_heating_setpoint(&mut self, value: Temperature) -> Result<bool, PackedDecimalError> {
        self.apply_change(FieldChange::HeatingSetpoint(value))
    }

    fn mark_change(&mut self, change: FieldChange) -> bool {
        if !self.snapshot.apply_change(change) {
            return false;
        }
        debug!(field = %change.field(), "marked field dirty");
        self.pending.mark(change.field());
        true
    }

    /// Runs one connect, login, sync, query, logout, disconnect cycle.
    #[instrument(skip(self), level = "info", name = "update_cycle", fields(dirty = !self.pending.is_empty()))]
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let pushes = self.prepare_control_pushes();
        transition(&mut self.state, CycleState::Connecting);
        if let Err(error) = self.establish_link().await {
            error!(%error, "failed to connect to controller");
            transition(&mut self.state, CycleState::Idle);
            return CycleOutcome::ConnectFailed(error);
        }

        let outcome = match self.exchange_with_controller(pushes).await {
            Ok(outcome) => outcome,
            Err((stage, error)) => {
                error!(%stage, %error, "update cycle aborted");
                CycleOutcome::Aborted { stage, error }
            }
        };

        transition(&mut self.state, CycleState::Disconnecting);
        if let Err(error) = self.transport.disconnect().await {
            warn!(%error, "failed to disconnect cleanly");
        }
        transition(&mut self.state, CycleState::Idle);
        info!(outcome = %outcome.kind(), "update cycle finished");
        outcome
    }

    /// Builds one control payload per dirty field, in push order.
    ///
    /// A field whose payload cannot be built is dropped from the pending set
    /// so it cannot hold up later cycles.
    fn prepare_control_pushes(&mut self) -> Vec<ControlPush> {
        let dirty: Vec<ClimateField> = self.pending.iter().collect();
        let mut pushes = Vec::with_capacity(dirty.len());
        for field in dirty {
            let payload = ControlCommand::builder()
                .intent(self.snapshot.current_value(field).intent())
                .target_mode(self.snapshot.target_mode)
                .cooling_setpoint(self.snapshot.cooling_setpoint)
                .heating_setpoint(self.snapshot.heating_setpoint)
                .vane_fan_byte(self.vane_fan_byte)
                .build()
                .payload();
            match payload {
                Ok(payload) => pushes.push((field, payload.to_vec())),
                Err(error) => {
                    error!(%field, %error, "dropping change that cannot be encoded");
                    self.pending.clear(field);
                }
            }
        }
        pushes
    }

    async fn establish_link(&mut self) -> Result<(), TransportError> {
        if self.transport.is_connected().await? {
            debug!("closing link left open by an earlier cycle");
            self.transport.disconnect().await?;
        }
        self.transport.connect().await?;
        if let Err(error) = self.transport.discover().await {
            if let Err(disconnect_error) = self.transport.disconnect().await {
                warn!(%disconnect_error, "failed to disconnect after discovery failure");
            }
            return Err(error);
        }
        Ok(())
    }

    async fn exchange_with_controller(
        &mut self,
        pushes: Vec<ControlPush>,
    ) -> Result<CycleOutcome, StageError> {
        let transport = self.transport.as_ref();
        read_device_info(transport, &mut self.snapshot.device_info).await;

        let mut exchange = CommandExchange::open(transport, self.chunk_size, self.reply_timeout)
            .await
            .map_err(|error| (CycleState::Connecting, ProtocolError::from(error)))?;

        transition(&mut self.state, CycleState::Authenticating);
        for payload in LoginHandler::login_payloads(self.pin) {
            let reply = exchange
                .request(&mut self.sequence, &payload)
                .await
                .map_err(|error| (CycleState::Authenticating, ProtocolError::from(error)))?;
            debug!(reply = %format_hex(reply.payload()), "login step acknowledged");
        }

        transition(&mut self.state, CycleState::Syncing);
        for (field, payload) in pushes {
            exchange
                .request(&mut self.sequence, &payload)
                .await
                .map_err(|error| (CycleState::Syncing, ProtocolError::from(error)))?;
            self.pending.clear(field);
            info!(%field, "pushed pending change");
        }

        transition(&mut self.state, CycleState::Querying);
        let reply = exchange
            .request(&mut self.sequence, &STATUS_QUERY)
            .await
            .map_err(|error| (CycleState::Querying, ProtocolError::from(error)))?;
        let outcome = match StatusReply::decode(reply.body()) {
            Ok(status) => {
                self.snapshot.apply_status(&status);
                self.vane_fan_byte =
                    vane_fan_byte_from_status(status.raw_fan_byte(), status.raw_vane_byte());
                debug!(vane_fan_byte = self.vane_fan_byte, "tracked vane/fan byte");
                CycleOutcome::Updated
            }
            Err(StatusDecodeError::DeviceBusy) => {
                debug!("controller is showing a menu; status skipped");
                CycleOutcome::DeviceBusy
            }
            Err(error) => {
                error!(%error, "malformed status reply");
                CycleOutcome::MalformedStatus(error)
            }
        };

        for payload in LoginHandler::logout_payloads(self.pin) {
            if let Err(error) = exchange.request(&mut self.sequence, &payload).await {
                warn!(%error, "logout step failed");
                break;
            }
        }

        Ok(outcome)
    }
}

fn transition(state: &mut CycleState, next: CycleState) {
    debug!(from = %state, to = %next, "cycle state");
    *state = next;
}

/// Refreshes the version strings; a failed read keeps the previous value.
async fn read_device_info(transport: &dyn DeviceTransport, device_info: &mut DeviceInfo) {
    for (endpoint, slot) in [
        (EndpointId::VersionCharacteristic, &mut device_info.firmware),
        (EndpointId::SoftwareCharacteristic, &mut device_info.software),
    ] {
        match transport.read(endpoint).await {
            Ok(raw) => {
                let value = decode_version_string(&raw);
                info!(%endpoint, %value, "read controller version");
                *slot = Some(value);
            }
            Err(error) => warn!(%endpoint, %error, "failed to read controller version"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::climate::OperatingState;
    use crate::hw::{FakeThermostat, FakeThermostatConfig, FakeThermostatProbe};

    fn session_with(config: FakeThermostatConfig) -> (ClimateSession, FakeThermostatProbe) {
        let fake = FakeThermostat::new(config);
        let probe = fake.probe();
        let session = ClimateSession::new(Box::new(fake), &ControllerConfig::default())
            .expect("default config should validate");
        (session, probe)
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_applies_status_and_device_info() {
        let (mut session, probe) = session_with(FakeThermostatConfig::default());

        let outcome = session.run_cycle().await;

        assert_matches!(outcome, CycleOutcome::Updated);
        let snapshot = session.snapshot();
        assert!(snapshot.power);
        assert_eq!(TargetMode::Heat, snapshot.target_mode);
        assert_eq!(Temperature::from_tenths(210), snapshot.heating_setpoint);
        assert_eq!(OperatingState::Idle, snapshot.operating_state);
        assert_eq!(Some("1.02".to_string()), snapshot.device_info.firmware);
        assert_eq!(CycleState::Idle, session.state());
        assert!(!probe.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_id_carries_over_between_cycles() {
        let (mut session, _probe) = session_with(FakeThermostatConfig::default());

        session.run_cycle().await;
        assert_eq!(SequenceId::new(1), session.next_sequence_id());

        session.run_cycle().await;
        assert_eq!(SequenceId::new(2), session.next_sequence_id());
    }

    #[tokio::test(start_paused = true)]
    async fn unencodable_pending_change_is_dropped_before_connecting() {
        let (mut session, probe) = session_with(FakeThermostatConfig::default());
        session.snapshot.heating_setpoint = Temperature::from_tenths(1_200);
        session.pending.mark(ClimateField::HeatingSetpoint);

        assert_matches!(session.run_cycle().await, CycleOutcome::Updated);

        assert!(session.pending_changes().is_empty());
        assert!(
            probe
                .written_payloads()
                .iter()
                .all(|payload| !payload.starts_with(&[0x05, 0x01, 0x01]))
        );
        assert_eq!(
            Temperature::from_tenths(210),
            session.snapshot().heating_setpoint
        );
    }

    #[test]
    fn out_of_range_setpoint_is_rejected_without_marking() {
        let (mut session, _probe) = session_with(FakeThermostatConfig::default());

        assert_matches!(
            session.set_heating_setpoint(Temperature::from_tenths(1_200)),
            Err(PackedDecimalError::OutOfRange { .. })
        );
        assert!(session.pending_changes().is_empty());
        assert_eq!(
            Temperature::from_tenths(100),
            session.snapshot().heating_setpoint
        );
    }

    #[test]
    fn unchanged_values_are_not_marked_dirty() {
        let (mut session, _probe) = session_with(FakeThermostatConfig::default());

        assert!(!session.set_power(false));
        assert!(session.set_power(true));
        assert!(session.pending_changes().is_dirty(ClimateField::Power));
        assert!(!session.set_target_mode(TargetMode::Auto));
    }
}

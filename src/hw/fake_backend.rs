use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, trace};

use super::hardware::{DeviceTransport, FragmentStream, WriteMode};
use crate::error::{FixtureError, TransportError};
use crate::handlers::{FrameCodec, ModeFlags, STATUS_QUERY, STATUS_REPLY_LEN, SequenceId};
use crate::protocol::{EndpointId, TRANSPORT_CHUNK_SIZE};
use crate::utils::format_hex;

/// Status reply payload length: the body minus the sequence byte and checksum.
const STATUS_PAYLOAD_LEN: usize = STATUS_REPLY_LEN - 3;

const CONTROL_PREFIX: [u8; 3] = [0x05, 0x01, 0x01];
const BUSY_PAYLOAD: [u8; 6] = [0x05, 0x09, 0x02, 0x00, 0x10, 0x54];
const STATUS_MODE_INDEX: usize = 6;
const STATUS_COOL_INDEX: usize = 27;
const STATUS_HEAT_INDEX: usize = 29;

/// Heat mode, running, cool 24.0, heat 21.0, room 22.0.
const DEFAULT_STATUS_PAYLOAD: [u8; STATUS_PAYLOAD_LEN] = [
    0x05, 0x00, 0x02, 0x00, 0x00, 0x00, 0x32, 0x10, 0x03, 0x60, 0x01, 0x90, 0x02, 0x00, 0x01, 0x10,
    0x03, 0x60, 0x01, 0x10, 0x03, 0x80, 0x01, 0x90, 0x02, 0x60, 0x01, 0x40, 0x02, 0x10, 0x02, 0x90,
    0x01, 0x40, 0x02, 0x90, 0x01, 0x40, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x20, 0x02, 0x01, 0x00,
    0x10, 0x04,
];

/// Status reply payload served by the fake thermostat, parsed from hex.
#[derive(Debug, Clone, Eq, PartialEq, derive_more::Into)]
pub struct StatusFixture {
    payload: Vec<u8>,
}

impl Default for StatusFixture {
    fn default() -> Self {
        Self {
            payload: DEFAULT_STATUS_PAYLOAD.to_vec(),
        }
    }
}

impl FromStr for StatusFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let compact: String = value
            .chars()
            .filter(|character| !character.is_whitespace() && *character != ':')
            .collect();
        let payload = hex::decode(compact)?;
        if payload.len() != STATUS_PAYLOAD_LEN {
            return Err(FixtureError::InvalidStatusLength {
                expected: STATUS_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        Ok(Self { payload })
    }
}

/// Settings for the simulated thermostat.
#[derive(Debug, Clone, Builder)]
pub struct FakeThermostatConfig {
    #[builder(default)]
    status: StatusFixture,
    /// Answer status queries with the menu-busy sentinel.
    #[builder(default)]
    busy: bool,
    /// Swallow every command without replying.
    #[builder(default)]
    silent: bool,
    /// Number of initial connection attempts to refuse.
    #[builder(default)]
    failing_connects: u32,
    /// Go silent once this many control commands have been answered.
    silent_after_controls: Option<u32>,
    #[builder(default = "1.02".to_string(), into)]
    firmware: String,
    #[builder(default = "PAR-CT01MAU".to_string(), into)]
    software: String,
}

impl Default for FakeThermostatConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
struct FakeState {
    config: FakeThermostatConfig,
    status_payload: Vec<u8>,
    connected: bool,
    connect_attempts: u32,
    answered_controls: u32,
    inbound: Vec<u8>,
    written_payloads: Vec<Vec<u8>>,
    notify: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

/// Simulated MA Touch controller speaking the framed protocol.
///
/// Written envelopes are reassembled and answered with framed replies split
/// into transport-sized notification fragments.
#[derive(Debug, Clone)]
pub struct FakeThermostat {
    state: Arc<Mutex<FakeState>>,
}

impl FakeThermostat {
    #[must_use]
    pub fn new(config: FakeThermostatConfig) -> Self {
        let status_payload = config.status.payload.clone();
        Self {
            state: Arc::new(Mutex::new(FakeState {
                config,
                status_payload,
                connected: false,
                connect_attempts: 0,
                answered_controls: 0,
                inbound: Vec::new(),
                written_payloads: Vec::new(),
                notify: None,
            })),
        }
    }

    /// Returns a handle for inspecting the simulated device after the
    /// transport has been handed to a session.
    #[must_use]
    pub fn probe(&self) -> FakeThermostatProbe {
        FakeThermostatProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Observer for a [`FakeThermostat`].
#[derive(Debug, Clone)]
pub struct FakeThermostatProbe {
    state: Arc<Mutex<FakeState>>,
}

impl FakeThermostatProbe {
    /// Every command payload received so far, unframed.
    #[must_use]
    pub fn written_payloads(&self) -> Vec<Vec<u8>> {
        self.lock().written_payloads.clone()
    }

    #[must_use]
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Current status payload, including any applied control commands.
    #[must_use]
    pub fn status_payload(&self) -> Vec<u8> {
        self.lock().status_payload.clone()
    }

    pub fn set_busy(&self, busy: bool) {
        self.lock().config.busy = busy;
    }

    pub fn set_silent(&self, silent: bool) {
        self.lock().config.silent = silent;
    }

    /// Pushes a framed message the host never asked for.
    pub fn push_unsolicited(&self, payload: &[u8]) {
        let mut state = self.lock();
        state.send_reply(SequenceId::default(), payload);
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DeviceTransport for FakeThermostat {
    async fn is_connected(&self) -> Result<bool, TransportError> {
        Ok(self.lock().connected)
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connect_attempts += 1;
        if state.connect_attempts <= state.config.failing_connects {
            return Err(TransportError::ConnectFailed {
                reason: format!("fake refused attempt {}", state.connect_attempts),
            });
        }
        state.connected = true;
        state.inbound.clear();
        info!("fake thermostat connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connected = false;
        state.notify = None;
        state.inbound.clear();
        debug!("fake thermostat disconnected");
        Ok(())
    }

    async fn discover(&mut self) -> Result<(), TransportError> {
        self.lock().ensure_connected()
    }

    async fn read(&self, endpoint: EndpointId) -> Result<Vec<u8>, TransportError> {
        let state = self.lock();
        state.ensure_connected()?;
        let value = match endpoint {
            EndpointId::VersionCharacteristic => &state.config.firmware,
            EndpointId::SoftwareCharacteristic => &state.config.software,
            other => return Err(TransportError::MissingEndpoint { endpoint: other }),
        };
        let mut raw = value.as_bytes().to_vec();
        raw.push(0x00);
        Ok(raw)
    }

    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        _mode: WriteMode,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.ensure_connected()?;
        if endpoint != EndpointId::WriteCharacteristic {
            return Err(TransportError::MissingEndpoint { endpoint });
        }
        state.inbound.extend_from_slice(payload);
        state.process_inbound();
        Ok(())
    }

    async fn subscribe(&self, endpoint: EndpointId) -> Result<FragmentStream, TransportError> {
        let mut state = self.lock();
        state.ensure_connected()?;
        if endpoint != EndpointId::NotifyCharacteristic {
            return Err(TransportError::MissingEndpoint { endpoint });
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.notify = Some(sender);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}

impl FakeState {
    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn process_inbound(&mut self) {
        loop {
            let Some(declared) = self
                .inbound
                .get(..2)
                .map(|length| usize::from(u16::from_le_bytes([length[0], length[1]])))
            else {
                return;
            };
            let total = 2 + declared;
            if self.inbound.len() < total {
                return;
            }

            let frame: Vec<u8> = self.inbound.drain(..total).collect();
            if frame.len() < 5 {
                continue;
            }
            let sequence_id = SequenceId::new(frame[2]);
            let payload = frame[3..frame.len() - 2].to_vec();
            trace!(payload = %format_hex(&payload), "fake thermostat received command");
            let reply = self.handle_command(&payload);
            let is_control = payload.starts_with(&CONTROL_PREFIX);
            self.written_payloads.push(payload);
            if self.config.silent {
                continue;
            }
            self.send_reply(sequence_id, &reply);
            if is_control {
                self.answered_controls += 1;
                if self.config.silent_after_controls == Some(self.answered_controls) {
                    debug!(
                        answered = self.answered_controls,
                        "fake thermostat going silent"
                    );
                    self.config.silent = true;
                }
            }
        }
    }

    fn handle_command(&mut self, payload: &[u8]) -> Vec<u8> {
        if payload == STATUS_QUERY {
            if self.config.busy {
                return BUSY_PAYLOAD.to_vec();
            }
            return self.status_payload.clone();
        }
        if payload.starts_with(&CONTROL_PREFIX) && payload.len() >= 11 {
            self.apply_control(payload);
            return vec![0x05, 0x00, 0x00];
        }
        match payload {
            [subcommand, param, ..] => vec![*subcommand, *param, 0x00],
            _ => vec![0xFF],
        }
    }

    fn apply_control(&mut self, payload: &[u8]) {
        let (flags_a, flags_b, mode) = (payload[3], payload[4], payload[6]);
        let status = &mut self.status_payload;
        match (flags_a, flags_b) {
            (0x01, _) => {
                let mut flags = ModeFlags::from_bits_retain(status[STATUS_MODE_INDEX]);
                flags.set(
                    ModeFlags::FAN,
                    ModeFlags::from_bits_retain(mode).contains(ModeFlags::POWER),
                );
                status[STATUS_MODE_INDEX] = flags.bits();
            }
            (0x02, _) => {
                status[STATUS_MODE_INDEX] = (ModeFlags::from_bits_retain(mode) | ModeFlags::FAN).bits();
            }
            (_, 0x01) => {
                status[STATUS_COOL_INDEX..STATUS_COOL_INDEX + 2].copy_from_slice(&payload[7..9]);
            }
            (_, 0x02) => {
                status[STATUS_HEAT_INDEX..STATUS_HEAT_INDEX + 2].copy_from_slice(&payload[9..11]);
            }
            _ => debug!(flags_a, flags_b, "fake thermostat ignoring control intent"),
        }
    }

    fn send_reply(&mut self, sequence_id: SequenceId, payload: &[u8]) {
        let Some(notify) = &self.notify else {
            return;
        };
        let Ok(frame) = FrameCodec::encode(sequence_id, payload) else {
            return;
        };
        for fragment in frame.chunks(TRANSPORT_CHUNK_SIZE) {
            if notify.send(fragment.to_vec()).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::handlers::{Reassembler, StatusReply, Temperature};

    async fn connected() -> (FakeThermostat, FragmentStream) {
        let mut fake = FakeThermostat::new(FakeThermostatConfig::default());
        fake.connect().await.expect("fake should connect");
        let stream = fake
            .subscribe(EndpointId::NotifyCharacteristic)
            .await
            .expect("fake should subscribe");
        (fake, stream)
    }

    async fn request(fake: &FakeThermostat, stream: &mut FragmentStream, payload: &[u8]) -> Vec<u8> {
        let frame = FrameCodec::encode(SequenceId::new(3), payload).expect("payload should encode");
        fake.write_chunked(
            EndpointId::WriteCharacteristic,
            &frame,
            TRANSPORT_CHUNK_SIZE,
            WriteMode::WithoutResponse,
        )
        .await
        .expect("write should succeed");

        let mut reassembler = Reassembler::new();
        loop {
            let fragment = stream.next().await.expect("fake should reply");
            if let Some(message) = reassembler.feed(&fragment) {
                return message.body().to_vec();
            }
        }
    }

    #[tokio::test]
    async fn status_query_returns_framed_status() {
        let (fake, mut stream) = connected().await;

        let body = request(&fake, &mut stream, &STATUS_QUERY).await;

        assert_eq!(STATUS_REPLY_LEN, body.len());
        assert_eq!(3, body[0]);
        let reply = StatusReply::decode(&body).expect("status should decode");
        assert_eq!(Temperature::from_tenths(220), reply.current_temperature());
    }

    #[tokio::test]
    async fn control_command_updates_served_status() {
        let (fake, mut stream) = connected().await;
        let mut control = vec![0x05, 0x01, 0x01, 0x00, 0x02, 0x00, 0x11, 0x40, 0x02, 0x55, 0x01];
        control.extend_from_slice(&[0x90, 0x01, 0x40, 0x02, 0x90, 0x01, 0x64, 0x00, 0x00]);

        request(&fake, &mut stream, &control).await;
        let body = request(&fake, &mut stream, &STATUS_QUERY).await;

        let reply = StatusReply::decode(&body).expect("status should decode");
        assert_eq!(Temperature::from_tenths(155), reply.heating_setpoint());
        assert_eq!(vec![control, STATUS_QUERY.to_vec()], fake.probe().written_payloads());
    }

    #[tokio::test]
    async fn refused_connections_are_counted() {
        let mut fake = FakeThermostat::new(FakeThermostatConfig::builder().failing_connects(1).build());

        assert_matches!(fake.connect().await, Err(TransportError::ConnectFailed { .. }));
        assert!(fake.connect().await.is_ok());
        assert_eq!(2, fake.probe().connect_attempts());
    }

    #[tokio::test]
    async fn version_reads_are_nul_terminated() {
        let (fake, _stream) = connected().await;
        let raw = fake
            .read(EndpointId::VersionCharacteristic)
            .await
            .expect("version should read");
        assert_eq!(b"1.02\0".to_vec(), raw);
    }

    #[tokio::test]
    async fn writes_require_connection() {
        let fake = FakeThermostat::new(FakeThermostatConfig::default());
        assert_matches!(
            fake.write(EndpointId::WriteCharacteristic, &[0x00], WriteMode::WithoutResponse)
                .await,
            Err(TransportError::NotConnected)
        );
    }

    #[test]
    fn status_fixture_rejects_wrong_length() {
        assert_matches!(
            "0500".parse::<StatusFixture>(),
            Err(FixtureError::InvalidStatusLength {
                expected: 50,
                actual: 2
            })
        );
        assert_matches!(
            "zz".parse::<StatusFixture>(),
            Err(FixtureError::InvalidHex(_))
        );
    }
}

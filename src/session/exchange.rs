use std::future::poll_fn;
use std::task::Poll;
use std::time::Duration;

use tokio::time::{Instant, timeout_at};
use tokio_stream::StreamExt;
use tracing::{debug, instrument, trace, warn};

use crate::error::{ExchangeError, TransportError};
use crate::handlers::{CompleteMessage, FrameCodec, Reassembler, SequenceId};
use crate::hw::{DeviceTransport, FragmentStream, WriteMode};
use crate::protocol::EndpointId;
use crate::utils::format_hex;

const MAX_STALE_NOTIFICATION_DRAIN: usize = 8;

/// The one request currently awaiting its reply.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PendingRequest {
    sequence_id: SequenceId,
    issued_at: Instant,
}

impl PendingRequest {
    #[must_use]
    pub const fn sequence_id(self) -> SequenceId {
        self.sequence_id
    }

    #[must_use]
    pub fn issued_at(self) -> Instant {
        self.issued_at
    }
}

/// Request/reply correlation over one subscribed notification stream.
///
/// At most one request is outstanding. The next complete message after a
/// request is taken as its reply; the envelope sequence id is only checked
/// for logging.
pub struct CommandExchange<'t> {
    transport: &'t dyn DeviceTransport,
    fragments: FragmentStream,
    reassembler: Reassembler,
    pending: Option<PendingRequest>,
    chunk_size: usize,
    reply_timeout: Duration,
}

impl std::fmt::Debug for CommandExchange<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CommandExchange")
            .field("pending", &self.pending)
            .field("chunk_size", &self.chunk_size)
            .field("reply_timeout", &self.reply_timeout)
            .finish_non_exhaustive()
    }
}

impl<'t> CommandExchange<'t> {
    /// Subscribes to reply notifications on a connected transport.
    ///
    /// # Errors
    ///
    /// Returns an error when the notify characteristic cannot be subscribed.
    pub async fn open(
        transport: &'t dyn DeviceTransport,
        chunk_size: usize,
        reply_timeout: Duration,
    ) -> Result<Self, ExchangeError> {
        let fragments = transport
            .subscribe(EndpointId::NotifyCharacteristic)
            .await?;
        Ok(Self {
            transport,
            fragments,
            reassembler: Reassembler::new(),
            pending: None,
            chunk_size,
            reply_timeout,
        })
    }

    /// The request awaiting a reply, if any.
    #[must_use]
    pub fn pending(&self) -> Option<PendingRequest> {
        self.pending
    }

    /// Sends one command and waits for its reply.
    ///
    /// `sequence` advances once the command has been written.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::RequestInFlight`] while an earlier request is
    /// unresolved, and [`TransportError::ReplyTimeout`] when no reply arrives
    /// within the reply timeout.
    #[instrument(
        skip(self, sequence, payload),
        level = "debug",
        fields(sequence_id = sequence.value(), payload_len = payload.len())
    )]
    pub async fn request(
        &mut self,
        sequence: &mut SequenceId,
        payload: &[u8],
    ) -> Result<CompleteMessage, ExchangeError> {
        if let Some(pending) = self.pending {
            return Err(ExchangeError::RequestInFlight {
                sequence_id: pending.sequence_id.value(),
            });
        }

        self.drain_unsolicited().await;

        let sequence_id = *sequence;
        let frame = FrameCodec::encode(sequence_id, payload)?;
        debug!(frame = %format_hex(&frame), "sending command");
        self.transport
            .write_chunked(
                EndpointId::WriteCharacteristic,
                &frame,
                self.chunk_size,
                WriteMode::WithoutResponse,
            )
            .await?;
        *sequence = sequence_id.next();
        self.pending = Some(PendingRequest {
            sequence_id,
            issued_at: Instant::now(),
        });

        self.await_reply(sequence_id).await
    }

    async fn await_reply(
        &mut self,
        sequence_id: SequenceId,
    ) -> Result<CompleteMessage, ExchangeError> {
        let deadline = Instant::now() + self.reply_timeout;
        loop {
            let fragment = match timeout_at(deadline, self.fragments.next()).await {
                Err(_elapsed) => {
                    self.pending = None;
                    self.reassembler.reset();
                    return Err(TransportError::ReplyTimeout {
                        sequence_id: sequence_id.value(),
                        timeout_ms: u64::try_from(self.reply_timeout.as_millis())
                            .unwrap_or(u64::MAX),
                    }
                    .into());
                }
                Ok(None) => {
                    self.pending = None;
                    return Err(TransportError::NotificationStreamClosed.into());
                }
                Ok(Some(fragment)) => fragment,
            };

            trace!(fragment = %format_hex(&fragment), "received fragment");
            let Some(message) = self.reassembler.feed(&fragment) else {
                continue;
            };
            if message.sequence_id() != Some(sequence_id.value()) {
                debug!(
                    expected = sequence_id.value(),
                    received = ?message.sequence_id(),
                    "reply sequence id differs from request"
                );
            }
            debug!(body = %format_hex(message.body()), "received reply");
            self.pending = None;
            return Ok(message);
        }
    }

    /// Discards anything the controller sent while no request was outstanding.
    async fn drain_unsolicited(&mut self) {
        let mut drained_count = 0usize;
        for _attempt in 0..MAX_STALE_NOTIFICATION_DRAIN {
            let Some(fragment) = buffered_fragment(&mut self.fragments).await else {
                break;
            };
            drained_count += 1;
            if let Some(message) = self.reassembler.feed(&fragment) {
                warn!(
                    body = %format_hex(message.body()),
                    "dropping unsolicited message"
                );
            }
        }

        if !self.reassembler.is_idle() {
            self.reassembler.reset();
        }
        if drained_count > 0 {
            trace!(
                drained_fragments = drained_count,
                "drained stale fragments before request"
            );
        }
    }
}

/// Takes a fragment only if one has already been delivered.
async fn buffered_fragment(fragments: &mut FragmentStream) -> Option<Vec<u8>> {
    poll_fn(|context| match fragments.as_mut().poll_next(context) {
        Poll::Ready(fragment) => Poll::Ready(fragment),
        Poll::Pending => Poll::Ready(None),
    })
    .await
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::{STATUS_QUERY, STATUS_REPLY_LEN};
    use crate::hw::{FakeThermostat, FakeThermostatConfig};
    use tokio::time::timeout;

    async fn connected_fake(config: FakeThermostatConfig) -> FakeThermostat {
        let mut fake = FakeThermostat::new(config);
        fake.connect().await.expect("fake should connect");
        fake
    }

    #[tokio::test(start_paused = true)]
    async fn request_returns_reply_and_advances_sequence() {
        let fake = connected_fake(FakeThermostatConfig::default()).await;
        let mut exchange = CommandExchange::open(&fake, 20, Duration::from_secs(5))
            .await
            .expect("exchange should open");
        let mut sequence = SequenceId::new(7);

        let reply = exchange
            .request(&mut sequence, &STATUS_QUERY)
            .await
            .expect("status query should be answered");

        assert_eq!(STATUS_REPLY_LEN, reply.len());
        assert_eq!(Some(7), reply.sequence_id());
        assert_eq!(SequenceId::new(0), sequence);
        assert_eq!(None, exchange.pending());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out_and_clears_pending() {
        let fake = connected_fake(FakeThermostatConfig::builder().silent(true).build()).await;
        let mut exchange = CommandExchange::open(&fake, 20, Duration::from_millis(500))
            .await
            .expect("exchange should open");
        let mut sequence = SequenceId::new(2);

        let result = exchange.request(&mut sequence, &STATUS_QUERY).await;

        assert_matches!(
            result,
            Err(ExchangeError::Transport(TransportError::ReplyTimeout {
                sequence_id: 2,
                timeout_ms: 500
            }))
        );
        assert_eq!(None, exchange.pending());
        assert_eq!(SequenceId::new(3), sequence);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_request_blocks_the_next_one() {
        let fake = connected_fake(FakeThermostatConfig::builder().silent(true).build()).await;
        let mut exchange = CommandExchange::open(&fake, 20, Duration::from_secs(5))
            .await
            .expect("exchange should open");
        let mut sequence = SequenceId::default();

        let abandoned = timeout(
            Duration::from_secs(1),
            exchange.request(&mut sequence, &STATUS_QUERY),
        )
        .await;
        assert!(abandoned.is_err());

        assert_matches!(
            exchange.request(&mut sequence, &STATUS_QUERY).await,
            Err(ExchangeError::RequestInFlight { sequence_id: 0 })
        );
        assert_eq!(1, fake.probe().written_payloads().len());
    }

    #[tokio::test(start_paused = true)]
    async fn unsolicited_messages_are_drained_before_sending() {
        let fake = connected_fake(FakeThermostatConfig::default()).await;
        let mut exchange = CommandExchange::open(&fake, 20, Duration::from_secs(5))
            .await
            .expect("exchange should open");
        fake.probe().push_unsolicited(&[0x05, 0x7F]);
        let mut sequence = SequenceId::new(4);

        let reply = exchange
            .request(&mut sequence, &STATUS_QUERY)
            .await
            .expect("status query should be answered");

        assert_eq!(Some(4), reply.sequence_id());
        assert_eq!(&[0x05, 0x00], &reply.payload()[..2]);
    }

    #[tokio::test(start_paused = true)]
    async fn request_does_not_wait_before_sending() {
        let fake = connected_fake(FakeThermostatConfig::default()).await;
        let mut exchange = CommandExchange::open(&fake, 20, Duration::from_secs(5))
            .await
            .expect("exchange should open");
        fake.probe().push_unsolicited(&[0x05, 0x7F]);
        let mut sequence = SequenceId::default();
        let started = Instant::now();

        for _step in 0..3 {
            exchange
                .request(&mut sequence, &STATUS_QUERY)
                .await
                .expect("status query should be answered");
        }

        assert_eq!(Duration::ZERO, started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_is_reported() {
        let mut fake = connected_fake(FakeThermostatConfig::builder().silent(true).build()).await;
        let probe = fake.probe();
        let mut exchange = CommandExchange::open(&fake, 20, Duration::from_secs(5))
            .await
            .expect("exchange should open");
        exchange.fragments = Box::pin(tokio_stream::empty());
        let mut sequence = SequenceId::default();

        assert_matches!(
            exchange.request(&mut sequence, &STATUS_QUERY).await,
            Err(ExchangeError::Transport(TransportError::NotificationStreamClosed))
        );
        assert!(probe.is_connected());
        drop(exchange);
        fake.disconnect().await.expect("fake should disconnect");
    }
}

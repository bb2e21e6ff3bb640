use std::slice::Chunks;

use thiserror::Error;
use tracing::{trace, warn};

use crate::utils::format_hex;

const LENGTH_FIELD_LEN: usize = 2;
const SEQUENCE_FIELD_LEN: usize = 1;
const CHECKSUM_LEN: usize = 2;
const ENVELOPE_OVERHEAD: usize = SEQUENCE_FIELD_LEN + CHECKSUM_LEN;
const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - ENVELOPE_OVERHEAD;
const SEQUENCE_MODULUS: u8 = 8;

/// Errors returned by envelope encoding and chunking.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameCodecError {
    /// The payload does not fit the 16-bit envelope length field.
    #[error("envelope payload is too large: {payload_len} bytes exceeds max {max_payload_len}")]
    PayloadTooLarge {
        payload_len: usize,
        max_payload_len: usize,
    },
    /// Transport chunks must carry at least one byte.
    #[error("transport chunk size cannot be zero")]
    InvalidChunkSize,
}

/// Rolling envelope sequence id in the range `0..=7`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, derive_more::Display, derive_more::Into)]
#[display("{_0}")]
pub struct SequenceId(u8);

impl SequenceId {
    /// Creates a sequence id, wrapping values above `7`.
    ///
    /// ```
    /// use matouch::SequenceId;
    ///
    /// assert_eq!(3, SequenceId::new(3).value());
    /// assert_eq!(1, SequenceId::new(9).value());
    /// ```
    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value % SEQUENCE_MODULUS)
    }

    /// Returns the raw id byte.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Returns the id following this one, wrapping from `7` to `0`.
    ///
    /// ```
    /// use matouch::SequenceId;
    ///
    /// assert_eq!(SequenceId::new(0), SequenceId::new(7).next());
    /// ```
    #[must_use]
    pub const fn next(self) -> Self {
        Self::new(self.0 + 1)
    }
}

/// Encoder for the `[length:u16le][sequence:u8][payload][checksum:u16le]` envelope.
pub struct FrameCodec;

impl FrameCodec {
    /// Wraps a command payload in a complete envelope.
    ///
    /// The length field counts the sequence byte, the payload and the
    /// checksum. The checksum is the 16-bit wrapping sum of every byte
    /// before it, length field included.
    ///
    /// ```
    /// use matouch::{FrameCodec, SequenceId};
    ///
    /// let frame = FrameCodec::encode(SequenceId::new(0), &[0x05, 0x02, 0x00])?;
    /// assert_eq!(vec![0x06, 0x00, 0x00, 0x05, 0x02, 0x00, 0x0D, 0x00], frame);
    /// # Ok::<(), matouch::FrameCodecError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the payload cannot be described by the length field.
    pub fn encode(sequence_id: SequenceId, payload: &[u8]) -> Result<Vec<u8>, FrameCodecError> {
        let total_length = u16::try_from(ENVELOPE_OVERHEAD + payload.len()).map_err(|_| {
            FrameCodecError::PayloadTooLarge {
                payload_len: payload.len(),
                max_payload_len: MAX_PAYLOAD_LEN,
            }
        })?;

        let mut frame = Vec::with_capacity(LENGTH_FIELD_LEN + usize::from(total_length));
        frame.extend_from_slice(&total_length.to_le_bytes());
        frame.push(sequence_id.value());
        frame.extend_from_slice(payload);
        let checksum = additive_checksum(&frame);
        frame.extend_from_slice(&checksum.to_le_bytes());
        Ok(frame)
    }

    /// Splits an encoded envelope into ordered transport-sized slices.
    ///
    /// ```
    /// use matouch::FrameCodec;
    ///
    /// let frame = [0u8; 45];
    /// let sizes: Vec<usize> = FrameCodec::chunk(&frame, 20)?.map(<[u8]>::len).collect();
    /// assert_eq!(vec![20, 20, 5], sizes);
    /// # Ok::<(), matouch::FrameCodecError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when `max_chunk_size` is zero.
    pub fn chunk(frame: &[u8], max_chunk_size: usize) -> Result<Chunks<'_, u8>, FrameCodecError> {
        if max_chunk_size == 0 {
            return Err(FrameCodecError::InvalidChunkSize);
        }
        Ok(frame.chunks(max_chunk_size))
    }
}

/// 16-bit wrapping sum of `bytes`.
pub(crate) fn additive_checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, byte| sum.wrapping_add(u16::from(*byte)))
}

/// One fully reassembled inbound message.
///
/// The body is everything after the two-byte length field: the sequence
/// byte, the reply payload and the trailing checksum. Status decoding uses
/// body offsets.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CompleteMessage {
    header: [u8; LENGTH_FIELD_LEN],
    body: Vec<u8>,
}

impl CompleteMessage {
    /// Builds a message from an already-reassembled body and its length header.
    #[must_use]
    pub fn new(header: [u8; 2], body: Vec<u8>) -> Self {
        Self { header, body }
    }

    /// Reassembled body bytes.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Returns `true` for a message that declared a zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Sequence id echoed by the device, if the body has one.
    #[must_use]
    pub fn sequence_id(&self) -> Option<u8> {
        self.body.first().copied()
    }

    /// Payload between the sequence byte and the checksum.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        if self.body.len() < ENVELOPE_OVERHEAD {
            return &[];
        }
        &self.body[SEQUENCE_FIELD_LEN..self.body.len() - CHECKSUM_LEN]
    }

    /// Checksum carried by the last two body bytes.
    #[must_use]
    pub fn checksum(&self) -> Option<u16> {
        let start = self.body.len().checked_sub(CHECKSUM_LEN)?;
        Some(u16::from_le_bytes([self.body[start], self.body[start + 1]]))
    }

    /// Whether the carried checksum matches the sum of the preceding bytes.
    #[must_use]
    pub fn checksum_matches(&self) -> bool {
        let Some(carried) = self.checksum() else {
            return false;
        };
        let covered = &self.body[..self.body.len() - CHECKSUM_LEN];
        additive_checksum(&self.header).wrapping_add(additive_checksum(covered)) == carried
    }
}

/// Incremental reassembly of notification fragments into complete messages.
///
/// The first fragment of a message declares the total length in its first
/// byte. Its first two bytes are dropped and the rest lands at offset 0.
/// Later fragments are appended verbatim until the declared length is
/// reached.
#[derive(Debug, Default)]
pub struct Reassembler {
    in_progress: Option<PartialMessage>,
}

impl Reassembler {
    /// Creates an idle reassembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one notification fragment.
    ///
    /// Returns the completed message once the declared length is filled and
    /// resets for the next message. Checksum mismatches are logged and the
    /// message is still returned.
    ///
    /// ```
    /// use matouch::Reassembler;
    ///
    /// let mut reassembler = Reassembler::new();
    /// let message = reassembler
    ///     .feed(&[0x06, 0x00, 0x00, 0x05, 0x00, 0x00, 0x0B, 0x00])
    ///     .expect("single fragment completes the message");
    /// assert_eq!(&[0x05, 0x00, 0x00], message.payload());
    /// ```
    pub fn feed(&mut self, fragment: &[u8]) -> Option<CompleteMessage> {
        let partial = match self.in_progress.take() {
            Some(mut partial) => {
                partial.append(fragment);
                partial
            }
            None => {
                let Some(&declared_length) = fragment.first() else {
                    trace!("ignoring empty fragment while idle");
                    return None;
                };
                PartialMessage::start(declared_length, fragment)
            }
        };

        if !partial.is_complete() {
            self.in_progress = Some(partial);
            return None;
        }

        let message = partial.finish();
        if !message.checksum_matches() {
            warn!(
                body = %format_hex(message.body()),
                carried = ?message.checksum(),
                "reply checksum mismatch; accepting message"
            );
        }
        Some(message)
    }

    /// Returns `true` when no message is partially assembled.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_progress.is_none()
    }

    /// Discards any partially assembled message.
    pub fn reset(&mut self) {
        if let Some(partial) = self.in_progress.take() {
            trace!(
                expected = partial.expected_length,
                filled = partial.buffer.len(),
                "discarding partial message"
            );
        }
    }
}

#[derive(Debug)]
struct PartialMessage {
    header: [u8; LENGTH_FIELD_LEN],
    expected_length: usize,
    buffer: Vec<u8>,
}

impl PartialMessage {
    fn start(declared_length: u8, fragment: &[u8]) -> Self {
        let expected_length = usize::from(declared_length);
        let header = [declared_length, fragment.get(1).copied().unwrap_or_default()];
        let mut partial = Self {
            header,
            expected_length,
            buffer: Vec::with_capacity(expected_length),
        };
        partial.append(fragment.get(LENGTH_FIELD_LEN..).unwrap_or_default());
        partial
    }

    fn append(&mut self, data: &[u8]) {
        let remaining = self.expected_length - self.buffer.len();
        if data.len() > remaining {
            warn!(
                expected = self.expected_length,
                overflow = data.len() - remaining,
                "fragment overruns declared message length; truncating"
            );
            self.buffer.extend_from_slice(&data[..remaining]);
        } else {
            self.buffer.extend_from_slice(data);
        }
    }

    fn is_complete(&self) -> bool {
        self.buffer.len() == self.expected_length
    }

    fn finish(self) -> CompleteMessage {
        CompleteMessage {
            header: self.header,
            body: self.buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::protocol::TRANSPORT_CHUNK_SIZE;

    fn reassemble(frame: &[u8]) -> Vec<CompleteMessage> {
        let mut reassembler = Reassembler::new();
        FrameCodec::chunk(frame, TRANSPORT_CHUNK_SIZE)
            .expect("chunk size should be valid")
            .filter_map(|fragment| reassembler.feed(fragment))
            .collect()
    }

    #[test]
    fn encode_status_query_matches_wire_capture() {
        let frame = FrameCodec::encode(SequenceId::new(0), &[0x05, 0x02, 0x00])
            .expect("status query should encode");
        assert_eq!(vec![0x06, 0x00, 0x00, 0x05, 0x02, 0x00, 0x0D, 0x00], frame);
    }

    #[test]
    fn encode_checksum_wraps_at_sixteen_bits() {
        let payload = vec![0xFF; 300];
        let frame = FrameCodec::encode(SequenceId::new(7), &payload).expect("payload should fit");

        let expected = (0x2Fu32 + 0x01 + 7 + 300 * 0xFF) % 65_536;
        let carried = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
        assert_eq!(expected, u32::from(carried));
    }

    #[test]
    fn encode_rejects_payload_beyond_length_field() {
        let payload = vec![0x00; MAX_PAYLOAD_LEN + 1];
        let result = FrameCodec::encode(SequenceId::default(), &payload);
        assert_matches!(
            result,
            Err(FrameCodecError::PayloadTooLarge { payload_len, .. }) if payload_len == MAX_PAYLOAD_LEN + 1
        );
    }

    #[test]
    fn chunk_rejects_zero_size() {
        assert_matches!(
            FrameCodec::chunk(&[0x01], 0),
            Err(FrameCodecError::InvalidChunkSize)
        );
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 3)]
    #[case(5, 17)]
    #[case(7, 18)]
    #[case(2, 20)]
    #[case(3, 53)]
    #[case(6, 60)]
    fn chunked_envelope_reassembles_to_original(#[case] id: u8, #[case] payload_len: usize) {
        let payload: Vec<u8> = (0..payload_len).map(|index| (index * 7) as u8).collect();
        let frame = FrameCodec::encode(SequenceId::new(id), &payload).expect("payload should fit");

        let messages = reassemble(&frame);

        assert_eq!(1, messages.len());
        let message = &messages[0];
        assert_eq!(Some(id), message.sequence_id());
        assert_eq!(payload.as_slice(), message.payload());
        assert!(message.checksum_matches());
    }

    #[test]
    fn first_fragment_drops_two_framing_bytes() {
        let mut first = vec![0x35, 0x00];
        first.extend(0x01..=0x17u8);
        let second: Vec<u8> = (0x18..0x2C).collect();
        let third: Vec<u8> = (0x2C..0x36).collect();

        let mut reassembler = Reassembler::new();
        assert_eq!(None, reassembler.feed(&first));
        assert_eq!(None, reassembler.feed(&second));
        let message = reassembler
            .feed(&third)
            .expect("third fragment should complete the message");

        assert_eq!(53, message.len());
        assert_eq!(0x01, message.body()[0]);
        assert_eq!(0x35, message.body()[52]);
        assert!(reassembler.is_idle());
    }

    #[test]
    fn checksum_mismatch_still_completes() {
        let mut frame =
            FrameCodec::encode(SequenceId::new(1), &[0x05, 0x00]).expect("payload should fit");
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let messages = reassemble(&frame);

        assert_eq!(1, messages.len());
        assert!(!messages[0].checksum_matches());
    }

    #[test]
    fn overrunning_fragment_is_truncated_to_declared_length() {
        let mut reassembler = Reassembler::new();
        assert_eq!(None, reassembler.feed(&[0x04, 0x00, 0xAA]));
        let message = reassembler
            .feed(&[0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
            .expect("overrun should complete the message");
        assert_eq!(&[0xAA, 0xBB, 0xCC, 0xDD], message.body());
    }

    #[test]
    fn empty_fragment_while_idle_is_ignored() {
        let mut reassembler = Reassembler::new();
        assert_eq!(None, reassembler.feed(&[]));
        assert!(reassembler.is_idle());
    }

    #[test]
    fn zero_length_declaration_completes_empty() {
        let mut reassembler = Reassembler::new();
        let message = reassembler
            .feed(&[0x00, 0x00])
            .expect("zero length should complete immediately");
        assert!(message.is_empty());
        assert_eq!(None, message.sequence_id());
        assert!(reassembler.is_idle());
    }

    #[test]
    fn reset_discards_partial_message() {
        let mut reassembler = Reassembler::new();
        assert_eq!(None, reassembler.feed(&[0x10, 0x00, 0x01]));
        reassembler.reset();
        assert!(reassembler.is_idle());

        let message = reassembler
            .feed(&[0x03, 0x00, 0x02, 0x05, 0x00])
            .expect("fresh message should complete");
        assert_eq!(Some(0x02), message.sequence_id());
    }

    #[rstest]
    #[case(0, 1)]
    #[case(7, 0)]
    #[case(3, 4)]
    fn sequence_id_wraps_after_seven(#[case] current: u8, #[case] expected: u8) {
        assert_eq!(SequenceId::new(expected), SequenceId::new(current).next());
    }
}

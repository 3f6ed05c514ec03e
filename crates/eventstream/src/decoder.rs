use bytes::{Buf, Bytes, BytesMut};

use crate::{
    MAX_FRAME_LEN, MIN_FRAME_LEN, PRELUDE_LEN,
    error::DecodeError,
    message::DecodedMessage,
    pool::BufferPool,
    value::{HeaderValue, Parsed},
};

/// Recovery policy for structural stream errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Scan past corrupted regions, bounded by the error budget.
    #[default]
    Lenient,
    /// Any structural error is fatal.
    Strict,
}

/// Recovery attempts allowed per stream before giving up.
const DEFAULT_MAX_ERRORS: u32 = 10;

/// Streaming decoder for the binary event stream.
///
/// Callers feed arbitrary chunks; each call returns the messages that became
/// complete and buffers any incomplete suffix. Header tables are parsed
/// incrementally, so a frame spanning many `feed` calls does not re-scan its
/// header bytes.
pub struct FrameDecoder {
    buf: BytesMut,
    pool: Option<BufferPool>,
    mode: DecodeMode,
    max_errors: u32,
    errors: u32,
    in_flight: Option<InFlight>,
}

/// Parse state for the frame whose prelude has been validated.
struct InFlight {
    total_len: usize,
    header_len: usize,
    headers: Vec<(String, HeaderValue)>,
    /// Header-section bytes consumed so far.
    consumed: usize,
}

enum Step {
    Message(DecodedMessage),
    NeedMore,
}

impl FrameDecoder {
    pub fn new(mode: DecodeMode) -> Self {
        Self {
            buf: BytesMut::new(),
            pool: None,
            mode,
            max_errors: DEFAULT_MAX_ERRORS,
            errors: 0,
            in_flight: None,
        }
    }

    /// A decoder whose buffer is borrowed from (and returned to) `pool`.
    pub fn with_pool(mode: DecodeMode, pool: BufferPool) -> Self {
        let mut decoder = Self::new(mode);
        decoder.buf = pool.get();
        decoder.pool = Some(pool);
        decoder
    }

    pub fn max_errors(mut self, max_errors: u32) -> Self {
        self.max_errors = max_errors;
        self
    }

    /// Bytes buffered but not yet consumed by a complete frame.
    pub fn residual(&self) -> usize {
        self.buf.len()
    }

    /// Append `bytes` and drain every frame that is now complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<DecodedMessage>, DecodeError> {
        self.buf.extend_from_slice(bytes);

        let mut messages = Vec::new();

        loop {
            match self.step() {
                Ok(Step::Message(message)) => messages.push(message),
                Ok(Step::NeedMore) => return Ok(messages),
                Err(err) => self.recover(err)?,
            }
        }
    }

    fn step(&mut self) -> Result<Step, DecodeError> {
        if self.in_flight.is_none() {
            if self.buf.len() < PRELUDE_LEN {
                return Ok(Step::NeedMore);
            }

            let total_len = read_u32(&self.buf[0..4]);
            let header_len = read_u32(&self.buf[4..8]);
            let expected = read_u32(&self.buf[8..12]);
            let computed = crc32fast::hash(&self.buf[..8]);

            if computed != expected {
                return Err(DecodeError::PreludeChecksum { expected, computed });
            }
            if (total_len as usize) < MIN_FRAME_LEN {
                return Err(DecodeError::FrameTooShort(total_len));
            }
            if total_len as usize > MAX_FRAME_LEN {
                return Err(DecodeError::FrameTooLarge(total_len));
            }
            if header_len as usize + MIN_FRAME_LEN > total_len as usize {
                return Err(DecodeError::HeaderOverrun { header_len, total_len });
            }

            self.in_flight = Some(InFlight {
                total_len: total_len as usize,
                header_len: header_len as usize,
                headers: Vec::new(),
                consumed: 0,
            });
        }

        // Parse whatever header bytes have arrived; partial progress persists
        // across feed calls.
        {
            let frame = self.in_flight.as_mut().expect("in-flight frame");
            let region_end = PRELUDE_LEN + frame.header_len;
            let available_end = region_end.min(self.buf.len());
            let region_complete = self.buf.len() >= region_end;

            while frame.consumed < frame.header_len {
                let slice = &self.buf[PRELUDE_LEN + frame.consumed..available_end];
                match parse_header_entry(slice)? {
                    Parsed::Complete((name, value), used) => {
                        frame.headers.push((name, value));
                        frame.consumed += used;
                    }
                    Parsed::Incomplete if region_complete => return Err(DecodeError::TruncatedHeader),
                    Parsed::Incomplete => return Ok(Step::NeedMore),
                }
            }
        }

        let total_len = self.in_flight.as_ref().expect("in-flight frame").total_len;
        if self.buf.len() < total_len {
            return Ok(Step::NeedMore);
        }

        let crc_start = total_len - 4;
        let expected = read_u32(&self.buf[crc_start..total_len]);
        let computed = crc32fast::hash(&self.buf[..crc_start]);
        if computed != expected {
            return Err(DecodeError::MessageChecksum { expected, computed });
        }

        let frame = self.in_flight.take().expect("in-flight frame");
        let payload = Bytes::copy_from_slice(&self.buf[PRELUDE_LEN + frame.header_len..crc_start]);
        self.buf.advance(total_len);

        Ok(Step::Message(DecodedMessage::new(frame.headers, payload)))
    }

    fn recover(&mut self, err: DecodeError) -> Result<(), DecodeError> {
        if self.mode == DecodeMode::Strict || !err.is_recoverable() {
            return Err(err);
        }

        self.in_flight = None;
        self.errors += 1;
        if self.errors > self.max_errors {
            return Err(DecodeError::CorruptionLimit(self.errors));
        }

        log::warn!(
            "event stream corruption ({err}), resynchronizing (attempt {}/{})",
            self.errors,
            self.max_errors
        );
        self.resync();

        Ok(())
    }

    /// Discard the corrupt prefix: skip at least one byte, then hunt forward
    /// for the next offset whose prelude validates.
    fn resync(&mut self) {
        let mut offset = 1;
        let mut found = false;

        while offset + PRELUDE_LEN <= self.buf.len() {
            if prelude_plausible(&self.buf[offset..]) {
                found = true;
                break;
            }
            offset += 1;
        }

        let drain = if found {
            offset
        } else {
            // Every testable offset failed; keep only the suffix that could
            // still grow into a valid prelude.
            self.buf.len().saturating_sub(PRELUDE_LEN - 1).max(1)
        };

        self.buf.advance(drain.min(self.buf.len()));
    }
}

impl Drop for FrameDecoder {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.put(std::mem::take(&mut self.buf));
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(bytes.try_into().expect("four byte slice"))
}

fn prelude_plausible(buf: &[u8]) -> bool {
    if buf.len() < PRELUDE_LEN {
        return false;
    }

    let total_len = read_u32(&buf[0..4]) as usize;
    let header_len = read_u32(&buf[4..8]) as usize;

    crc32fast::hash(&buf[..8]) == read_u32(&buf[8..12])
        && (MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len)
        && header_len + MIN_FRAME_LEN <= total_len
}

fn parse_header_entry(buf: &[u8]) -> Result<Parsed<(String, HeaderValue)>, DecodeError> {
    let Some(&name_len) = buf.first() else {
        return Ok(Parsed::Incomplete);
    };

    let name_end = 1 + name_len as usize;
    let Some(name_bytes) = buf.get(1..name_end) else {
        return Ok(Parsed::Incomplete);
    };
    let Some(&type_code) = buf.get(name_end) else {
        return Ok(Parsed::Incomplete);
    };

    match HeaderValue::decode(type_code, &buf[name_end + 1..])? {
        Parsed::Complete(value, used) => {
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            Ok(Parsed::Complete((name, value), name_end + 1 + used))
        }
        Parsed::Incomplete => Ok(Parsed::Incomplete),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameBuilder;

    /// Frame with a single one-byte header name and a payload sized to reach
    /// exactly `target` bytes on the wire.
    fn frame_of_len(target: usize, fill: u8) -> Vec<u8> {
        // Prelude (12) + header entry (6) + payload + CRC (4).
        let payload_len = target - 22;
        let frame = FrameBuilder::new()
            .header("a", "x")
            .payload(vec![fill; payload_len])
            .build();
        assert_eq!(frame.len(), target);
        frame
    }

    #[test]
    fn two_frames_decode_at_every_split_point() {
        let f1 = frame_of_len(47, b'1');
        let f2 = frame_of_len(61, b'2');

        let mut wire = f1.clone();
        wire.extend_from_slice(&f2);
        assert_eq!(wire.len(), 108);

        for split in 0..=wire.len() {
            let mut decoder = FrameDecoder::new(DecodeMode::Strict);

            let mut messages = decoder.feed(&wire[..split]).expect("first chunk");
            messages.extend(decoder.feed(&wire[split..]).expect("second chunk"));

            assert_eq!(messages.len(), 2, "split at {split}");
            assert_eq!(messages[0].payload().as_ref(), &f1[18..43]);
            assert_eq!(messages[1].payload().as_ref(), &f2[18..57]);
            assert_eq!(decoder.residual(), 0, "split at {split}");
        }
    }

    #[test]
    fn byte_by_byte_feeding_preserves_headers_and_payload() {
        let frame = FrameBuilder::event("assistantResponseEvent")
            .header(":content-type", "application/json")
            .header("flag", HeaderValue::Bool(true))
            .header("attempt", HeaderValue::Integer(3))
            .header("trace", HeaderValue::Uuid(uuid::Uuid::from_u128(42)))
            .header("at", HeaderValue::Timestamp(1_700_000_000_000))
            .payload(br#"{"content":"hello"}"#)
            .build();

        let mut decoder = FrameDecoder::new(DecodeMode::Strict);
        let mut messages = Vec::new();
        for byte in &frame {
            messages.extend(decoder.feed(std::slice::from_ref(byte)).expect("clean stream"));
        }

        assert_eq!(messages.len(), 1);
        let message = &messages[0];
        assert_eq!(message.message_type(), Some("event"));
        assert_eq!(message.event_type(), Some("assistantResponseEvent"));
        assert_eq!(message.content_type(), Some("application/json"));
        assert_eq!(message.header("flag"), Some(&HeaderValue::Bool(true)));
        assert_eq!(message.header("attempt"), Some(&HeaderValue::Integer(3)));
        assert_eq!(message.payload().as_ref(), br#"{"content":"hello"}"#);
    }

    #[test]
    fn lenient_mode_scans_past_garbage_between_frames() {
        let f1 = FrameBuilder::event("one").payload(b"1").build();
        let f2 = FrameBuilder::event("two").payload(b"2").build();

        let mut wire = f1;
        wire.extend_from_slice(&[0xff; 8]);
        wire.extend_from_slice(&f2);

        let mut decoder = FrameDecoder::new(DecodeMode::Lenient);
        let messages = decoder.feed(&wire).expect("recoverable stream");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].event_type(), Some("one"));
        assert_eq!(messages[1].event_type(), Some("two"));
        assert_eq!(decoder.residual(), 0);
    }

    #[test]
    fn any_flipped_bit_rejects_the_frame() {
        let frame = FrameBuilder::event("assistantResponseEvent")
            .payload(br#"{"content":"x"}"#)
            .build();

        for index in 0..frame.len() {
            let mut corrupted = frame.clone();
            corrupted[index] ^= 0x01;

            let mut decoder = FrameDecoder::new(DecodeMode::Lenient);
            let messages = decoder.feed(&corrupted).expect("single corruption stays in budget");
            assert!(messages.is_empty(), "flip at byte {index} produced a message");
        }
    }

    #[test]
    fn strict_mode_fails_on_first_corruption() {
        let mut frame = FrameBuilder::event("one").payload(b"1").build();
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        let mut decoder = FrameDecoder::new(DecodeMode::Strict);
        let err = decoder.feed(&frame).expect_err("strict mode is fatal");
        assert!(matches!(err, DecodeError::MessageChecksum { .. }));
    }

    #[test]
    fn corruption_budget_is_enforced() {
        let mut decoder = FrameDecoder::new(DecodeMode::Lenient).max_errors(3);

        for round in 0..3 {
            let messages = decoder.feed(&[0xee; 16]).expect("within budget");
            assert!(messages.is_empty(), "round {round}");
        }

        let err = decoder.feed(&[0xee; 16]).expect_err("budget exhausted");
        assert_eq!(err, DecodeError::CorruptionLimit(4));
    }

    #[test]
    fn truncated_header_section_is_structural() {
        // Header section claims 4 bytes but holds a string entry needing more.
        let good = FrameBuilder::new().header("ab", "cd").build();
        let header_len = u32::from_be_bytes(good[4..8].try_into().expect("header len")) as usize;

        let mut frame = Vec::new();
        let total_len = PRELUDE_LEN + header_len - 2 + 4;
        frame.extend_from_slice(&(total_len as u32).to_be_bytes());
        frame.extend_from_slice(&((header_len - 2) as u32).to_be_bytes());
        frame.extend_from_slice(&crc32fast::hash(&frame[..8]).to_be_bytes());
        frame.extend_from_slice(&good[PRELUDE_LEN..PRELUDE_LEN + header_len - 2]);
        frame.extend_from_slice(&crc32fast::hash(&frame).to_be_bytes());

        let mut decoder = FrameDecoder::new(DecodeMode::Strict);
        let err = decoder.feed(&frame).expect_err("entry overruns section");
        assert_eq!(err, DecodeError::TruncatedHeader);
    }

    #[test]
    fn pooled_buffer_is_returned_on_drop() {
        let pool = BufferPool::new();

        {
            let mut decoder = FrameDecoder::with_pool(DecodeMode::Lenient, pool.clone());
            let frame = FrameBuilder::event("one").payload(b"1").build();
            decoder.feed(&frame).expect("clean stream");
        }

        // The dropped decoder's buffer is back in rotation, cleared.
        let recycled = pool.get();
        assert!(recycled.is_empty());
        assert!(recycled.capacity() > 0);
    }
}

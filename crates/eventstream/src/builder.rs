use crate::{
    message::{EVENT_TYPE, EXCEPTION_TYPE, MESSAGE_TYPE},
    value::HeaderValue,
};

/// Encode side of the codec: assembles a single frame with both checksums.
///
/// Mock upstreams and decoder tests build their fixtures with this; the
/// layout produced is byte-identical to what the decoder consumes.
#[derive(Debug, Default)]
pub struct FrameBuilder {
    headers: Vec<(String, HeaderValue)>,
    payload: Vec<u8>,
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame pre-tagged as `:message-type = event` with the given
    /// `:event-type`.
    pub fn event(event_type: &str) -> Self {
        Self::new()
            .header(MESSAGE_TYPE, "event")
            .header(EVENT_TYPE, event_type)
    }

    /// A frame pre-tagged as `:message-type = exception` with the given
    /// `:exception-type`.
    pub fn exception(exception_type: &str) -> Self {
        Self::new()
            .header(MESSAGE_TYPE, "exception")
            .header(EXCEPTION_TYPE, exception_type)
    }

    pub fn header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        self.headers.push((name.to_owned(), value.into()));
        self
    }

    pub fn payload(mut self, payload: impl AsRef<[u8]>) -> Self {
        self.payload = payload.as_ref().to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut header_bytes = Vec::new();

        for (name, value) in &self.headers {
            header_bytes.push(name.len() as u8);
            header_bytes.extend_from_slice(name.as_bytes());
            value.encode(&mut header_bytes);
        }

        let total_len = crate::PRELUDE_LEN + header_bytes.len() + self.payload.len() + 4;

        let mut frame = Vec::with_capacity(total_len);
        frame.extend_from_slice(&(total_len as u32).to_be_bytes());
        frame.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());

        let prelude_crc = crc32fast::hash(&frame[..8]);
        frame.extend_from_slice(&prelude_crc.to_be_bytes());

        frame.extend_from_slice(&header_bytes);
        frame.extend_from_slice(&self.payload);

        let message_crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&message_crc.to_be_bytes());

        frame
    }
}

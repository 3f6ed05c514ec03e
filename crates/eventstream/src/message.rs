use bytes::Bytes;

use crate::value::HeaderValue;

/// Header naming the broad frame category (`event` or `exception`).
pub const MESSAGE_TYPE: &str = ":message-type";

/// Header naming the concrete event within an `event` frame.
pub const EVENT_TYPE: &str = ":event-type";

/// Header naming the exception kind within an `exception` frame.
pub const EXCEPTION_TYPE: &str = ":exception-type";

/// Header naming the payload content type.
pub const CONTENT_TYPE: &str = ":content-type";

/// A fully validated frame: its header table plus the opaque payload.
///
/// Immutable once produced by the decoder. Header order is preserved as seen
/// on the wire; lookups take the first match.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    headers: Vec<(String, HeaderValue)>,
    payload: Bytes,
}

impl DecodedMessage {
    pub(crate) fn new(headers: Vec<(String, HeaderValue)>, payload: Bytes) -> Self {
        Self { headers, payload }
    }

    /// The payload bytes between the header table and the message CRC.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// All headers in wire order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.headers.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// First header with the given name.
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find_map(|(header, value)| (header == name).then_some(value))
    }

    /// First string-typed header with the given name.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(HeaderValue::as_str)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.header_str(MESSAGE_TYPE)
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header_str(EVENT_TYPE)
    }

    pub fn exception_type(&self) -> Option<&str> {
        self.header_str(EXCEPTION_TYPE)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header_str(CONTENT_TYPE)
    }
}

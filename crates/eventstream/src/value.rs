use bytes::Bytes;
use uuid::Uuid;

use crate::error::DecodeError;

/// A typed header value as carried on the wire.
///
/// The wire encodes ten value types; booleans use two distinct type codes
/// (true and false) and carry no value bytes at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Integer(i32),
    Long(i64),
    ByteArray(Bytes),
    String(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Uuid(Uuid),
}

pub(crate) const TYPE_BOOL_TRUE: u8 = 0;
pub(crate) const TYPE_BOOL_FALSE: u8 = 1;
pub(crate) const TYPE_BYTE: u8 = 2;
pub(crate) const TYPE_SHORT: u8 = 3;
pub(crate) const TYPE_INTEGER: u8 = 4;
pub(crate) const TYPE_LONG: u8 = 5;
pub(crate) const TYPE_BYTE_ARRAY: u8 = 6;
pub(crate) const TYPE_STRING: u8 = 7;
pub(crate) const TYPE_TIMESTAMP: u8 = 8;
pub(crate) const TYPE_UUID: u8 = 9;

/// Outcome of an incremental parse attempt: either a value plus the number of
/// bytes it consumed, or a request for more input.
#[derive(Debug)]
pub(crate) enum Parsed<T> {
    Complete(T, usize),
    Incomplete,
}

impl HeaderValue {
    /// The string payload, when this is a [`HeaderValue::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Decode one value of the given wire type from the front of `buf`.
    pub(crate) fn decode(type_code: u8, buf: &[u8]) -> Result<Parsed<Self>, DecodeError> {
        fn fixed<const N: usize>(buf: &[u8]) -> Option<[u8; N]> {
            buf.get(..N).and_then(|b| b.try_into().ok())
        }

        let parsed = match type_code {
            TYPE_BOOL_TRUE => Parsed::Complete(HeaderValue::Bool(true), 0),
            TYPE_BOOL_FALSE => Parsed::Complete(HeaderValue::Bool(false), 0),
            TYPE_BYTE => match buf.first() {
                Some(&b) => Parsed::Complete(HeaderValue::Byte(b as i8), 1),
                None => Parsed::Incomplete,
            },
            TYPE_SHORT => match fixed::<2>(buf) {
                Some(raw) => Parsed::Complete(HeaderValue::Short(i16::from_be_bytes(raw)), 2),
                None => Parsed::Incomplete,
            },
            TYPE_INTEGER => match fixed::<4>(buf) {
                Some(raw) => Parsed::Complete(HeaderValue::Integer(i32::from_be_bytes(raw)), 4),
                None => Parsed::Incomplete,
            },
            TYPE_LONG => match fixed::<8>(buf) {
                Some(raw) => Parsed::Complete(HeaderValue::Long(i64::from_be_bytes(raw)), 8),
                None => Parsed::Incomplete,
            },
            TYPE_TIMESTAMP => match fixed::<8>(buf) {
                Some(raw) => Parsed::Complete(HeaderValue::Timestamp(i64::from_be_bytes(raw)), 8),
                None => Parsed::Incomplete,
            },
            TYPE_UUID => match fixed::<16>(buf) {
                Some(raw) => Parsed::Complete(HeaderValue::Uuid(Uuid::from_bytes(raw)), 16),
                None => Parsed::Incomplete,
            },
            TYPE_BYTE_ARRAY | TYPE_STRING => {
                let Some(raw) = fixed::<2>(buf) else {
                    return Ok(Parsed::Incomplete);
                };
                let len = u16::from_be_bytes(raw) as usize;
                let Some(data) = buf.get(2..2 + len) else {
                    return Ok(Parsed::Incomplete);
                };

                let value = if type_code == TYPE_STRING {
                    let text = std::str::from_utf8(data).map_err(|_| DecodeError::InvalidHeaderString)?;
                    HeaderValue::String(text.to_owned())
                } else {
                    HeaderValue::ByteArray(Bytes::copy_from_slice(data))
                };

                Parsed::Complete(value, 2 + len)
            }
            other => return Err(DecodeError::UnknownValueType(other)),
        };

        Ok(parsed)
    }

    /// Append the wire encoding (type code followed by value bytes) to `out`.
    pub(crate) fn encode(&self, out: &mut Vec<u8>) {
        match self {
            HeaderValue::Bool(true) => out.push(TYPE_BOOL_TRUE),
            HeaderValue::Bool(false) => out.push(TYPE_BOOL_FALSE),
            HeaderValue::Byte(v) => {
                out.push(TYPE_BYTE);
                out.push(*v as u8);
            }
            HeaderValue::Short(v) => {
                out.push(TYPE_SHORT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Integer(v) => {
                out.push(TYPE_INTEGER);
                out.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Long(v) => {
                out.push(TYPE_LONG);
                out.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::ByteArray(data) => {
                out.push(TYPE_BYTE_ARRAY);
                out.extend_from_slice(&(data.len() as u16).to_be_bytes());
                out.extend_from_slice(data);
            }
            HeaderValue::String(text) => {
                out.push(TYPE_STRING);
                out.extend_from_slice(&(text.len() as u16).to_be_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            HeaderValue::Timestamp(v) => {
                out.push(TYPE_TIMESTAMP);
                out.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Uuid(v) => {
                out.push(TYPE_UUID);
                out.extend_from_slice(v.as_bytes());
            }
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    fn roundtrip(value: HeaderValue) {
        let mut wire = Vec::new();
        value.encode(&mut wire);

        let (type_code, rest) = wire.split_first().expect("encoded value");
        match HeaderValue::decode(*type_code, rest).expect("decode") {
            Parsed::Complete(decoded, consumed) => {
                assert_eq!(decoded, value);
                assert_eq!(consumed, rest.len());
            }
            Parsed::Incomplete => panic!("complete value reported incomplete"),
        }
    }

    #[test]
    fn all_value_types_roundtrip() {
        roundtrip(HeaderValue::Bool(true));
        roundtrip(HeaderValue::Bool(false));
        roundtrip(HeaderValue::Byte(-7));
        roundtrip(HeaderValue::Short(-1234));
        roundtrip(HeaderValue::Integer(7_654_321));
        roundtrip(HeaderValue::Long(-9_876_543_210));
        roundtrip(HeaderValue::ByteArray(Bytes::from_static(b"\x00\x01\x02")));
        roundtrip(HeaderValue::String("assistantResponseEvent".to_owned()));
        roundtrip(HeaderValue::Timestamp(1_700_000_000_000));
        roundtrip(HeaderValue::Uuid(Uuid::from_u128(0xfeedface)));
    }

    #[test]
    fn short_input_reports_incomplete() {
        for (type_code, len) in [
            (TYPE_BYTE, 1),
            (TYPE_SHORT, 2),
            (TYPE_INTEGER, 4),
            (TYPE_LONG, 8),
            (TYPE_TIMESTAMP, 8),
            (TYPE_UUID, 16),
        ] {
            let bytes = vec![0u8; len - 1];
            assert!(matches!(
                HeaderValue::decode(type_code, &bytes).expect("no structural error"),
                Parsed::Incomplete
            ));
        }

        // Length prefix says four bytes, only three present.
        let truncated = [0u8, 4, b'a', b'b', b'c'];
        assert!(matches!(
            HeaderValue::decode(TYPE_STRING, &truncated).expect("no structural error"),
            Parsed::Incomplete
        ));
    }

    #[test]
    fn unknown_type_code_is_an_error() {
        assert_eq!(
            HeaderValue::decode(10, &[]).expect_err("type code 10 is unassigned"),
            DecodeError::UnknownValueType(10)
        );
    }

    #[test]
    fn string_value_must_be_utf8() {
        let wire = [0u8, 2, 0xff, 0xfe];
        assert_eq!(
            HeaderValue::decode(TYPE_STRING, &wire).expect_err("invalid UTF-8"),
            DecodeError::InvalidHeaderString
        );
    }
}

//! RESP reply decoding
//!
//! Decoding is incremental: [`RespDecoder::decode`] returns `Ok(None)` when
//! the buffered bytes do not yet hold a complete frame, and the cursor is
//! left untouched for a retry once more bytes have arrived. The blocking
//! wait for those bytes belongs to the transport, not the parser.
//!
//! A malformed frame (unknown type byte, truncated or negative length other
//! than the `-1` null sentinel) is a [`RedisError::Protocol`] error; the
//! owning connection must be torn down since a desynchronized stream can
//! never self-recover.

use crate::core::error::{RedisError, RedisResult};
use crate::core::value::RespValue;
use bytes::Bytes;
use std::io::Cursor;

/// Header of an aggregate (`*`) frame, used by the lazy array reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateHeader {
    /// `*-1\r\n`: null array
    Null,
    /// `*<n>\r\n`: n elements follow
    Elements(usize),
}

/// Decodes RESP2 and RESP3 frames from a byte buffer
pub struct RespDecoder;

impl RespDecoder {
    /// Decode one complete reply from the buffer.
    ///
    /// Returns `Ok(None)` if the buffer does not yet contain a complete
    /// frame; the cursor position is only advanced past fully decoded
    /// frames.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Protocol`] on a malformed frame.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let start = buf.position();
        match Self::decode_inner(buf) {
            Ok(Some(value)) => Ok(Some(value)),
            other => {
                buf.set_position(start);
                other
            }
        }
    }

    /// Decode only the header of an array frame, leaving the cursor at the
    /// first element. Used for lazy, element-at-a-time consumption of large
    /// multi-bulk replies.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Protocol`] if the next frame is not an array.
    pub fn decode_array_header(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<AggregateHeader>> {
        let start = buf.position();
        let result = Self::decode_array_header_inner(buf);
        if !matches!(result, Ok(Some(_))) {
            buf.set_position(start);
        }
        result
    }

    fn decode_array_header_inner(
        buf: &mut Cursor<&[u8]>,
    ) -> RedisResult<Option<AggregateHeader>> {
        let Some(type_byte) = Self::peek(buf) else {
            return Ok(None);
        };
        if type_byte != b'*' {
            return Err(RedisError::Protocol(format!(
                "Expected array frame, got type byte: {}",
                type_byte as char
            )));
        }
        buf.set_position(buf.position() + 1);
        let Some(len) = Self::read_length(buf, "array")? else {
            return Ok(None);
        };
        match len {
            -1 => Ok(Some(AggregateHeader::Null)),
            n if n >= 0 => Ok(Some(AggregateHeader::Elements(n as usize))),
            n => Err(RedisError::Protocol(format!("Invalid array length: {n}"))),
        }
    }

    fn decode_inner(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let Some(type_byte) = Self::peek(buf) else {
            return Ok(None);
        };
        buf.set_position(buf.position() + 1);

        match type_byte {
            b'+' => Self::decode_line(buf).map(|l| l.map(RespValue::SimpleString)),
            b'-' => Self::decode_line(buf).map(|l| l.map(RespValue::Error)),
            b':' => Self::decode_integer(buf),
            b'$' => Self::decode_bulk_string(buf),
            b'*' => Self::decode_array(buf),
            b'_' => Self::decode_null(buf),
            b',' => Self::decode_double(buf),
            b'#' => Self::decode_boolean(buf),
            b'(' => Self::decode_line(buf).map(|l| l.map(RespValue::BigNumber)),
            b'=' => Self::decode_verbatim(buf),
            b'%' => Self::decode_map(buf),
            b'~' => Self::decode_collection(buf, RespValue::Set),
            b'>' => Self::decode_collection(buf, RespValue::Push),
            b'!' => Self::decode_blob_error(buf),
            b'|' => Self::decode_attribute(buf),
            other => Err(RedisError::Protocol(format!(
                "Invalid RESP type byte: {}",
                other as char
            ))),
        }
    }

    fn peek(buf: &Cursor<&[u8]>) -> Option<u8> {
        buf.get_ref().get(buf.position() as usize).copied()
    }

    /// Read up to the next CRLF; `None` if no complete line is buffered
    fn read_line(buf: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
        let start = buf.position() as usize;
        let slice = buf.get_ref();
        for i in start..slice.len().saturating_sub(1) {
            if slice[i] == b'\r' && slice[i + 1] == b'\n' {
                let line = slice[start..i].to_vec();
                buf.set_position((i + 2) as u64);
                return Some(line);
            }
        }
        None
    }

    fn read_utf8_line(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<String>> {
        match Self::read_line(buf) {
            Some(line) => String::from_utf8(line)
                .map(Some)
                .map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {e}"))),
            None => Ok(None),
        }
    }

    fn read_length(buf: &mut Cursor<&[u8]>, what: &str) -> RedisResult<Option<i64>> {
        match Self::read_utf8_line(buf)? {
            Some(line) => line
                .parse::<i64>()
                .map(Some)
                .map_err(|_| RedisError::Protocol(format!("Invalid {what} length: {line:?}"))),
            None => Ok(None),
        }
    }

    fn decode_line(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<String>> {
        Self::read_utf8_line(buf)
    }

    fn decode_integer(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        match Self::read_utf8_line(buf)? {
            Some(line) => {
                let num = line
                    .parse::<i64>()
                    .map_err(|e| RedisError::Protocol(format!("Invalid integer: {e}")))?;
                Ok(Some(RespValue::Integer(num)))
            }
            None => Ok(None),
        }
    }

    fn decode_null(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        match Self::read_line(buf) {
            Some(line) if line.is_empty() => Ok(Some(RespValue::Null)),
            Some(line) => Err(RedisError::Protocol(format!(
                "Unexpected payload in null frame: {line:?}"
            ))),
            None => Ok(None),
        }
    }

    fn decode_double(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        match Self::read_utf8_line(buf)? {
            Some(line) => {
                let value = match line.as_str() {
                    "inf" => f64::INFINITY,
                    "-inf" => f64::NEG_INFINITY,
                    other => other
                        .parse::<f64>()
                        .map_err(|e| RedisError::Protocol(format!("Invalid double: {e}")))?,
                };
                Ok(Some(RespValue::Double(value)))
            }
            None => Ok(None),
        }
    }

    fn decode_boolean(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        match Self::read_line(buf) {
            Some(line) => match line.as_slice() {
                b"t" => Ok(Some(RespValue::Boolean(true))),
                b"f" => Ok(Some(RespValue::Boolean(false))),
                other => Err(RedisError::Protocol(format!(
                    "Invalid boolean payload: {other:?}"
                ))),
            },
            None => Ok(None),
        }
    }

    fn read_blob(buf: &mut Cursor<&[u8]>, len: usize) -> RedisResult<Option<Vec<u8>>> {
        let start = buf.position() as usize;
        let slice = buf.get_ref();
        // payload plus trailing CRLF
        if slice.len() < start + len + 2 {
            return Ok(None);
        }
        if &slice[start + len..start + len + 2] != b"\r\n" {
            return Err(RedisError::Protocol(
                "Blob payload is not terminated by CRLF".to_string(),
            ));
        }
        let data = slice[start..start + len].to_vec();
        buf.set_position((start + len + 2) as u64);
        Ok(Some(data))
    }

    fn decode_bulk_string(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let Some(len) = Self::read_length(buf, "bulk string")? else {
            return Ok(None);
        };
        match len {
            -1 => Ok(Some(RespValue::Null)),
            n if n >= 0 => Ok(Self::read_blob(buf, n as usize)?
                .map(|data| RespValue::BulkString(Bytes::from(data)))),
            n => Err(RedisError::Protocol(format!(
                "Invalid bulk string length: {n}"
            ))),
        }
    }

    fn decode_blob_error(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let Some(len) = Self::read_length(buf, "blob error")? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(RedisError::Protocol(format!(
                "Invalid blob error length: {len}"
            )));
        }
        match Self::read_blob(buf, len as usize)? {
            Some(data) => {
                let message = String::from_utf8(data)
                    .map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {e}")))?;
                Ok(Some(RespValue::Error(message)))
            }
            None => Ok(None),
        }
    }

    fn decode_verbatim(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let Some(len) = Self::read_length(buf, "verbatim string")? else {
            return Ok(None);
        };
        if len < 4 {
            return Err(RedisError::Protocol(format!(
                "Verbatim string too short for format prefix: {len}"
            )));
        }
        match Self::read_blob(buf, len as usize)? {
            Some(data) => {
                // 3-letter format tag, a colon, then the payload
                if data[3] != b':' {
                    return Err(RedisError::Protocol(
                        "Verbatim string is missing the format separator".to_string(),
                    ));
                }
                let format = String::from_utf8(data[..3].to_vec())
                    .map_err(|e| RedisError::Protocol(format!("Invalid UTF-8: {e}")))?;
                Ok(Some(RespValue::Verbatim {
                    format,
                    payload: Bytes::from(data[4..].to_vec()),
                }))
            }
            None => Ok(None),
        }
    }

    fn decode_array(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        let Some(len) = Self::read_length(buf, "array")? else {
            return Ok(None);
        };
        match len {
            -1 => Ok(Some(RespValue::NullArray)),
            n if n >= 0 => Self::decode_elements(buf, n as usize).map(|e| e.map(RespValue::Array)),
            n => Err(RedisError::Protocol(format!("Invalid array length: {n}"))),
        }
    }

    fn decode_collection(
        buf: &mut Cursor<&[u8]>,
        wrap: fn(Vec<RespValue>) -> RespValue,
    ) -> RedisResult<Option<RespValue>> {
        let Some(len) = Self::read_length(buf, "aggregate")? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(RedisError::Protocol(format!(
                "Invalid aggregate length: {len}"
            )));
        }
        Self::decode_elements(buf, len as usize).map(|e| e.map(wrap))
    }

    fn decode_elements(
        buf: &mut Cursor<&[u8]>,
        count: usize,
    ) -> RedisResult<Option<Vec<RespValue>>> {
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            match Self::decode_inner(buf)? {
                Some(value) => items.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(items))
    }

    fn decode_map(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        match Self::decode_pairs(buf)? {
            Some(pairs) => Ok(Some(RespValue::Map(pairs))),
            None => Ok(None),
        }
    }

    /// Attribute frames (`|`) carry metadata about the reply that follows.
    /// The core reply union has no attribute variant, so the metadata is
    /// decoded, discarded, and the attributed value is returned.
    fn decode_attribute(buf: &mut Cursor<&[u8]>) -> RedisResult<Option<RespValue>> {
        match Self::decode_pairs(buf)? {
            Some(_attrs) => Self::decode_inner(buf),
            None => Ok(None),
        }
    }

    fn decode_pairs(
        buf: &mut Cursor<&[u8]>,
    ) -> RedisResult<Option<Vec<(RespValue, RespValue)>>> {
        let Some(len) = Self::read_length(buf, "map")? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(RedisError::Protocol(format!("Invalid map length: {len}")));
        }
        let count = len as usize;
        let mut pairs = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let Some(key) = Self::decode_inner(buf)? else {
                return Ok(None);
            };
            let Some(value) = Self::decode_inner(buf)? else {
                return Ok(None);
            };
            pairs.push((key, value));
        }
        Ok(Some(pairs))
    }
}

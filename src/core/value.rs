//! RESP (`REdis` Serialization Protocol) reply values

use crate::core::error::{RedisError, RedisResult};
use bytes::Bytes;

/// A decoded RESP reply.
///
/// Covers the RESP2 reply types and the additional types a server may send
/// once RESP3 has been negotiated via `HELLO 3`.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple string: `+OK\r\n`
    SimpleString(String),
    /// Error: `-ERR message\r\n`
    Error(String),
    /// Integer: `:1000\r\n`
    Integer(i64),
    /// Bulk string: `$6\r\nfoobar\r\n`
    BulkString(Bytes),
    /// Null: `$-1\r\n` (RESP2) or `_\r\n` (RESP3)
    Null,
    /// Null array: `*-1\r\n`
    NullArray,
    /// Array: `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`; elements may nest
    Array(Vec<RespValue>),
    /// RESP3 double: `,1.23\r\n`
    Double(f64),
    /// RESP3 boolean: `#t\r\n` or `#f\r\n`
    Boolean(bool),
    /// RESP3 big number: `(3492890328409238509324850943850943825024385\r\n`
    BigNumber(String),
    /// RESP3 verbatim string: `=15\r\ntxt:Some string\r\n` (4-byte `txt:`
    /// or `mkd:` prefix stripped into `format`)
    Verbatim {
        /// Three-letter format tag, e.g. `txt` or `mkd`
        format: String,
        /// Payload after the format prefix
        payload: Bytes,
    },
    /// RESP3 map: `%1\r\n+key\r\n+value\r\n`; insertion order preserved
    Map(Vec<(RespValue, RespValue)>),
    /// RESP3 set: same framing as array, distinct tag `~`
    Set(Vec<RespValue>),
    /// RESP3 push message: tag `>`, delivered out-of-band on the same
    /// connection (pub/sub, client-side cache invalidation)
    Push(Vec<RespValue>),
}

impl RespValue {
    /// Convert to a string if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to a string.
    pub fn as_string(&self) -> RedisResult<String> {
        match self {
            Self::SimpleString(s) => Ok(s.clone()),
            Self::BulkString(b) => String::from_utf8(b.to_vec())
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
            Self::Verbatim { payload, .. } => String::from_utf8(payload.to_vec())
                .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}"))),
            Self::Integer(i) => Ok(i.to_string()),
            Self::Double(d) => Ok(d.to_string()),
            Self::BigNumber(s) => Ok(s.clone()),
            Self::Null | Self::NullArray => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to string"
            ))),
        }
    }

    /// Convert to an integer if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to an integer.
    pub fn as_int(&self) -> RedisResult<i64> {
        match self {
            Self::Integer(i) => Ok(*i),
            Self::Boolean(true) => Ok(1),
            Self::Boolean(false) => Ok(0),
            Self::BulkString(b) => {
                let s = String::from_utf8(b.to_vec())
                    .map_err(|e| RedisError::Type(format!("Invalid UTF-8: {e}")))?;
                s.parse::<i64>()
                    .map_err(|e| RedisError::Type(format!("Cannot parse integer: {e}")))
            }
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to integer"
            ))),
        }
    }

    /// Convert to raw bytes if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted to bytes.
    pub fn as_bytes(&self) -> RedisResult<Bytes> {
        match self {
            Self::BulkString(b) => Ok(b.clone()),
            Self::Verbatim { payload, .. } => Ok(payload.clone()),
            Self::SimpleString(s) => Ok(Bytes::from(s.as_bytes().to_vec())),
            Self::Null | Self::NullArray => Err(RedisError::Type("Value is null".to_string())),
            _ => Err(RedisError::Type(format!("Cannot convert {self:?} to bytes"))),
        }
    }

    /// Convert to an array of values if possible
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an array-like reply.
    pub fn as_array(&self) -> RedisResult<&[RespValue]> {
        match self {
            Self::Array(items) | Self::Set(items) | Self::Push(items) => Ok(items),
            _ => Err(RedisError::Type(format!(
                "Cannot convert {self:?} to array"
            ))),
        }
    }

    /// Check if the value is a null reply (`$-1`, `*-1` or `_`)
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::NullArray)
    }

    /// Check if the value is the `+OK` status reply
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::SimpleString(s) if s == "OK")
    }
}

impl From<&str> for RespValue {
    fn from(s: &str) -> Self {
        Self::BulkString(Bytes::from(s.as_bytes().to_vec()))
    }
}

impl From<String> for RespValue {
    fn from(s: String) -> Self {
        Self::BulkString(Bytes::from(s.into_bytes()))
    }
}

impl From<i64> for RespValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<Bytes> for RespValue {
    fn from(b: Bytes) -> Self {
        Self::BulkString(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_string() {
        assert_eq!(
            RespValue::SimpleString("OK".to_string()).as_string().unwrap(),
            "OK"
        );
        assert_eq!(
            RespValue::BulkString(Bytes::from("foo")).as_string().unwrap(),
            "foo"
        );
        assert!(RespValue::Null.as_string().is_err());
    }

    #[test]
    fn test_as_int() {
        assert_eq!(RespValue::Integer(42).as_int().unwrap(), 42);
        assert_eq!(RespValue::Boolean(true).as_int().unwrap(), 1);
        assert_eq!(
            RespValue::BulkString(Bytes::from("-7")).as_int().unwrap(),
            -7
        );
        assert!(RespValue::SimpleString("OK".to_string()).as_int().is_err());
    }

    #[test]
    fn test_is_ok() {
        assert!(RespValue::SimpleString("OK".to_string()).is_ok());
        assert!(!RespValue::SimpleString("QUEUED".to_string()).is_ok());
    }

    #[test]
    fn test_null_variants() {
        assert!(RespValue::Null.is_null());
        assert!(RespValue::NullArray.is_null());
        assert!(!RespValue::Integer(0).is_null());
    }

    #[test]
    fn test_as_array_covers_sets_and_pushes() {
        let items = vec![RespValue::Integer(1)];
        assert_eq!(RespValue::Set(items.clone()).as_array().unwrap().len(), 1);
        assert_eq!(RespValue::Push(items).as_array().unwrap().len(), 1);
        assert!(RespValue::Integer(1).as_array().is_err());
    }
}

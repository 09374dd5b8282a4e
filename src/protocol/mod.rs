//! RESP wire codec
//!
//! Implements the REdis Serialization Protocol: command encoding into the
//! request frame format, and incremental decoding of RESP2 and RESP3 reply
//! frames.

pub mod decode;
pub mod encode;

pub use decode::{AggregateHeader, RespDecoder};
pub use encode::RespEncoder;

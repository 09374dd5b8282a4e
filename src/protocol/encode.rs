//! RESP request encoding

use crate::command::Command;
use bytes::{BufMut, Bytes, BytesMut};

const CRLF: &[u8] = b"\r\n";

/// Encodes commands into the RESP request format
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a command as the RESP "array of bulk strings" request frame:
    /// `*<argc>\r\n` followed by `$<len>\r\n<bytes>\r\n` for the verb and
    /// each argument. Lengths are computed on the raw bytes; arguments are
    /// binary-safe and never escaped.
    #[must_use]
    pub fn encode_command(command: &Command) -> Bytes {
        let args = command.arguments();
        let mut buf = BytesMut::with_capacity(
            16 + command.name().len() + args.iter().map(|a| a.len() + 16).sum::<usize>(),
        );

        buf.put_u8(b'*');
        buf.put_slice((1 + args.len()).to_string().as_bytes());
        buf.put_slice(CRLF);

        Self::put_bulk(&mut buf, command.name().as_bytes());
        for arg in args {
            Self::put_bulk(&mut buf, arg);
        }

        buf.freeze()
    }

    fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u8(b'$');
        buf.put_slice(data.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(data);
        buf.put_slice(CRLF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::cmd;

    #[test]
    fn test_encode_no_arg_command() {
        let bytes = RespEncoder::encode_command(&cmd("PING"));
        assert_eq!(&bytes[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn test_encode_one_arg_command() {
        let bytes = RespEncoder::encode_command(&cmd("GET").arg("mykey"));
        assert_eq!(&bytes[..], b"*2\r\n$3\r\nGET\r\n$5\r\nmykey\r\n");
    }

    #[test]
    fn test_encode_multi_arg_command() {
        let bytes = RespEncoder::encode_command(&cmd("SET").arg("foo").arg("bar"));
        assert_eq!(&bytes[..], b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
    }

    #[test]
    fn test_encode_binary_unsafe_argument() {
        // An argument containing CRLF must pass through unescaped, with the
        // length prefix covering the raw bytes
        let bytes = RespEncoder::encode_command(&cmd("SET").arg("k").arg(&b"a\r\nb"[..]));
        assert_eq!(&bytes[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$4\r\na\r\nb\r\n");
    }

    #[test]
    fn test_encode_empty_argument() {
        let bytes = RespEncoder::encode_command(&cmd("SET").arg("k").arg(""));
        assert_eq!(&bytes[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n");
    }
}

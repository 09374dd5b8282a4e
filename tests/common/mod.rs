//! Scripted in-memory transports for exercising connections and
//! aggregates without a Redis server.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use redis_forge::{ConnectionParams, RedisError, RedisResult, Transport, TransportConnector};

static TRACING: Once = Once::new();

/// Capture crate logs in test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .init();
    });
}

/// One scripted accept for an address
pub enum ScriptedOpen {
    /// Accept and serve exactly these reply bytes; further reads see EOF
    Reply(Vec<u8>),
    /// Refuse the connection
    Refuse,
}

/// A connector whose "servers" follow per-address scripts.
///
/// Every `open` for an address consumes the next scripted accept; an
/// address with no script left refuses. All bytes written to an address
/// are recorded across opens, in order.
#[derive(Default)]
pub struct MockConnector {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedOpen>>>,
    written: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    opens: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    /// Queue a scripted accept for an address
    pub fn script(&self, addr: &str, open: ScriptedOpen) {
        self.scripts
            .lock()
            .unwrap()
            .entry(addr.to_string())
            .or_default()
            .push_back(open);
    }

    /// All bytes ever written to an address
    pub fn written_to(&self, addr: &str) -> Vec<u8> {
        self.written
            .lock()
            .unwrap()
            .get(addr)
            .cloned()
            .unwrap_or_default()
    }

    /// Addresses opened, in order
    pub fn opens(&self) -> Vec<String> {
        self.opens.lock().unwrap().clone()
    }
}

impl TransportConnector for MockConnector {
    fn open(&self, params: &ConnectionParams) -> RedisResult<Box<dyn Transport>> {
        let addr = params.addr();
        self.opens.lock().unwrap().push(addr.clone());
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&addr)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(ScriptedOpen::Reply(reply)) => Ok(Box::new(ScriptedTransport {
                addr,
                reply: Cursor::new(reply),
                written: Arc::clone(&self.written),
            })),
            Some(ScriptedOpen::Refuse) | None => {
                Err(RedisError::connection(addr, "connection refused"))
            }
        }
    }
}

struct ScriptedTransport {
    addr: String,
    reply: Cursor<Vec<u8>>,
    written: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reply.read(buf)
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written
            .lock()
            .unwrap()
            .entry(self.addr.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn set_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// RESP reply builders

pub fn simple(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

pub fn bulk(s: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", s.len(), s).into_bytes()
}

pub fn null_array() -> Vec<u8> {
    b"*-1\r\n".to_vec()
}

pub fn array(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

/// The `ROLE` reply of a master with no attached replicas
pub fn master_role_reply() -> Vec<u8> {
    array(&[bulk("master"), b":0\r\n".to_vec(), b"*0\r\n".to_vec()])
}

pub fn concat(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}

//! Connection parameters and URI parsing

use crate::core::error::{RedisError, RedisResult};
use crate::core::types::Role;
use std::time::Duration;

/// Protocol version preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// RESP2 (Redis Serialization Protocol version 2) - Default
    #[default]
    Resp2,
    /// RESP3 (Redis Serialization Protocol version 3) - Redis 6.0+,
    /// negotiated with `HELLO 3` during the connect handshake
    Resp3,
}

/// Transport scheme for a node connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain TCP (`tcp://`, `redis://`)
    Tcp,
    /// Unix domain socket (`unix://`)
    Unix,
    /// TLS over TCP (`tls://`, `rediss://`); requires a TLS-capable
    /// transport connector
    Tls,
}

/// Immutable parameters describing one node connection.
///
/// Built from a URI string (`tcp://host:port/?database=1&role=slave`,
/// `unix:///var/run/redis.sock?alias=local`) or structurally via the
/// builder methods. Unrecognized URI parameters are ignored for forward
/// compatibility; recognized parameters with unparsable values are a
/// configuration error.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Transport scheme
    pub scheme: Scheme,
    /// Host name or address (TCP/TLS)
    pub host: String,
    /// Port (TCP/TLS)
    pub port: u16,
    /// Socket path (Unix scheme only)
    pub path: Option<String>,
    /// Database to `SELECT` after connecting; `None` keeps the default
    pub database: Option<i64>,
    /// Username for `AUTH`/`HELLO AUTH` (Redis 6 ACLs)
    pub username: Option<String>,
    /// Password for `AUTH`/`HELLO AUTH`
    pub password: Option<String>,
    /// Declared role of the node within a replicated topology
    pub role: Option<Role>,
    /// Human-friendly name for pool lookups
    pub alias: Option<String>,
    /// Relative weight for distribution strategies
    pub weight: u32,
    /// Timeout for establishing the transport
    pub connect_timeout: Duration,
    /// Timeout for individual socket reads and writes; `None` blocks
    /// indefinitely
    pub read_write_timeout: Option<Duration>,
    /// Protocol version to negotiate
    pub protocol: ProtocolVersion,
    /// TCP keepalive interval; `None` disables keepalive
    pub tcp_keepalive: Option<Duration>,
    /// When true (the default), server error replies are raised as
    /// [`RedisError::Server`]. When false they are returned as
    /// [`RespValue::Error`](crate::RespValue::Error) values instead.
    /// Library-wide switch, set once at configuration time.
    pub raise_server_errors: bool,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            scheme: Scheme::Tcp,
            host: "127.0.0.1".to_string(),
            port: 6379,
            path: None,
            database: None,
            username: None,
            password: None,
            role: None,
            alias: None,
            weight: 1,
            connect_timeout: Duration::from_secs(5),
            read_write_timeout: Some(Duration::from_secs(30)),
            protocol: ProtocolVersion::default(),
            tcp_keepalive: Some(Duration::from_secs(60)),
            raise_server_errors: true,
        }
    }
}

impl ConnectionParams {
    /// Create TCP parameters for the given host and port
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Parse parameters from a connection URI.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Config`] on a malformed URI or an invalid value
    /// for a recognized parameter.
    pub fn from_uri(uri: &str) -> RedisResult<Self> {
        let (scheme_str, rest) = uri
            .split_once("://")
            .ok_or_else(|| RedisError::Config(format!("Invalid URI (missing scheme): {uri}")))?;

        let scheme = match scheme_str {
            "tcp" | "redis" => Scheme::Tcp,
            "tls" | "rediss" => Scheme::Tls,
            "unix" => Scheme::Unix,
            other => {
                return Err(RedisError::Config(format!("Unknown URI scheme: {other}")));
            }
        };

        let (target, query) = match rest.split_once('?') {
            Some((t, q)) => (t, q),
            None => (rest, ""),
        };

        let mut params = Self {
            scheme,
            ..Default::default()
        };

        if scheme == Scheme::Unix {
            let path = target.trim_end_matches('/');
            // unix:///var/run/redis.sock keeps the leading slash of the path
            if path.is_empty() {
                return Err(RedisError::Config(format!(
                    "Unix URI is missing a socket path: {uri}"
                )));
            }
            params.path = Some(path.to_string());
        } else {
            let mut authority = target.trim_end_matches('/');
            if let Some((userinfo, host_port)) = authority.split_once('@') {
                match userinfo.split_once(':') {
                    Some((user, pass)) => {
                        if !user.is_empty() {
                            params.username = Some(user.to_string());
                        }
                        params.password = Some(pass.to_string());
                    }
                    None => params.username = Some(userinfo.to_string()),
                }
                authority = host_port;
            }
            if let Some((host, port_str)) = authority.rsplit_once(':') {
                params.host = host.to_string();
                params.port = port_str.parse::<u16>().map_err(|_| {
                    RedisError::Config(format!("Invalid port in URI: {port_str}"))
                })?;
            } else if !authority.is_empty() {
                params.host = authority.to_string();
            }
        }

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            match key {
                "database" => {
                    params.database = Some(value.parse::<i64>().map_err(|_| {
                        RedisError::Config(format!("Invalid database: {value}"))
                    })?);
                }
                "username" => params.username = Some(value.to_string()),
                "password" => params.password = Some(value.to_string()),
                "alias" => params.alias = Some(value.to_string()),
                "role" => {
                    params.role = Some(Role::parse(value).ok_or_else(|| {
                        RedisError::Config(format!("Invalid role: {value}"))
                    })?);
                }
                "weight" => {
                    params.weight = value.parse::<u32>().map_err(|_| {
                        RedisError::Config(format!("Invalid weight: {value}"))
                    })?;
                }
                "timeout" => {
                    params.connect_timeout = parse_seconds(value)?;
                }
                "read_write_timeout" => {
                    params.read_write_timeout = Some(parse_seconds(value)?);
                }
                "protocol" => {
                    params.protocol = match value {
                        "2" => ProtocolVersion::Resp2,
                        "3" => ProtocolVersion::Resp3,
                        other => {
                            return Err(RedisError::Config(format!(
                                "Invalid protocol version: {other}"
                            )));
                        }
                    };
                }
                // Unrecognized parameters are ignored, not fatal
                _ => {}
            }
        }

        Ok(params)
    }

    /// Node address used as the pool key: `host:port`, or the socket path
    /// for Unix connections
    #[must_use]
    pub fn addr(&self) -> String {
        match self.scheme {
            Scheme::Unix => self.path.clone().unwrap_or_default(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    /// Derive parameters for a discovered peer: same credentials, database,
    /// timeouts and protocol, but a new address and role. Alias and weight
    /// are not inherited.
    #[must_use]
    pub fn derived(&self, host: impl Into<String>, port: u16, role: Role) -> Self {
        Self {
            scheme: self.scheme,
            host: host.into(),
            port,
            path: None,
            role: Some(role),
            alias: None,
            weight: 1,
            ..self.clone()
        }
    }

    /// Set the host name
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the database number
    #[must_use]
    pub fn with_database(mut self, database: i64) -> Self {
        self.database = Some(database);
        self
    }

    /// Set the password
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the username
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the declared role
    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Set the alias
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read/write timeout
    #[must_use]
    pub const fn with_read_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_write_timeout = timeout;
        self
    }

    /// Set the protocol version
    #[must_use]
    pub const fn with_protocol(mut self, protocol: ProtocolVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set whether server error replies are raised or returned as values
    #[must_use]
    pub const fn with_raise_server_errors(mut self, raise: bool) -> Self {
        self.raise_server_errors = raise;
        self
    }
}

fn parse_seconds(value: &str) -> RedisResult<Duration> {
    let secs = value
        .parse::<f64>()
        .map_err(|_| RedisError::Config(format!("Invalid timeout: {value}")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(RedisError::Config(format!("Invalid timeout: {value}")));
    }
    Ok(Duration::from_secs_f64(secs))
}

//! Sentinel-managed aggregate
//!
//! [`SentinelAggregate`] discovers the master and replicas of a named
//! service from a list of Sentinel nodes instead of static configuration.
//! On node failure the cached topology is wiped and re-discovered, with a
//! bounded retry/backoff loop riding out failovers in progress.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::command::{cmd, Command};
use crate::connection::{ConnectionFactory, Execute, NodeConnection};
use crate::core::config::ConnectionParams;
use crate::core::error::{RedisError, RedisResult};
use crate::core::types::Role;
use crate::core::value::RespValue;
use crate::pool::TopologyPool;
use crate::strategy::ReplicationStrategy;

/// Behavior switches for a sentinel aggregate
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// The sentinel service (master) name to track
    pub service: String,
    /// Retries after a node failure: `None` retries until a topology comes
    /// back, `Some(0)` fails on the first error
    pub retry_limit: Option<usize>,
    /// Pause between retries, giving a failover in progress time to settle
    pub retry_wait: Duration,
    /// Refresh the sentinel list itself via `SENTINEL sentinels` on every
    /// topology refresh
    pub update_sentinels: bool,
}

impl SentinelConfig {
    /// Config for the given service with default retry behavior
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            retry_limit: Some(3),
            retry_wait: Duration::from_secs(1),
            update_sentinels: false,
        }
    }

    /// Set the retry limit
    #[must_use]
    pub const fn with_retry_limit(mut self, limit: Option<usize>) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Set the pause between retries
    #[must_use]
    pub const fn with_retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }

    /// Keep the sentinel list itself up to date from the sentinels
    #[must_use]
    pub const fn with_update_sentinels(mut self, update: bool) -> Self {
        self.update_sentinels = update;
        self
    }
}

/// A failover-managed replication set discovered through Sentinel
pub struct SentinelAggregate {
    factory: ConnectionFactory,
    strategy: ReplicationStrategy,
    config: SentinelConfig,
    /// Known sentinels, current one first. Unreachable sentinels are
    /// dropped; `update_sentinels` replenishes the list.
    sentinels: Vec<ConnectionParams>,
    sentinel_conn: Option<NodeConnection>,
    /// Parameter template (credentials, timeouts, protocol) applied to
    /// discovered data nodes
    template: ConnectionParams,
    pool: TopologyPool,
}

impl SentinelAggregate {
    /// Create an aggregate over the given sentinel endpoints.
    ///
    /// Discovered data nodes inherit credentials and timeouts from
    /// `template` (sentinels themselves use their own parameters, since
    /// sentinel auth is typically separate).
    ///
    /// # Errors
    ///
    /// A configuration error when `sentinels` is empty.
    pub fn new(
        factory: ConnectionFactory,
        sentinels: Vec<ConnectionParams>,
        template: ConnectionParams,
        config: SentinelConfig,
    ) -> RedisResult<Self> {
        if sentinels.is_empty() {
            return Err(RedisError::Config(
                "at least one sentinel endpoint is required".to_string(),
            ));
        }
        Ok(Self {
            factory,
            strategy: ReplicationStrategy::default(),
            config,
            sentinels,
            sentinel_conn: None,
            template,
            pool: TopologyPool::default(),
        })
    }

    /// Create an aggregate from sentinel URIs
    ///
    /// # Errors
    ///
    /// Configuration errors from URI parsing or an empty list.
    pub fn from_uris<'a>(
        factory: ConnectionFactory,
        uris: impl IntoIterator<Item = &'a str>,
        template: ConnectionParams,
        config: SentinelConfig,
    ) -> RedisResult<Self> {
        let sentinels = uris
            .into_iter()
            .map(ConnectionParams::from_uri)
            .collect::<RedisResult<Vec<_>>>()?;
        Self::new(factory, sentinels, template, config)
    }

    /// The routing strategy in use
    #[must_use]
    pub fn strategy(&self) -> &ReplicationStrategy {
        &self.strategy
    }

    /// Mutable access to the routing strategy
    pub fn strategy_mut(&mut self) -> &mut ReplicationStrategy {
        &mut self.strategy
    }

    /// The discovered master's address, if a topology is cached
    #[must_use]
    pub fn master_addr(&self) -> Option<&str> {
        self.pool.master_addr()
    }

    /// Addresses of the discovered replicas
    #[must_use]
    pub fn replica_addrs(&self) -> &[String] {
        self.pool.replica_addrs()
    }

    /// Addresses of the known sentinels
    #[must_use]
    pub fn sentinel_addrs(&self) -> Vec<String> {
        self.sentinels.iter().map(ConnectionParams::addr).collect()
    }

    /// Pin the session to a specific discovered node.
    ///
    /// The target must be in the current topology; it is connected before
    /// the pin moves, so a dead target leaves the session where it was.
    ///
    /// # Errors
    ///
    /// Configuration errors for unknown targets, connection errors from the
    /// new node.
    pub fn switch_to(&mut self, addr: &str) -> RedisResult<()> {
        let previous = self.pool.current_addr().map(String::from);
        let conn = self
            .pool
            .connection_mut(addr)
            .ok_or_else(|| RedisError::Config(format!("unknown node: {addr}")))?;
        conn.connect()?;
        self.pool.pin_to(addr)?;
        if let Some(previous) = previous {
            if previous != addr {
                if let Some(old) = self.pool.connection_mut(&previous) {
                    old.disconnect();
                }
            }
        }
        Ok(())
    }

    /// Ask the sentinels for the current master of the tracked service
    ///
    /// # Errors
    ///
    /// [`RedisError::MasterNotFound`] when no sentinel knows the service,
    /// [`RedisError::NoSentinel`] when no sentinel is reachable.
    pub fn discover_master(&mut self) -> RedisResult<ConnectionParams> {
        let service = self.config.service.clone();
        let reply = self.sentinel_command(
            &cmd("SENTINEL")
                .arg("get-master-addr-by-name")
                .arg(service.clone()),
        )?;
        if reply.is_null() {
            // The sentinel answered but does not track this service. No
            // other sentinel will disagree, so this is not retried.
            return Err(RedisError::MasterNotFound(service));
        }
        let (host, port) = match reply.as_array()? {
            [host, port] => (host.as_string()?, parse_port(&port.as_string()?)?),
            _ => {
                return Err(RedisError::UnexpectedResponse(
                    "get-master-addr-by-name did not return an address pair".to_string(),
                ))
            }
        };
        Ok(self.template.derived(host, port, Role::Master))
    }

    /// Ask the sentinels for the healthy replicas of the tracked service.
    ///
    /// Replicas flagged `s_down`, `o_down` or `disconnected` are excluded.
    ///
    /// # Errors
    ///
    /// Sentinel connection errors or malformed replies.
    pub fn discover_replicas(&mut self) -> RedisResult<Vec<ConnectionParams>> {
        let service = self.config.service.clone();
        let reply = self.sentinel_command(&cmd("SENTINEL").arg("slaves").arg(service))?;
        let mut replicas = Vec::new();
        for entry in reply.as_array()? {
            let fields = parse_field_pairs(entry)?;
            if let Some(flags) = fields.get("flags") {
                if flags_down(flags) {
                    debug!(flags = %flags, "skipping unhealthy replica");
                    continue;
                }
            }
            let (Some(host), Some(port)) = (fields.get("ip"), fields.get("port")) else {
                continue;
            };
            replicas.push(self.template.derived(host.clone(), parse_port(port)?, Role::Replica));
        }
        Ok(replicas)
    }

    /// Refresh the sentinel list from `SENTINEL sentinels`, keeping the
    /// answering sentinel first
    ///
    /// # Errors
    ///
    /// Sentinel connection errors or malformed replies.
    pub fn update_sentinels(&mut self) -> RedisResult<()> {
        let service = self.config.service.clone();
        let reply = self.sentinel_command(&cmd("SENTINEL").arg("sentinels").arg(service))?;
        let current = self.sentinels.first().cloned();
        let mut updated: Vec<ConnectionParams> = current.into_iter().collect();
        for entry in reply.as_array()? {
            let fields = parse_field_pairs(entry)?;
            if let Some(flags) = fields.get("flags") {
                if flags_down(flags) {
                    continue;
                }
            }
            let (Some(host), Some(port)) = (fields.get("ip"), fields.get("port")) else {
                continue;
            };
            let params = self
                .template
                .derived(host.clone(), parse_port(port)?, Role::Sentinel);
            if !updated.iter().any(|s| s.addr() == params.addr()) {
                updated.push(params);
            }
        }
        info!(count = updated.len(), "sentinel list updated");
        self.sentinels = updated;
        Ok(())
    }

    /// Drop the cached data-node topology. The sentinel list is kept.
    pub fn reset_topology(&mut self) {
        self.pool.clear();
    }

    /// Discover the master and replicas and rebuild the pool.
    ///
    /// The master's role is verified with `ROLE` before it is trusted; a
    /// stale sentinel answer pointing at a demoted node fails here.
    ///
    /// # Errors
    ///
    /// Discovery errors, or [`RedisError::RoleMismatch`] for a stale
    /// answer.
    pub fn refresh_topology(&mut self) -> RedisResult<()> {
        self.pool.clear();
        let master_params = self.discover_master()?;
        let master_addr = master_params.addr();
        let mut master = self.factory.create(master_params);
        master.verify_role(Role::Master)?;
        info!(addr = %master_addr, service = %self.config.service, "discovered master");
        self.pool.add(master);
        for params in self.discover_replicas()? {
            if params.addr() != master_addr {
                self.pool.add(self.factory.create(params));
            }
        }
        if self.config.update_sentinels {
            self.update_sentinels()?;
        }
        Ok(())
    }

    /// Run one command against whichever sentinel answers first, dropping
    /// unreachable sentinels from the front of the list
    fn sentinel_command(&mut self, command: &Command) -> RedisResult<RespValue> {
        loop {
            if self.sentinel_conn.is_none() {
                let Some(params) = self.sentinels.first().cloned() else {
                    return Err(RedisError::NoSentinel);
                };
                self.sentinel_conn = Some(self.factory.create(params));
            }
            let conn = self
                .sentinel_conn
                .as_mut()
                .ok_or(RedisError::NoSentinel)?;
            match conn.execute(command) {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() => {
                    warn!(addr = %conn.addr(), error = %e, "sentinel unreachable; trying next");
                    self.sentinel_conn = None;
                    if !self.sentinels.is_empty() {
                        self.sentinels.remove(0);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Execute for SentinelAggregate {
    /// Route and run one command against the discovered topology.
    ///
    /// Any retryable node failure (including a stale-master role mismatch)
    /// wipes the cached topology and re-discovers it after `retry_wait`,
    /// up to `retry_limit` retries. Unknown-service and no-sentinel errors
    /// are fatal immediately.
    fn execute(&mut self, command: &Command) -> RedisResult<RespValue> {
        let mut attempts = 0;
        loop {
            let result = self.try_execute(command);
            match result {
                Ok(reply) => return Ok(reply),
                Err(e) if sentinel_retryable(&e) => {
                    self.reset_topology();
                    let exhausted = match self.config.retry_limit {
                        Some(limit) => attempts >= limit,
                        None => false,
                    };
                    if exhausted {
                        warn!(error = %e, attempts, "retry limit reached");
                        return Err(RedisError::MaxRetriesExceeded(attempts));
                    }
                    attempts += 1;
                    debug!(error = %e, attempt = attempts, "node failure; re-discovering after wait");
                    std::thread::sleep(self.config.retry_wait);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl SentinelAggregate {
    fn try_execute(&mut self, command: &Command) -> RedisResult<RespValue> {
        if self.pool.master_addr().is_none() {
            self.refresh_topology()?;
        }
        let addr = self.pool.route(&self.strategy, command)?;
        let conn = self
            .pool
            .connection_mut(&addr)
            .ok_or_else(|| RedisError::connection(&addr, "node vanished from pool"))?;
        match conn.execute(command) {
            Ok(reply) => self.strategy.interpret_reply(command, reply),
            Err(e) => {
                if e.is_retryable() {
                    conn.disconnect();
                }
                Err(e)
            }
        }
    }
}

/// Node failures worth a topology refresh. A role mismatch means the
/// sentinel's answer was stale mid-failover, so it retries too.
fn sentinel_retryable(e: &RedisError) -> bool {
    e.is_retryable() || matches!(e, RedisError::RoleMismatch { .. } | RedisError::NoMaster)
}

/// Interpret a sentinel record reply: a flat array of alternating field
/// names and values (RESP3 sentinels may answer with a real map)
fn parse_field_pairs(entry: &RespValue) -> RedisResult<HashMap<String, String>> {
    let mut fields = HashMap::new();
    match entry {
        RespValue::Map(pairs) => {
            for (key, value) in pairs {
                fields.insert(key.as_string()?, value.as_string()?);
            }
        }
        _ => {
            let items = entry.as_array()?;
            for pair in items.chunks(2) {
                if let [key, value] = pair {
                    fields.insert(key.as_string()?, value.as_string()?);
                }
            }
        }
    }
    Ok(fields)
}

fn flags_down(flags: &str) -> bool {
    flags
        .split(',')
        .any(|f| f == "s_down" || f == "o_down" || f == "disconnected")
}

fn parse_port(value: &str) -> RedisResult<u16> {
    value
        .parse()
        .map_err(|_| RedisError::UnexpectedResponse(format!("invalid port: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(&str, &str)]) -> RespValue {
        RespValue::Array(
            fields
                .iter()
                .flat_map(|(k, v)| [RespValue::from(*k), RespValue::from(*v)])
                .collect(),
        )
    }

    #[test]
    fn test_parse_field_pairs_flat_array() {
        let entry = record(&[("name", "10.0.0.2:6379"), ("ip", "10.0.0.2"), ("port", "6379")]);
        let fields = parse_field_pairs(&entry).unwrap();
        assert_eq!(fields.get("ip").map(String::as_str), Some("10.0.0.2"));
        assert_eq!(fields.get("port").map(String::as_str), Some("6379"));
    }

    #[test]
    fn test_parse_field_pairs_map() {
        let entry = RespValue::Map(vec![
            (RespValue::from("ip"), RespValue::from("10.0.0.2")),
            (RespValue::from("port"), RespValue::from("6379")),
        ]);
        let fields = parse_field_pairs(&entry).unwrap();
        assert_eq!(fields.get("ip").map(String::as_str), Some("10.0.0.2"));
    }

    #[test]
    fn test_flags_down_detection() {
        assert!(flags_down("slave,s_down"));
        assert!(flags_down("slave,o_down,disconnected"));
        assert!(!flags_down("slave"));
        assert!(!flags_down("master"));
        // substring is not enough, the whole flag must match
        assert!(!flags_down("slave,s_downish"));
    }

    #[test]
    fn test_empty_sentinel_list_is_rejected() {
        let result = SentinelAggregate::new(
            ConnectionFactory::default(),
            Vec::new(),
            ConnectionParams::default(),
            SentinelConfig::new("mymaster"),
        );
        match result {
            Err(RedisError::Config(_)) => {}
            Err(other) => panic!("expected configuration error, got {other:?}"),
            Ok(_) => panic!("empty sentinel list must be rejected"),
        }
    }

    #[test]
    fn test_config_builders() {
        let config = SentinelConfig::new("cache")
            .with_retry_limit(None)
            .with_retry_wait(Duration::from_millis(100))
            .with_update_sentinels(true);
        assert_eq!(config.service, "cache");
        assert_eq!(config.retry_limit, None);
        assert!(config.update_sentinels);
    }
}

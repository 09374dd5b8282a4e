//! Master/replica aggregate
//!
//! [`ReplicationAggregate`] presents one master plus its replicas as a
//! single [`Execute`] endpoint. Reads are spread over the replicas, writes
//! go to the master, and once a session has written it stays on the master.
//! When auto discovery is enabled the replica set is refreshed from
//! `INFO REPLICATION` after a master failure.

use tracing::{debug, info, warn};

use crate::command::{cmd, Command};
use crate::connection::{ConnectionFactory, Execute};
use crate::core::config::ConnectionParams;
use crate::core::error::{RedisError, RedisResult};
use crate::core::types::Role;
use crate::core::value::RespValue;
use crate::pool::TopologyPool;
use crate::strategy::ReplicationStrategy;

/// Behavior switches for a replication aggregate
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Refresh the topology from `INFO REPLICATION` when the master fails
    pub auto_discovery: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            auto_discovery: true,
        }
    }
}

/// A statically configured master/replica set behind one execute endpoint
pub struct ReplicationAggregate {
    factory: ConnectionFactory,
    strategy: ReplicationStrategy,
    config: ReplicationConfig,
    pool: TopologyPool,
}

impl ReplicationAggregate {
    /// Create an empty aggregate with default strategy and config
    #[must_use]
    pub fn new(factory: ConnectionFactory) -> Self {
        Self::with_config(factory, ReplicationStrategy::default(), ReplicationConfig::default())
    }

    /// Create an aggregate with explicit strategy and config
    #[must_use]
    pub fn with_config(
        factory: ConnectionFactory,
        strategy: ReplicationStrategy,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            factory,
            strategy,
            config,
            pool: TopologyPool::default(),
        }
    }

    /// The routing strategy in use
    #[must_use]
    pub fn strategy(&self) -> &ReplicationStrategy {
        &self.strategy
    }

    /// Mutable access to the routing strategy, for registering read-only
    /// scripts or custom commands
    pub fn strategy_mut(&mut self) -> &mut ReplicationStrategy {
        &mut self.strategy
    }

    /// Add a node. Its parameters must declare a role.
    ///
    /// # Errors
    ///
    /// A configuration error when no role is declared.
    pub fn add(&mut self, params: ConnectionParams) -> RedisResult<()> {
        if params.role.is_none() {
            return Err(RedisError::Config(format!(
                "replication node {} must declare a role",
                params.addr()
            )));
        }
        self.pool.add(self.factory.create(params));
        Ok(())
    }

    /// Add every node parsed from the given URIs
    ///
    /// # Errors
    ///
    /// Configuration errors from URI parsing or a missing role.
    pub fn add_uris<'a>(&mut self, uris: impl IntoIterator<Item = &'a str>) -> RedisResult<()> {
        for uri in uris {
            self.add(ConnectionParams::from_uri(uri)?)?;
        }
        Ok(())
    }

    /// The master's address, if one is known
    #[must_use]
    pub fn master_addr(&self) -> Option<&str> {
        self.pool.master_addr()
    }

    /// Addresses of the known replicas
    #[must_use]
    pub fn replica_addrs(&self) -> &[String] {
        self.pool.replica_addrs()
    }

    /// Look up a node connection by its configured alias
    pub fn connection_by_alias(&mut self, alias: &str) -> Option<&mut crate::connection::NodeConnection> {
        self.pool.connection_by_alias(alias)
    }

    /// Refresh the replica set from `INFO REPLICATION`.
    ///
    /// Nodes are asked in turn, master first. A node answering as a master
    /// becomes the master and its `slaveN:` lines (online only) become the
    /// replica set; a node answering as a replica points at its master,
    /// which is then asked directly. Unreachable nodes are dropped from the
    /// pool.
    ///
    /// # Errors
    ///
    /// [`RedisError::NoMaster`] when no reachable node leads to a master.
    pub fn discover(&mut self) -> RedisResult<()> {
        let mut candidates: Vec<String> = self
            .pool
            .master_addr()
            .map(String::from)
            .into_iter()
            .chain(self.pool.replica_addrs().iter().cloned())
            .collect();

        // One indirection through a replica's master_host is enough; the
        // node it names either answers as a master or discovery fails.
        let mut followed_pointer = false;

        while let Some(addr) = candidates.first().cloned() {
            candidates.remove(0);
            let Some(conn) = self.pool.connection_mut(&addr) else {
                continue;
            };
            let info = match conn.execute(&cmd("INFO").arg("REPLICATION")) {
                Ok(reply) => reply.as_string()?,
                Err(e) => {
                    warn!(addr = %addr, error = %e, "discovery probe failed; dropping node");
                    if let Some(mut dropped) = self.pool.remove(&addr) {
                        dropped.disconnect();
                    }
                    continue;
                }
            };
            let parsed = parse_info_replication(&info);
            match parsed.role {
                Some(Role::Master) => {
                    self.apply_master_topology(&addr, &parsed);
                    return Ok(());
                }
                Some(Role::Replica) if !followed_pointer => {
                    if let (Some(host), Some(port)) = (parsed.master_host, parsed.master_port) {
                        let template = conn.params().clone();
                        let master_params = template.derived(host, port, Role::Master);
                        let master_addr = master_params.addr();
                        info!(addr = %addr, master = %master_addr, "following replica to its master");
                        if self.pool.connection_mut(&master_addr).is_none() {
                            self.pool.add(self.factory.create(master_params));
                        }
                        followed_pointer = true;
                        candidates.insert(0, master_addr);
                    }
                }
                _ => {
                    debug!(addr = %addr, "node did not resolve to a master");
                }
            }
        }
        Err(RedisError::NoMaster)
    }

    fn apply_master_topology(&mut self, master_addr: &str, parsed: &InfoReplication) {
        let template = match self.pool.connection_mut(master_addr) {
            Some(conn) => conn.params().clone(),
            None => return,
        };
        // Re-declare the answering node as master if it was added as a replica
        if self.pool.master_addr() != Some(master_addr) {
            self.pool.remove(master_addr);
            self.pool
                .add(self.factory.create(template.derived(template.host.clone(), template.port, Role::Master)));
        }

        let discovered: Vec<ConnectionParams> = parsed
            .replicas
            .iter()
            .map(|(host, port)| template.derived(host.clone(), *port, Role::Replica))
            .collect();

        let known: Vec<String> = self.pool.replica_addrs().to_vec();
        for stale in known {
            if !discovered.iter().any(|p| p.addr() == stale) {
                info!(addr = %stale, "dropping replica no longer reported by master");
                if let Some(mut dropped) = self.pool.remove(&stale) {
                    dropped.disconnect();
                }
            }
        }
        for params in discovered {
            if self.pool.connection_mut(&params.addr()).is_none() {
                info!(addr = %params.addr(), "adding replica reported by master");
                self.pool.add(self.factory.create(params));
            }
        }
    }

}

impl Execute for ReplicationAggregate {
    /// Route and run one command, retrying across the pool.
    ///
    /// A failed replica is dropped and the command retried on the remaining
    /// nodes. A failed master propagates immediately unless auto discovery
    /// is on, in which case the topology is refreshed once and the command
    /// retried. The loop terminates because every retryable failure either
    /// shrinks the pool or consumes the single rediscovery.
    fn execute(&mut self, command: &Command) -> RedisResult<RespValue> {
        let mut rediscovered = false;
        loop {
            let addr = match self.pool.route(&self.strategy, command) {
                Ok(addr) => addr,
                Err(RedisError::NoMaster) if self.config.auto_discovery && !rediscovered => {
                    rediscovered = true;
                    self.discover()?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let on_master = self.pool.master_addr() == Some(addr.as_str());
            let conn = self
                .pool
                .connection_mut(&addr)
                .ok_or_else(|| RedisError::connection(&addr, "node vanished from pool"))?;
            match conn.execute(command) {
                Ok(reply) => return self.strategy.interpret_reply(command, reply),
                Err(e) if e.is_retryable() => {
                    conn.disconnect();
                    if on_master {
                        if self.config.auto_discovery && !rediscovered {
                            warn!(error = %e, "master failed; rediscovering topology");
                            rediscovered = true;
                            self.discover()?;
                            continue;
                        }
                        return Err(e);
                    }
                    warn!(addr = %addr, error = %e, "replica failed; removing from pool");
                    if let Some(mut dropped) = self.pool.remove(&addr) {
                        dropped.disconnect();
                    }
                    if self.config.auto_discovery && !rediscovered {
                        rediscovered = true;
                        self.discover()?;
                    }
                    if self.pool.is_empty() {
                        return Err(e);
                    }
                    debug!(command = command.name(), "retrying on remaining nodes");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Default)]
struct InfoReplication {
    role: Option<Role>,
    master_host: Option<String>,
    master_port: Option<u16>,
    replicas: Vec<(String, u16)>,
}

/// Parse the `INFO REPLICATION` block.
///
/// Only `role:`, `master_host:`/`master_port:` and `slaveN:` lines matter;
/// slaves whose `state` is not `online` are skipped.
fn parse_info_replication(info: &str) -> InfoReplication {
    let mut parsed = InfoReplication::default();
    for line in info.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key == "role" {
            parsed.role = Role::parse(value);
        } else if key == "master_host" {
            parsed.master_host = Some(value.to_string());
        } else if key == "master_port" {
            parsed.master_port = value.parse().ok();
        } else if key.starts_with("slave") && key[5..].chars().all(|c| c.is_ascii_digit()) {
            let mut host = None;
            let mut port = None;
            let mut online = false;
            for field in value.split(',') {
                match field.split_once('=') {
                    Some(("ip", v)) => host = Some(v.to_string()),
                    Some(("port", v)) => port = v.parse::<u16>().ok(),
                    Some(("state", v)) => online = v == "online",
                    _ => {}
                }
            }
            if let (Some(host), Some(port), true) = (host, port, online) {
                parsed.replicas.push((host, port));
            }
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER_INFO: &str = "# Replication\r\n\
        role:master\r\n\
        connected_slaves:3\r\n\
        slave0:ip=10.0.0.2,port=6379,state=online,offset=1751844,lag=0\r\n\
        slave1:ip=10.0.0.3,port=6380,state=online,offset=1751844,lag=1\r\n\
        slave2:ip=10.0.0.4,port=6379,state=wait_bgsave,offset=0,lag=0\r\n\
        master_replid:566a4c34f6a4e94e71cdd58f7a9a6d2bdcae49ab\r\n\
        master_repl_offset:1751844\r\n";

    const REPLICA_INFO: &str = "# Replication\r\n\
        role:slave\r\n\
        master_host:10.0.0.1\r\n\
        master_port:6379\r\n\
        master_link_status:up\r\n\
        slave_repl_offset:1751844\r\n";

    #[test]
    fn test_parse_master_info() {
        let parsed = parse_info_replication(MASTER_INFO);
        assert_eq!(parsed.role, Some(Role::Master));
        // the wait_bgsave slave is excluded
        assert_eq!(
            parsed.replicas,
            vec![
                ("10.0.0.2".to_string(), 6379),
                ("10.0.0.3".to_string(), 6380)
            ]
        );
    }

    #[test]
    fn test_parse_replica_info() {
        let parsed = parse_info_replication(REPLICA_INFO);
        assert_eq!(parsed.role, Some(Role::Replica));
        assert_eq!(parsed.master_host.as_deref(), Some("10.0.0.1"));
        assert_eq!(parsed.master_port, Some(6379));
        assert!(parsed.replicas.is_empty());
    }

    #[test]
    fn test_parse_ignores_unrelated_lines() {
        let parsed = parse_info_replication("# Replication\r\nslaveXY:garbage\r\nrole:master\r\n");
        assert_eq!(parsed.role, Some(Role::Master));
        assert!(parsed.replicas.is_empty());
    }

    #[test]
    fn test_add_requires_role() {
        let mut aggregate = ReplicationAggregate::new(ConnectionFactory::default());
        let err = aggregate.add(ConnectionParams::default()).unwrap_err();
        assert!(matches!(err, RedisError::Config(_)));
    }
}

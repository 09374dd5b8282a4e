//! Node pool and read routing
//!
//! [`TopologyPool`] holds the connections of one replication set, keyed by
//! node address, and tracks which node the session is currently pinned to.
//! Both the replication and sentinel aggregates route through it.

use std::collections::HashMap;

use rand::Rng;
use tracing::{debug, warn};

use crate::command::Command;
use crate::connection::NodeConnection;
use crate::core::error::{RedisError, RedisResult};
use crate::core::types::Role;
use crate::strategy::ReplicationStrategy;

/// One master plus any number of replicas, with session pinning.
///
/// Routing is a small state machine: with no current node, reads go to a
/// uniformly random replica (or the master when there are none) and writes
/// go to the master. Once a write lands on the master the session stays
/// pinned there so later reads observe that write. A session pinned to a
/// replica keeps reading from it until a write moves it to the master.
#[derive(Default)]
pub struct TopologyPool {
    connections: HashMap<String, NodeConnection>,
    master: Option<String>,
    replicas: Vec<String>,
    current: Option<String>,
    aliases: HashMap<String, String>,
}

impl TopologyPool {
    /// Add a connection under the role its parameters declare.
    ///
    /// A second master replaces the first with a warning; an address already
    /// present is replaced in place.
    pub fn add(&mut self, connection: NodeConnection) {
        let addr = connection.addr();
        let role = connection.params().role;
        if let Some(alias) = &connection.params().alias {
            self.aliases.insert(alias.clone(), addr.clone());
        }
        match role {
            Some(Role::Master) => {
                if let Some(previous) = &self.master {
                    if previous != &addr {
                        warn!(previous = %previous, new = %addr, "replacing master node");
                        let old = previous.clone();
                        self.remove(&old);
                    }
                }
                self.master = Some(addr.clone());
            }
            _ => {
                if !self.replicas.contains(&addr) {
                    self.replicas.push(addr.clone());
                }
            }
        }
        self.connections.insert(addr, connection);
    }

    /// Remove a node, dropping any pin, alias or role slot that referenced it
    pub fn remove(&mut self, addr: &str) -> Option<NodeConnection> {
        if self.master.as_deref() == Some(addr) {
            self.master = None;
        }
        self.replicas.retain(|r| r != addr);
        if self.current.as_deref() == Some(addr) {
            self.current = None;
        }
        self.aliases.retain(|_, target| target != addr);
        self.connections.remove(addr)
    }

    /// Disconnect and drop every node
    pub fn clear(&mut self) {
        for (_, mut connection) in self.connections.drain() {
            connection.disconnect();
        }
        self.master = None;
        self.replicas.clear();
        self.current = None;
        self.aliases.clear();
    }

    /// Number of nodes in the pool
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the pool holds no nodes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// The master's address, if one is known
    #[must_use]
    pub fn master_addr(&self) -> Option<&str> {
        self.master.as_deref()
    }

    /// Addresses of the known replicas
    #[must_use]
    pub fn replica_addrs(&self) -> &[String] {
        &self.replicas
    }

    /// The address the session is currently pinned to, if any
    #[must_use]
    pub fn current_addr(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Look up a connection by address
    pub fn connection_mut(&mut self, addr: &str) -> Option<&mut NodeConnection> {
        self.connections.get_mut(addr)
    }

    /// Look up a connection by the alias its parameters declared
    pub fn connection_by_alias(&mut self, alias: &str) -> Option<&mut NodeConnection> {
        let addr = self.aliases.get(alias)?.clone();
        self.connections.get_mut(&addr)
    }

    /// Pin the session to an explicit node address.
    ///
    /// # Errors
    ///
    /// A configuration error when the address is not in the pool.
    pub fn pin_to(&mut self, addr: &str) -> RedisResult<()> {
        if !self.connections.contains_key(addr) {
            return Err(RedisError::Config(format!("unknown node: {addr}")));
        }
        self.current = Some(addr.to_string());
        Ok(())
    }

    /// Route one command, returning the address it should run on.
    ///
    /// # Errors
    ///
    /// [`RedisError::Unsupported`] for commands the strategy disallows on
    /// a replicated setup, [`RedisError::NoMaster`] when a master is
    /// required but unknown.
    pub fn route(&mut self, strategy: &ReplicationStrategy, command: &Command) -> RedisResult<String> {
        if strategy.is_disallowed(command) {
            return Err(RedisError::Unsupported(format!(
                "{} cannot be routed over a replicated connection",
                command.name()
            )));
        }
        let is_read = strategy.is_read_operation(command);

        if let Some(current) = self.current.clone() {
            let on_master = self.master.as_deref() == Some(current.as_str());
            if on_master {
                // Pinned to the master: read-your-own-writes holds there
                return Ok(current);
            }
            if is_read && self.connections.contains_key(&current) {
                return Ok(current);
            }
            // A write, or the pinned replica vanished: move to the master
        }

        let addr = if is_read && !self.replicas.is_empty() {
            let index = rand::rng().random_range(0..self.replicas.len());
            self.replicas[index].clone()
        } else {
            self.master.clone().ok_or(RedisError::NoMaster)?
        };
        debug!(addr = %addr, command = command.name(), read = is_read, "routing command");
        self.current = Some(addr.clone());
        Ok(addr)
    }
}

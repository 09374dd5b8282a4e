//! Synchronous Redis client core: RESP protocol, node connections and
//! replication-aware topologies
//!
//! `redis-forge` speaks RESP2 and RESP3 over blocking sockets and presents
//! three kinds of endpoint behind one [`Execute`] trait: a single
//! [`NodeConnection`], a statically configured [`ReplicationAggregate`]
//! that spreads reads over replicas and pins write sessions to the master,
//! and a [`SentinelAggregate`] that discovers the same topology from Redis
//! Sentinel and rides out failovers.
//!
//! # Quick Start
//!
//! ```no_run
//! use redis_forge::{cmd, ConnectionParams, Execute, NodeConnection};
//!
//! fn main() -> Result<(), redis_forge::RedisError> {
//!     let params = ConnectionParams::from_uri("redis://localhost:6379")?;
//!     let mut conn = NodeConnection::new(params);
//!
//!     conn.execute(&cmd("SET").arg("mykey").arg("myvalue"))?;
//!     let value = conn.execute(&cmd("GET").arg("mykey"))?;
//!     println!("Value: {:?}", value.as_string()?);
//!
//!     Ok(())
//! }
//! ```

#![deny(warnings)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::implicit_clone)]
#![allow(clippy::manual_let_else)]

pub mod command;
pub mod connection;
pub mod core;
pub mod distribution;
pub mod hashing;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod replication;
pub mod sentinel;
pub mod strategy;

pub use command::{cmd, Command};
pub use connection::{
    ConnectionFactory, Execute, MultiBulkReader, NodeConnection, StreamConnector, Transport,
    TransportConnector,
};
pub use distribution::{DistributionStrategy, HashRing, ModuloDistribution};
pub use pool::TopologyPool;
pub use registry::{CommandDescriptor, CommandKind, CommandRegistry, ReplyShape};
pub use replication::{ReplicationAggregate, ReplicationConfig};
pub use sentinel::{SentinelAggregate, SentinelConfig};
pub use strategy::ReplicationStrategy;

pub use crate::core::{
    config::{ConnectionParams, ProtocolVersion, Scheme},
    error::{RedisError, RedisResult},
    types::Role,
    value::RespValue,
};

//! Command registry
//!
//! A closed, enumerable table mapping command names to descriptors: how the
//! command is classified for replication routing and how its raw reply is
//! interpreted. The registry replaces open-ended reflection-style dispatch;
//! the replication strategy's read/write tables derive from it, and the
//! excluded command-builder layer consumes the reply shapes.
//!
//! The registry is an owned value built once at configuration time and
//! passed into the components that need it. There is no global table.

use crate::command::Command;
use crate::core::error::{RedisError, RedisResult};
use crate::core::value::RespValue;
use std::collections::HashMap;

/// Replication classification of a command
#[derive(Debug, Clone, Copy)]
pub enum CommandKind {
    /// May be served by a replica
    Read,
    /// Must be routed to the master
    Write,
    /// Must never run under a replication aggregate (transaction control,
    /// blocking subscribes, server administration)
    Disallowed,
    /// Read unless a modifier argument turns it into a write; the function
    /// returns true when the concrete invocation is a read
    Conditional(fn(&Command) -> bool),
}

/// How a raw reply is post-processed into its logical value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyShape {
    /// Hand the reply through untouched
    #[default]
    Raw,
    /// `+OK` status becomes boolean true
    OkStatus,
    /// Integer 0/1 becomes a boolean
    BoolFromInteger,
    /// Flat `[k1, v1, k2, v2]` array becomes a map of pairs
    PairsFromFlatArray,
    /// An `INFO`-style bulk string of `key:value` lines becomes a map
    InfoBlock,
}

impl ReplyShape {
    /// Interpret a raw reply according to this shape.
    ///
    /// # Errors
    ///
    /// Returns [`RedisError::Type`] when the reply does not have the shape
    /// the command descriptor promised.
    pub fn apply(self, reply: RespValue) -> RedisResult<RespValue> {
        match self {
            Self::Raw => Ok(reply),
            Self::OkStatus => {
                if reply.is_ok() {
                    Ok(RespValue::Boolean(true))
                } else {
                    Err(RedisError::Type(format!(
                        "Expected +OK status, got {reply:?}"
                    )))
                }
            }
            Self::BoolFromInteger => match reply {
                RespValue::Integer(0) => Ok(RespValue::Boolean(false)),
                RespValue::Integer(_) => Ok(RespValue::Boolean(true)),
                RespValue::Boolean(_) => Ok(reply),
                other => Err(RedisError::Type(format!(
                    "Expected integer reply, got {other:?}"
                ))),
            },
            Self::PairsFromFlatArray => match reply {
                RespValue::Map(_) => Ok(reply),
                RespValue::Array(items) => {
                    if items.len() % 2 != 0 {
                        return Err(RedisError::Type(
                            "Flat pair array has an odd number of elements".to_string(),
                        ));
                    }
                    let mut pairs = Vec::with_capacity(items.len() / 2);
                    let mut iter = items.into_iter();
                    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                        pairs.push((k, v));
                    }
                    Ok(RespValue::Map(pairs))
                }
                other => Err(RedisError::Type(format!(
                    "Expected array reply, got {other:?}"
                ))),
            },
            Self::InfoBlock => {
                let text = reply.as_string()?;
                let pairs = text
                    .lines()
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .filter_map(|line| line.split_once(':'))
                    .map(|(k, v)| {
                        (
                            RespValue::BulkString(k.as_bytes().to_vec().into()),
                            RespValue::BulkString(v.as_bytes().to_vec().into()),
                        )
                    })
                    .collect();
                Ok(RespValue::Map(pairs))
            }
        }
    }
}

/// Descriptor for one command name
#[derive(Debug, Clone, Copy)]
pub struct CommandDescriptor {
    /// Replication classification
    pub kind: CommandKind,
    /// Reply interpretation strategy
    pub reply: ReplyShape,
}

/// Registry of known commands, keyed by upper-cased name
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    table: HashMap<String, CommandDescriptor>,
}

fn sort_is_read(cmd: &Command) -> bool {
    !cmd.has_modifier("STORE")
}

fn georadius_is_read(cmd: &Command) -> bool {
    !cmd.has_modifier("STORE") && !cmd.has_modifier("STOREDIST")
}

impl CommandRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the default table.
    ///
    /// Commands absent from the table are classified as writes. That is the
    /// conservative default, since routing an unknown write to a replica
    /// would lose data while routing an unknown read to the master only
    /// costs locality.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        const READS: &[&str] = &[
            "EXISTS",
            "TYPE",
            "KEYS",
            "SCAN",
            "RANDOMKEY",
            "TTL",
            "PTTL",
            "DUMP",
            "TOUCH",
            "GET",
            "MGET",
            "STRLEN",
            "SUBSTR",
            "GETRANGE",
            "GETBIT",
            "BITCOUNT",
            "BITPOS",
            "LLEN",
            "LRANGE",
            "LINDEX",
            "LPOS",
            "SCARD",
            "SISMEMBER",
            "SMISMEMBER",
            "SINTER",
            "SINTERCARD",
            "SUNION",
            "SDIFF",
            "SMEMBERS",
            "SSCAN",
            "SRANDMEMBER",
            "ZCARD",
            "ZCOUNT",
            "ZLEXCOUNT",
            "ZSCORE",
            "ZMSCORE",
            "ZRANK",
            "ZREVRANK",
            "ZRANGE",
            "ZREVRANGE",
            "ZRANGEBYSCORE",
            "ZREVRANGEBYSCORE",
            "ZRANGEBYLEX",
            "ZREVRANGEBYLEX",
            "ZRANDMEMBER",
            "ZSCAN",
            "HGET",
            "HMGET",
            "HEXISTS",
            "HLEN",
            "HKEYS",
            "HVALS",
            "HGETALL",
            "HSCAN",
            "HSTRLEN",
            "HRANDFIELD",
            "PFCOUNT",
            "GEOHASH",
            "GEOPOS",
            "GEODIST",
            "GEOSEARCH",
            "XRANGE",
            "XREVRANGE",
            "XLEN",
            "XREAD",
            "PING",
            "ECHO",
            "TIME",
            "AUTH",
            "SELECT",
            "HELLO",
            "ROLE",
            "OBJECT",
            "MEMORY",
        ];
        for name in READS {
            registry.register(name, CommandKind::Read, ReplyShape::Raw);
        }

        const WRITES: &[&str] = &[
            "SET", "SETNX", "SETEX", "PSETEX", "SETRANGE", "SETBIT", "APPEND", "GETSET", "GETDEL",
            "GETEX", "DEL", "UNLINK", "EXPIRE", "PEXPIRE", "EXPIREAT", "PEXPIREAT", "PERSIST",
            "RENAME", "RENAMENX", "MOVE", "COPY", "RESTORE", "INCR", "INCRBY", "INCRBYFLOAT",
            "DECR", "DECRBY", "MSET", "MSETNX", "LPUSH", "RPUSH", "LPUSHX", "RPUSHX", "LPOP",
            "RPOP", "LSET", "LINSERT", "LREM", "LTRIM", "RPOPLPUSH", "LMOVE", "SADD", "SREM",
            "SPOP", "SMOVE", "SINTERSTORE", "SUNIONSTORE", "SDIFFSTORE", "ZADD", "ZINCRBY",
            "ZREM", "ZPOPMIN", "ZPOPMAX", "ZREMRANGEBYRANK", "ZREMRANGEBYSCORE",
            "ZREMRANGEBYLEX", "ZRANGESTORE", "ZUNIONSTORE", "ZINTERSTORE", "ZDIFFSTORE", "HSET",
            "HSETNX", "HMSET", "HDEL", "HINCRBY", "HINCRBYFLOAT", "PFADD", "PFMERGE", "GEOADD",
            "GEOSEARCHSTORE", "XADD", "XDEL", "XTRIM", "FLUSHDB", "FLUSHALL", "EVAL", "EVALSHA",
        ];
        for name in WRITES {
            registry.register(name, CommandKind::Write, ReplyShape::Raw);
        }

        const DISALLOWED: &[&str] = &[
            "MULTI",
            "EXEC",
            "DISCARD",
            "WATCH",
            "UNWATCH",
            "SUBSCRIBE",
            "UNSUBSCRIBE",
            "PSUBSCRIBE",
            "PUNSUBSCRIBE",
            "SHUTDOWN",
            "MONITOR",
            "SLAVEOF",
            "REPLICAOF",
            "SAVE",
            "BGSAVE",
            "BGREWRITEAOF",
            "CONFIG",
            "SLOWLOG",
        ];
        for name in DISALLOWED {
            registry.register(name, CommandKind::Disallowed, ReplyShape::Raw);
        }

        registry.register("SORT", CommandKind::Conditional(sort_is_read), ReplyShape::Raw);
        registry.register(
            "GEORADIUS",
            CommandKind::Conditional(georadius_is_read),
            ReplyShape::Raw,
        );
        registry.register(
            "GEORADIUSBYMEMBER",
            CommandKind::Conditional(georadius_is_read),
            ReplyShape::Raw,
        );

        // Reply shapes for commands whose raw reply is reshaped by
        // convention in every client
        registry.set_reply_shape("SET", ReplyShape::OkStatus);
        registry.set_reply_shape("MSET", ReplyShape::OkStatus);
        registry.set_reply_shape("SELECT", ReplyShape::OkStatus);
        registry.set_reply_shape("FLUSHDB", ReplyShape::OkStatus);
        registry.set_reply_shape("FLUSHALL", ReplyShape::OkStatus);
        registry.set_reply_shape("EXISTS", ReplyShape::BoolFromInteger);
        registry.set_reply_shape("EXPIRE", ReplyShape::BoolFromInteger);
        registry.set_reply_shape("PEXPIRE", ReplyShape::BoolFromInteger);
        registry.set_reply_shape("PERSIST", ReplyShape::BoolFromInteger);
        registry.set_reply_shape("SETNX", ReplyShape::BoolFromInteger);
        registry.set_reply_shape("SISMEMBER", ReplyShape::BoolFromInteger);
        registry.set_reply_shape("HEXISTS", ReplyShape::BoolFromInteger);
        registry.set_reply_shape("HSETNX", ReplyShape::BoolFromInteger);
        registry.set_reply_shape("HGETALL", ReplyShape::PairsFromFlatArray);
        registry.set_reply_shape("CONFIG", ReplyShape::PairsFromFlatArray);
        registry.set_reply_shape("MEMORY", ReplyShape::Raw);

        registry
    }

    /// Register or replace a command descriptor
    pub fn register(&mut self, name: &str, kind: CommandKind, reply: ReplyShape) {
        self.table
            .insert(name.to_ascii_uppercase(), CommandDescriptor { kind, reply });
    }

    /// Override only the reply shape of an already-registered command
    pub fn set_reply_shape(&mut self, name: &str, reply: ReplyShape) {
        if let Some(desc) = self.table.get_mut(&name.to_ascii_uppercase()) {
            desc.reply = reply;
        }
    }

    /// Look up a descriptor by command name (case-insensitive)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<CommandDescriptor> {
        self.table.get(&name.to_ascii_uppercase()).copied()
    }

    /// Classify a concrete command invocation. Unregistered commands are
    /// writes; conditional commands consult their modifier check.
    #[must_use]
    pub fn classify(&self, cmd: &Command) -> CommandKind {
        match self.get(cmd.name()) {
            Some(CommandDescriptor {
                kind: CommandKind::Conditional(is_read),
                ..
            }) => {
                if is_read(cmd) {
                    CommandKind::Read
                } else {
                    CommandKind::Write
                }
            }
            Some(desc) => desc.kind,
            None => CommandKind::Write,
        }
    }

    /// Reply shape for a command name; `Raw` for unregistered commands
    #[must_use]
    pub fn reply_shape(&self, name: &str) -> ReplyShape {
        self.get(name).map(|d| d.reply).unwrap_or_default()
    }
}

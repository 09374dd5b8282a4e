//! Replication strategy: pure read/write classification policy
//!
//! Decides whether a command must go to the master or may be served by a
//! replica. The tables derive from the [`CommandRegistry`]; Lua scripts are
//! opaque to the server-side classification, so `EVAL`/`EVALSHA` count as
//! writes unless the exact script body (or its SHA1 digest, for `EVALSHA`)
//! has been registered as read-only.

use crate::command::Command;
use crate::core::value::RespValue;
use crate::registry::{CommandKind, CommandRegistry, ReplyShape};
use std::collections::HashSet;

/// Classification policy consulted by replication and sentinel aggregates
#[derive(Debug, Clone)]
pub struct ReplicationStrategy {
    registry: CommandRegistry,
    read_scripts: HashSet<String>,
    read_script_digests: HashSet<String>,
}

impl Default for ReplicationStrategy {
    fn default() -> Self {
        Self::new(CommandRegistry::with_defaults())
    }
}

impl ReplicationStrategy {
    /// Create a strategy over the given registry
    #[must_use]
    pub fn new(registry: CommandRegistry) -> Self {
        Self {
            registry,
            read_scripts: HashSet::new(),
            read_script_digests: HashSet::new(),
        }
    }

    /// Register a Lua script body as read-only. Matching is by exact source
    /// body, since the server cannot tell the client whether a script only
    /// reads.
    pub fn set_script_read_only(&mut self, body: impl Into<String>) {
        self.read_scripts.insert(body.into());
    }

    /// Register a script SHA1 digest as read-only, for `EVALSHA` routing
    pub fn set_script_digest_read_only(&mut self, sha1: impl Into<String>) {
        self.read_script_digests.insert(sha1.into().to_lowercase());
    }

    /// Whether an exact script body has been registered as read-only
    #[must_use]
    pub fn is_script_read_only(&self, body: &str) -> bool {
        self.read_scripts.contains(body)
    }

    /// Whether the command may be routed to a replica
    #[must_use]
    pub fn is_read_operation(&self, cmd: &Command) -> bool {
        let name = cmd.name().to_ascii_uppercase();
        match name.as_str() {
            "EVAL" => self.first_arg_utf8(cmd).is_some_and(|s| self.is_script_read_only(&s)),
            "EVALSHA" => self
                .first_arg_utf8(cmd)
                .is_some_and(|s| self.read_script_digests.contains(&s.to_lowercase())),
            _ => matches!(self.registry.classify(cmd), CommandKind::Read),
        }
    }

    /// Whether the command must never run under a replication aggregate,
    /// regardless of role
    #[must_use]
    pub fn is_disallowed(&self, cmd: &Command) -> bool {
        matches!(self.registry.classify(cmd), CommandKind::Disallowed)
    }

    /// Reply interpretation shape for a command, from the shared registry
    #[must_use]
    pub fn reply_shape(&self, cmd: &Command) -> ReplyShape {
        self.registry.reply_shape(cmd.name())
    }

    /// Interpret a raw reply for a command according to its registered shape
    ///
    /// # Errors
    ///
    /// Returns a type error when the reply does not match the shape.
    pub fn interpret_reply(
        &self,
        cmd: &Command,
        reply: RespValue,
    ) -> crate::core::error::RedisResult<RespValue> {
        self.reply_shape(cmd).apply(reply)
    }

    fn first_arg_utf8(&self, cmd: &Command) -> Option<String> {
        cmd.arguments()
            .first()
            .and_then(|a| std::str::from_utf8(a).ok())
            .map(str::to_string)
    }
}

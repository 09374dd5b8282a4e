//! Command value object
//!
//! A [`Command`] is the unit handed to connections and aggregates: a verb
//! plus an ordered list of binary-safe arguments. It carries no connection
//! state, so it can be re-executed verbatim when an aggregate retries after
//! a connection failure.

use bytes::Bytes;

/// An immutable-after-build command: verb plus ordered byte-string arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    /// Create a command with no arguments
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<Bytes>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Command verb as given at construction
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered argument list
    #[must_use]
    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }

    /// First argument, conventionally the key, used for distribution hashing
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.args.first().map(|b| b.as_ref())
    }

    /// Whether any argument equals the given modifier, compared
    /// case-insensitively (`STORE`, `STOREDIST`, ...)
    #[must_use]
    pub fn has_modifier(&self, modifier: &str) -> bool {
        self.args
            .iter()
            .any(|a| a.eq_ignore_ascii_case(modifier.as_bytes()))
    }
}

/// Shorthand constructor: `cmd("SET").arg("key").arg("value")`
#[must_use]
pub fn cmd(name: &str) -> Command {
    Command::new(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let c = cmd("SET").arg("key").arg("value");
        assert_eq!(c.name(), "SET");
        assert_eq!(c.arguments().len(), 2);
        assert_eq!(c.key(), Some(&b"key"[..]));
    }

    #[test]
    fn test_structural_identity() {
        let a = cmd("GET").arg("foo");
        let b = cmd("GET").arg("foo");
        assert_eq!(a, b);
    }

    #[test]
    fn test_has_modifier_case_insensitive() {
        let c = cmd("SORT").arg("mylist").arg("store").arg("dest");
        assert!(c.has_modifier("STORE"));
        assert!(!c.has_modifier("STOREDIST"));
    }

    #[test]
    fn test_binary_arguments() {
        let c = cmd("SET").arg("key").arg(&b"a\r\nb"[..]);
        assert_eq!(c.arguments()[1].as_ref(), b"a\r\nb");
    }
}

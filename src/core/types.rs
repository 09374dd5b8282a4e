//! Shared small types

use std::fmt;

/// Role of a node within a replicated deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepts writes; source of replication
    Master,
    /// Read-only copy of a master
    Replica,
    /// Sentinel monitor; never a valid dispatch target
    Sentinel,
}

impl Role {
    /// Parse a role name as it appears in URIs and server replies.
    /// `slave` is accepted as the historical spelling of `replica`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "master" => Some(Self::Master),
            "slave" | "replica" => Some(Self::Replica),
            "sentinel" => Some(Self::Sentinel),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Replica => write!(f, "replica"),
            Self::Sentinel => write!(f, "sentinel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("master"), Some(Role::Master));
        assert_eq!(Role::parse("slave"), Some(Role::Replica));
        assert_eq!(Role::parse("replica"), Some(Role::Replica));
        assert_eq!(Role::parse("sentinel"), Some(Role::Sentinel));
        assert_eq!(Role::parse("primary"), None);
    }
}

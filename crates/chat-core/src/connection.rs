//! Connection identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix for server-generated connection IDs.
pub const CONNECTION_ID_PREFIX: &str = "conn-";

/// Opaque identifier for one live client connection.
///
/// Exists only between connect and disconnect; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds a connection ID from the server's connection counter.
    ///
    /// A client-supplied name is kept as a readable prefix, the counter
    /// keeps the ID unique when two clients pick the same name.
    pub fn assign(connection_number: u64, client_name: Option<&str>) -> Self {
        match client_name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => Self(format!("{name}-{connection_number}")),
            None => Self(format!("{CONNECTION_ID_PREFIX}{connection_number}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_without_name() {
        assert_eq!(ConnectionId::assign(7, None).as_str(), "conn-7");
    }

    #[test]
    fn test_assign_with_name_stays_unique() {
        let a = ConnectionId::assign(1, Some("web"));
        let b = ConnectionId::assign(2, Some("web"));
        assert_eq!(a.as_str(), "web-1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_assign_ignores_blank_name() {
        assert_eq!(ConnectionId::assign(3, Some("   ")).as_str(), "conn-3");
    }
}

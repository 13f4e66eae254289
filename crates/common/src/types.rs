use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a content stream.
///
/// A content stream is one branch's mutation history. Wrapping the UUID keeps
/// content stream ids from being mixed up with event or command ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentStreamId(Uuid);

impl ContentStreamId {
    /// Creates a new random content stream ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a content stream ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContentStreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContentStreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ContentStreamId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for ContentStreamId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<ContentStreamId> for Uuid {
    fn from(id: ContentStreamId) -> Self {
        id.0
    }
}

/// Name of a workspace, e.g. `live` or `user-alice`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceName(String);

impl WorkspaceName {
    /// Creates a workspace name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The conventional name of the root workspace.
    pub fn live() -> Self {
        Self("live".to_string())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkspaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkspaceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a node aggregate, stable across all content streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAggregateId(String);

impl NodeAggregateId {
    /// Creates a node aggregate id from a string value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a node aggregate id with a random value.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeAggregateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAggregateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeAggregateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

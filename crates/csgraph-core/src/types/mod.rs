//! # Core Type Definitions
//!
//! This module contains the identifiers and records shared by every layer of
//! the engine:
//! - Graph identifiers (`Key`, `Collection`, `NodeId`, `Relation`, `Direction`)
//! - Edge payloads (`EdgeAttrs`, `Edge`)
//! - Lifecycle records (`Status`, `Timestamp`, `VersionInfo`)
//! - Error types (`CsGraphError`)
//!
//! ## Ordering
//!
//! Every identifier implements `Ord` so that graph contents can live in
//! `BTreeMap`/`BTreeSet` and iterate in a stable order. Keys are decimal
//! strings allocated from a counter; they order numerically.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// GRAPH IDENTIFIERS
// =============================================================================

/// Document key, unique within a collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(pub String);

impl Key {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Shorter keys first so that "9" sorts before "10".
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Document collections of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Collection {
    State,
    Reference,
    Reaction,
    Organization,
    User,
    CrossSection,
    CrossSectionSet,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::State,
        Collection::Reference,
        Collection::Reaction,
        Collection::Organization,
        Collection::User,
        Collection::CrossSection,
        Collection::CrossSectionSet,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "State",
            Self::Reference => "Reference",
            Self::Reaction => "Reaction",
            Self::Organization => "Organization",
            Self::User => "User",
            Self::CrossSection => "CrossSection",
            Self::CrossSectionSet => "CrossSectionSet",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = CsGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| CsGraphError::Serialization(format!("unknown collection '{s}'")))
    }
}

/// Fully qualified node identifier, rendered as `Collection/key`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    pub collection: Collection,
    pub key: Key,
}

impl NodeId {
    #[must_use]
    pub fn new(collection: Collection, key: impl Into<String>) -> Self {
        Self {
            collection,
            key: Key(key.into()),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

impl FromStr for NodeId {
    type Err = CsGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (collection, key) = s
            .split_once('/')
            .ok_or_else(|| CsGraphError::Serialization(format!("malformed node id '{s}'")))?;
        if key.is_empty() {
            return Err(CsGraphError::Serialization(format!(
                "malformed node id '{s}'"
            )));
        }
        Ok(Self::new(collection.parse()?, key))
    }
}

impl TryFrom<String> for NodeId {
    type Error = CsGraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(value: NodeId) -> Self {
        value.to_string()
    }
}

/// Edge relations of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Relation {
    /// Reaction -> State, carries `count`.
    Consumes,
    /// Reaction -> State, carries `count`.
    Produces,
    /// Item -> Reference, may carry `comments`.
    References,
    /// CrossSection -> CrossSectionSet.
    IsPartOf,
    /// Newer CrossSection -> the revision it supersedes.
    CrossSectionHistory,
    /// Newer CrossSectionSet -> the revision it supersedes.
    CrossSectionSetHistory,
    /// User -> Organization.
    MemberOf,
    /// Less detailed State -> more detailed State.
    HasDirectSubstate,
    /// Leaf State -> compound State.
    InCompound,
}

impl Relation {
    pub const ALL: [Relation; 9] = [
        Relation::Consumes,
        Relation::Produces,
        Relation::References,
        Relation::IsPartOf,
        Relation::CrossSectionHistory,
        Relation::CrossSectionSetHistory,
        Relation::MemberOf,
        Relation::HasDirectSubstate,
        Relation::InCompound,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Consumes => "Consumes",
            Self::Produces => "Produces",
            Self::References => "References",
            Self::IsPartOf => "IsPartOf",
            Self::CrossSectionHistory => "CrossSectionHistory",
            Self::CrossSectionSetHistory => "CrossSectionSetHistory",
            Self::MemberOf => "MemberOf",
            Self::HasDirectSubstate => "HasDirectSubstate",
            Self::InCompound => "InCompound",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = CsGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| CsGraphError::Serialization(format!("unknown relation '{s}'")))
    }
}

/// Direction of an edge traversal relative to the start node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

// =============================================================================
// EDGES
// =============================================================================

/// Attributes stored on an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
}

impl EdgeAttrs {
    #[must_use]
    pub fn with_count(count: u32) -> Self {
        Self {
            count: Some(count),
            comments: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_comments(comments: Vec<String>) -> Self {
        Self {
            count: None,
            comments,
        }
    }
}

/// A directed, labelled edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub relation: Relation,
    pub from: NodeId,
    pub to: NodeId,
    pub attrs: EdgeAttrs,
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Lifecycle status of a versioned item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Draft,
    Published,
    Archived,
    Retracted,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
            Self::Retracted => "retracted",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 3339 timestamp kept in the exact textual form it was written with.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(String);

impl Timestamp {
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Timestamp {
    type Error = CsGraphError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        chrono::DateTime::parse_from_rfc3339(&value)
            .map_err(|e| CsGraphError::Serialization(format!("invalid timestamp '{value}': {e}")))?;
        Ok(Self(value))
    }
}

impl From<Timestamp> for String {
    fn from(value: Timestamp) -> Self {
        value.0
    }
}

/// Version metadata carried by every versioned item.
///
/// This JSON shape is an external contract and round-trips exactly:
/// `{version, status, createdOn, commitMessage?, retractMessage?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: u32,
    pub status: Status,
    pub created_on: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retract_message: Option<String>,
}

impl VersionInfo {
    /// First revision of a new item.
    #[must_use]
    pub fn initial(status: Status, commit_message: Option<String>) -> Self {
        Self {
            version: 1,
            status,
            created_on: Timestamp::now(),
            commit_message: non_empty(commit_message),
            retract_message: None,
        }
    }

    /// Version record of a new draft branched off this revision.
    #[must_use]
    pub fn successor_draft(&self, commit_message: Option<String>) -> Self {
        Self {
            version: self.version.saturating_add(1),
            status: Status::Draft,
            created_on: Timestamp::now(),
            commit_message: non_empty(commit_message),
            retract_message: None,
        }
    }

    /// Check the record invariants: version >= 1, `retractMessage` present
    /// iff retracted, messages non-empty when present.
    pub fn validate(&self) -> Result<(), CsGraphError> {
        if self.version == 0 {
            return Err(CsGraphError::Validation("version must be >= 1".to_string()));
        }
        match (&self.retract_message, self.status) {
            (Some(m), Status::Retracted) if !m.trim().is_empty() => {}
            (None, Status::Retracted) | (Some(_), Status::Retracted) => {
                return Err(CsGraphError::Validation(
                    "retracted item requires a retract message".to_string(),
                ));
            }
            (Some(_), _) => {
                return Err(CsGraphError::Validation(format!(
                    "retract message on {} item",
                    self.status
                )));
            }
            (None, _) => {}
        }
        if self.commit_message.as_deref().is_some_and(str::is_empty) {
            return Err(CsGraphError::Validation(
                "commit message must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_empty(message: Option<String>) -> Option<String> {
    message.filter(|m| !m.trim().is_empty())
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// One set that a publish would leave pointing at an archived item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishConflict {
    /// Draft item of the set being published.
    pub item: Key,
    /// Published predecessor that the publish would archive.
    pub predecessor: Key,
    /// Other sets still containing the predecessor.
    pub sets: Vec<Key>,
}

impl fmt::Display for PublishConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (replaces {}) used by set(s) {}",
            self.item,
            self.predecessor,
            join_keys(&self.sets)
        )
    }
}

/// Errors that can occur in csgraph operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CsGraphError {
    /// The operation targets a document that does not exist.
    #[error("{0} not found")]
    NotFound(NodeId),

    /// The requested transition is not legal from the current status.
    #[error("Can not {action} {id} due to invalid status {status}")]
    InvalidStatus {
        id: NodeId,
        status: Status,
        action: &'static str,
    },

    /// A published item already has a draft descendant.
    #[error("Can not create draft of {id}, it already has draft {draft}")]
    DraftConflict { id: NodeId, draft: Key },

    /// The item is still attached to sets that the action would corrupt.
    #[error("Can not {action} {id}, it belongs to set(s) {}", join_keys(.sets))]
    BelongsToSet {
        id: NodeId,
        sets: Vec<Key>,
        action: &'static str,
    },

    /// Publishing would archive items other sets still point at.
    #[error("Publishing would affect other sets: {}", join_conflicts(.0))]
    PublishConflict(Vec<PublishConflict>),

    /// External citation lookup failed.
    #[error("Could not resolve reference {doi}: {reason}")]
    Resolution { doi: String, reason: String },

    /// Caller supplied document is inconsistent.
    #[error("Invalid document: {0}")]
    Validation(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backing store failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

fn join_keys(keys: &[Key]) -> String {
    keys.iter()
        .map(Key::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_conflicts(conflicts: &[PublishConflict]) -> String {
    conflicts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for CsGraphError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

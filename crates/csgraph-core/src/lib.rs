//! # csgraph-core
//!
//! The versioned document graph engine for cross section datasets - THE LOGIC.
//!
//! Cross sections are versioned items that move through a
//! draft → published → archived / retracted lifecycle. Sets group items,
//! and one item may belong to several sets at once. States, references and
//! reactions are content addressed and shared between items.
//!
//! ## Layers
//!
//! - `graph` / `storage` / `session`: the graph-store capability traits, the
//!   in-memory and redb backends, and transactional access to either
//! - `store` / `reaction`: deduplicated insert of shared entities
//! - `versioning` / `section`: the item lifecycle state machine
//! - `set` / `orchestrator`: set composition, publish, retract and delete
//! - `query` / `export` / `prune`: read side, snapshots and garbage collection
//! - `engine`: one facade over all of the above
//!
//! ## Architectural Constraints
//!
//! - Has NO async, NO network dependencies (pure Rust)
//! - Deterministic: `BTreeMap` ordering everywhere, no float arithmetic
//! - Every mutating operation runs in exactly one store transaction
//! - Citation lookup is injected through `CitationResolver`

// =============================================================================
// MODULES
// =============================================================================

pub mod digest;
pub mod document;
pub mod engine;
pub mod equality;
pub mod export;
pub mod graph;
pub mod orchestrator;
pub mod primitives;
pub mod prune;
pub mod query;
pub mod reaction;
pub mod reference;
pub mod section;
pub mod session;
pub mod set;
pub mod species;
pub mod storage;
pub mod store;
pub mod types;
pub mod versioning;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Collection, CsGraphError, Direction, Edge, EdgeAttrs, Key, NodeId, PublishConflict, Relation,
    Status, Timestamp, VersionInfo,
};

// =============================================================================
// RE-EXPORTS: Documents
// =============================================================================

pub use document::{
    CrossSectionInfo, CrossSectionRecord, CrossSectionSetRecord, Process, ProcessInfo,
    SectionDocument, SetDocument, StorageKind,
};
pub use reaction::{Reaction, ReactionEntry, ReactionTypeTag};
pub use reference::{CitationResolver, CslRecord, NoResolver, ReferenceInput, StaticResolver};
pub use species::State;

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use engine::{Engine, StoreStats};
pub use export::{
    Snapshot, SnapshotHeader, decode_snapshot, export_snapshot, import_snapshot, snapshot_hash,
};
pub use graph::{Graph, GraphStore, GraphView};
pub use orchestrator::PublishOutcome;
pub use prune::PruneReport;
pub use query::{
    ChoiceTree, OwnedSet, Paging, SectionFilter, SectionHeading, SectionView, SetFacets,
    SetFilter, SetHeading, SetSort, SetView, SortField, SortOrder,
};
pub use session::{Session, StorageBackend};
pub use storage::RedbGraph;
pub use versioning::{Deletion, HistoryEntry};

//! # Session Module
//!
//! Transactional access to the graph, independent of the backend.
//!
//! ## Storage Backends
//!
//! Session supports two storage backends:
//! - `InMemory`: Uses the in-memory `Graph` (fast, volatile unless saved as
//!   a snapshot)
//! - `Persistent`: Uses `RedbGraph` for disk-backed ACID storage
//!
//! ## Transactions
//!
//! `Session::write` runs a closure as one unit. The redb backend wraps it in
//! a write transaction. The in-memory backend runs it against a staged copy
//! that replaces the live graph only when the closure returns `Ok`, so a
//! failed operation leaves no partial writes on either backend.

use crate::graph::{Graph, GraphStore, GraphView};
use crate::storage::RedbGraph;
use crate::types::CsGraphError;
use std::path::Path;

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory graph (fast, volatile).
    InMemory(Graph),
    /// Disk-backed graph using redb (ACID, persistent).
    Persistent(RedbGraph),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(Graph::new())
    }
}

/// A Session owns the storage backend and hands out transactional views.
#[derive(Debug, Default)]
pub struct Session {
    backend: StorageBackend,
}

impl Session {
    /// Create a new empty session with in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session over an existing in-memory graph.
    #[must_use]
    pub fn with_graph(graph: Graph) -> Self {
        Self {
            backend: StorageBackend::InMemory(graph),
        }
    }

    /// Create a session backed by a redb database at `path`.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, CsGraphError> {
        Ok(Self {
            backend: StorageBackend::Persistent(RedbGraph::open(path)?),
        })
    }

    /// Check if this session uses persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// In-memory graph, if this is an in-memory session.
    #[must_use]
    pub fn graph(&self) -> Option<&Graph> {
        match &self.backend {
            StorageBackend::InMemory(graph) => Some(graph),
            StorageBackend::Persistent(_) => None,
        }
    }

    /// Run a read-only closure against a consistent view.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&dyn GraphView) -> Result<T, CsGraphError>,
    ) -> Result<T, CsGraphError> {
        match &self.backend {
            StorageBackend::InMemory(graph) => f(graph),
            StorageBackend::Persistent(redb) => redb.read(f),
        }
    }

    /// Run a mutating closure as one transaction.
    pub fn write<T>(
        &mut self,
        f: impl FnOnce(&mut dyn GraphStore) -> Result<T, CsGraphError>,
    ) -> Result<T, CsGraphError> {
        match &mut self.backend {
            StorageBackend::InMemory(graph) => {
                let mut staged = graph.clone();
                let value = f(&mut staged)?;
                *graph = staged;
                Ok(value)
            }
            StorageBackend::Persistent(redb) => redb.write(f),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

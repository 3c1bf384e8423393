//! # Persistent Storage
//!
//! Disk-backed implementation of the graph-store capability traits.

mod redb_graph;

pub use redb_graph::RedbGraph;

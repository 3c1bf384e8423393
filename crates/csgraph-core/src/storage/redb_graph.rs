//! # redb-backed Graph Storage
//!
//! A disk-backed graph store using the redb embedded database, providing:
//! - ACID transactions (one redb transaction per engine operation)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! ## Key layout
//!
//! All tables use string keys so that prefix ranges select a collection or
//! the edges of one node:
//! - documents: `Collection/key`
//! - edges: `Relation|from|to` (outbound) and `Relation|to|from` (inbound)
//! - digests: `Collection|digest`
//!
//! `/` sorts directly before `0`, and `|` directly before `}`, which gives
//! the exclusive upper bound of each prefix range.

use crate::graph::{GraphStore, GraphView};
use crate::types::{Collection, CsGraphError, Direction, Edge, EdgeAttrs, Key, NodeId, Relation};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde_json::Value;
use std::fmt::Display;
use std::path::Path;

/// Table for documents: "Collection/key" -> JSON bytes
const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// Table for outbound edges: "Relation|from|to" -> JSON edge attributes
const EDGES_OUT: TableDefinition<&str, &[u8]> = TableDefinition::new("edges_out");

/// Table for the inbound index: "Relation|to|from" -> marker
const EDGES_IN: TableDefinition<&str, u8> = TableDefinition::new("edges_in");

/// Table for content digests: "Collection|digest" -> key
const DIGESTS: TableDefinition<&str, &str> = TableDefinition::new("digests");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const LAST_KEY: &str = "last_key";

fn storage(e: impl Display) -> CsGraphError {
    CsGraphError::Storage(e.to_string())
}

fn collection_range(collection: Collection) -> (String, String) {
    (format!("{collection}/"), format!("{collection}0"))
}

fn edge_prefix(relation: Relation, node: &NodeId) -> (String, String) {
    (format!("{relation}|{node}|"), format!("{relation}|{node}}}"))
}

fn edge_key(relation: Relation, a: &NodeId, b: &NodeId) -> String {
    format!("{relation}|{a}|{b}")
}

fn parse_edge_key(key: &str) -> Result<(Relation, NodeId, NodeId), CsGraphError> {
    let mut parts = key.splitn(3, '|');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(r), Some(a), Some(b)) => Ok((r.parse()?, a.parse()?, b.parse()?)),
        _ => Err(CsGraphError::Storage(format!("malformed edge key '{key}'"))),
    }
}

// =============================================================================
// TABLE HELPERS (shared by read and write transactions)
// =============================================================================

fn read_document<T>(table: &T, id: &NodeId) -> Result<Option<Value>, CsGraphError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let key = id.to_string();
    match table.get(key.as_str()).map_err(storage)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_documents<T>(table: &T, collection: Collection) -> Result<Vec<(Key, Value)>, CsGraphError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let (start, end) = collection_range(collection);
    let mut result = Vec::new();
    for entry in table.range(start.as_str()..end.as_str()).map_err(storage)? {
        let (k, v) = entry.map_err(storage)?;
        let id: NodeId = k.value().parse()?;
        result.push((id.key, serde_json::from_slice(v.value())?));
    }
    result.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(result)
}

fn read_digest<T>(
    table: &T,
    collection: Collection,
    digest: &str,
) -> Result<Option<Key>, CsGraphError>
where
    T: ReadableTable<&'static str, &'static str>,
{
    let key = format!("{collection}|{digest}");
    Ok(table
        .get(key.as_str())
        .map_err(storage)?
        .map(|guard| Key::from(guard.value())))
}

fn all_digests<T>(table: &T) -> Result<Vec<(Collection, String, Key)>, CsGraphError>
where
    T: ReadableTable<&'static str, &'static str>,
{
    let mut result = Vec::new();
    for entry in table.iter().map_err(storage)? {
        let (k, v) = entry.map_err(storage)?;
        let (collection, digest) = k
            .value()
            .split_once('|')
            .ok_or_else(|| CsGraphError::Storage(format!("malformed digest key '{}'", k.value())))?;
        result.push((collection.parse()?, digest.to_string(), Key::from(v.value())));
    }
    Ok(result)
}

fn outbound_edges<T>(
    table: &T,
    relation: Relation,
    node: &NodeId,
) -> Result<Vec<(NodeId, EdgeAttrs)>, CsGraphError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let (start, end) = edge_prefix(relation, node);
    let mut result = Vec::new();
    for entry in table.range(start.as_str()..end.as_str()).map_err(storage)? {
        let (k, v) = entry.map_err(storage)?;
        let (_, _, to) = parse_edge_key(k.value())?;
        result.push((to, serde_json::from_slice(v.value())?));
    }
    result.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(result)
}

fn inbound_sources<T>(
    table: &T,
    relation: Relation,
    node: &NodeId,
) -> Result<Vec<NodeId>, CsGraphError>
where
    T: ReadableTable<&'static str, u8>,
{
    let (start, end) = edge_prefix(relation, node);
    let mut result = Vec::new();
    for entry in table.range(start.as_str()..end.as_str()).map_err(storage)? {
        let (k, _) = entry.map_err(storage)?;
        let (_, _, from) = parse_edge_key(k.value())?;
        result.push(from);
    }
    result.sort();
    Ok(result)
}

fn read_edge<T>(
    table: &T,
    relation: Relation,
    from: &NodeId,
    to: &NodeId,
) -> Result<Option<EdgeAttrs>, CsGraphError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let key = edge_key(relation, from, to);
    match table.get(key.as_str()).map_err(storage)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn neighbours_in<O, I>(
    out: &O,
    inbound: &I,
    relation: Relation,
    node: &NodeId,
    direction: Direction,
) -> Result<Vec<(NodeId, EdgeAttrs)>, CsGraphError>
where
    O: ReadableTable<&'static str, &'static [u8]>,
    I: ReadableTable<&'static str, u8>,
{
    match direction {
        Direction::Outbound => outbound_edges(out, relation, node),
        Direction::Inbound => {
            let mut result = Vec::new();
            for from in inbound_sources(inbound, relation, node)? {
                if let Some(attrs) = read_edge(out, relation, &from, node)? {
                    result.push((from, attrs));
                }
            }
            Ok(result)
        }
    }
}

fn relation_edges<T>(table: &T, relation: Relation) -> Result<Vec<Edge>, CsGraphError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let start = format!("{relation}|");
    let end = format!("{relation}}}");
    let mut result = Vec::new();
    for entry in table.range(start.as_str()..end.as_str()).map_err(storage)? {
        let (k, v) = entry.map_err(storage)?;
        let (_, from, to) = parse_edge_key(k.value())?;
        result.push(Edge {
            relation,
            from,
            to,
            attrs: serde_json::from_slice(v.value())?,
        });
    }
    Ok(result)
}

fn read_last_key<T>(table: &T) -> Result<u64, CsGraphError>
where
    T: ReadableTable<&'static str, u64>,
{
    Ok(table
        .get(LAST_KEY)
        .map_err(storage)?
        .map(|v| v.value())
        .unwrap_or(0))
}

// =============================================================================
// DATABASE HANDLE
// =============================================================================

/// A disk-backed graph store using redb.
///
/// Every engine operation runs in its own transaction: `read` hands out a
/// snapshot view, `write` commits when the closure succeeds and aborts
/// otherwise.
pub struct RedbGraph {
    /// The redb database handle.
    db: Database,
}

impl std::fmt::Debug for RedbGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbGraph").finish_non_exhaustive()
    }
}

impl RedbGraph {
    /// Open or create a graph database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CsGraphError> {
        let db = Database::create(path.as_ref()).map_err(storage)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(storage)?;
            let _ = write_txn.open_table(DOCUMENTS).map_err(storage)?;
            let _ = write_txn.open_table(EDGES_OUT).map_err(storage)?;
            let _ = write_txn.open_table(EDGES_IN).map_err(storage)?;
            let _ = write_txn.open_table(DIGESTS).map_err(storage)?;
            let _ = write_txn.open_table(METADATA).map_err(storage)?;
            write_txn.commit().map_err(storage)?;
        }

        Ok(Self { db })
    }

    /// Run a read-only closure against a consistent snapshot.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&dyn GraphView) -> Result<T, CsGraphError>,
    ) -> Result<T, CsGraphError> {
        let reader = RedbReader {
            txn: self.db.begin_read().map_err(storage)?,
        };
        f(&reader)
    }

    /// Run a mutating closure inside one write transaction.
    ///
    /// Commits when the closure returns `Ok`, aborts on `Err`.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&mut dyn GraphStore) -> Result<T, CsGraphError>,
    ) -> Result<T, CsGraphError> {
        let mut writer = RedbWriter {
            txn: self.db.begin_write().map_err(storage)?,
        };
        match f(&mut writer) {
            Ok(value) => {
                writer.txn.commit().map_err(storage)?;
                Ok(value)
            }
            Err(e) => {
                writer.txn.abort().map_err(storage)?;
                Err(e)
            }
        }
    }
}

// =============================================================================
// READ TRANSACTION
// =============================================================================

struct RedbReader {
    txn: ReadTransaction,
}

impl GraphView for RedbReader {
    fn get(&self, id: &NodeId) -> Result<Option<Value>, CsGraphError> {
        let table = self.txn.open_table(DOCUMENTS).map_err(storage)?;
        read_document(&table, id)
    }

    fn scan(&self, collection: Collection) -> Result<Vec<(Key, Value)>, CsGraphError> {
        let table = self.txn.open_table(DOCUMENTS).map_err(storage)?;
        scan_documents(&table, collection)
    }

    fn lookup_digest(
        &self,
        collection: Collection,
        digest: &str,
    ) -> Result<Option<Key>, CsGraphError> {
        let table = self.txn.open_table(DIGESTS).map_err(storage)?;
        read_digest(&table, collection, digest)
    }

    fn neighbours(
        &self,
        relation: Relation,
        node: &NodeId,
        direction: Direction,
    ) -> Result<Vec<(NodeId, EdgeAttrs)>, CsGraphError> {
        let out = self.txn.open_table(EDGES_OUT).map_err(storage)?;
        let inbound = self.txn.open_table(EDGES_IN).map_err(storage)?;
        neighbours_in(&out, &inbound, relation, node, direction)
    }

    fn edges(&self, relation: Relation) -> Result<Vec<Edge>, CsGraphError> {
        let table = self.txn.open_table(EDGES_OUT).map_err(storage)?;
        relation_edges(&table, relation)
    }

    fn digests(&self) -> Result<Vec<(Collection, String, Key)>, CsGraphError> {
        let table = self.txn.open_table(DIGESTS).map_err(storage)?;
        all_digests(&table)
    }

    fn last_key(&self) -> Result<u64, CsGraphError> {
        let table = self.txn.open_table(METADATA).map_err(storage)?;
        read_last_key(&table)
    }

    fn edge(
        &self,
        relation: Relation,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<Option<EdgeAttrs>, CsGraphError> {
        let table = self.txn.open_table(EDGES_OUT).map_err(storage)?;
        read_edge(&table, relation, from, to)
    }
}

// =============================================================================
// WRITE TRANSACTION
// =============================================================================

struct RedbWriter {
    txn: WriteTransaction,
}

impl GraphView for RedbWriter {
    fn get(&self, id: &NodeId) -> Result<Option<Value>, CsGraphError> {
        let table = self.txn.open_table(DOCUMENTS).map_err(storage)?;
        read_document(&table, id)
    }

    fn scan(&self, collection: Collection) -> Result<Vec<(Key, Value)>, CsGraphError> {
        let table = self.txn.open_table(DOCUMENTS).map_err(storage)?;
        scan_documents(&table, collection)
    }

    fn lookup_digest(
        &self,
        collection: Collection,
        digest: &str,
    ) -> Result<Option<Key>, CsGraphError> {
        let table = self.txn.open_table(DIGESTS).map_err(storage)?;
        read_digest(&table, collection, digest)
    }

    fn neighbours(
        &self,
        relation: Relation,
        node: &NodeId,
        direction: Direction,
    ) -> Result<Vec<(NodeId, EdgeAttrs)>, CsGraphError> {
        let out = self.txn.open_table(EDGES_OUT).map_err(storage)?;
        let inbound = self.txn.open_table(EDGES_IN).map_err(storage)?;
        neighbours_in(&out, &inbound, relation, node, direction)
    }

    fn edges(&self, relation: Relation) -> Result<Vec<Edge>, CsGraphError> {
        let table = self.txn.open_table(EDGES_OUT).map_err(storage)?;
        relation_edges(&table, relation)
    }

    fn digests(&self) -> Result<Vec<(Collection, String, Key)>, CsGraphError> {
        let table = self.txn.open_table(DIGESTS).map_err(storage)?;
        all_digests(&table)
    }

    fn last_key(&self) -> Result<u64, CsGraphError> {
        let table = self.txn.open_table(METADATA).map_err(storage)?;
        read_last_key(&table)
    }

    fn count(&self, collection: Collection) -> Result<usize, CsGraphError> {
        let table = self.txn.open_table(DOCUMENTS).map_err(storage)?;
        if table.len().map_err(storage)? == 0 {
            return Ok(0);
        }
        let (start, end) = collection_range(collection);
        Ok(table
            .range(start.as_str()..end.as_str())
            .map_err(storage)?
            .count())
    }
}

impl GraphStore for RedbWriter {
    fn allocate_key(&mut self) -> Result<Key, CsGraphError> {
        let mut table = self.txn.open_table(METADATA).map_err(storage)?;
        let next = read_last_key(&table)?.saturating_add(1);
        table.insert(LAST_KEY, next).map_err(storage)?;
        Ok(Key(next.to_string()))
    }

    fn reserve_keys(&mut self, last: u64) -> Result<(), CsGraphError> {
        let mut table = self.txn.open_table(METADATA).map_err(storage)?;
        let current = read_last_key(&table)?;
        if last > current {
            table.insert(LAST_KEY, last).map_err(storage)?;
        }
        Ok(())
    }

    fn put(&mut self, id: &NodeId, document: Value) -> Result<(), CsGraphError> {
        let bytes = serde_json::to_vec(&document)?;
        let mut table = self.txn.open_table(DOCUMENTS).map_err(storage)?;
        let key = id.to_string();
        table
            .insert(key.as_str(), bytes.as_slice())
            .map_err(storage)?;
        Ok(())
    }

    fn remove(&mut self, id: &NodeId) -> Result<bool, CsGraphError> {
        {
            let mut table = self.txn.open_table(DOCUMENTS).map_err(storage)?;
            let key = id.to_string();
            if table.remove(key.as_str()).map_err(storage)?.is_none() {
                return Ok(false);
            }
        }

        for relation in Relation::ALL {
            let targets: Vec<NodeId> = {
                let out = self.txn.open_table(EDGES_OUT).map_err(storage)?;
                outbound_edges(&out, relation, id)?
                    .into_iter()
                    .map(|(to, _)| to)
                    .collect()
            };
            for to in targets {
                self.remove_edge(relation, id, &to)?;
            }

            let sources = {
                let inbound = self.txn.open_table(EDGES_IN).map_err(storage)?;
                inbound_sources(&inbound, relation, id)?
            };
            for from in sources {
                self.remove_edge(relation, &from, id)?;
            }
        }

        let stale: Vec<String> = {
            let table = self.txn.open_table(DIGESTS).map_err(storage)?;
            let start = format!("{}|", id.collection);
            let end = format!("{}}}", id.collection);
            let mut stale = Vec::new();
            for entry in table.range(start.as_str()..end.as_str()).map_err(storage)? {
                let (k, v) = entry.map_err(storage)?;
                if v.value() == id.key.as_str() {
                    stale.push(k.value().to_string());
                }
            }
            stale
        };
        if !stale.is_empty() {
            let mut table = self.txn.open_table(DIGESTS).map_err(storage)?;
            for key in stale {
                table.remove(key.as_str()).map_err(storage)?;
            }
        }

        Ok(true)
    }

    fn index_digest(
        &mut self,
        collection: Collection,
        digest: &str,
        key: &Key,
    ) -> Result<(), CsGraphError> {
        let mut table = self.txn.open_table(DIGESTS).map_err(storage)?;
        let entry = format!("{collection}|{digest}");
        table
            .insert(entry.as_str(), key.as_str())
            .map_err(storage)?;
        Ok(())
    }

    fn insert_edge(
        &mut self,
        relation: Relation,
        from: &NodeId,
        to: &NodeId,
        attrs: EdgeAttrs,
    ) -> Result<bool, CsGraphError> {
        let bytes = serde_json::to_vec(&attrs)?;
        let previous = {
            let mut out = self.txn.open_table(EDGES_OUT).map_err(storage)?;
            let key = edge_key(relation, from, to);
            out.insert(key.as_str(), bytes.as_slice())
                .map_err(storage)?
                .is_some()
        };
        let mut inbound = self.txn.open_table(EDGES_IN).map_err(storage)?;
        let key = edge_key(relation, to, from);
        inbound.insert(key.as_str(), 0u8).map_err(storage)?;
        Ok(!previous)
    }

    fn remove_edge(
        &mut self,
        relation: Relation,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<bool, CsGraphError> {
        let existed = {
            let mut out = self.txn.open_table(EDGES_OUT).map_err(storage)?;
            let key = edge_key(relation, from, to);
            out.remove(key.as_str()).map_err(storage)?.is_some()
        };
        let mut inbound = self.txn.open_table(EDGES_IN).map_err(storage)?;
        let key = edge_key(relation, to, from);
        inbound.remove(key.as_str()).map_err(storage)?;
        Ok(existed)
    }
}

// =============================================================================
// TESTS
// =============================================================================

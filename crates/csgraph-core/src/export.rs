//! # Canonical Snapshot Format
//!
//! Bit-exact, backend independent serialization of a whole store.
//!
//! redb files are not comparable across runs, so the snapshot is the form
//! used for backups, for moving data between backends, for the file
//! backend of the CLI and for comparing two stores by hash.
//!
//! ```text
//! [header_len: u32 LE] [SnapshotHeader (postcard)] [Snapshot (postcard)]
//! ```
//!
//! Documents are stored as canonical JSON text and every list is sorted,
//! so equal stores always produce equal bytes.

use crate::digest::canonical_json;
use crate::graph::{Graph, GraphStore, GraphView};
use crate::primitives::{
    FORMAT_VERSION, MAGIC_BYTES, MAX_HEADER_SIZE, MAX_IMPORT_DOCUMENTS, MAX_IMPORT_EDGES,
};
use crate::types::{Collection, CsGraphError, EdgeAttrs, Key, NodeId, Relation};
use serde::{Deserialize, Serialize};

// =============================================================================
// FORMAT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub document_count: u64,
    pub edge_count: u64,
    /// BLAKE3 hash of the data section.
    pub checksum: [u8; 32],
}

impl SnapshotHeader {
    /// Validate magic and version.
    ///
    /// Error messages stay generic on purpose.
    pub fn validate(&self) -> Result<(), CsGraphError> {
        if &self.magic != MAGIC_BYTES {
            return Err(CsGraphError::Serialization(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(CsGraphError::Serialization(
                "Unsupported file version".to_string(),
            ));
        }
        if self.document_count > MAX_IMPORT_DOCUMENTS {
            return Err(CsGraphError::Serialization(format!(
                "Document count {} exceeds maximum allowed {}",
                self.document_count, MAX_IMPORT_DOCUMENTS
            )));
        }
        if self.edge_count > MAX_IMPORT_EDGES {
            return Err(CsGraphError::Serialization(format!(
                "Edge count {} exceeds maximum allowed {}",
                self.edge_count, MAX_IMPORT_EDGES
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// `Collection/key`
    pub id: String,
    /// Canonical JSON text.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub relation: String,
    pub from: String,
    pub to: String,
    pub count: Option<u32>,
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotDigest {
    pub collection: String,
    pub digest: String,
    pub key: String,
}

/// Sorted contents of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub documents: Vec<SnapshotDocument>,
    pub edges: Vec<SnapshotEdge>,
    pub digests: Vec<SnapshotDigest>,
    pub last_key: u64,
}

impl Snapshot {
    /// Capture every document, edge and digest of a store.
    pub fn capture<S: GraphView + ?Sized>(store: &S) -> Result<Self, CsGraphError> {
        let mut documents = Vec::new();
        for collection in Collection::ALL {
            for (key, doc) in store.scan(collection)? {
                documents.push(SnapshotDocument {
                    id: NodeId { collection, key }.to_string(),
                    body: canonical_json(&doc),
                });
            }
        }
        documents.sort();

        let mut edges = Vec::new();
        for relation in Relation::ALL {
            for edge in store.edges(relation)? {
                edges.push(SnapshotEdge {
                    relation: relation.as_str().to_string(),
                    from: edge.from.to_string(),
                    to: edge.to.to_string(),
                    count: edge.attrs.count,
                    comments: edge.attrs.comments,
                });
            }
        }
        edges.sort();

        let mut digests: Vec<SnapshotDigest> = store
            .digests()?
            .into_iter()
            .map(|(collection, digest, key)| SnapshotDigest {
                collection: collection.as_str().to_string(),
                digest,
                key: key.0,
            })
            .collect();
        digests.sort();

        Ok(Self {
            documents,
            edges,
            digests,
            last_key: store.last_key()?,
        })
    }

    /// Write the snapshot into a store.
    pub fn restore(&self, store: &mut dyn GraphStore) -> Result<(), CsGraphError> {
        for doc in &self.documents {
            let id: NodeId = doc.id.parse()?;
            store.put(&id, serde_json::from_str(&doc.body)?)?;
        }
        for edge in &self.edges {
            let relation: Relation = edge.relation.parse()?;
            let attrs = EdgeAttrs {
                count: edge.count,
                comments: edge.comments.clone(),
            };
            store.insert_edge(relation, &edge.from.parse()?, &edge.to.parse()?, attrs)?;
        }
        for entry in &self.digests {
            let collection: Collection = entry.collection.parse()?;
            store.index_digest(collection, &entry.digest, &Key::new(entry.key.clone()))?;
        }
        store.reserve_keys(self.last_key)
    }

    /// BLAKE3 hash of the encoded data section.
    pub fn checksum(&self) -> Result<[u8; 32], CsGraphError> {
        Ok(*blake3::hash(&encode(self)?).as_bytes())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CsGraphError> {
    postcard::to_allocvec(value).map_err(|e| CsGraphError::Serialization(e.to_string()))
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Export a store to the snapshot format.
pub fn export_snapshot<S: GraphView + ?Sized>(store: &S) -> Result<Vec<u8>, CsGraphError> {
    let snapshot = Snapshot::capture(store)?;
    let data = encode(&snapshot)?;
    let header = SnapshotHeader {
        magic: *MAGIC_BYTES,
        version: FORMAT_VERSION,
        document_count: snapshot.documents.len() as u64,
        edge_count: snapshot.edges.len() as u64,
        checksum: *blake3::hash(&data).as_bytes(),
    };
    let header_bytes = encode(&header)?;

    let mut result = Vec::with_capacity(
        4usize
            .saturating_add(header_bytes.len())
            .saturating_add(data.len()),
    );
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data);
    Ok(result)
}

/// Decode and verify a snapshot.
///
/// Magic, version and size limits are checked before the data section is
/// decoded; the checksum and counts after.
pub fn decode_snapshot(data: &[u8]) -> Result<Snapshot, CsGraphError> {
    let too_short = || CsGraphError::Serialization("Data too short".to_string());
    let len_bytes: [u8; 4] = data
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(too_short)?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if header_len > MAX_HEADER_SIZE {
        return Err(CsGraphError::Serialization(
            "Header too large".to_string(),
        ));
    }
    let body_start = header_len.saturating_add(4);
    let header_bytes = data.get(4..body_start).ok_or_else(too_short)?;
    let header: SnapshotHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| CsGraphError::Serialization(format!("Header: {e}")))?;
    header.validate()?;

    let body = data.get(body_start..).ok_or_else(too_short)?;
    if *blake3::hash(body).as_bytes() != header.checksum {
        return Err(CsGraphError::Serialization("Checksum mismatch".to_string()));
    }
    let snapshot: Snapshot = postcard::from_bytes(body)
        .map_err(|e| CsGraphError::Serialization(format!("Data: {e}")))?;

    if snapshot.documents.len() as u64 != header.document_count {
        return Err(CsGraphError::Serialization(
            "Document count mismatch".to_string(),
        ));
    }
    if snapshot.edges.len() as u64 != header.edge_count {
        return Err(CsGraphError::Serialization(
            "Edge count mismatch".to_string(),
        ));
    }
    Ok(snapshot)
}

/// Rebuild an in-memory graph from snapshot bytes.
pub fn import_snapshot(data: &[u8]) -> Result<Graph, CsGraphError> {
    let snapshot = decode_snapshot(data)?;
    let mut graph = Graph::new();
    snapshot.restore(&mut graph)?;
    Ok(graph)
}

/// Load snapshot bytes into an empty store.
pub fn import_into(store: &mut dyn GraphStore, data: &[u8]) -> Result<usize, CsGraphError> {
    let snapshot = decode_snapshot(data)?;
    for collection in Collection::ALL {
        if store.count(collection)? > 0 {
            return Err(CsGraphError::Validation(
                "snapshots can only be imported into an empty store".to_string(),
            ));
        }
    }
    snapshot.restore(store)?;
    tracing::info!(documents = snapshot.documents.len(), edges = snapshot.edges.len(), "imported snapshot");
    Ok(snapshot.documents.len())
}

/// Hex encoded BLAKE3 hash of the snapshot of a store.
pub fn snapshot_hash<S: GraphView + ?Sized>(store: &S) -> Result<String, CsGraphError> {
    Ok(blake3::hash(&export_snapshot(store)?).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================

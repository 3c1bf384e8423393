//! # Graph Store
//!
//! The graph-store capability interface used by every engine layer, and the
//! in-memory implementation.
//!
//! Documents are JSON objects addressed by `NodeId`. Edges are labelled with
//! a `Relation`, keyed by `(relation, from, to)` and carry `EdgeAttrs`.
//! Content-addressed collections keep a digest index (`digest -> key`) used
//! for lookup-or-insert deduplication.
//!
//! All data structures use `BTreeMap` for deterministic ordering.

use crate::types::{Collection, CsGraphError, Direction, Edge, EdgeAttrs, Key, NodeId, Relation};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// Read side of the graph store.
///
/// All fallible operations return `Result<T, CsGraphError>` so that the
/// in-memory graph and the redb backend are interchangeable.
pub trait GraphView {
    /// Fetch a document.
    fn get(&self, id: &NodeId) -> Result<Option<Value>, CsGraphError>;

    /// All documents of a collection, ordered by key.
    fn scan(&self, collection: Collection) -> Result<Vec<(Key, Value)>, CsGraphError>;

    /// Key of the document indexed under `digest`, if any.
    fn lookup_digest(&self, collection: Collection, digest: &str)
    -> Result<Option<Key>, CsGraphError>;

    /// Nodes adjacent to `node` along `relation`, with the edge attributes.
    fn neighbours(
        &self,
        relation: Relation,
        node: &NodeId,
        direction: Direction,
    ) -> Result<Vec<(NodeId, EdgeAttrs)>, CsGraphError>;

    /// Every edge of a relation.
    fn edges(&self, relation: Relation) -> Result<Vec<Edge>, CsGraphError>;

    /// Every digest index entry.
    fn digests(&self) -> Result<Vec<(Collection, String, Key)>, CsGraphError>;

    /// Highest key allocated so far.
    fn last_key(&self) -> Result<u64, CsGraphError>;

    /// Number of documents in a collection.
    fn count(&self, collection: Collection) -> Result<usize, CsGraphError> {
        Ok(self.scan(collection)?.len())
    }

    fn contains(&self, id: &NodeId) -> Result<bool, CsGraphError> {
        Ok(self.get(id)?.is_some())
    }

    /// Documents of a collection matching a predicate.
    fn find(
        &self,
        collection: Collection,
        predicate: &dyn Fn(&Value) -> bool,
    ) -> Result<Vec<(Key, Value)>, CsGraphError> {
        Ok(self
            .scan(collection)?
            .into_iter()
            .filter(|(_, doc)| predicate(doc))
            .collect())
    }

    /// Attributes of a single edge.
    fn edge(
        &self,
        relation: Relation,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<Option<EdgeAttrs>, CsGraphError> {
        Ok(self
            .neighbours(relation, from, Direction::Outbound)?
            .into_iter()
            .find(|(id, _)| id == to)
            .map(|(_, attrs)| attrs))
    }

    /// Breadth-first traversal along one relation.
    ///
    /// Returns visited nodes with their depth, starting with `start` at
    /// depth 0. Each node is visited once.
    fn traverse(
        &self,
        start: &NodeId,
        relation: Relation,
        direction: Direction,
        max_depth: usize,
    ) -> Result<Vec<(NodeId, usize)>, CsGraphError> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();

        visited.insert(start.clone());
        queue.push_back((start.clone(), 0usize));

        while let Some((node, depth)) = queue.pop_front() {
            order.push((node.clone(), depth));
            if depth >= max_depth {
                continue;
            }
            for (next, _) in self.neighbours(relation, &node, direction)? {
                if visited.insert(next.clone()) {
                    queue.push_back((next, depth.saturating_add(1)));
                }
            }
        }

        Ok(order)
    }
}

/// Write side of the graph store.
pub trait GraphStore: GraphView {
    /// Allocate a fresh document key.
    fn allocate_key(&mut self) -> Result<Key, CsGraphError>;

    /// Make sure future keys are allocated above `last`.
    fn reserve_keys(&mut self, last: u64) -> Result<(), CsGraphError>;

    /// Insert or overwrite a document.
    fn put(&mut self, id: &NodeId, document: Value) -> Result<(), CsGraphError>;

    /// Remove a document together with its incident edges and digest entries.
    /// Returns whether the document existed.
    fn remove(&mut self, id: &NodeId) -> Result<bool, CsGraphError>;

    /// Record `digest -> key` for lookup-or-insert deduplication.
    fn index_digest(
        &mut self,
        collection: Collection,
        digest: &str,
        key: &Key,
    ) -> Result<(), CsGraphError>;

    /// Upsert an edge. Returns true when the edge did not exist before.
    fn insert_edge(
        &mut self,
        relation: Relation,
        from: &NodeId,
        to: &NodeId,
        attrs: EdgeAttrs,
    ) -> Result<bool, CsGraphError>;

    /// Remove an edge. Returns whether it existed.
    fn remove_edge(
        &mut self,
        relation: Relation,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<bool, CsGraphError>;

    /// Insert a document under a freshly allocated key.
    fn insert(&mut self, collection: Collection, document: Value) -> Result<NodeId, CsGraphError> {
        let key = self.allocate_key()?;
        let id = NodeId { collection, key };
        self.put(&id, document)?;
        Ok(id)
    }

    /// Overwrite an existing document.
    fn replace(&mut self, id: &NodeId, document: Value) -> Result<(), CsGraphError> {
        if !self.contains(id)? {
            return Err(CsGraphError::NotFound(id.clone()));
        }
        self.put(id, document)
    }
}

// =============================================================================
// TYPED HELPERS
// =============================================================================

/// Fetch and deserialize a document.
pub fn load<T, S>(store: &S, id: &NodeId) -> Result<Option<T>, CsGraphError>
where
    T: DeserializeOwned,
    S: GraphView + ?Sized,
{
    store
        .get(id)?
        .map(|doc| serde_json::from_value(doc).map_err(CsGraphError::from))
        .transpose()
}

/// Serialize a record into a document.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> Result<Value, CsGraphError> {
    serde_json::to_value(value).map_err(CsGraphError::from)
}

// =============================================================================
// GRAPH IMPLEMENTATION
// =============================================================================

/// In-memory graph.
///
/// Uses `BTreeMap` exclusively for deterministic ordering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    /// Document storage: NodeId -> JSON document
    documents: BTreeMap<NodeId, Value>,

    /// Adjacency list: (relation, from) -> (to -> attrs)
    outbound: BTreeMap<(Relation, NodeId), BTreeMap<NodeId, EdgeAttrs>>,

    /// Reverse adjacency: (relation, to) -> {from}
    inbound: BTreeMap<(Relation, NodeId), BTreeSet<NodeId>>,

    /// Content index: (collection, digest) -> key
    digests: BTreeMap<(Collection, String), Key>,

    /// Highest allocated key
    last_key: u64,
}

impl Graph {
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Total number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.outbound.values().map(BTreeMap::len).sum()
    }
}

impl GraphView for Graph {
    fn get(&self, id: &NodeId) -> Result<Option<Value>, CsGraphError> {
        Ok(self.documents.get(id).cloned())
    }

    fn scan(&self, collection: Collection) -> Result<Vec<(Key, Value)>, CsGraphError> {
        Ok(self
            .documents
            .iter()
            .filter(|(id, _)| id.collection == collection)
            .map(|(id, doc)| (id.key.clone(), doc.clone()))
            .collect())
    }

    fn lookup_digest(
        &self,
        collection: Collection,
        digest: &str,
    ) -> Result<Option<Key>, CsGraphError> {
        Ok(self
            .digests
            .get(&(collection, digest.to_string()))
            .cloned())
    }

    fn neighbours(
        &self,
        relation: Relation,
        node: &NodeId,
        direction: Direction,
    ) -> Result<Vec<(NodeId, EdgeAttrs)>, CsGraphError> {
        let key = (relation, node.clone());
        let result = match direction {
            Direction::Outbound => self
                .outbound
                .get(&key)
                .map(|targets| {
                    targets
                        .iter()
                        .map(|(to, attrs)| (to.clone(), attrs.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            Direction::Inbound => self
                .inbound
                .get(&key)
                .map(|sources| {
                    sources
                        .iter()
                        .filter_map(|from| {
                            self.outbound
                                .get(&(relation, from.clone()))
                                .and_then(|targets| targets.get(node))
                                .map(|attrs| (from.clone(), attrs.clone()))
                        })
                        .collect()
                })
                .unwrap_or_default(),
        };
        Ok(result)
    }

    fn edges(&self, relation: Relation) -> Result<Vec<Edge>, CsGraphError> {
        Ok(self
            .outbound
            .iter()
            .filter(|((r, _), _)| *r == relation)
            .flat_map(|((_, from), targets)| {
                targets.iter().map(move |(to, attrs)| Edge {
                    relation,
                    from: from.clone(),
                    to: to.clone(),
                    attrs: attrs.clone(),
                })
            })
            .collect())
    }

    fn digests(&self) -> Result<Vec<(Collection, String, Key)>, CsGraphError> {
        Ok(self
            .digests
            .iter()
            .map(|((c, d), k)| (*c, d.clone(), k.clone()))
            .collect())
    }

    fn last_key(&self) -> Result<u64, CsGraphError> {
        Ok(self.last_key)
    }

    fn count(&self, collection: Collection) -> Result<usize, CsGraphError> {
        Ok(self
            .documents
            .keys()
            .filter(|id| id.collection == collection)
            .count())
    }
}

impl GraphStore for Graph {
    fn allocate_key(&mut self) -> Result<Key, CsGraphError> {
        self.last_key = self.last_key.saturating_add(1);
        Ok(Key(self.last_key.to_string()))
    }

    fn reserve_keys(&mut self, last: u64) -> Result<(), CsGraphError> {
        self.last_key = self.last_key.max(last);
        Ok(())
    }

    fn put(&mut self, id: &NodeId, document: Value) -> Result<(), CsGraphError> {
        self.documents.insert(id.clone(), document);
        Ok(())
    }

    fn remove(&mut self, id: &NodeId) -> Result<bool, CsGraphError> {
        if self.documents.remove(id).is_none() {
            return Ok(false);
        }

        for relation in Relation::ALL {
            let key = (relation, id.clone());
            if let Some(targets) = self.outbound.remove(&key) {
                for to in targets.keys() {
                    if let Some(sources) = self.inbound.get_mut(&(relation, to.clone())) {
                        sources.remove(id);
                    }
                }
            }
            if let Some(sources) = self.inbound.remove(&key) {
                for from in sources {
                    if let Some(targets) = self.outbound.get_mut(&(relation, from)) {
                        targets.remove(id);
                    }
                }
            }
        }
        self.outbound.retain(|_, targets| !targets.is_empty());
        self.inbound.retain(|_, sources| !sources.is_empty());

        self.digests
            .retain(|(collection, _), key| !(*collection == id.collection && *key == id.key));

        Ok(true)
    }

    fn index_digest(
        &mut self,
        collection: Collection,
        digest: &str,
        key: &Key,
    ) -> Result<(), CsGraphError> {
        self.digests
            .insert((collection, digest.to_string()), key.clone());
        Ok(())
    }

    fn insert_edge(
        &mut self,
        relation: Relation,
        from: &NodeId,
        to: &NodeId,
        attrs: EdgeAttrs,
    ) -> Result<bool, CsGraphError> {
        let previous = self
            .outbound
            .entry((relation, from.clone()))
            .or_default()
            .insert(to.clone(), attrs);
        self.inbound
            .entry((relation, to.clone()))
            .or_default()
            .insert(from.clone());
        Ok(previous.is_none())
    }

    fn remove_edge(
        &mut self,
        relation: Relation,
        from: &NodeId,
        to: &NodeId,
    ) -> Result<bool, CsGraphError> {
        let key = (relation, from.clone());
        let existed = match self.outbound.get_mut(&key) {
            Some(targets) => {
                let existed = targets.remove(to).is_some();
                if targets.is_empty() {
                    self.outbound.remove(&key);
                }
                existed
            }
            None => false,
        };
        let back = (relation, to.clone());
        if let Some(sources) = self.inbound.get_mut(&back) {
            sources.remove(from);
            if sources.is_empty() {
                self.inbound.remove(&back);
            }
        }
        Ok(existed)
    }
}

// =============================================================================
// TESTS
// =============================================================================

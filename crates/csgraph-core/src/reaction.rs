//! # Reaction Resolver
//!
//! Builds or looks up Reaction nodes.
//!
//! A reaction's identity is the set of `(consumed state, count)` pairs, the
//! set of `(produced state, count)` pairs, reversibility and the set of
//! type tags. Entry order is not significant, multiplicities are: repeated
//! entries for one state are summed, so `e + e` is the same reaction as
//! `2 e`. Identity is evaluated on canonical state ids, so local aliases
//! that map to the same State resolve to the same Reaction.

use crate::digest::content_digest;
use crate::graph::{GraphStore, GraphView, load, to_document};
use crate::types::{Collection, CsGraphError, Direction, EdgeAttrs, NodeId, Relation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Process classification tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReactionTypeTag {
    Elastic,
    Effective,
    MomentumTransfer,
    Excitation,
    Electronic,
    Vibrational,
    Rotational,
    Attachment,
    Ionization,
    Dissociative,
}

/// One side entry of a reaction, naming a state by local key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub count: u32,
    pub state: String,
}

/// A reaction as written in an upload document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub lhs: Vec<ReactionEntry>,
    pub rhs: Vec<ReactionEntry>,
    pub reversible: bool,
    #[serde(rename = "typeTags", alias = "type_tags", default)]
    pub type_tags: Vec<ReactionTypeTag>,
}

/// Stored reaction document. Sides live on `Consumes`/`Produces` edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub reversible: bool,
    #[serde(rename = "typeTags")]
    pub type_tags: Vec<ReactionTypeTag>,
}

/// Reaction identity on canonical state ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CanonicalReaction {
    pub lhs: Vec<(NodeId, u32)>,
    pub rhs: Vec<(NodeId, u32)>,
    pub reversible: bool,
    pub type_tags: Vec<ReactionTypeTag>,
}

fn canonical_side(
    entries: &[ReactionEntry],
    states: &BTreeMap<String, NodeId>,
) -> Option<Vec<(NodeId, u32)>> {
    let mut side: BTreeMap<NodeId, u32> = BTreeMap::new();
    for entry in entries {
        let id = states.get(&entry.state)?;
        let count = side.entry(id.clone()).or_insert(0);
        *count = count.saturating_add(entry.count);
    }
    Some(side.into_iter().collect())
}

/// Map a reaction onto canonical state ids.
///
/// Returns `None` when an entry names a state missing from `states`.
#[must_use]
pub fn canonicalize(
    reaction: &Reaction,
    states: &BTreeMap<String, NodeId>,
) -> Option<CanonicalReaction> {
    let mut type_tags = reaction.type_tags.clone();
    type_tags.sort();
    type_tags.dedup();
    Some(CanonicalReaction {
        lhs: canonical_side(&reaction.lhs, states)?,
        rhs: canonical_side(&reaction.rhs, states)?,
        reversible: reaction.reversible,
        type_tags,
    })
}

/// Resolve a reaction to a Reaction node id, inserting it when no
/// structurally identical reaction exists yet.
pub fn resolve_reaction(
    store: &mut dyn GraphStore,
    states: &BTreeMap<String, NodeId>,
    reaction: &Reaction,
) -> Result<NodeId, CsGraphError> {
    let canonical = canonicalize(reaction, states).ok_or_else(|| {
        CsGraphError::Validation("reaction refers to a state missing from the states dictionary".to_string())
    })?;
    let digest = content_digest(&canonical)?;

    if let Some(key) = store.lookup_digest(Collection::Reaction, &digest)? {
        tracing::debug!(reaction = %key, "reusing reaction");
        return Ok(NodeId {
            collection: Collection::Reaction,
            key,
        });
    }

    let record = ReactionRecord {
        reversible: canonical.reversible,
        type_tags: canonical.type_tags.clone(),
    };
    let id = store.insert(Collection::Reaction, to_document(&record)?)?;
    for (state, count) in &canonical.lhs {
        store.insert_edge(Relation::Consumes, &id, state, EdgeAttrs::with_count(*count))?;
    }
    for (state, count) in &canonical.rhs {
        store.insert_edge(Relation::Produces, &id, state, EdgeAttrs::with_count(*count))?;
    }
    store.index_digest(Collection::Reaction, &digest, &id.key)?;
    tracing::debug!(reaction = %id.key, "inserted reaction");
    Ok(id)
}

/// Read a stored reaction back, naming states by their keys.
pub fn load_reaction<S: GraphView + ?Sized>(
    store: &S,
    id: &NodeId,
) -> Result<Option<Reaction>, CsGraphError> {
    let Some(record) = load::<ReactionRecord, S>(store, id)? else {
        return Ok(None);
    };
    let side = |relation| -> Result<Vec<ReactionEntry>, CsGraphError> {
        Ok(store
            .neighbours(relation, id, Direction::Outbound)?
            .into_iter()
            .map(|(state, attrs)| ReactionEntry {
                count: attrs.count.unwrap_or(1),
                state: state.key.0,
            })
            .collect())
    };
    Ok(Some(Reaction {
        lhs: side(Relation::Consumes)?,
        rhs: side(Relation::Produces)?,
        reversible: record.reversible,
        type_tags: record.type_tags,
    }))
}

/// Lookup table mapping every state key used by `reaction` onto its id.
#[must_use]
pub fn stored_state_lookup(reaction: &Reaction) -> BTreeMap<String, NodeId> {
    reaction
        .lhs
        .iter()
        .chain(&reaction.rhs)
        .map(|entry| {
            (
                entry.state.clone(),
                NodeId::new(Collection::State, entry.state.clone()),
            )
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

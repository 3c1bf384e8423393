//! # Orphan Collection
//!
//! Reactions, references and states are shared between items and only
//! removed once nothing refers to them any more:
//!
//! - a reaction is live while a cross section points at it
//! - a reference is live while an item has a `References` edge to it or a
//!   set names it as `publishedIn`
//! - a state is live while a reaction consumes or produces it, it is the
//!   leaf of a live compound, or it has live substates
//!
//! Removal cascades: dropping a reaction re-examines its states, dropping a
//! state re-examines its parents and the leaves of a compound.

use crate::document::{CrossSectionRecord, CrossSectionSetRecord};
use crate::graph::{GraphStore, GraphView, load};
use crate::types::{Collection, CsGraphError, Direction, NodeId, Relation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of removed nodes per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    pub reactions: usize,
    pub references: usize,
    pub states: usize,
}

impl PruneReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.reactions
            .saturating_add(self.references)
            .saturating_add(self.states)
    }
}

/// Shared nodes an item depends on: its reaction and its references.
pub fn item_dependencies<S: GraphView + ?Sized>(
    store: &S,
    item: &NodeId,
) -> Result<Vec<NodeId>, CsGraphError> {
    let mut deps: Vec<NodeId> = store
        .neighbours(Relation::References, item, Direction::Outbound)?
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    if let Some(record) = load::<CrossSectionRecord, S>(store, item)? {
        deps.push(record.reaction);
    }
    Ok(deps)
}

fn used_reactions<S: GraphView + ?Sized>(store: &S) -> Result<BTreeSet<NodeId>, CsGraphError> {
    let mut used = BTreeSet::new();
    for (key, _) in store.scan(Collection::CrossSection)? {
        let id = NodeId {
            collection: Collection::CrossSection,
            key,
        };
        if let Some(record) = load::<CrossSectionRecord, S>(store, &id)? {
            used.insert(record.reaction);
        }
    }
    Ok(used)
}

fn cited_by_sets<S: GraphView + ?Sized>(store: &S) -> Result<BTreeSet<NodeId>, CsGraphError> {
    let mut cited = BTreeSet::new();
    for (_, doc) in store.scan(Collection::CrossSectionSet)? {
        let record: CrossSectionSetRecord = serde_json::from_value(doc)?;
        if let Some(reference) = record.published_in {
            cited.insert(reference);
        }
    }
    Ok(cited)
}

fn has_any<S: GraphView + ?Sized>(
    store: &S,
    relation: Relation,
    id: &NodeId,
    direction: Direction,
) -> Result<bool, CsGraphError> {
    Ok(!store.neighbours(relation, id, direction)?.is_empty())
}

fn state_is_live<S: GraphView + ?Sized>(store: &S, id: &NodeId) -> Result<bool, CsGraphError> {
    Ok(has_any(store, Relation::Consumes, id, Direction::Inbound)?
        || has_any(store, Relation::Produces, id, Direction::Inbound)?
        || has_any(store, Relation::InCompound, id, Direction::Outbound)?
        || has_any(store, Relation::HasDirectSubstate, id, Direction::Outbound)?)
}

fn targets(
    store: &dyn GraphStore,
    relation: Relation,
    id: &NodeId,
    direction: Direction,
) -> Result<Vec<NodeId>, CsGraphError> {
    Ok(store
        .neighbours(relation, id, direction)?
        .into_iter()
        .map(|(id, _)| id)
        .collect())
}

/// Remove whichever of `seeds` (and whatever they hold on to) is orphaned.
pub fn release(
    store: &mut dyn GraphStore,
    seeds: impl IntoIterator<Item = NodeId>,
) -> Result<PruneReport, CsGraphError> {
    let used = used_reactions(store)?;
    let cited = cited_by_sets(store)?;
    let mut queue: BTreeSet<NodeId> = seeds.into_iter().collect();
    let mut report = PruneReport::default();

    while let Some(id) = queue.pop_first() {
        match id.collection {
            Collection::Reaction if !used.contains(&id) => {
                let mut states = targets(store, Relation::Consumes, &id, Direction::Outbound)?;
                states.extend(targets(store, Relation::Produces, &id, Direction::Outbound)?);
                if store.remove(&id)? {
                    report.reactions = report.reactions.saturating_add(1);
                    queue.extend(states);
                }
            }
            Collection::Reference
                if !cited.contains(&id)
                    && !has_any(store, Relation::References, &id, Direction::Inbound)? =>
            {
                if store.remove(&id)? {
                    report.references = report.references.saturating_add(1);
                }
            }
            Collection::State if !state_is_live(store, &id)? => {
                let mut related = targets(store, Relation::HasDirectSubstate, &id, Direction::Inbound)?;
                related.extend(targets(store, Relation::InCompound, &id, Direction::Inbound)?);
                if store.remove(&id)? {
                    report.states = report.states.saturating_add(1);
                    queue.extend(related);
                }
            }
            _ => {}
        }
    }

    if report.total() > 0 {
        tracing::debug!(
            reactions = report.reactions,
            references = report.references,
            states = report.states,
            "released orphaned nodes"
        );
    }
    Ok(report)
}

/// Remove every orphaned reaction, reference and state in the store.
pub fn prune_orphans(store: &mut dyn GraphStore) -> Result<PruneReport, CsGraphError> {
    let mut seeds = Vec::new();
    for collection in [Collection::Reaction, Collection::Reference, Collection::State] {
        seeds.extend(
            store
                .scan(collection)?
                .into_iter()
                .map(|(key, _)| NodeId { collection, key }),
        );
    }
    let report = release(store, seeds)?;
    tracing::info!(removed = report.total(), "pruned orphans");
    Ok(report)
}

// =============================================================================
// TESTS
// =============================================================================

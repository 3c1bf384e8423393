//! # Publish / Retract / Delete Orchestrator
//!
//! Set-level lifecycle operations that cascade to member items.
//!
//! Publishing is guarded by a pre-flight check: a draft member that would
//! archive its published predecessor must not leave another live set
//! pointing at that predecessor. All violations are reported together and
//! nothing is written when any exist.

use crate::document::{CrossSectionRecord, CrossSectionSetRecord};
use crate::graph::{GraphStore, GraphView};
use crate::primitives::MAX_HISTORY_DEPTH;
use crate::prune::{PruneReport, item_dependencies, release};
use crate::section::{publish_item, remove_orphan_draft};
use crate::set::{members, set_id};
use crate::types::{
    Collection, CsGraphError, Direction, Key, NodeId, PublishConflict, Relation, Status,
};
use crate::versioning::{self, Deletion, Transition, check_transition, delete_transition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn section_id(key: &Key) -> NodeId {
    NodeId {
        collection: Collection::CrossSection,
        key: key.clone(),
    }
}

fn is_live(status: Status) -> bool {
    matches!(status, Status::Draft | Status::Published)
}

/// Draft or published sets, other than those in `exclude`, that contain
/// the cross section `key`.
fn live_sets_containing<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
    exclude: &BTreeSet<NodeId>,
) -> Result<Vec<Key>, CsGraphError> {
    let mut sets = Vec::new();
    for (set, _) in store.neighbours(Relation::IsPartOf, &section_id(key), Direction::Outbound)? {
        if exclude.contains(&set) {
            continue;
        }
        if let Some(record) = versioning::fetch::<CrossSectionSetRecord, S>(store, &set.key)? {
            if is_live(record.version_info.status) {
                sets.push(set.key);
            }
        }
    }
    sets.sort();
    Ok(sets)
}

/// Every way publishing `key` would leave another set pointing at an
/// archived cross section.
///
/// Sets in the lineage of `key` (itself and the revisions it supersedes)
/// do not count.
pub fn publishing_conflicts<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Vec<PublishConflict>, CsGraphError> {
    let lineage: BTreeSet<NodeId> = store
        .traverse(
            &set_id(key),
            Relation::CrossSectionSetHistory,
            Direction::Outbound,
            MAX_HISTORY_DEPTH,
        )?
        .into_iter()
        .map(|(id, _)| id)
        .collect();

    let mut conflicts = Vec::new();
    for item in members(store, key)? {
        let Some(record) = versioning::fetch::<CrossSectionRecord, S>(store, &item)? else {
            continue;
        };
        if record.version_info.status != Status::Draft {
            continue;
        }
        let Some((predecessor, previous)) = versioning::predecessor::<CrossSectionRecord, S>(store, &item)?
        else {
            continue;
        };
        if previous.version_info.status != Status::Published {
            continue;
        }
        let sets = live_sets_containing(store, &predecessor, &lineage)?;
        if !sets.is_empty() {
            conflicts.push(PublishConflict {
                item,
                predecessor,
                sets,
            });
        }
    }
    Ok(conflicts)
}

/// What a set publish changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    /// Previously published revision of the set, now archived.
    pub archived_set: Option<Key>,
    /// Member drafts that were published.
    pub published_items: Vec<Key>,
    /// Item revisions archived by those publishes.
    pub archived_items: Vec<Key>,
}

/// Publish a draft set together with its draft members.
pub fn publish_set(store: &mut dyn GraphStore, key: &Key) -> Result<PublishOutcome, CsGraphError> {
    let record: CrossSectionSetRecord = versioning::require(store, key)?;
    check_transition(&set_id(key), record.version_info.status, Transition::Publish)?;

    let conflicts = publishing_conflicts(store, key)?;
    if !conflicts.is_empty() {
        tracing::warn!(set = %key, conflicts = conflicts.len(), "refused to publish set");
        return Err(CsGraphError::PublishConflict(conflicts));
    }

    let mut outcome = PublishOutcome::default();
    for item in members(store, key)? {
        let status = versioning::require::<CrossSectionRecord, _>(store, &item)?
            .version_info
            .status;
        if status != Status::Draft {
            continue;
        }
        if let Some(archived) = publish_item(store, &item)? {
            outcome.archived_items.push(archived);
        }
        outcome.published_items.push(item);
    }
    outcome.archived_set = versioning::publish::<CrossSectionSetRecord>(store, key)?;

    tracing::info!(
        set = %key,
        items = outcome.published_items.len(),
        archived = ?outcome.archived_set,
        "published set"
    );
    Ok(outcome)
}

/// Retract a set and every published member that no other live set uses.
///
/// Returns the retracted member keys. Skips the delete status dispatch, so
/// callers must know the set is published.
pub fn retract_set_unchecked(
    store: &mut dyn GraphStore,
    key: &Key,
    message: &str,
) -> Result<Vec<Key>, CsGraphError> {
    if message.trim().is_empty() {
        return Err(CsGraphError::Validation(
            "retracting requires a message".to_string(),
        ));
    }
    let own = BTreeSet::from([set_id(key)]);
    let mut retracted = Vec::new();
    for item in members(store, key)? {
        let record: CrossSectionRecord = versioning::require(store, &item)?;
        if record.version_info.status != Status::Published {
            continue;
        }
        if !live_sets_containing(store, &item, &own)?.is_empty() {
            tracing::debug!(set = %key, section = %item, "keeping shared cross section");
            continue;
        }
        versioning::retract::<CrossSectionRecord>(store, &item, message)?;
        retracted.push(item);
    }
    versioning::retract::<CrossSectionSetRecord>(store, key, message)?;
    tracing::info!(set = %key, items = retracted.len(), "retracted set");
    Ok(retracted)
}

/// Hard-delete a draft set and the draft members only it used.
///
/// Shared members and published members stay. Reactions, references and
/// states left without users are released. Returns the removed member keys.
pub fn remove_draft_set_unchecked(
    store: &mut dyn GraphStore,
    key: &Key,
) -> Result<(Vec<Key>, PruneReport), CsGraphError> {
    let set = set_id(key);
    let mut seeds = Vec::new();
    if let Some(record) = versioning::fetch::<CrossSectionSetRecord, _>(store, key)? {
        seeds.extend(record.published_in);
    }

    let mut removed = Vec::new();
    for item in members(store, key)? {
        store.remove_edge(Relation::IsPartOf, &section_id(&item), &set)?;
        let deps = item_dependencies(store, &section_id(&item))?;
        if remove_orphan_draft(store, &item)? {
            seeds.extend(deps);
            removed.push(item);
        }
    }
    store.remove(&set)?;

    let report = release(store, seeds)?;
    tracing::info!(set = %key, items = removed.len(), "removed draft set");
    Ok((removed, report))
}

/// Delete a set.
///
/// - missing key: no-op
/// - draft: hard delete with exclusive draft members
/// - published: retract with `message`
/// - archived or retracted: `InvalidStatus`
pub fn delete_set(
    store: &mut dyn GraphStore,
    key: &Key,
    message: Option<&str>,
) -> Result<Deletion, CsGraphError> {
    let Some(record) = versioning::fetch::<CrossSectionSetRecord, _>(store, key)? else {
        return Ok(Deletion::Missing);
    };
    match delete_transition(&set_id(key), record.version_info.status)? {
        Transition::Remove => {
            remove_draft_set_unchecked(store, key)?;
            Ok(Deletion::Removed)
        }
        _ => {
            retract_set_unchecked(store, key, message.unwrap_or_default())?;
            Ok(Deletion::Retracted)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::document::SetDocument;
    use crate::graph::Graph;
    use crate::set::{create_set, update_set};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn document(name: &str, threshold: f64) -> SetDocument {
        serde_json::from_value(json!({
            "contributor": "Lab",
            "name": name,
            "states": {
                "e": { "particle": "e", "charge": -1 },
                "He": { "particle": "He", "charge": 0 }
            },
            "processes": [{
                "reaction": {
                    "lhs": [{ "count": 1, "state": "e" }, { "count": 1, "state": "He" }],
                    "rhs": [{ "count": 1, "state": "e" }, { "count": 1, "state": "He" }],
                    "reversible": false,
                    "typeTags": ["Effective"]
                },
                "info": [{
                    "type": "LUT", "threshold": threshold,
                    "labels": ["Energy", "Cross Section"], "units": ["eV", "m^2"],
                    "data": [[1.0, 5.0e-20]]
                }]
            }]
        }))
        .unwrap()
    }

    fn keyed(mut doc: SetDocument, key: &Key) -> SetDocument {
        doc.processes[0].info[0].key = Some(key.clone());
        doc
    }

    fn item_status(graph: &Graph, key: &Key) -> Status {
        versioning::require::<CrossSectionRecord, _>(graph, key)
            .unwrap()
            .version_info
            .status
    }

    fn set_status(graph: &Graph, key: &Key) -> Status {
        versioning::require::<CrossSectionSetRecord, _>(graph, key)
            .unwrap()
            .version_info
            .status
    }

    #[test]
    fn publish_archives_items_and_set() {
        let mut graph = Graph::new();
        let v1 = create_set(&mut graph, &document("s", 0.0), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        let item = members(&graph, &v1).unwrap()[0].clone();
        let v2 = update_set(&mut graph, &v1, &keyed(document("s", 1.0), &item), &BTreeMap::new(), None)
            .unwrap();
        let draft_item = members(&graph, &v2).unwrap()[0].clone();

        let outcome = publish_set(&mut graph, &v2).unwrap();
        assert_eq!(outcome.archived_set, Some(v1.clone()));
        assert_eq!(outcome.published_items, vec![draft_item.clone()]);
        assert_eq!(outcome.archived_items, vec![item.clone()]);
        assert_eq!(set_status(&graph, &v1), Status::Archived);
        assert_eq!(set_status(&graph, &v2), Status::Published);
        assert_eq!(item_status(&graph, &item), Status::Archived);
        assert_eq!(item_status(&graph, &draft_item), Status::Published);
    }

    #[test]
    fn publish_refuses_when_other_set_uses_predecessor() {
        let mut graph = Graph::new();
        let s1 = create_set(&mut graph, &document("s1", 0.0), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        let item = members(&graph, &s1).unwrap()[0].clone();
        let s3 = create_set(&mut graph, &keyed(document("s3", 0.0), &item), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        assert_eq!(members(&graph, &s3).unwrap(), vec![item.clone()]);

        let s2 = update_set(&mut graph, &s1, &keyed(document("s1", 2.0), &item), &BTreeMap::new(), None)
            .unwrap();
        let draft_item = members(&graph, &s2).unwrap()[0].clone();
        let before = graph.clone();

        let err = publish_set(&mut graph, &s2).unwrap_err();
        assert_eq!(
            err,
            CsGraphError::PublishConflict(vec![PublishConflict {
                item: draft_item,
                predecessor: item,
                sets: vec![s3],
            }])
        );
        assert_eq!(graph, before);
    }

    #[test]
    fn publish_requires_draft() {
        let mut graph = Graph::new();
        let key = create_set(&mut graph, &document("s", 0.0), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        assert!(matches!(
            publish_set(&mut graph, &key),
            Err(CsGraphError::InvalidStatus { .. })
        ));
    }

    #[test]
    fn retract_keeps_shared_items() {
        let mut graph = Graph::new();
        let s1 = create_set(&mut graph, &document("s1", 0.0), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        let item = members(&graph, &s1).unwrap()[0].clone();
        let s2 = create_set(&mut graph, &keyed(document("s2", 0.0), &item), &BTreeMap::new(), Status::Published, None)
            .unwrap();

        assert_eq!(delete_set(&mut graph, &s1, Some("superseded")).unwrap(), Deletion::Retracted);
        assert_eq!(item_status(&graph, &item), Status::Published);
        assert_eq!(delete_set(&mut graph, &s2, Some("superseded")).unwrap(), Deletion::Retracted);
        assert_eq!(item_status(&graph, &item), Status::Retracted);
    }

    #[test]
    fn retract_requires_message() {
        let mut graph = Graph::new();
        let key = create_set(&mut graph, &document("s", 0.0), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        assert!(matches!(
            delete_set(&mut graph, &key, None),
            Err(CsGraphError::Validation(_))
        ));
        assert_eq!(set_status(&graph, &key), Status::Published);
    }

    #[test]
    fn removing_draft_set_cleans_up_exclusive_content() {
        let mut graph = Graph::new();
        let key = create_set(&mut graph, &document("s", 0.0), &BTreeMap::new(), Status::Draft, None)
            .unwrap();
        assert_eq!(delete_set(&mut graph, &key, None).unwrap(), Deletion::Removed);
        assert_eq!(graph.count(Collection::CrossSection).unwrap(), 0);
        assert_eq!(graph.count(Collection::Reaction).unwrap(), 0);
        assert_eq!(graph.count(Collection::State).unwrap(), 0);
        // The organization stays.
        assert_eq!(graph.count(Collection::Organization).unwrap(), 1);
        assert_eq!(delete_set(&mut graph, &key, None).unwrap(), Deletion::Missing);
    }

    #[test]
    fn removing_draft_of_published_set_keeps_lineage() {
        let mut graph = Graph::new();
        let v1 = create_set(&mut graph, &document("s", 0.0), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        let item = members(&graph, &v1).unwrap()[0].clone();
        let v2 = update_set(&mut graph, &v1, &keyed(document("s", 3.0), &item), &BTreeMap::new(), None)
            .unwrap();
        let draft_item = members(&graph, &v2).unwrap()[0].clone();

        let (removed, _) = remove_draft_set_unchecked(&mut graph, &v2).unwrap();
        assert_eq!(removed, vec![draft_item]);
        assert_eq!(set_status(&graph, &v1), Status::Published);
        assert_eq!(item_status(&graph, &item), Status::Published);
        assert!(versioning::draft_of::<CrossSectionSetRecord, _>(&graph, &v1).unwrap().is_none());
        assert!(versioning::draft_of::<CrossSectionRecord, _>(&graph, &item).unwrap().is_none());
    }
}

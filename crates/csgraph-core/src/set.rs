//! # Set Composition Engine
//!
//! Creates and updates cross section sets from upload documents.
//!
//! Each `(reaction, info)` pair of a document becomes one member item:
//!
//! 1. an info carrying the key of a draft or published item owned by the
//!    same organization is reused when its content is unchanged, or edited
//!    through the versioning engine when it differs
//! 2. any other info (no key, foreign key, stale key) creates a new item
//!
//! Every resolved item is linked to the set with an `IsPartOf` edge.

use crate::document::{CrossSectionSetRecord, ProcessInfo, SetDocument};
use crate::equality::SectionContent;
use crate::graph::{GraphStore, GraphView, to_document};
use crate::orchestrator;
use crate::primitives::indirect_draft_message;
use crate::reaction::Reaction;
use crate::reference::CslRecord;
use crate::section::{
    SectionContext, create_item, load_owned, remove_orphan_draft, update_item,
};
use crate::store::{insert_references, insert_state_dict, upsert_organization};
use crate::types::{
    Collection, CsGraphError, Direction, EdgeAttrs, Key, NodeId, Relation, Status, VersionInfo,
};
use crate::versioning::{self, Transition};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) fn set_id(key: &Key) -> NodeId {
    NodeId {
        collection: Collection::CrossSectionSet,
        key: key.clone(),
    }
}

fn section_id(key: &Key) -> NodeId {
    NodeId {
        collection: Collection::CrossSection,
        key: key.clone(),
    }
}

/// Insert the organization, states and references of a document.
fn prepare(
    store: &mut dyn GraphStore,
    doc: &SetDocument,
    references: &BTreeMap<String, CslRecord>,
) -> Result<SectionContext, CsGraphError> {
    Ok(SectionContext {
        organization: upsert_organization(store, &doc.contributor)?,
        states: insert_state_dict(store, &doc.states)?,
        references: insert_references(store, references)?,
    })
}

fn set_record(
    doc: &SetDocument,
    context: &SectionContext,
    version_info: VersionInfo,
) -> CrossSectionSetRecord {
    CrossSectionSetRecord {
        version_info,
        organization: context.organization.clone(),
        name: doc.name.clone(),
        description: doc.description.clone(),
        complete: doc.complete,
        published_in: doc
            .published_in
            .as_ref()
            .and_then(|local| context.references.get(local).cloned()),
    }
}

/// Resolve one `(reaction, info)` pair to the key of the item that should
/// be part of the set.
fn resolve_member(
    store: &mut dyn GraphStore,
    reaction: &Reaction,
    info: &ProcessInfo,
    context: &SectionContext,
    status: Status,
    message: &str,
) -> Result<Key, CsGraphError> {
    let new_message = (status == Status::Draft).then(|| message.to_string());

    let Some(key) = &info.key else {
        return create_item(store, reaction, info, context, status, new_message);
    };

    match load_owned(store, key, &context.organization)? {
        Some(stored) if stored.matches(&SectionContent::from_process(reaction, info), context) => {
            tracing::debug!(section = %key, "reusing unchanged cross section");
            Ok(key.clone())
        }
        Some(_) => update_item(store, key, reaction, info, context, Some(message.to_string())),
        None => {
            tracing::debug!(section = %key, "ignoring key of unowned or stale cross section");
            let fresh = ProcessInfo {
                key: None,
                ..info.clone()
            };
            create_item(store, reaction, &fresh, context, status, new_message)
        }
    }
}

/// Resolve every member of `doc` and link it to the set.
///
/// Returns the member keys in document order.
fn compose_members(
    store: &mut dyn GraphStore,
    set_key: &Key,
    doc: &SetDocument,
    context: &SectionContext,
    status: Status,
) -> Result<Vec<Key>, CsGraphError> {
    let message = indirect_draft_message(&doc.name, set_key.as_str());
    let set = set_id(set_key);
    let mut members = Vec::new();

    for process in &doc.processes {
        for info in &process.info {
            let key = resolve_member(store, &process.reaction, info, context, status, &message)?;
            store.insert_edge(Relation::IsPartOf, &section_id(&key), &set, EdgeAttrs::default())?;
            members.push(key);
        }
    }
    Ok(members)
}

/// Keys of the items that are part of a set, ordered by key.
pub fn members<S: GraphView + ?Sized>(store: &S, set_key: &Key) -> Result<Vec<Key>, CsGraphError> {
    let mut keys: Vec<Key> = store
        .neighbours(Relation::IsPartOf, &set_id(set_key), Direction::Inbound)?
        .into_iter()
        .map(|(id, _)| id.key)
        .collect();
    keys.sort();
    Ok(keys)
}

/// Create a set with version 1.
///
/// `references` is the document's reference dictionary with every DOI
/// already resolved. New member items get the status of the set.
///
/// A published set is stored as a draft first and then goes through
/// [`orchestrator::publish_set`], so keyed members that became drafts are
/// published with it (or the publish conflicts are reported).
pub fn create_set(
    store: &mut dyn GraphStore,
    doc: &SetDocument,
    references: &BTreeMap<String, CslRecord>,
    status: Status,
    commit_message: Option<String>,
) -> Result<Key, CsGraphError> {
    doc.validate()?;
    if !matches!(status, Status::Draft | Status::Published) {
        return Err(CsGraphError::Validation(format!(
            "a new set can not be {status}"
        )));
    }
    let context = prepare(store, doc, references)?;
    let record = set_record(doc, &context, VersionInfo::initial(Status::Draft, commit_message));
    let id = store.insert(Collection::CrossSectionSet, to_document(&record)?)?;
    let members = compose_members(store, &id.key, doc, &context, status)?;
    tracing::info!(set = %id.key, %status, members = members.len(), "created set");

    if status == Status::Published {
        orchestrator::publish_set(store, &id.key)?;
    }
    Ok(id.key)
}

/// Update a set.
///
/// A draft set is replaced in place: items no longer listed leave the set
/// and are removed when they are drafts without other membership. A
/// published set gets a new draft revision; the returned key is that of
/// the new draft.
pub fn update_set(
    store: &mut dyn GraphStore,
    key: &Key,
    doc: &SetDocument,
    references: &BTreeMap<String, CslRecord>,
    message: Option<String>,
) -> Result<Key, CsGraphError> {
    doc.validate()?;
    let current: CrossSectionSetRecord = versioning::require(store, key)?;
    let transition = versioning::update_transition(&set_id(key), current.version_info.status)?;
    if transition == Transition::Branch {
        versioning::ensure_draftless::<CrossSectionSetRecord, _>(store, key)?;
    }

    let context = prepare(store, doc, references)?;
    let record = set_record(doc, &context, current.version_info.clone());

    if transition == Transition::Branch {
        let draft = versioning::branch(store, key, record, message)?;
        let members = compose_members(store, &draft, doc, &context, Status::Draft)?;
        tracing::info!(set = %key, draft = %draft, members = members.len(), "created draft set");
        return Ok(draft);
    }

    versioning::edit_in_place(store, key, record, message)?;
    let previous: BTreeSet<Key> = members(store, key)?.into_iter().collect();
    let listed: BTreeSet<Key> = compose_members(store, key, doc, &context, Status::Draft)?
        .into_iter()
        .collect();

    let set = set_id(key);
    for stale in previous.difference(&listed) {
        store.remove_edge(Relation::IsPartOf, &section_id(stale), &set)?;
        if remove_orphan_draft(store, stale)? {
            tracing::debug!(set = %key, section = %stale, "removed dropped draft cross section");
        }
    }
    tracing::info!(set = %key, members = listed.len(), "updated draft set");
    Ok(key.clone())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::document::CrossSectionRecord;
    use crate::graph::Graph;
    use serde_json::json;

    fn document(threshold: f64) -> SetDocument {
        serde_json::from_value(json!({
            "contributor": "Lab",
            "name": "Argon",
            "description": "e + Ar",
            "states": {
                "e": { "particle": "e", "charge": -1 },
                "Ar": { "particle": "Ar", "charge": 0 },
                "Ar+": { "particle": "Ar", "charge": 1 }
            },
            "processes": [
                {
                    "reaction": {
                        "lhs": [{ "count": 1, "state": "e" }, { "count": 1, "state": "Ar" }],
                        "rhs": [{ "count": 1, "state": "e" }, { "count": 1, "state": "Ar" }],
                        "reversible": false,
                        "typeTags": ["Elastic"]
                    },
                    "info": [{
                        "type": "LUT", "threshold": 0.0,
                        "labels": ["Energy", "Cross Section"], "units": ["eV", "m^2"],
                        "data": [[1.0, 1.0e-20]]
                    }]
                },
                {
                    "reaction": {
                        "lhs": [{ "count": 1, "state": "e" }, { "count": 1, "state": "Ar" }],
                        "rhs": [{ "count": 2, "state": "e" }, { "count": 1, "state": "Ar+" }],
                        "reversible": false,
                        "typeTags": ["Ionization"]
                    },
                    "info": [{
                        "type": "LUT", "threshold": threshold,
                        "labels": ["Energy", "Cross Section"], "units": ["eV", "m^2"],
                        "data": [[20.0, 1.0e-21]]
                    }]
                }
            ]
        }))
        .unwrap()
    }

    fn with_keys(mut doc: SetDocument, keys: &[Key]) -> SetDocument {
        let mut keys = keys.iter();
        for process in &mut doc.processes {
            for info in &mut process.info {
                info.key = keys.next().cloned();
            }
        }
        doc
    }

    fn section_status(graph: &Graph, key: &Key) -> Status {
        versioning::require::<CrossSectionRecord, _>(graph, key)
            .unwrap()
            .version_info
            .status
    }

    #[test]
    fn create_links_every_member() {
        let mut graph = Graph::new();
        let key = create_set(&mut graph, &document(15.8), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        let members = members(&graph, &key).unwrap();
        assert_eq!(members.len(), 2);
        for member in &members {
            assert_eq!(section_status(&graph, member), Status::Published);
        }
    }

    #[test]
    fn unchanged_resave_reuses_items() {
        let mut graph = Graph::new();
        let key = create_set(&mut graph, &document(15.8), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        let before = members(&graph, &key).unwrap();
        let reactions = graph.count(Collection::Reaction).unwrap();

        let draft = update_set(
            &mut graph,
            &key,
            &with_keys(document(15.8), &before),
            &BTreeMap::new(),
            Some("no-op".to_string()),
        )
        .unwrap();
        assert_ne!(draft, key);
        assert_eq!(members(&graph, &draft).unwrap(), before);
        assert_eq!(graph.count(Collection::CrossSection).unwrap(), 2);
        assert_eq!(graph.count(Collection::Reaction).unwrap(), reactions);
    }

    #[test]
    fn changed_item_gets_indirect_draft() {
        let mut graph = Graph::new();
        let key = create_set(&mut graph, &document(15.8), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        let before = members(&graph, &key).unwrap();

        let draft = update_set(
            &mut graph,
            &key,
            &with_keys(document(15.76), &before),
            &BTreeMap::new(),
            None,
        )
        .unwrap();
        let after = members(&graph, &draft).unwrap();
        assert_eq!(after.len(), 2);
        let new_item = after.iter().find(|k| !before.contains(k)).unwrap();
        let record = versioning::require::<CrossSectionRecord, _>(&graph, new_item).unwrap();
        assert_eq!(record.version_info.status, Status::Draft);
        assert_eq!(record.version_info.version, 2);
        assert_eq!(
            record.version_info.commit_message,
            Some(indirect_draft_message("Argon", draft.as_str()))
        );
    }

    #[test]
    fn foreign_key_creates_new_item() {
        let mut graph = Graph::new();
        let key = create_set(&mut graph, &document(15.8), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        let before = members(&graph, &key).unwrap();

        let mut other = with_keys(document(15.8), &before);
        other.contributor = "Other Lab".to_string();
        let other_key =
            create_set(&mut graph, &other, &BTreeMap::new(), Status::Draft, None).unwrap();
        let other_members = members(&graph, &other_key).unwrap();
        assert!(other_members.iter().all(|k| !before.contains(k)));
        assert_eq!(graph.count(Collection::CrossSection).unwrap(), 4);
    }

    #[test]
    fn draft_update_drops_removed_members() {
        let mut graph = Graph::new();
        let key =
            create_set(&mut graph, &document(15.8), &BTreeMap::new(), Status::Draft, None).unwrap();
        let before = members(&graph, &key).unwrap();

        let mut doc = with_keys(document(15.8), &before);
        doc.processes.truncate(1);
        let same = update_set(&mut graph, &key, &doc, &BTreeMap::new(), None).unwrap();
        assert_eq!(same, key);
        assert_eq!(members(&graph, &key).unwrap(), vec![before[0].clone()]);
        assert_eq!(graph.count(Collection::CrossSection).unwrap(), 1);
    }

    #[test]
    fn second_draft_of_published_set_conflicts() {
        let mut graph = Graph::new();
        let key = create_set(&mut graph, &document(15.8), &BTreeMap::new(), Status::Published, None)
            .unwrap();
        update_set(&mut graph, &key, &document(15.8), &BTreeMap::new(), None).unwrap();
        let err = update_set(&mut graph, &key, &document(15.8), &BTreeMap::new(), None).unwrap_err();
        assert!(matches!(err, CsGraphError::DraftConflict { .. }));
    }

    #[test]
    fn invalid_document_is_rejected_before_writes() {
        let mut graph = Graph::new();
        let mut doc = document(15.8);
        doc.processes[0].reaction.lhs[0].state = "Kr".to_string();
        assert!(create_set(&mut graph, &doc, &BTreeMap::new(), Status::Draft, None).is_err());
        assert_eq!(graph.document_count(), 0);
    }
}

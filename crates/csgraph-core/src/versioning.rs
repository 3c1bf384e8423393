//! # Item Versioning Engine
//!
//! The lifecycle state machine shared by every versioned entity.
//!
//! ```text
//!         create            edit (on Published)          edit (on Draft)
//!  (none) ------> Draft --------------------------> Draft(v+1)   Draft (in place)
//!                   |  publish
//!                   v
//!                Published ---- publish of successor ----> Archived
//!                   |
//!                   | retract (requires message)
//!                   v
//!                Retracted
//! ```
//!
//! Every mutating entry point validates its step with [`check_transition`];
//! there are no other status checks in the engine. The functions here are
//! generic over [`Versioned`], so cross sections and sets share one
//! implementation of history chains, draftless checks, publish/archive and
//! retraction.

use crate::document::Versioned;
use crate::graph::{GraphStore, GraphView, load, to_document};
use crate::primitives::MAX_HISTORY_DEPTH;
use crate::types::{CsGraphError, Direction, EdgeAttrs, Key, NodeId, Status, Timestamp, VersionInfo};
use serde::{Deserialize, Serialize};

// =============================================================================
// STATE MACHINE
// =============================================================================

/// A lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Replace the content of a draft, keeping key and version.
    EditInPlace,
    /// Create a new draft revision of a published item.
    Branch,
    /// Make a draft public.
    Publish,
    /// Supersede a published revision by its published successor.
    Archive,
    /// Withdraw a published item.
    Retract,
    /// Hard-delete a draft.
    Remove,
}

impl Transition {
    pub const ALL: [Transition; 6] = [
        Transition::EditInPlace,
        Transition::Branch,
        Transition::Publish,
        Transition::Archive,
        Transition::Retract,
        Transition::Remove,
    ];

    /// The only status this transition may start from.
    #[must_use]
    pub const fn source(self) -> Status {
        match self {
            Self::EditInPlace | Self::Publish | Self::Remove => Status::Draft,
            Self::Branch | Self::Archive | Self::Retract => Status::Published,
        }
    }

    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::EditInPlace | Self::Branch => "update",
            Self::Publish => "publish",
            Self::Archive => "archive",
            Self::Retract | Self::Remove => "delete",
        }
    }
}

/// Validate one lifecycle step.
pub fn check_transition(
    id: &NodeId,
    status: Status,
    transition: Transition,
) -> Result<(), CsGraphError> {
    if status == transition.source() {
        Ok(())
    } else {
        Err(CsGraphError::InvalidStatus {
            id: id.clone(),
            status,
            action: transition.action(),
        })
    }
}

fn pick(
    id: &NodeId,
    status: Status,
    candidates: [Transition; 2],
    action: &'static str,
) -> Result<Transition, CsGraphError> {
    candidates
        .into_iter()
        .find(|t| t.source() == status)
        .ok_or_else(|| CsGraphError::InvalidStatus {
            id: id.clone(),
            status,
            action,
        })
}

/// The step an edit takes from `status`.
pub fn update_transition(id: &NodeId, status: Status) -> Result<Transition, CsGraphError> {
    pick(id, status, [Transition::EditInPlace, Transition::Branch], "update")
}

/// The step a delete takes from `status`.
pub fn delete_transition(id: &NodeId, status: Status) -> Result<Transition, CsGraphError> {
    pick(id, status, [Transition::Remove, Transition::Retract], "delete")
}

/// Outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deletion {
    /// Nothing stored under the key.
    Missing,
    /// Draft hard-deleted.
    Removed,
    /// Published item retracted.
    Retracted,
}

// =============================================================================
// LOOKUPS
// =============================================================================

/// A revision in a history listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "_key")]
    pub key: Key,
    #[serde(rename = "versionInfo")]
    pub version_info: VersionInfo,
}

/// Load a versioned record, checking its version invariants.
pub fn fetch<E: Versioned, S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Option<E>, CsGraphError> {
    let record: Option<E> = load(store, &E::id(key))?;
    if let Some(r) = &record {
        r.version_info().validate()?;
    }
    Ok(record)
}

/// Load a versioned record or fail with `NotFound`.
pub fn require<E: Versioned, S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<E, CsGraphError> {
    fetch(store, key)?.ok_or_else(|| CsGraphError::NotFound(E::id(key)))
}

fn save<E: Versioned>(store: &mut dyn GraphStore, key: &Key, record: &E) -> Result<(), CsGraphError> {
    store.replace(&E::id(key), to_document(record)?)
}

/// The revision `key` supersedes, if any.
pub fn predecessor<E: Versioned, S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Option<(Key, E)>, CsGraphError> {
    let parents = store.neighbours(E::HISTORY, &E::id(key), Direction::Outbound)?;
    match parents.into_iter().next() {
        Some((id, _)) => Ok(fetch::<E, S>(store, &id.key)?.map(|record| (id.key, record))),
        None => Ok(None),
    }
}

/// The existing draft revision branched off `key`, if any.
pub fn draft_of<E: Versioned, S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Option<Key>, CsGraphError> {
    for (child, _) in store.neighbours(E::HISTORY, &E::id(key), Direction::Inbound)? {
        if let Some(record) = fetch::<E, S>(store, &child.key)? {
            if record.version_info().status == Status::Draft {
                return Ok(Some(child.key));
            }
        }
    }
    Ok(None)
}

/// Fail with `DraftConflict` when `key` already has a draft revision.
pub fn ensure_draftless<E: Versioned, S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<(), CsGraphError> {
    match draft_of::<E, S>(store, key)? {
        Some(draft) => Err(CsGraphError::DraftConflict {
            id: E::id(key),
            draft,
        }),
        None => Ok(()),
    }
}

/// Revisions from `key` back to the first, newest first, `key` included.
pub fn history<E: Versioned, S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Vec<HistoryEntry>, CsGraphError> {
    let chain = store.traverse(&E::id(key), E::HISTORY, Direction::Outbound, MAX_HISTORY_DEPTH)?;
    let mut entries = Vec::with_capacity(chain.len());
    for (id, _) in chain {
        if let Some(record) = fetch::<E, S>(store, &id.key)? {
            entries.push(HistoryEntry {
                key: id.key,
                version_info: record.version_info().clone(),
            });
        }
    }
    Ok(entries)
}

/// The revision that superseded an archived `key` and is still current:
/// the published or retracted descendant.
pub fn active_successor<E: Versioned, S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Option<Key>, CsGraphError> {
    let chain = store.traverse(&E::id(key), E::HISTORY, Direction::Inbound, MAX_HISTORY_DEPTH)?;
    for (id, depth) in chain {
        if depth == 0 {
            continue;
        }
        if let Some(record) = fetch::<E, S>(store, &id.key)? {
            if matches!(
                record.version_info().status,
                Status::Published | Status::Retracted
            ) {
                return Ok(Some(id.key));
            }
        }
    }
    Ok(None)
}

// =============================================================================
// TRANSITIONS
// =============================================================================

/// Replace the content of a draft. Keeps key and version, refreshes
/// `createdOn` and overwrites the commit message.
pub fn edit_in_place<E: Versioned>(
    store: &mut dyn GraphStore,
    key: &Key,
    mut record: E,
    message: Option<String>,
) -> Result<(), CsGraphError> {
    let current: E = require(store, key)?;
    check_transition(&E::id(key), current.version_info().status, Transition::EditInPlace)?;

    let info = record.version_info_mut();
    *info = current.version_info().clone();
    info.created_on = Timestamp::now();
    info.commit_message = message.filter(|m| !m.trim().is_empty());
    save(store, key, &record)
}

/// Store `record` as a new draft revision of the published `key`.
///
/// Fails with `DraftConflict` when `key` already has a draft. Returns the
/// key of the new revision.
pub fn branch<E: Versioned>(
    store: &mut dyn GraphStore,
    key: &Key,
    mut record: E,
    message: Option<String>,
) -> Result<Key, CsGraphError> {
    let current: E = require(store, key)?;
    let id = E::id(key);
    check_transition(&id, current.version_info().status, Transition::Branch)?;
    ensure_draftless::<E, _>(store, key)?;

    *record.version_info_mut() = current.version_info().successor_draft(message);
    let draft = store.insert(E::COLLECTION, to_document(&record)?)?;
    store.insert_edge(E::HISTORY, &draft, &id, EdgeAttrs::default())?;
    Ok(draft.key)
}

/// Publish a draft and archive the published revision it supersedes.
///
/// Returns the key of the archived revision, if any.
pub fn publish<E: Versioned>(store: &mut dyn GraphStore, key: &Key) -> Result<Option<Key>, CsGraphError> {
    let mut record: E = require(store, key)?;
    check_transition(&E::id(key), record.version_info().status, Transition::Publish)?;

    let mut archived = None;
    if let Some((parent_key, mut parent)) = predecessor::<E, _>(store, key)? {
        if parent.version_info().status == Status::Published {
            check_transition(&E::id(&parent_key), Status::Published, Transition::Archive)?;
            parent.version_info_mut().status = Status::Archived;
            save(store, &parent_key, &parent)?;
            archived = Some(parent_key);
        }
    }

    record.version_info_mut().status = Status::Published;
    save(store, key, &record)?;
    Ok(archived)
}

/// Retract a published revision with a mandatory message.
pub fn retract<E: Versioned>(
    store: &mut dyn GraphStore,
    key: &Key,
    message: &str,
) -> Result<(), CsGraphError> {
    if message.trim().is_empty() {
        return Err(CsGraphError::Validation(
            "retracting requires a message".to_string(),
        ));
    }
    let mut record: E = require(store, key)?;
    check_transition(&E::id(key), record.version_info().status, Transition::Retract)?;

    let info = record.version_info_mut();
    info.status = Status::Retracted;
    info.retract_message = Some(message.to_string());
    save(store, key, &record)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::document::CrossSectionSetRecord;
    use crate::graph::Graph;
    use crate::types::Collection;

    fn set_record(status: Status) -> CrossSectionSetRecord {
        CrossSectionSetRecord {
            version_info: VersionInfo::initial(status, None),
            organization: NodeId::new(Collection::Organization, "1"),
            name: "set".to_string(),
            description: String::new(),
            complete: false,
            published_in: None,
        }
    }

    fn insert(graph: &mut Graph, status: Status) -> Key {
        graph
            .insert(Collection::CrossSectionSet, to_document(&set_record(status)).unwrap())
            .unwrap()
            .key
    }

    fn status_of(graph: &Graph, key: &Key) -> Status {
        require::<CrossSectionSetRecord, _>(graph, key)
            .unwrap()
            .version_info
            .status
    }

    #[test]
    fn every_transition_has_exactly_one_source() {
        let statuses = [Status::Draft, Status::Published, Status::Archived, Status::Retracted];
        let id = NodeId::new(Collection::CrossSection, "1");
        for transition in Transition::ALL {
            let allowed: Vec<Status> = statuses
                .into_iter()
                .filter(|s| check_transition(&id, *s, transition).is_ok())
                .collect();
            assert_eq!(allowed, vec![transition.source()]);
        }
    }

    #[test]
    fn terminal_statuses_allow_nothing() {
        let id = NodeId::new(Collection::CrossSection, "1");
        for status in [Status::Archived, Status::Retracted] {
            assert!(update_transition(&id, status).is_err());
            assert!(delete_transition(&id, status).is_err());
            assert!(Transition::ALL
                .into_iter()
                .all(|t| check_transition(&id, status, t).is_err()));
        }
    }

    #[test]
    fn update_and_delete_dispatch() {
        let id = NodeId::new(Collection::CrossSection, "1");
        assert_eq!(update_transition(&id, Status::Draft).unwrap(), Transition::EditInPlace);
        assert_eq!(update_transition(&id, Status::Published).unwrap(), Transition::Branch);
        assert_eq!(delete_transition(&id, Status::Draft).unwrap(), Transition::Remove);
        assert_eq!(delete_transition(&id, Status::Published).unwrap(), Transition::Retract);
        let err = delete_transition(&id, Status::Archived).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Can not delete CrossSection/1 due to invalid status archived"
        );
    }

    #[test]
    fn branch_then_publish_archives_parent() {
        let mut graph = Graph::new();
        let v1 = insert(&mut graph, Status::Published);

        let v2 = branch(&mut graph, &v1, set_record(Status::Draft), Some("edit".to_string()))
            .unwrap();
        assert_eq!(status_of(&graph, &v1), Status::Published);
        let draft = require::<CrossSectionSetRecord, _>(&graph, &v2).unwrap();
        assert_eq!(draft.version_info.version, 2);
        assert_eq!(draft.version_info.commit_message.as_deref(), Some("edit"));

        assert_eq!(publish::<CrossSectionSetRecord>(&mut graph, &v2).unwrap(), Some(v1.clone()));
        assert_eq!(status_of(&graph, &v1), Status::Archived);
        assert_eq!(status_of(&graph, &v2), Status::Published);

        let keys: Vec<Key> = history::<CrossSectionSetRecord, _>(&graph, &v2)
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec![v2.clone(), v1.clone()]);
        assert_eq!(
            active_successor::<CrossSectionSetRecord, _>(&graph, &v1).unwrap(),
            Some(v2)
        );
    }

    #[test]
    fn second_branch_conflicts() {
        let mut graph = Graph::new();
        let v1 = insert(&mut graph, Status::Published);
        let v2 = branch(&mut graph, &v1, set_record(Status::Draft), None).unwrap();
        let err = branch(&mut graph, &v1, set_record(Status::Draft), None).unwrap_err();
        assert_eq!(
            err,
            CsGraphError::DraftConflict {
                id: NodeId::new(Collection::CrossSectionSet, v1.as_str()),
                draft: v2,
            }
        );
    }

    #[test]
    fn edit_in_place_keeps_version() {
        let mut graph = Graph::new();
        let key = insert(&mut graph, Status::Draft);
        let mut changed = set_record(Status::Published);
        changed.name = "renamed".to_string();
        edit_in_place(&mut graph, &key, changed, Some("typo".to_string())).unwrap();

        let record = require::<CrossSectionSetRecord, _>(&graph, &key).unwrap();
        assert_eq!(record.name, "renamed");
        assert_eq!(record.version_info.version, 1);
        assert_eq!(record.version_info.status, Status::Draft);
        assert_eq!(record.version_info.commit_message.as_deref(), Some("typo"));
    }

    #[test]
    fn retract_requires_message_and_published() {
        let mut graph = Graph::new();
        let published = insert(&mut graph, Status::Published);
        let draft = insert(&mut graph, Status::Draft);

        assert!(matches!(
            retract::<CrossSectionSetRecord>(&mut graph, &published, " "),
            Err(CsGraphError::Validation(_))
        ));
        assert!(matches!(
            retract::<CrossSectionSetRecord>(&mut graph, &draft, "why"),
            Err(CsGraphError::InvalidStatus { .. })
        ));
        retract::<CrossSectionSetRecord>(&mut graph, &published, "duplicate").unwrap();
        let record = require::<CrossSectionSetRecord, _>(&graph, &published).unwrap();
        assert_eq!(record.version_info.retract_message.as_deref(), Some("duplicate"));
        assert!(record.version_info.validate().is_ok());
    }

    #[test]
    fn missing_record_is_not_found() {
        let graph = Graph::new();
        assert_eq!(
            require::<CrossSectionSetRecord, _>(&graph, &Key::from("4")).unwrap_err(),
            CsGraphError::NotFound(NodeId::new(Collection::CrossSectionSet, "4"))
        );
    }
}

//! # Cross Section Items
//!
//! Lifecycle operations on single cross sections: create, update, publish
//! and delete, plus reading a stored cross section back as comparable
//! content.

use crate::document::{CrossSectionRecord, CrossSectionSetRecord, ProcessInfo, SectionDocument};
use crate::equality::{KeyLookup, SectionContent, is_equal_section};
use crate::graph::{GraphStore, GraphView, to_document};
use crate::reaction::{Reaction, load_reaction, resolve_reaction, stored_state_lookup};
use crate::reference::{CslRecord, ReferenceRef};
use crate::store::{insert_references, insert_state_dict, upsert_organization};
use crate::types::{
    Collection, CsGraphError, Direction, EdgeAttrs, Key, NodeId, Relation, Status, VersionInfo,
};
use crate::versioning::{self, Deletion, Transition, check_transition, delete_transition};
use std::collections::BTreeMap;

/// Canonical ids for the local aliases of one upload document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionContext {
    pub organization: NodeId,
    pub states: BTreeMap<String, NodeId>,
    pub references: BTreeMap<String, NodeId>,
}

impl SectionContext {
    #[must_use]
    pub fn lookup(&self) -> KeyLookup<'_> {
        KeyLookup {
            states: &self.states,
            references: &self.references,
        }
    }
}

fn link_references(
    store: &mut dyn GraphStore,
    item: &NodeId,
    references: &[ReferenceRef],
    ids: &BTreeMap<String, NodeId>,
) -> Result<(), CsGraphError> {
    for reference in references {
        let target = ids.get(reference.id()).ok_or_else(|| {
            CsGraphError::Validation(format!("unknown reference '{}'", reference.id()))
        })?;
        store.insert_edge(
            Relation::References,
            item,
            target,
            EdgeAttrs::with_comments(reference.comments().to_vec()),
        )?;
    }
    Ok(())
}

fn unlink_references(store: &mut dyn GraphStore, item: &NodeId) -> Result<(), CsGraphError> {
    for (target, _) in store.neighbours(Relation::References, item, Direction::Outbound)? {
        store.remove_edge(Relation::References, item, &target)?;
    }
    Ok(())
}

fn item_id(key: &Key) -> NodeId {
    NodeId {
        collection: Collection::CrossSection,
        key: key.clone(),
    }
}

/// Insert a new cross section.
pub fn create_item(
    store: &mut dyn GraphStore,
    reaction: &Reaction,
    info: &ProcessInfo,
    context: &SectionContext,
    status: Status,
    commit_message: Option<String>,
) -> Result<Key, CsGraphError> {
    let reaction_id = resolve_reaction(store, &context.states, reaction)?;
    let record = CrossSectionRecord {
        version_info: VersionInfo::initial(status, commit_message),
        organization: context.organization.clone(),
        reaction: reaction_id,
        info: info.body.clone(),
    };
    let id = store.insert(Collection::CrossSection, to_document(&record)?)?;
    link_references(store, &id, &info.references, &context.references)?;
    tracing::debug!(section = %id.key, %status, "created cross section");
    Ok(id.key)
}

/// Update a cross section.
///
/// A draft is edited in place and keeps its key. A published item gets a
/// new draft revision; the returned key is that of the new draft.
pub fn update_item(
    store: &mut dyn GraphStore,
    key: &Key,
    reaction: &Reaction,
    info: &ProcessInfo,
    context: &SectionContext,
    message: Option<String>,
) -> Result<Key, CsGraphError> {
    let current: CrossSectionRecord = versioning::require(store, key)?;
    let transition = versioning::update_transition(&item_id(key), current.version_info.status)?;

    // Fail on an existing draft before inserting any sub-entity.
    if transition == Transition::Branch {
        versioning::ensure_draftless::<CrossSectionRecord, _>(store, key)?;
    }

    let record = CrossSectionRecord {
        version_info: current.version_info.clone(),
        organization: context.organization.clone(),
        reaction: resolve_reaction(store, &context.states, reaction)?,
        info: info.body.clone(),
    };

    let target = match transition {
        Transition::Branch => versioning::branch(store, key, record, message)?,
        _ => {
            versioning::edit_in_place(store, key, record, message)?;
            unlink_references(store, &item_id(key))?;
            key.clone()
        }
    };
    link_references(store, &item_id(&target), &info.references, &context.references)?;
    tracing::debug!(section = %key, revision = %target, "updated cross section");
    Ok(target)
}

/// Publish a draft cross section, archiving its published predecessor.
pub fn publish_item(store: &mut dyn GraphStore, key: &Key) -> Result<Option<Key>, CsGraphError> {
    versioning::publish::<CrossSectionRecord>(store, key)
}

/// Sets a cross section is part of, with their status.
pub fn sets_of<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Vec<(Key, Status)>, CsGraphError> {
    let mut sets = Vec::new();
    for (set, _) in store.neighbours(Relation::IsPartOf, &item_id(key), Direction::Outbound)? {
        if let Some(record) = versioning::fetch::<CrossSectionSetRecord, S>(store, &set.key)? {
            sets.push((set.key, record.version_info.status));
        }
    }
    Ok(sets)
}

/// Delete a cross section.
///
/// - missing key: no-op
/// - draft: hard delete, refused while the item is part of any set
/// - published: retract with `message`, refused while the item is part of
///   a published set
/// - archived or retracted: `InvalidStatus`
pub fn delete_item(
    store: &mut dyn GraphStore,
    key: &Key,
    message: Option<&str>,
) -> Result<Deletion, CsGraphError> {
    let Some(record) = versioning::fetch::<CrossSectionRecord, _>(store, key)? else {
        return Ok(Deletion::Missing);
    };
    let id = item_id(key);
    let sets = sets_of(store, key)?;

    match delete_transition(&id, record.version_info.status)? {
        Transition::Remove => {
            if !sets.is_empty() {
                return Err(CsGraphError::BelongsToSet {
                    id,
                    sets: sets.into_iter().map(|(k, _)| k).collect(),
                    action: "delete",
                });
            }
            store.remove(&id)?;
            tracing::info!(section = %key, "removed draft cross section");
            Ok(Deletion::Removed)
        }
        _ => {
            let published: Vec<Key> = sets
                .into_iter()
                .filter(|(_, status)| *status == Status::Published)
                .map(|(k, _)| k)
                .collect();
            if !published.is_empty() {
                return Err(CsGraphError::BelongsToSet {
                    id,
                    sets: published,
                    action: "retract",
                });
            }
            versioning::retract::<CrossSectionRecord>(store, key, message.unwrap_or_default())?;
            tracing::info!(section = %key, "retracted cross section");
            Ok(Deletion::Retracted)
        }
    }
}

/// Hard-delete a draft cross section that no set refers to any more.
///
/// Returns false, leaving the item alone, when it is not a draft or still
/// belongs to a set.
pub fn remove_orphan_draft(store: &mut dyn GraphStore, key: &Key) -> Result<bool, CsGraphError> {
    let Some(record) = versioning::fetch::<CrossSectionRecord, _>(store, key)? else {
        return Ok(false);
    };
    if record.version_info.status != Status::Draft || !sets_of(store, key)?.is_empty() {
        return Ok(false);
    }
    check_transition(&item_id(key), Status::Draft, Transition::Remove)?;
    store.remove(&item_id(key))
}

// =============================================================================
// STANDALONE CROSS SECTIONS
// =============================================================================

fn prepare(
    store: &mut dyn GraphStore,
    doc: &SectionDocument,
    references: &BTreeMap<String, CslRecord>,
) -> Result<SectionContext, CsGraphError> {
    doc.validate()?;
    Ok(SectionContext {
        organization: upsert_organization(store, &doc.contributor)?,
        states: insert_state_dict(store, &doc.states)?,
        references: insert_references(store, references)?,
    })
}

/// Create a cross section outside any set.
pub fn create_section(
    store: &mut dyn GraphStore,
    doc: &SectionDocument,
    references: &BTreeMap<String, CslRecord>,
    status: Status,
    commit_message: Option<String>,
) -> Result<Key, CsGraphError> {
    let context = prepare(store, doc, references)?;
    let key = create_item(store, &doc.reaction, &doc.info, &context, status, commit_message)?;
    tracing::info!(section = %key, %status, "created cross section");
    Ok(key)
}

/// Update a cross section from an upload document.
///
/// Unlike set members, an unchanged upload still produces a revision.
pub fn update_section(
    store: &mut dyn GraphStore,
    key: &Key,
    doc: &SectionDocument,
    references: &BTreeMap<String, CslRecord>,
    message: Option<String>,
) -> Result<Key, CsGraphError> {
    versioning::require::<CrossSectionRecord, _>(store, key)?;
    let context = prepare(store, doc, references)?;
    let revision = update_item(store, key, &doc.reaction, &doc.info, &context, message)?;
    tracing::info!(section = %key, revision = %revision, "updated cross section");
    Ok(revision)
}

/// A stored cross section as comparable content, with identity lookups
/// for the canonical keys it uses.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSection {
    pub key: Key,
    pub record: CrossSectionRecord,
    pub content: SectionContent,
    pub states: BTreeMap<String, NodeId>,
    pub references: BTreeMap<String, NodeId>,
}

impl StoredSection {
    #[must_use]
    pub fn lookup(&self) -> KeyLookup<'_> {
        KeyLookup {
            states: &self.states,
            references: &self.references,
        }
    }

    /// Compare against uploaded content.
    #[must_use]
    pub fn matches(&self, content: &SectionContent, context: &SectionContext) -> bool {
        is_equal_section(&self.content, self.lookup(), content, context.lookup())
    }

    /// The stored content as an upload process info carrying its key.
    #[must_use]
    pub fn to_process_info(&self) -> ProcessInfo {
        ProcessInfo {
            key: Some(self.key.clone()),
            references: self.content.references.clone(),
            body: self.content.info.clone(),
        }
    }
}

/// Load a cross section together with its reaction and references.
pub fn load_section<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Option<StoredSection>, CsGraphError> {
    let Some(record) = versioning::fetch::<CrossSectionRecord, S>(store, key)? else {
        return Ok(None);
    };
    let reaction = load_reaction(store, &record.reaction)?
        .ok_or_else(|| CsGraphError::NotFound(record.reaction.clone()))?;

    let mut references = Vec::new();
    let mut reference_ids = BTreeMap::new();
    for (target, attrs) in store.neighbours(Relation::References, &item_id(key), Direction::Outbound)? {
        references.push(ReferenceRef::new(target.key.0.clone(), attrs.comments));
        reference_ids.insert(target.key.0.clone(), target);
    }

    Ok(Some(StoredSection {
        key: key.clone(),
        states: stored_state_lookup(&reaction),
        references: reference_ids,
        content: SectionContent {
            reaction,
            info: record.info.clone(),
            references,
        },
        record,
    }))
}

/// Load a cross section owned by `organization` that is still editable
/// (draft or published).
pub fn load_owned<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
    organization: &NodeId,
) -> Result<Option<StoredSection>, CsGraphError> {
    Ok(load_section(store, key)?.filter(|s| {
        s.record.organization == *organization
            && matches!(
                s.record.version_info.status,
                Status::Draft | Status::Published
            )
    }))
}

// =============================================================================
// TESTS
// =============================================================================

//! # Entity Store
//!
//! Deduplicated insert for content-addressed entities: states, references,
//! organizations and users.
//!
//! Each entity is looked up by the digest of its canonical form and
//! inserted only when absent. Lookup and insert run inside the caller's
//! transaction.

use crate::digest::content_digest;
use crate::document::{OrganizationRecord, UserRecord};
use crate::graph::{GraphStore, to_document};
use crate::reference::{CitationResolver, CslRecord, ReferenceInput, resolve_references};
use crate::species::State;
use crate::types::{Collection, CsGraphError, EdgeAttrs, NodeId, Relation};
use serde::Serialize;
use std::collections::BTreeMap;

/// Look up an entity by content, inserting it when absent.
///
/// Returns the id and whether the entity was inserted by this call.
pub fn insert_or_get<T: Serialize + ?Sized>(
    store: &mut dyn GraphStore,
    collection: Collection,
    value: &T,
) -> Result<(NodeId, bool), CsGraphError> {
    let digest = content_digest(value)?;
    if let Some(key) = store.lookup_digest(collection, &digest)? {
        return Ok((NodeId { collection, key }, false));
    }
    let id = store.insert(collection, to_document(value)?)?;
    store.index_digest(collection, &digest, &id.key)?;
    Ok((id, true))
}

/// Insert a state and every ancestor it is built from.
///
/// Ancestors are linked with `HasDirectSubstate` edges. When the state has
/// several leaf levels it is a compound: the compound itself is stored and
/// each leaf points at it with an `InCompound` edge. Returns the id of the
/// state as given.
pub fn insert_or_get_state(
    store: &mut dyn GraphStore,
    state: &State,
) -> Result<NodeId, CsGraphError> {
    let tree = state.tree();
    let mut cache: Vec<(State, NodeId)> = Vec::new();

    let mut last = cached_state_id(store, &mut cache, &tree.root)?;
    for (parent, child) in &tree.links {
        let parent_id = cached_state_id(store, &mut cache, parent)?;
        let child_id = cached_state_id(store, &mut cache, child)?;
        store.insert_edge(
            Relation::HasDirectSubstate,
            &parent_id,
            &child_id,
            EdgeAttrs::default(),
        )?;
        last = child_id;
    }

    if tree.is_compound() {
        let compound = cached_state_id(store, &mut cache, state)?;
        for leaf in &tree.leaves {
            let leaf_id = cached_state_id(store, &mut cache, leaf)?;
            store.insert_edge(Relation::InCompound, &leaf_id, &compound, EdgeAttrs::default())?;
        }
        return Ok(compound);
    }

    Ok(last)
}

fn cached_state_id(
    store: &mut dyn GraphStore,
    cache: &mut Vec<(State, NodeId)>,
    state: &State,
) -> Result<NodeId, CsGraphError> {
    if let Some((_, id)) = cache.iter().find(|(known, _)| known == state) {
        return Ok(id.clone());
    }
    let (id, _) = insert_or_get(store, Collection::State, state)?;
    cache.push((state.clone(), id.clone()));
    Ok(id)
}

/// Insert every state of an upload dictionary.
pub fn insert_state_dict(
    store: &mut dyn GraphStore,
    states: &BTreeMap<String, State>,
) -> Result<BTreeMap<String, NodeId>, CsGraphError> {
    states
        .iter()
        .map(|(local, state)| Ok((local.clone(), insert_or_get_state(store, state)?)))
        .collect()
}

/// Look up an organization by name, inserting it when absent.
pub fn upsert_organization(store: &mut dyn GraphStore, name: &str) -> Result<NodeId, CsGraphError> {
    let (id, inserted) = insert_or_get(
        store,
        Collection::Organization,
        &OrganizationRecord {
            name: name.to_string(),
        },
    )?;
    if inserted {
        tracing::info!(organization = %id.key, name, "created organization");
    }
    Ok(id)
}

/// Insert already resolved references.
pub fn insert_references(
    store: &mut dyn GraphStore,
    references: &BTreeMap<String, CslRecord>,
) -> Result<BTreeMap<String, NodeId>, CsGraphError> {
    references
        .iter()
        .map(|(local, record)| {
            let (id, _) = insert_or_get(store, Collection::Reference, record)?;
            Ok((local.clone(), id))
        })
        .collect()
}

/// Resolve bare DOIs and insert the whole dictionary.
///
/// Every DOI is resolved before the first insert, so a resolution failure
/// leaves the store untouched.
pub fn insert_reference_dict<R: CitationResolver + ?Sized>(
    store: &mut dyn GraphStore,
    resolver: &R,
    references: &BTreeMap<String, ReferenceInput>,
) -> Result<BTreeMap<String, NodeId>, CsGraphError> {
    let resolved = resolve_references(resolver, references)?;
    insert_references(store, &resolved)
}

/// Look up a user by email, inserting it when absent.
pub fn upsert_user(store: &mut dyn GraphStore, email: &str) -> Result<NodeId, CsGraphError> {
    let (id, _) = insert_or_get(
        store,
        Collection::User,
        &UserRecord {
            email: email.to_string(),
        },
    )?;
    Ok(id)
}

/// Make a user member of an organization. Both are created when absent.
pub fn add_member(
    store: &mut dyn GraphStore,
    email: &str,
    organization: &str,
) -> Result<(NodeId, NodeId), CsGraphError> {
    let user = upsert_user(store, email)?;
    let org = upsert_organization(store, organization)?;
    if store.insert_edge(Relation::MemberOf, &user, &org, EdgeAttrs::default())? {
        tracing::info!(user = %user.key, organization = %org.key, "added membership");
    }
    Ok((user, org))
}

// =============================================================================
// TESTS
// =============================================================================

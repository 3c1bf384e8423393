//! # Engine
//!
//! Facade over a [`Session`] exposing every public operation.
//!
//! Each mutating call resolves the DOIs of its upload document first, then
//! runs as a single store transaction: it either applies completely or
//! leaves the store untouched. Read calls see one consistent view.

use crate::document::{SectionDocument, SetDocument};
use crate::export::{export_snapshot, import_into, snapshot_hash};
use crate::graph::Graph;
use crate::orchestrator::{self, PublishOutcome};
use crate::prune::{self, PruneReport};
use crate::query::{
    self, ChoiceTree, OwnedSet, Paging, SectionFilter, SectionHeading, SectionView, SetFacets,
    SetFilter, SetHeading, SetSort, SetView,
};
use crate::reference::{CitationResolver, CslRecord, NoResolver, ReferenceInput, resolve_references};
use crate::section;
use crate::session::Session;
use crate::set;
use crate::store;
use crate::types::{Collection, CsGraphError, Key, PublishConflict, Status};
use crate::versioning::{Deletion, HistoryEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Document counts of a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub collections: BTreeMap<String, usize>,
    pub last_key: u64,
}

pub struct Engine {
    session: Session,
    resolver: Box<dyn CitationResolver>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Session::new())
    }
}

impl Engine {
    /// Engine without citation lookup: uploads must carry full CSL records.
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self {
            session,
            resolver: Box::new(NoResolver),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: impl CitationResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The in-memory graph, if the session is not persistent.
    #[must_use]
    pub fn graph(&self) -> Option<&Graph> {
        self.session.graph()
    }

    fn resolve(
        &self,
        references: &BTreeMap<String, ReferenceInput>,
    ) -> Result<BTreeMap<String, CslRecord>, CsGraphError> {
        resolve_references(self.resolver.as_ref(), references)
    }

    // =========================================================================
    // SETS
    // =========================================================================

    pub fn create_set(
        &mut self,
        doc: &SetDocument,
        status: Status,
        message: Option<String>,
    ) -> Result<Key, CsGraphError> {
        let references = self.resolve(&doc.references)?;
        self.session
            .write(|store| set::create_set(store, doc, &references, status, message))
    }

    pub fn update_set(
        &mut self,
        key: &Key,
        doc: &SetDocument,
        message: Option<String>,
    ) -> Result<Key, CsGraphError> {
        let references = self.resolve(&doc.references)?;
        self.session
            .write(|store| set::update_set(store, key, doc, &references, message))
    }

    pub fn publish_set(&mut self, key: &Key) -> Result<PublishOutcome, CsGraphError> {
        self.session.write(|store| orchestrator::publish_set(store, key))
    }

    pub fn delete_set(&mut self, key: &Key, message: Option<&str>) -> Result<Deletion, CsGraphError> {
        self.session
            .write(|store| orchestrator::delete_set(store, key, message))
    }

    /// Conflicts a publish of the set would currently run into.
    pub fn publishing_conflicts(&self, key: &Key) -> Result<Vec<PublishConflict>, CsGraphError> {
        self.session
            .read(|view| orchestrator::publishing_conflicts(view, key))
    }

    pub fn members(&self, key: &Key) -> Result<Vec<Key>, CsGraphError> {
        self.session.read(|view| set::members(view, key))
    }

    pub fn set_document(&self, key: &Key) -> Result<SetDocument, CsGraphError> {
        self.session.read(|view| query::set_document(view, key))
    }

    pub fn set_view(&self, key: &Key) -> Result<SetView, CsGraphError> {
        self.session.read(|view| query::set_view(view, key))
    }

    pub fn public_set(&self, key: &Key) -> Result<SetView, CsGraphError> {
        self.session.read(|view| query::public_set(view, key))
    }

    pub fn history_of_set(&self, key: &Key) -> Result<Vec<HistoryEntry>, CsGraphError> {
        self.session.read(|view| query::history_of_set(view, key))
    }

    pub fn active_set_of_archived(&self, key: &Key) -> Result<Option<Key>, CsGraphError> {
        self.session
            .read(|view| query::active_set_of_archived(view, key))
    }

    // =========================================================================
    // CROSS SECTIONS
    // =========================================================================

    pub fn create_section(
        &mut self,
        doc: &SectionDocument,
        status: Status,
        message: Option<String>,
    ) -> Result<Key, CsGraphError> {
        let references = self.resolve(&doc.references)?;
        self.session
            .write(|store| section::create_section(store, doc, &references, status, message))
    }

    pub fn update_section(
        &mut self,
        key: &Key,
        doc: &SectionDocument,
        message: Option<String>,
    ) -> Result<Key, CsGraphError> {
        let references = self.resolve(&doc.references)?;
        self.session
            .write(|store| section::update_section(store, key, doc, &references, message))
    }

    /// Publish a draft cross section. Returns the archived predecessor.
    pub fn publish_section(&mut self, key: &Key) -> Result<Option<Key>, CsGraphError> {
        self.session.write(|store| {
            let archived = section::publish_item(store, key)?;
            tracing::info!(section = %key, archived = ?archived.as_ref().map(Key::as_str), "published cross section");
            Ok(archived)
        })
    }

    pub fn delete_section(
        &mut self,
        key: &Key,
        message: Option<&str>,
    ) -> Result<Deletion, CsGraphError> {
        self.session
            .write(|store| section::delete_item(store, key, message))
    }

    pub fn section_document(&self, key: &Key) -> Result<SectionDocument, CsGraphError> {
        self.session.read(|view| query::section_document(view, key))
    }

    pub fn section_view(&self, key: &Key) -> Result<SectionView, CsGraphError> {
        self.session.read(|view| query::section_view(view, key))
    }

    pub fn public_section(&self, key: &Key) -> Result<SectionView, CsGraphError> {
        self.session.read(|view| query::public_section(view, key))
    }

    pub fn history_of_section(&self, key: &Key) -> Result<Vec<HistoryEntry>, CsGraphError> {
        self.session
            .read(|view| query::history_of_section(view, key))
    }

    pub fn active_section_of_archived(&self, key: &Key) -> Result<Option<Key>, CsGraphError> {
        self.session
            .read(|view| query::active_section_of_archived(view, key))
    }

    // =========================================================================
    // USERS
    // =========================================================================

    pub fn add_user(&mut self, email: &str) -> Result<Key, CsGraphError> {
        self.session
            .write(|store| Ok(store::upsert_user(store, email)?.key))
    }

    /// Make a user member of an organization. Returns `(user, organization)`.
    pub fn add_member(&mut self, email: &str, organization: &str) -> Result<(Key, Key), CsGraphError> {
        self.session.write(|store| {
            let (user, org) = store::add_member(store, email, organization)?;
            Ok((user.key, org.key))
        })
    }

    pub fn list_owned(&self, email: &str) -> Result<Vec<OwnedSet>, CsGraphError> {
        self.session.read(|view| query::list_owned(view, email))
    }

    pub fn is_owner(&self, key: &Key, email: &str) -> Result<bool, CsGraphError> {
        self.session.read(|view| query::is_owner(view, key, email))
    }

    // =========================================================================
    // SEARCH
    // =========================================================================

    pub fn search_sets(
        &self,
        filter: &SetFilter,
        sort: SetSort,
        paging: Paging,
    ) -> Result<Vec<SetHeading>, CsGraphError> {
        self.session
            .read(|view| query::search_sets(view, filter, sort, paging))
    }

    pub fn set_facets(&self, selection: &SetFilter) -> Result<SetFacets, CsGraphError> {
        self.session.read(|view| query::set_facets(view, selection))
    }

    pub fn state_choices(&self) -> Result<ChoiceTree, CsGraphError> {
        self.session.read(|view| query::state_choices(view))
    }

    pub fn search_sections(
        &self,
        filter: &SectionFilter,
        paging: Paging,
    ) -> Result<Vec<SectionHeading>, CsGraphError> {
        self.session
            .read(|view| query::search_sections(view, filter, paging))
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    pub fn stats(&self) -> Result<StoreStats, CsGraphError> {
        self.session.read(|view| {
            let mut collections = BTreeMap::new();
            for collection in Collection::ALL {
                collections.insert(collection.as_str().to_string(), view.count(collection)?);
            }
            Ok(StoreStats {
                collections,
                last_key: view.last_key()?,
            })
        })
    }

    pub fn prune(&mut self) -> Result<PruneReport, CsGraphError> {
        self.session.write(|store| prune::prune_orphans(store))
    }

    /// Canonical snapshot of the whole store.
    pub fn export(&self) -> Result<Vec<u8>, CsGraphError> {
        self.session.read(|view| export_snapshot(view))
    }

    /// Load a snapshot into the (empty) store. Returns the document count.
    pub fn import(&mut self, data: &[u8]) -> Result<usize, CsGraphError> {
        self.session.write(|store| import_into(store, data))
    }

    pub fn hash(&self) -> Result<String, CsGraphError> {
        self.session.read(|view| snapshot_hash(view))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::reference::StaticResolver;
    use serde_json::json;

    fn upload(doi: bool) -> SetDocument {
        let reference = if doi {
            json!("10.1000/xyz")
        } else {
            json!({ "id": "ref", "type": "article-journal", "title": "Inline" })
        };
        serde_json::from_value(json!({
            "contributor": "Lab",
            "name": "Argon",
            "references": { "r": reference },
            "states": {
                "e": { "particle": "e", "charge": -1 },
                "Ar": { "particle": "Ar", "charge": 0 }
            },
            "processes": [{
                "reaction": {
                    "lhs": [{ "count": 1, "state": "e" }, { "count": 1, "state": "Ar" }],
                    "rhs": [{ "count": 1, "state": "e" }, { "count": 1, "state": "Ar" }],
                    "reversible": false,
                    "typeTags": ["Elastic"]
                },
                "info": [{
                    "type": "LUT", "threshold": 0.0,
                    "labels": ["Energy", "Cross Section"], "units": ["eV", "m^2"],
                    "data": [[1.0, 1.0e-20]],
                    "references": ["r"]
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn unresolvable_doi_leaves_store_untouched() {
        let mut engine = Engine::default();
        let err = engine
            .create_set(&upload(true), Status::Draft, None)
            .unwrap_err();
        assert!(matches!(err, CsGraphError::Resolution { .. }));
        assert_eq!(engine.graph().unwrap().document_count(), 0);
    }

    #[test]
    fn resolver_supplies_doi_records() {
        let record: CslRecord = serde_json::from_value(json!({
            "id": "xyz", "type": "article-journal", "DOI": "10.1000/xyz"
        }))
        .unwrap();
        let mut engine =
            Engine::default().with_resolver(StaticResolver::new().with("10.1000/xyz", record));
        let key = engine.create_set(&upload(true), Status::Draft, None).unwrap();
        let stats = engine.stats().unwrap();
        assert_eq!(stats.collections["Reference"], 1);
        assert_eq!(engine.members(&key).unwrap().len(), 1);
    }

    #[test]
    fn failed_publish_is_rolled_back() {
        let mut engine = Engine::default();
        let key = engine.create_set(&upload(false), Status::Draft, None).unwrap();
        engine.publish_set(&key).unwrap();
        let before = engine.hash().unwrap();
        assert!(matches!(
            engine.publish_set(&key),
            Err(CsGraphError::InvalidStatus { .. })
        ));
        assert_eq!(engine.hash().unwrap(), before);
    }

    #[test]
    fn export_import_between_engines() {
        let mut source = Engine::default();
        let key = source.create_set(&upload(false), Status::Published, None).unwrap();
        let bytes = source.export().unwrap();

        let mut target = Engine::default();
        assert!(target.import(&bytes).unwrap() > 0);
        assert_eq!(target.hash().unwrap(), source.hash().unwrap());
        assert_eq!(target.public_set(&key).unwrap().document.name, "Argon");
    }
}

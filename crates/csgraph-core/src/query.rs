//! # Query Layer
//!
//! Read-only views over the graph: documents rebuilt from stored items,
//! public views, history, ownership and the public search over published
//! sets.
//!
//! Every function takes a `GraphView`, so queries run against either
//! backend inside a read transaction.

use crate::digest::content_digest;
use crate::document::{
    CrossSectionRecord, CrossSectionSetRecord, OrganizationRecord, Process, SectionDocument,
    SetDocument, UserRecord,
};
use crate::graph::{GraphView, load};
use crate::primitives::DEFAULT_PAGE_SIZE;
use crate::reaction::{Reaction, ReactionRecord, ReactionTypeTag, load_reaction};
use crate::reference::{CslRecord, ReferenceInput};
use crate::section::{StoredSection, load_section};
use crate::set::{members, set_id};
use crate::species::State;
use crate::types::{
    Collection, CsGraphError, Direction, Key, NodeId, Relation, Status, VersionInfo,
};
use crate::versioning::{self, HistoryEntry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// VIEW TYPES
// =============================================================================

/// A set as stored, with its version metadata and full document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetView {
    #[serde(rename = "_key")]
    pub key: Key,
    #[serde(rename = "versionInfo")]
    pub version_info: VersionInfo,
    #[serde(flatten)]
    pub document: SetDocument,
}

/// Short description of a set, used in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSummary {
    #[serde(rename = "_key")]
    pub key: Key,
    pub name: String,
    pub status: Status,
}

/// A cross section as stored, with the sets it is part of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionView {
    #[serde(rename = "_key")]
    pub key: Key,
    #[serde(rename = "versionInfo")]
    pub version_info: VersionInfo,
    #[serde(flatten)]
    pub document: SectionDocument,
    #[serde(rename = "isPartOf")]
    pub is_part_of: Vec<SetSummary>,
}

// =============================================================================
// DOCUMENT VIEWS
// =============================================================================

fn organization_name<S: GraphView + ?Sized>(store: &S, id: &NodeId) -> Result<String, CsGraphError> {
    load::<OrganizationRecord, S>(store, id)?
        .map(|org| org.name)
        .ok_or_else(|| CsGraphError::NotFound(id.clone()))
}

fn load_reference<S: GraphView + ?Sized>(store: &S, id: &NodeId) -> Result<CslRecord, CsGraphError> {
    load::<CslRecord, S>(store, id)?.ok_or_else(|| CsGraphError::NotFound(id.clone()))
}

/// States and references of stored sections, keyed by canonical key.
#[derive(Default)]
struct Dictionaries {
    states: BTreeMap<String, State>,
    references: BTreeMap<String, ReferenceInput>,
}

impl Dictionaries {
    fn collect<S: GraphView + ?Sized>(
        &mut self,
        store: &S,
        section: &StoredSection,
    ) -> Result<(), CsGraphError> {
        for (local, id) in &section.states {
            if !self.states.contains_key(local) {
                let state = load::<State, S>(store, id)?
                    .ok_or_else(|| CsGraphError::NotFound(id.clone()))?;
                self.states.insert(local.clone(), state);
            }
        }
        for (local, id) in &section.references {
            self.add_reference(store, local, id)?;
        }
        Ok(())
    }

    fn add_reference<S: GraphView + ?Sized>(
        &mut self,
        store: &S,
        local: &str,
        id: &NodeId,
    ) -> Result<(), CsGraphError> {
        if !self.references.contains_key(local) {
            let record = load_reference(store, id)?;
            self.references
                .insert(local.to_string(), ReferenceInput::Csl(record));
        }
        Ok(())
    }
}

fn require_section<S: GraphView + ?Sized>(store: &S, key: &Key) -> Result<StoredSection, CsGraphError> {
    load_section(store, key)?
        .ok_or_else(|| CsGraphError::NotFound(NodeId::new(Collection::CrossSection, key.as_str())))
}

/// Rebuild the upload document of a set.
///
/// States, references and items are named by their canonical keys, and
/// every info carries the key of its item, so saving the document again
/// reuses every unchanged item.
pub fn set_document<S: GraphView + ?Sized>(store: &S, key: &Key) -> Result<SetDocument, CsGraphError> {
    let record: CrossSectionSetRecord = versioning::require(store, key)?;
    let mut dicts = Dictionaries::default();
    let mut processes = Vec::new();

    for item in members(store, key)? {
        let section = require_section(store, &item)?;
        dicts.collect(store, &section)?;
        processes.push(Process {
            reaction: section.content.reaction.clone(),
            info: vec![section.to_process_info()],
        });
    }

    let published_in = match &record.published_in {
        Some(id) => {
            dicts.add_reference(store, id.key.as_str(), id)?;
            Some(id.key.0.clone())
        }
        None => None,
    };

    Ok(SetDocument {
        contributor: organization_name(store, &record.organization)?,
        name: record.name,
        description: record.description,
        complete: record.complete,
        published_in,
        references: dicts.references,
        states: dicts.states,
        processes,
    })
}

/// Rebuild the upload document of a single cross section.
pub fn section_document<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<SectionDocument, CsGraphError> {
    let section = require_section(store, key)?;
    let mut dicts = Dictionaries::default();
    dicts.collect(store, &section)?;
    Ok(SectionDocument {
        contributor: organization_name(store, &section.record.organization)?,
        references: dicts.references,
        states: dicts.states,
        info: section.to_process_info(),
        reaction: section.content.reaction,
    })
}

fn set_summaries<S: GraphView + ?Sized>(store: &S, key: &Key) -> Result<Vec<SetSummary>, CsGraphError> {
    let item = NodeId::new(Collection::CrossSection, key.as_str());
    let mut sets = Vec::new();
    for (set, _) in store.neighbours(Relation::IsPartOf, &item, Direction::Outbound)? {
        if let Some(record) = versioning::fetch::<CrossSectionSetRecord, S>(store, &set.key)? {
            sets.push(SetSummary {
                key: set.key,
                name: record.name,
                status: record.version_info.status,
            });
        }
    }
    Ok(sets)
}

/// A set with its version metadata, drafts included.
pub fn set_view<S: GraphView + ?Sized>(store: &S, key: &Key) -> Result<SetView, CsGraphError> {
    let record: CrossSectionSetRecord = versioning::require(store, key)?;
    Ok(SetView {
        key: key.clone(),
        version_info: record.version_info,
        document: set_document(store, key)?,
    })
}

/// A cross section with its version metadata, drafts included.
pub fn section_view<S: GraphView + ?Sized>(store: &S, key: &Key) -> Result<SectionView, CsGraphError> {
    let record: CrossSectionRecord = versioning::require(store, key)?;
    Ok(SectionView {
        key: key.clone(),
        version_info: record.version_info,
        document: section_document(store, key)?,
        is_part_of: set_summaries(store, key)?,
    })
}

/// Public view of a set. Drafts are not public and report `NotFound`.
pub fn public_set<S: GraphView + ?Sized>(store: &S, key: &Key) -> Result<SetView, CsGraphError> {
    let view = set_view(store, key)?;
    if view.version_info.status == Status::Draft {
        return Err(CsGraphError::NotFound(set_id(key)));
    }
    Ok(view)
}

/// Public view of a cross section. Drafts report `NotFound`, and draft
/// sets are left out of `isPartOf`.
pub fn public_section<S: GraphView + ?Sized>(store: &S, key: &Key) -> Result<SectionView, CsGraphError> {
    let mut view = section_view(store, key)?;
    if view.version_info.status == Status::Draft {
        return Err(CsGraphError::NotFound(NodeId::new(
            Collection::CrossSection,
            key.as_str(),
        )));
    }
    view.is_part_of.retain(|set| set.status != Status::Draft);
    Ok(view)
}

// =============================================================================
// HISTORY
// =============================================================================

/// Revisions of a set, newest first, starting at `key`.
pub fn history_of_set<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Vec<HistoryEntry>, CsGraphError> {
    versioning::require::<CrossSectionSetRecord, S>(store, key)?;
    versioning::history::<CrossSectionSetRecord, S>(store, key)
}

/// Revisions of a cross section, newest first, starting at `key`.
pub fn history_of_section<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Vec<HistoryEntry>, CsGraphError> {
    versioning::require::<CrossSectionRecord, S>(store, key)?;
    versioning::history::<CrossSectionRecord, S>(store, key)
}

/// The published or retracted revision that superseded an archived set.
pub fn active_set_of_archived<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Option<Key>, CsGraphError> {
    versioning::active_successor::<CrossSectionSetRecord, S>(store, key)
}

/// The published or retracted revision that superseded an archived cross
/// section.
pub fn active_section_of_archived<S: GraphView + ?Sized>(
    store: &S,
    key: &Key,
) -> Result<Option<Key>, CsGraphError> {
    versioning::active_successor::<CrossSectionRecord, S>(store, key)
}

// =============================================================================
// OWNERSHIP
// =============================================================================

/// A set listed for one of its authors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedSet {
    #[serde(rename = "_key")]
    pub key: Key,
    pub name: String,
    #[serde(rename = "versionInfo")]
    pub version_info: VersionInfo,
}

fn organizations_of<S: GraphView + ?Sized>(
    store: &S,
    email: &str,
) -> Result<BTreeSet<NodeId>, CsGraphError> {
    let digest = content_digest(&UserRecord {
        email: email.to_string(),
    })?;
    let Some(key) = store.lookup_digest(Collection::User, &digest)? else {
        return Ok(BTreeSet::new());
    };
    let user = NodeId {
        collection: Collection::User,
        key,
    };
    Ok(store
        .neighbours(Relation::MemberOf, &user, Direction::Outbound)?
        .into_iter()
        .map(|(org, _)| org)
        .collect())
}

/// Sets owned by the organizations of a user, ordered by key.
///
/// Archived sets and published sets that already have a draft are left
/// out; the draft stands in for them.
pub fn list_owned<S: GraphView + ?Sized>(store: &S, email: &str) -> Result<Vec<OwnedSet>, CsGraphError> {
    let organizations = organizations_of(store, email)?;
    let mut owned = Vec::new();
    if organizations.is_empty() {
        return Ok(owned);
    }
    for (key, doc) in store.scan(Collection::CrossSectionSet)? {
        let record: CrossSectionSetRecord = serde_json::from_value(doc)?;
        if !organizations.contains(&record.organization) {
            continue;
        }
        let status = record.version_info.status;
        if status == Status::Archived {
            continue;
        }
        if status == Status::Published
            && versioning::draft_of::<CrossSectionSetRecord, S>(store, &key)?.is_some()
        {
            continue;
        }
        owned.push(OwnedSet {
            key,
            name: record.name,
            version_info: record.version_info,
        });
    }
    Ok(owned)
}

/// Whether the user is a member of the organization owning the set.
pub fn is_owner<S: GraphView + ?Sized>(store: &S, key: &Key, email: &str) -> Result<bool, CsGraphError> {
    let Some(record) = versioning::fetch::<CrossSectionSetRecord, S>(store, key)? else {
        return Ok(false);
    };
    Ok(organizations_of(store, email)?.contains(&record.organization))
}

// =============================================================================
// PUBLIC SEARCH
// =============================================================================

/// Offset and page size of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub offset: usize,
    pub count: usize,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            offset: 0,
            count: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Paging {
    fn apply<T>(self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.count).collect()
    }
}

/// Restrictions on published sets. Empty lists do not restrict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFilter {
    #[serde(default)]
    pub contributors: Vec<String>,
    /// Particles consumed by at least one member, electrons excluded.
    #[serde(default)]
    pub species: Vec<String>,
    #[serde(default)]
    pub tags: Vec<ReactionTypeTag>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Name,
    Contributor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSort {
    pub field: SortField,
    pub order: SortOrder,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetHeading {
    #[serde(rename = "_key")]
    pub key: Key,
    pub name: String,
    pub contributor: String,
}

/// Values available for each filter dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetFacets {
    pub contributors: Vec<String>,
    pub species: Vec<String>,
    pub tags: Vec<ReactionTypeTag>,
}

const ELECTRON: &str = "e";

/// Searchable facts about one published cross section.
struct SectionFacts {
    key: Key,
    reaction: NodeId,
    tags: Vec<ReactionTypeTag>,
    consumed: Vec<State>,
}

impl SectionFacts {
    fn load<S: GraphView + ?Sized>(store: &S, key: &Key) -> Result<Option<Self>, CsGraphError> {
        let Some(record) = versioning::fetch::<CrossSectionRecord, S>(store, key)? else {
            return Ok(None);
        };
        let tags = load::<ReactionRecord, S>(store, &record.reaction)?
            .map(|r| r.type_tags)
            .unwrap_or_default();
        let mut consumed = Vec::new();
        for (state, _) in store.neighbours(Relation::Consumes, &record.reaction, Direction::Outbound)? {
            if let Some(state) = load::<State, S>(store, &state)? {
                consumed.push(state);
            }
        }
        Ok(Some(Self {
            key: key.clone(),
            reaction: record.reaction,
            tags,
            consumed,
        }))
    }

    fn species(&self) -> impl Iterator<Item = &str> {
        self.consumed
            .iter()
            .map(|s| s.particle.as_str())
            .filter(|p| *p != ELECTRON)
    }

    fn matches_tags(&self, tags: &[ReactionTypeTag]) -> bool {
        tags.is_empty() || self.tags.iter().any(|t| tags.contains(t))
    }

    fn matches_species(&self, species: &[String]) -> bool {
        species.is_empty() || self.species().any(|p| species.iter().any(|s| s == p))
    }
}

struct PublishedSet {
    key: Key,
    name: String,
    contributor: String,
    sections: Vec<SectionFacts>,
}

impl PublishedSet {
    fn matches(&self, filter: &SetFilter) -> bool {
        let contributor = filter.contributors.is_empty()
            || filter.contributors.iter().any(|c| *c == self.contributor);
        let content = (filter.tags.is_empty() && filter.species.is_empty())
            || self
                .sections
                .iter()
                .any(|s| s.matches_tags(&filter.tags) && s.matches_species(&filter.species));
        contributor && content
    }
}

fn published_sets<S: GraphView + ?Sized>(store: &S) -> Result<Vec<PublishedSet>, CsGraphError> {
    let mut sets = Vec::new();
    for (key, doc) in store.scan(Collection::CrossSectionSet)? {
        let record: CrossSectionSetRecord = serde_json::from_value(doc)?;
        if record.version_info.status != Status::Published {
            continue;
        }
        let mut sections = Vec::new();
        for item in members(store, &key)? {
            sections.extend(SectionFacts::load(store, &item)?);
        }
        sets.push(PublishedSet {
            contributor: organization_name(store, &record.organization)?,
            name: record.name,
            key,
            sections,
        });
    }
    Ok(sets)
}

/// Search published sets.
pub fn search_sets<S: GraphView + ?Sized>(
    store: &S,
    filter: &SetFilter,
    sort: SetSort,
    paging: Paging,
) -> Result<Vec<SetHeading>, CsGraphError> {
    let mut hits: Vec<SetHeading> = published_sets(store)?
        .into_iter()
        .filter(|set| set.matches(filter))
        .map(|set| SetHeading {
            key: set.key,
            name: set.name,
            contributor: set.contributor,
        })
        .collect();

    hits.sort_by(|a, b| {
        let primary = match sort.field {
            SortField::Name => a.name.cmp(&b.name),
            SortField::Contributor => a.contributor.cmp(&b.contributor),
        };
        let ordering = primary.then_with(|| a.key.cmp(&b.key));
        match sort.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
    Ok(paging.apply(hits))
}

/// Values of each filter dimension that would still give hits when the
/// other dimensions of `selection` are applied.
pub fn set_facets<S: GraphView + ?Sized>(
    store: &S,
    selection: &SetFilter,
) -> Result<SetFacets, CsGraphError> {
    let sets = published_sets(store)?;

    let without_contributors = SetFilter {
        contributors: Vec::new(),
        ..selection.clone()
    };
    let contributors: BTreeSet<String> = sets
        .iter()
        .filter(|set| set.matches(&without_contributors))
        .map(|set| set.contributor.clone())
        .collect();

    let without_species = SetFilter {
        species: Vec::new(),
        ..selection.clone()
    };
    let species: BTreeSet<String> = sets
        .iter()
        .filter(|set| set.matches(&without_species))
        .flat_map(|set| &set.sections)
        .filter(|s| s.matches_tags(&selection.tags))
        .flat_map(|s| s.species().map(str::to_string))
        .collect();

    let without_tags = SetFilter {
        tags: Vec::new(),
        ..selection.clone()
    };
    let tags: BTreeSet<ReactionTypeTag> = sets
        .iter()
        .filter(|set| set.matches(&without_tags))
        .flat_map(|set| &set.sections)
        .filter(|s| s.matches_species(&selection.species))
        .flat_map(|s| s.tags.iter().copied())
        .collect();

    Ok(SetFacets {
        contributors: contributors.into_iter().collect(),
        species: species.into_iter().collect(),
        tags: tags.into_iter().collect(),
    })
}

/// Nested picker tree: particle, charge, electronic, vibrational and
/// rotational level labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChoiceTree {
    pub children: BTreeMap<String, ChoiceTree>,
}

impl ChoiceTree {
    fn child(&mut self, label: String) -> &mut ChoiceTree {
        self.children.entry(label).or_default()
    }

    fn add(&mut self, state: &State) {
        let charge = self.child(state.particle.clone()).child(state.charge.to_string());
        for e in &state.electronic {
            let electronic = charge.child(e.label());
            for v in &e.vibrational {
                let vibrational = electronic.child(v.label());
                for r in &v.rotational {
                    vibrational.child(r.label());
                }
            }
        }
    }
}

/// Choice tree over every state consumed by a published cross section.
pub fn state_choices<S: GraphView + ?Sized>(store: &S) -> Result<ChoiceTree, CsGraphError> {
    let mut tree = ChoiceTree::default();
    let mut reactions = BTreeSet::new();
    for (key, doc) in store.scan(Collection::CrossSection)? {
        let record: CrossSectionRecord = serde_json::from_value(doc)?;
        if record.version_info.status != Status::Published || !reactions.insert(record.reaction) {
            continue;
        }
        if let Some(facts) = SectionFacts::load(store, &key)? {
            for state in &facts.consumed {
                tree.add(state);
            }
        }
    }
    Ok(tree)
}

/// Restrictions on published cross sections. Empty lists do not restrict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFilter {
    /// Consumed particles, electrons excluded.
    #[serde(default)]
    pub species: Vec<String>,
    #[serde(default)]
    pub tags: Vec<ReactionTypeTag>,
    /// Names of published sets the cross section is part of.
    #[serde(default)]
    pub set_names: Vec<String>,
}

/// One cross section search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionHeading {
    #[serde(rename = "_key")]
    pub key: Key,
    pub reaction: Reaction,
    #[serde(rename = "isPartOf")]
    pub is_part_of: Vec<SetSummary>,
}

/// Search published cross sections, ordered by key.
pub fn search_sections<S: GraphView + ?Sized>(
    store: &S,
    filter: &SectionFilter,
    paging: Paging,
) -> Result<Vec<SectionHeading>, CsGraphError> {
    let mut hits = Vec::new();
    for (key, doc) in store.scan(Collection::CrossSection)? {
        let record: CrossSectionRecord = serde_json::from_value(doc)?;
        if record.version_info.status != Status::Published {
            continue;
        }
        let Some(facts) = SectionFacts::load(store, &key)? else {
            continue;
        };
        if !facts.matches_tags(&filter.tags) || !facts.matches_species(&filter.species) {
            continue;
        }
        let sets: Vec<SetSummary> = set_summaries(store, &key)?
            .into_iter()
            .filter(|s| s.status == Status::Published)
            .collect();
        if !filter.set_names.is_empty() && !sets.iter().any(|s| filter.set_names.contains(&s.name)) {
            continue;
        }
        let reaction = load_reaction(store, &facts.reaction)?
            .ok_or_else(|| CsGraphError::NotFound(facts.reaction.clone()))?;
        hits.push(SectionHeading {
            key: facts.key,
            reaction,
            is_part_of: sets,
        });
    }
    Ok(paging.apply(hits))
}

// =============================================================================
// TESTS
// =============================================================================

//! # Content Equality
//!
//! Structural comparison of two cross section contents. Local state and
//! reference aliases are mapped onto canonical ids first, so two contents
//! that describe the same reaction, data and citations compare equal no
//! matter which local keys they were written with. Version metadata is not
//! part of the content.
//!
//! Pure functions only; no store access.

use crate::document::{CrossSectionInfo, ProcessInfo};
use crate::reaction::{CanonicalReaction, Reaction, canonicalize};
use crate::reference::ReferenceRef;
use crate::types::NodeId;
use std::collections::{BTreeMap, BTreeSet};

/// The comparable content of a cross section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionContent {
    pub reaction: Reaction,
    pub info: CrossSectionInfo,
    pub references: Vec<ReferenceRef>,
}

impl SectionContent {
    #[must_use]
    pub fn from_process(reaction: &Reaction, info: &ProcessInfo) -> Self {
        Self {
            reaction: reaction.clone(),
            info: info.body.clone(),
            references: info.references.clone(),
        }
    }
}

/// Local alias tables of one side of a comparison.
#[derive(Debug, Clone, Copy)]
pub struct KeyLookup<'a> {
    pub states: &'a BTreeMap<String, NodeId>,
    pub references: &'a BTreeMap<String, NodeId>,
}

#[derive(Debug, PartialEq)]
struct CanonicalSection<'a> {
    reaction: CanonicalReaction,
    info: &'a CrossSectionInfo,
    references: BTreeSet<(NodeId, Vec<String>)>,
}

fn canonical<'a>(
    content: &'a SectionContent,
    keys: KeyLookup<'_>,
) -> Option<CanonicalSection<'a>> {
    let references = content
        .references
        .iter()
        .map(|r| {
            keys.references
                .get(r.id())
                .map(|id| (id.clone(), r.comments().to_vec()))
        })
        .collect::<Option<BTreeSet<_>>>()?;
    Some(CanonicalSection {
        reaction: canonicalize(&content.reaction, keys.states)?,
        info: &content.info,
        references,
    })
}

/// Compare two contents after mapping their aliases onto canonical ids.
///
/// An alias missing from its lookup table makes the contents unequal.
#[must_use]
pub fn is_equal_section(
    a: &SectionContent,
    a_keys: KeyLookup<'_>,
    b: &SectionContent,
    b_keys: KeyLookup<'_>,
) -> bool {
    match (canonical(a, a_keys), canonical(b, b_keys)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

// =============================================================================
// TESTS
// =============================================================================

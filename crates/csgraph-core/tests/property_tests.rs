//! # Property-Based Tests
//!
//! Structural invariants checked with proptest: reaction identity, alias
//! invariance of content equality, and closure of the status machine.

use csgraph_core::equality::{KeyLookup, SectionContent, is_equal_section};
use csgraph_core::reaction::{canonicalize, resolve_reaction};
use csgraph_core::store::insert_or_get_state;
use csgraph_core::versioning::{Transition, check_transition};
use csgraph_core::{
    Collection, CrossSectionInfo, Graph, GraphView, NodeId, Reaction, ReactionEntry,
    ReactionTypeTag, State, Status, StorageKind,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeMap;

const PARTICLES: [&str; 5] = ["e", "Ar", "He", "N2", "CO"];

const TAGS: [ReactionTypeTag; 4] = [
    ReactionTypeTag::Elastic,
    ReactionTypeTag::Excitation,
    ReactionTypeTag::Ionization,
    ReactionTypeTag::Attachment,
];

const STATUSES: [Status; 4] = [
    Status::Draft,
    Status::Published,
    Status::Archived,
    Status::Retracted,
];

fn entry(count: u32, state: &str) -> ReactionEntry {
    ReactionEntry {
        count,
        state: state.to_string(),
    }
}

fn side() -> impl Strategy<Value = Vec<(u32, usize)>> {
    vec((1u32..4, 0usize..PARTICLES.len()), 1..4)
}

/// Graph holding every particle, with its local key → id map.
fn stocked_graph() -> (Graph, BTreeMap<String, NodeId>) {
    let mut graph = Graph::new();
    let mut states = BTreeMap::new();
    for particle in PARTICLES {
        let id = insert_or_get_state(&mut graph, &State::simple(particle, 0)).expect("state");
        states.insert(particle.to_string(), id);
    }
    (graph, states)
}

fn build(lhs: &[(u32, usize)], rhs: &[(u32, usize)], reversible: bool, tags: &[usize]) -> Reaction {
    Reaction {
        lhs: lhs.iter().map(|&(c, p)| entry(c, PARTICLES[p])).collect(),
        rhs: rhs.iter().map(|&(c, p)| entry(c, PARTICLES[p])).collect(),
        reversible,
        type_tags: tags.iter().map(|&t| TAGS[t]).collect(),
    }
}

fn info() -> CrossSectionInfo {
    CrossSectionInfo {
        storage: StorageKind::LookupTable,
        threshold: 0.0,
        labels: ["Energy".to_string(), "Cross Section".to_string()],
        units: ["eV".to_string(), "m^2".to_string()],
        data: vec![[1.0, 1.0e-20]],
        comments: Vec::new(),
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Entry order and tag order do not change reaction identity.
    #[test]
    fn reaction_identity_ignores_order(
        lhs in side(),
        rhs in side(),
        reversible in any::<bool>(),
        tags in vec(0usize..TAGS.len(), 0..3),
    ) {
        let (mut graph, states) = stocked_graph();
        let forward = build(&lhs, &rhs, reversible, &tags);

        let mut lhs_rev = lhs.clone();
        lhs_rev.reverse();
        let mut rhs_rev = rhs.clone();
        rhs_rev.reverse();
        let mut tags_rev = tags.clone();
        tags_rev.reverse();
        let shuffled = build(&lhs_rev, &rhs_rev, reversible, &tags_rev);

        let a = resolve_reaction(&mut graph, &states, &forward).expect("resolve");
        let b = resolve_reaction(&mut graph, &states, &shuffled).expect("resolve");
        prop_assert_eq!(a, b);
        prop_assert_eq!(graph.count(Collection::Reaction).expect("count"), 1);
    }

    /// Multiplicities matter: an extra copy of a consumed state is a new reaction.
    #[test]
    fn reaction_identity_counts_multiplicity(
        lhs in side(),
        rhs in side(),
    ) {
        let (mut graph, states) = stocked_graph();
        let base = build(&lhs, &rhs, false, &[]);
        let mut heavier = base.clone();
        heavier.lhs.push(entry(1, PARTICLES[lhs[0].1]));

        let a = canonicalize(&base, &states).expect("canonical");
        let b = canonicalize(&heavier, &states).expect("canonical");
        prop_assert_ne!(&a, &b);

        let ra = resolve_reaction(&mut graph, &states, &base).expect("resolve");
        let rb = resolve_reaction(&mut graph, &states, &heavier).expect("resolve");
        prop_assert_ne!(ra, rb);
    }

    /// Renaming local aliases does not change content equality.
    #[test]
    fn equality_is_alias_invariant(
        lhs in side(),
        rhs in side(),
        prefix in "[a-z]{1,6}",
    ) {
        let (_, states) = stocked_graph();
        let references = BTreeMap::new();
        let original = build(&lhs, &rhs, false, &[]);

        let mut renamed = original.clone();
        for e in renamed.lhs.iter_mut().chain(renamed.rhs.iter_mut()) {
            e.state = format!("{prefix}:{}", e.state);
        }
        let renamed_states: BTreeMap<String, NodeId> = states
            .iter()
            .map(|(k, id)| (format!("{prefix}:{k}"), id.clone()))
            .collect();

        let a = SectionContent { reaction: original, info: info(), references: Vec::new() };
        let b = SectionContent { reaction: renamed, info: info(), references: Vec::new() };
        let equal = is_equal_section(
            &a,
            KeyLookup { states: &states, references: &references },
            &b,
            KeyLookup { states: &renamed_states, references: &references },
        );
        prop_assert!(equal);
    }

    /// A transition succeeds from exactly one status.
    #[test]
    fn transitions_have_one_source(status in 0usize..4, transition in 0usize..6) {
        let status = STATUSES[status];
        let transition = Transition::ALL[transition];
        let id = NodeId::new(Collection::CrossSection, "1");
        let allowed = check_transition(&id, status, transition).is_ok();
        prop_assert_eq!(allowed, transition.source() == status);
        prop_assert_eq!(
            STATUSES.iter().filter(|s| check_transition(&id, **s, transition).is_ok()).count(),
            1
        );
    }
}

// =============================================================================
// EXHAUSTIVE CHECKS
// =============================================================================

/// Archived and retracted revisions admit no transition at all.
#[test]
fn terminal_statuses_are_closed() {
    let id = NodeId::new(Collection::CrossSection, "1");
    for status in [Status::Archived, Status::Retracted] {
        for transition in Transition::ALL {
            assert!(check_transition(&id, status, transition).is_err());
        }
    }
}

//! # Species States
//!
//! A `State` describes a particle (electron, atom, molecule) at some level
//! of detail. The electronic structure is layered: electronic levels may
//! carry vibrational levels, which may carry rotational levels. The
//! scheme-specific quantum numbers of each level are kept as an opaque
//! descriptor; grammar checks belong to the schema layer.
//!
//! Identity of a state is structural equality of its full serialized form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::digest::canonical_json;

/// Coupling scheme or molecule class of a detailed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StateKind {
    AtomLS,
    AtomLS1,
    AtomJ1L2,
    HomonuclearDiatom,
    HeteronuclearDiatom,
    LinearTriatomInversionCenter,
    Unspecified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationalLevel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub descriptor: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibrationalLevel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rotational: Vec<RotationalLevel>,
    #[serde(flatten)]
    pub descriptor: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectronicLevel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vibrational: Vec<VibrationalLevel>,
    #[serde(flatten)]
    pub descriptor: Map<String, Value>,
}

/// A species description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub particle: String,
    pub charge: i32,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StateKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub electronic: Vec<ElectronicLevel>,
}

/// Human readable label of one level: its summary, or the canonical form of
/// its descriptor when no summary was given.
#[must_use]
pub fn level_label(summary: Option<&String>, descriptor: &Map<String, Value>) -> String {
    summary
        .cloned()
        .unwrap_or_else(|| canonical_json(&Value::Object(descriptor.clone())))
}

impl ElectronicLevel {
    fn bare(&self) -> Self {
        Self {
            summary: self.summary.clone(),
            vibrational: Vec::new(),
            descriptor: self.descriptor.clone(),
        }
    }

    fn with_vibrational(&self, level: VibrationalLevel) -> Self {
        Self {
            vibrational: vec![level],
            ..self.bare()
        }
    }

    #[must_use]
    pub fn label(&self) -> String {
        level_label(self.summary.as_ref(), &self.descriptor)
    }
}

impl VibrationalLevel {
    fn bare(&self) -> Self {
        Self {
            summary: self.summary.clone(),
            rotational: Vec::new(),
            descriptor: self.descriptor.clone(),
        }
    }

    fn with_rotational(&self, level: RotationalLevel) -> Self {
        Self {
            rotational: vec![level],
            ..self.bare()
        }
    }

    #[must_use]
    pub fn label(&self) -> String {
        level_label(self.summary.as_ref(), &self.descriptor)
    }
}

impl RotationalLevel {
    #[must_use]
    pub fn label(&self) -> String {
        level_label(self.summary.as_ref(), &self.descriptor)
    }
}

impl State {
    /// A bare particle state without electronic detail.
    #[must_use]
    pub fn simple(particle: impl Into<String>, charge: i32) -> Self {
        Self {
            particle: particle.into(),
            charge,
            kind: None,
            electronic: Vec::new(),
        }
    }

    /// The particle level ancestor of this state.
    #[must_use]
    pub fn particle_level(&self) -> Self {
        Self::simple(self.particle.clone(), self.charge)
    }

    fn with_electronic(&self, level: ElectronicLevel) -> Self {
        Self {
            particle: self.particle.clone(),
            charge: self.charge,
            kind: self.kind,
            electronic: vec![level],
        }
    }

    /// Split the state into its substate tree.
    pub fn tree(&self) -> StateTree {
        let root = self.particle_level();
        let mut links = Vec::new();
        let mut leaves = Vec::new();

        if self.electronic.is_empty() {
            if *self != root {
                links.push((root.clone(), self.clone()));
            }
            leaves.push(self.clone());
            return StateTree {
                root,
                links,
                leaves,
            };
        }

        for e in &self.electronic {
            let e_state = self.with_electronic(e.bare());
            links.push((root.clone(), e_state.clone()));
            if e.vibrational.is_empty() {
                leaves.push(e_state);
                continue;
            }
            for v in &e.vibrational {
                let v_state = self.with_electronic(e.with_vibrational(v.bare()));
                links.push((e_state.clone(), v_state.clone()));
                if v.rotational.is_empty() {
                    leaves.push(v_state);
                    continue;
                }
                for r in &v.rotational {
                    let r_state =
                        self.with_electronic(e.with_vibrational(v.with_rotational(r.clone())));
                    links.push((v_state.clone(), r_state.clone()));
                    leaves.push(r_state);
                }
            }
        }

        StateTree {
            root,
            links,
            leaves,
        }
    }
}

/// Decomposition of a state into the states it is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTree {
    /// The bare particle.
    pub root: State,
    /// `(less detailed, more detailed)` pairs, one per `HasDirectSubstate` edge.
    pub links: Vec<(State, State)>,
    /// Most detailed states. More than one leaf makes the state a compound.
    pub leaves: Vec<State>,
}

impl StateTree {
    #[must_use]
    pub fn is_compound(&self) -> bool {
        self.leaves.len() > 1
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! # Documents
//!
//! Upload documents (what callers send) and stored records (what lives in
//! the graph) for cross sections and cross section sets.
//!
//! An upload names states and references by local keys that only mean
//! something inside that document. The engine maps them onto canonical
//! node ids when the document is stored.

use crate::primitives::{MAX_PROCESSES_PER_SET, MAX_TEXT_LENGTH};
use crate::reaction::Reaction;
use crate::reference::{ReferenceInput, ReferenceRef};
use crate::species::State;
use crate::types::{Collection, CsGraphError, Key, NodeId, Relation, VersionInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// CROSS SECTION CONTENT
// =============================================================================

/// Storage layout of cross section data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageKind {
    /// Lookup table of `(energy, value)` rows.
    #[serde(rename = "LUT")]
    LookupTable,
}

/// Measured or computed data of one cross section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSectionInfo {
    #[serde(rename = "type")]
    pub storage: StorageKind,
    pub threshold: f64,
    pub labels: [String; 2],
    pub units: [String; 2],
    pub data: Vec<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
}

/// One info body of a process, optionally naming the stored item it
/// was loaded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(default)]
    pub references: Vec<ReferenceRef>,
    #[serde(flatten)]
    pub body: CrossSectionInfo,
}

/// A reaction together with the cross sections measured for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub reaction: Reaction,
    pub info: Vec<ProcessInfo>,
}

// =============================================================================
// UPLOAD DOCUMENTS
// =============================================================================

/// Upload document of a cross section set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetDocument {
    pub contributor: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(rename = "publishedIn", default, skip_serializing_if = "Option::is_none")]
    pub published_in: Option<String>,
    #[serde(default)]
    pub references: BTreeMap<String, ReferenceInput>,
    #[serde(default)]
    pub states: BTreeMap<String, State>,
    pub processes: Vec<Process>,
}

/// Upload document of a single cross section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDocument {
    pub contributor: String,
    #[serde(default)]
    pub references: BTreeMap<String, ReferenceInput>,
    #[serde(default)]
    pub states: BTreeMap<String, State>,
    pub reaction: Reaction,
    pub info: ProcessInfo,
}

fn check_text(field: &str, value: &str, required: bool) -> Result<(), CsGraphError> {
    if required && value.trim().is_empty() {
        return Err(CsGraphError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > MAX_TEXT_LENGTH {
        return Err(CsGraphError::Validation(format!(
            "{field} is longer than {MAX_TEXT_LENGTH} bytes"
        )));
    }
    Ok(())
}

fn check_process(
    reaction: &Reaction,
    infos: &[&ProcessInfo],
    states: &BTreeMap<String, State>,
    references: &BTreeMap<String, ReferenceInput>,
) -> Result<(), CsGraphError> {
    for entry in reaction.lhs.iter().chain(&reaction.rhs) {
        if !states.contains_key(&entry.state) {
            return Err(CsGraphError::Validation(format!(
                "reaction refers to unknown state '{}'",
                entry.state
            )));
        }
        if entry.count == 0 {
            return Err(CsGraphError::Validation(format!(
                "reaction entry for state '{}' has count 0",
                entry.state
            )));
        }
    }
    if infos.is_empty() {
        return Err(CsGraphError::Validation(
            "process without cross section info".to_string(),
        ));
    }
    for info in infos {
        for reference in &info.references {
            if !references.contains_key(reference.id()) {
                return Err(CsGraphError::Validation(format!(
                    "info refers to unknown reference '{}'",
                    reference.id()
                )));
            }
        }
    }
    Ok(())
}

impl SetDocument {
    /// Referential checks: every local key used resolves within the document.
    pub fn validate(&self) -> Result<(), CsGraphError> {
        check_text("contributor", &self.contributor, true)?;
        check_text("name", &self.name, true)?;
        check_text("description", &self.description, false)?;
        if self.processes.len() > MAX_PROCESSES_PER_SET {
            return Err(CsGraphError::Validation(format!(
                "set has more than {MAX_PROCESSES_PER_SET} processes"
            )));
        }
        if let Some(published_in) = &self.published_in {
            if !self.references.contains_key(published_in) {
                return Err(CsGraphError::Validation(format!(
                    "publishedIn refers to unknown reference '{published_in}'"
                )));
            }
        }
        for process in &self.processes {
            let infos: Vec<&ProcessInfo> = process.info.iter().collect();
            check_process(&process.reaction, &infos, &self.states, &self.references)?;
        }
        Ok(())
    }
}

impl SectionDocument {
    pub fn validate(&self) -> Result<(), CsGraphError> {
        check_text("contributor", &self.contributor, true)?;
        check_process(&self.reaction, &[&self.info], &self.states, &self.references)
    }
}

// =============================================================================
// STORED RECORDS
// =============================================================================

/// Stored cross section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSectionRecord {
    #[serde(rename = "versionInfo")]
    pub version_info: VersionInfo,
    pub organization: NodeId,
    pub reaction: NodeId,
    pub info: CrossSectionInfo,
}

/// Stored cross section set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSectionSetRecord {
    #[serde(rename = "versionInfo")]
    pub version_info: VersionInfo,
    pub organization: NodeId,
    pub name: String,
    pub description: String,
    pub complete: bool,
    #[serde(rename = "publishedIn", default, skip_serializing_if = "Option::is_none")]
    pub published_in: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRecord {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
}

// =============================================================================
// VERSIONED ENTITIES
// =============================================================================

/// A document kind that follows the draft/published/archived/retracted
/// lifecycle.
pub trait Versioned: Serialize + serde::de::DeserializeOwned + Clone {
    const COLLECTION: Collection;
    /// Relation linking a revision to the revision it supersedes.
    const HISTORY: Relation;

    fn version_info(&self) -> &VersionInfo;
    fn version_info_mut(&mut self) -> &mut VersionInfo;
    fn organization(&self) -> &NodeId;

    fn id(key: &Key) -> NodeId {
        NodeId {
            collection: Self::COLLECTION,
            key: key.clone(),
        }
    }
}

impl Versioned for CrossSectionRecord {
    const COLLECTION: Collection = Collection::CrossSection;
    const HISTORY: Relation = Relation::CrossSectionHistory;

    fn version_info(&self) -> &VersionInfo {
        &self.version_info
    }

    fn version_info_mut(&mut self) -> &mut VersionInfo {
        &mut self.version_info
    }

    fn organization(&self) -> &NodeId {
        &self.organization
    }
}

impl Versioned for CrossSectionSetRecord {
    const COLLECTION: Collection = Collection::CrossSectionSet;
    const HISTORY: Relation = Relation::CrossSectionSetHistory;

    fn version_info(&self) -> &VersionInfo {
        &self.version_info
    }

    fn version_info_mut(&mut self) -> &mut VersionInfo {
        &mut self.version_info
    }

    fn organization(&self) -> &NodeId {
        &self.organization
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "contributor": "Some organization",
            "name": "Argon set",
            "description": "Electron scattering on argon",
            "complete": false,
            "references": { "r1": "10.1000/argon" },
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
                    "type": "LUT",
                    "threshold": 0.0,
                    "labels": ["Energy", "Cross Section"],
                    "units": ["eV", "m^2"],
                    "data": [[1.0, 3.14e-20], [2.0, 3.5e-20]],
                    "references": ["r1", { "id": "r1", "comments": ["table 2"] }]
                }]
            }]
        })
    }

    #[test]
    fn set_document_parses_and_validates() {
        let doc: SetDocument = serde_json::from_value(sample()).unwrap();
        assert!(doc.validate().is_ok());
        let info = &doc.processes[0].info[0];
        assert!(info.key.is_none());
        assert_eq!(info.body.storage, StorageKind::LookupTable);
        assert_eq!(info.body.data.len(), 2);
    }

    #[test]
    fn process_info_key_round_trips() {
        let raw = json!({
            "_key": "17",
            "references": [],
            "type": "LUT",
            "threshold": 1.5,
            "labels": ["Energy", "Cross Section"],
            "units": ["eV", "m^2"],
            "data": [[1.0, 2.0]]
        });
        let info: ProcessInfo = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(info.key, Some(Key::from("17")));
        assert_eq!(serde_json::to_value(&info).unwrap(), raw);
    }

    #[test]
    fn unknown_state_is_rejected() {
        let mut value = sample();
        value["processes"][0]["reaction"]["lhs"][0]["state"] = json!("Kr");
        let doc: SetDocument = serde_json::from_value(value).unwrap();
        assert!(matches!(doc.validate(), Err(CsGraphError::Validation(_))));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let mut value = sample();
        value["processes"][0]["info"][0]["references"] = json!(["r9"]);
        let doc: SetDocument = serde_json::from_value(value).unwrap();
        assert!(matches!(doc.validate(), Err(CsGraphError::Validation(_))));
    }

    #[test]
    fn empty_name_and_bad_published_in_are_rejected() {
        let mut value = sample();
        value["name"] = json!("  ");
        let doc: SetDocument = serde_json::from_value(value).unwrap();
        assert!(doc.validate().is_err());

        let mut value = sample();
        value["publishedIn"] = json!("r2");
        let doc: SetDocument = serde_json::from_value(value).unwrap();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn process_without_info_is_rejected() {
        let mut value = sample();
        value["processes"][0]["info"] = json!([]);
        let doc: SetDocument = serde_json::from_value(value).unwrap();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn records_use_external_field_names() {
        let record = CrossSectionSetRecord {
            version_info: VersionInfo::initial(crate::types::Status::Draft, None),
            organization: NodeId::new(Collection::Organization, "1"),
            name: "n".to_string(),
            description: String::new(),
            complete: true,
            published_in: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("versionInfo").is_some());
        assert_eq!(value["organization"], "Organization/1");
        assert!(value.get("publishedIn").is_none());
    }
}

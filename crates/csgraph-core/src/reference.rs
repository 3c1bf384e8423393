//! # Bibliographic References
//!
//! References are CSL-JSON records. Uploads may give a full record or a
//! bare DOI string; bare DOIs are turned into records by a
//! `CitationResolver` supplied by the caller.

use crate::types::CsGraphError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// CSL-JSON bibliographic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CslRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "DOI", default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A reference as written in an upload document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceInput {
    Doi(String),
    Csl(CslRecord),
}

/// Reference from a process info to an entry of the `references` dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReferenceRef {
    Key(String),
    WithComments { id: String, comments: Vec<String> },
}

impl ReferenceRef {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Key(id) | Self::WithComments { id, .. } => id,
        }
    }

    #[must_use]
    pub fn comments(&self) -> &[String] {
        match self {
            Self::Key(_) => &[],
            Self::WithComments { comments, .. } => comments,
        }
    }

    /// Build a reference, dropping the comment wrapper when there are none.
    #[must_use]
    pub fn new(id: String, comments: Vec<String>) -> Self {
        if comments.is_empty() {
            Self::Key(id)
        } else {
            Self::WithComments { id, comments }
        }
    }
}

// =============================================================================
// CITATION RESOLUTION
// =============================================================================

/// Turns a DOI into a bibliographic record.
pub trait CitationResolver {
    fn resolve(&self, doi: &str) -> Result<CslRecord, CsGraphError>;
}

/// Resolver for deployments without citation lookup: every DOI fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolver;

impl CitationResolver for NoResolver {
    fn resolve(&self, doi: &str) -> Result<CslRecord, CsGraphError> {
        Err(CsGraphError::Resolution {
            doi: doi.to_string(),
            reason: "no citation resolver configured".to_string(),
        })
    }
}

/// Resolver backed by a fixed table of records, for offline use.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    records: BTreeMap<String, CslRecord>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, doi: impl Into<String>, record: CslRecord) -> Self {
        self.records.insert(doi.into(), record);
        self
    }
}

impl CitationResolver for StaticResolver {
    fn resolve(&self, doi: &str) -> Result<CslRecord, CsGraphError> {
        self.records
            .get(doi)
            .cloned()
            .ok_or_else(|| CsGraphError::Resolution {
                doi: doi.to_string(),
                reason: "unknown DOI".to_string(),
            })
    }
}

/// Resolve every bare DOI of a reference dictionary.
///
/// Fails on the first DOI that cannot be resolved; nothing is written
/// to the store by this step.
pub fn resolve_references<R: CitationResolver + ?Sized>(
    resolver: &R,
    references: &BTreeMap<String, ReferenceInput>,
) -> Result<BTreeMap<String, CslRecord>, CsGraphError> {
    references
        .iter()
        .map(|(local, input)| {
            let record = match input {
                ReferenceInput::Csl(record) => record.clone(),
                ReferenceInput::Doi(doi) => resolver.resolve(doi)?,
            };
            Ok((local.clone(), record))
        })
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

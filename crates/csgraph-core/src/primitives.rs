//! # Engine Constants
//!
//! Fixed limits and format markers compiled into the engine.

/// Magic bytes for the csgraph snapshot format header.
pub const MAGIC_BYTES: &[u8; 4] = b"CSGX";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot layout.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum depth followed along history chains.
///
/// History chains grow by one per published edit; this bounds traversals
/// over corrupted (cyclic) data.
pub const MAX_HISTORY_DEPTH: usize = 10_000;

/// Default page size for search queries.
pub const DEFAULT_PAGE_SIZE: usize = 100;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum number of processes in one uploaded set.
pub const MAX_PROCESSES_PER_SET: usize = 50_000;

/// Maximum length of names, contributors and messages.
pub const MAX_TEXT_LENGTH: usize = 10_000;

// =============================================================================
// SNAPSHOT IMPORT LIMITS
// =============================================================================

/// Maximum snapshot header size accepted on import.
pub const MAX_HEADER_SIZE: usize = 4 * 1024;

/// Maximum number of documents accepted on import.
pub const MAX_IMPORT_DOCUMENTS: u64 = 10_000_000;

/// Maximum number of edges accepted on import.
pub const MAX_IMPORT_EDGES: u64 = 50_000_000;

// =============================================================================
// MESSAGES
// =============================================================================

/// Commit message given to item drafts created while editing a set.
#[must_use]
pub fn indirect_draft_message(set_name: &str, set_key: &str) -> String {
    format!("Indirect draft by editing set {set_name} / {set_key}")
}

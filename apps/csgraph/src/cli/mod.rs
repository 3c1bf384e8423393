//! # csgraph CLI Module
//!
//! This module implements the command line interface.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new database
//! - `status` - Show document counts
//! - `upload` / `update` - Create or revise a cross section set
//! - `publish` / `delete` - Set lifecycle
//! - `show` / `history` - Inspect a set
//! - `search` / `facets` / `choices` - Public search over published sets
//! - `section` - The same operations for single cross sections
//! - `member` / `owned` - Organization membership and ownership
//! - `prune` - Remove orphaned reactions, references and states
//! - `export` / `import` / `hash` - Canonical snapshots

mod commands;

use crate::config::{Backend, Config, ResolverConfig};
use clap::{Parser, Subcommand, ValueEnum};
use csgraph_core::{CsGraphError, Key, SortField};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// csgraph - versioned cross section sets
///
/// Upload, revise, publish and retract datasets whose items are shared
/// between sets.
#[derive(Parser, Debug)]
#[command(name = "csgraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the graph database [default: csgraph.redb]
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend [default: redb]
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Configuration file [default: ./csgraph.toml when present]
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new empty database
    Init {
        /// Overwrite an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Show document counts
    Status,

    /// Upload a new cross section set
    Upload {
        /// Set document (JSON)
        file: PathBuf,

        /// Store as draft instead of publishing directly
        #[arg(long)]
        draft: bool,

        /// Commit message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Revise a set: drafts change in place, published sets get a new draft
    Update {
        key: String,

        /// Set document (JSON)
        file: PathBuf,

        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Publish a draft set and its draft members
    Publish { key: String },

    /// Remove a draft set or retract a published one
    Delete {
        key: String,

        /// Retraction message (required for published sets)
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show a set
    Show {
        key: String,

        /// Print the upload document instead of the stored view
        #[arg(long)]
        document: bool,
    },

    /// Show the revisions of a set, newest first
    History { key: String },

    /// Search published sets
    Search {
        #[arg(long = "contributor")]
        contributors: Vec<String>,

        /// Consumed particle
        #[arg(long)]
        species: Vec<String>,

        /// Reaction type tag, e.g. Elastic
        #[arg(long = "tag")]
        tags: Vec<String>,

        #[arg(long, value_enum, default_value = "name")]
        sort: SortKey,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, default_value = "100")]
        count: usize,
    },

    /// List contributors, species and tags of published sets
    Facets,

    /// Show the state picker tree of published cross sections
    Choices,

    /// Operations on single cross sections
    Section {
        #[command(subcommand)]
        command: SectionCommands,
    },

    /// Organization membership
    Member {
        #[command(subcommand)]
        command: MemberCommands,
    },

    /// List the sets a user may edit
    Owned { email: String },

    /// Remove orphaned reactions, references and states
    Prune,

    /// Export the database as a canonical snapshot
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a canonical snapshot into an empty database
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute BLAKE3 hash of the canonical snapshot
    Hash,
}

#[derive(Subcommand, Debug)]
pub enum SectionCommands {
    /// Upload a single cross section
    Upload {
        file: PathBuf,

        #[arg(long)]
        draft: bool,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// Revise a cross section
    Update {
        key: String,
        file: PathBuf,

        #[arg(short, long)]
        message: String,
    },

    Show {
        key: String,

        #[arg(long)]
        document: bool,
    },

    History { key: String },

    Publish { key: String },

    Delete {
        key: String,

        #[arg(short, long)]
        message: Option<String>,
    },

    /// Search published cross sections
    Search {
        #[arg(long)]
        species: Vec<String>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Name of a published set the cross section is part of
        #[arg(long = "set")]
        set_names: Vec<String>,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, default_value = "100")]
        count: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum MemberCommands {
    /// Add a user to an organization (both are created when missing)
    Add { email: String, organization: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortKey {
    Name,
    Contributor,
}

impl From<SortKey> for SortField {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Name => Self::Name,
            SortKey::Contributor => Self::Contributor,
        }
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub database: PathBuf,
    pub backend: Backend,
    pub json: bool,
    pub resolver: ResolverConfig,
}

impl Context {
    /// Merge command line flags over the configuration file.
    pub fn new(cli: &Cli, config: Config) -> Self {
        Self {
            database: cli
                .database
                .clone()
                .or(config.database)
                .unwrap_or_else(|| PathBuf::from("csgraph.redb")),
            backend: cli.backend.or(config.backend).unwrap_or_default(),
            json: cli.json,
            resolver: config.resolver,
        }
    }
}

/// Execute the CLI with parsed arguments.
pub fn execute(command: Option<Commands>, ctx: &Context) -> Result<(), CsGraphError> {
    let key = |k: String| Key::new(k);

    match command {
        Some(Commands::Init { force }) => cmd_init(ctx, force),
        Some(Commands::Status) | None => cmd_status(ctx),
        Some(Commands::Upload {
            file,
            draft,
            message,
        }) => cmd_upload(ctx, &file, draft, message),
        Some(Commands::Update { key: k, file, message }) => {
            cmd_update(ctx, &key(k), &file, message)
        }
        Some(Commands::Publish { key: k }) => cmd_publish(ctx, &key(k)),
        Some(Commands::Delete { key: k, message }) => cmd_delete(ctx, &key(k), message.as_deref()),
        Some(Commands::Show { key: k, document }) => cmd_show(ctx, &key(k), document),
        Some(Commands::History { key: k }) => cmd_history(ctx, &key(k)),
        Some(Commands::Search {
            contributors,
            species,
            tags,
            sort,
            desc,
            offset,
            count,
        }) => cmd_search(
            ctx,
            SearchArgs {
                contributors,
                species,
                tags,
                sort,
                desc,
                offset,
                count,
            },
        ),
        Some(Commands::Facets) => cmd_facets(ctx),
        Some(Commands::Choices) => cmd_choices(ctx),
        Some(Commands::Section { command }) => match command {
            SectionCommands::Upload {
                file,
                draft,
                message,
            } => cmd_section_upload(ctx, &file, draft, message),
            SectionCommands::Update { key: k, file, message } => {
                cmd_section_update(ctx, &key(k), &file, message)
            }
            SectionCommands::Show { key: k, document } => cmd_section_show(ctx, &key(k), document),
            SectionCommands::History { key: k } => cmd_section_history(ctx, &key(k)),
            SectionCommands::Publish { key: k } => cmd_section_publish(ctx, &key(k)),
            SectionCommands::Delete { key: k, message } => {
                cmd_section_delete(ctx, &key(k), message.as_deref())
            }
            SectionCommands::Search {
                species,
                tags,
                set_names,
                offset,
                count,
            } => cmd_section_search(ctx, species, tags, set_names, offset, count),
        },
        Some(Commands::Member {
            command: MemberCommands::Add {
                email,
                organization,
            },
        }) => cmd_member_add(ctx, &email, &organization),
        Some(Commands::Owned { email }) => cmd_owned(ctx, &email),
        Some(Commands::Prune) => cmd_prune(ctx),
        Some(Commands::Export { output }) => cmd_export(ctx, &output),
        Some(Commands::Import { input }) => cmd_import(ctx, &input),
        Some(Commands::Hash) => cmd_hash(ctx),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from(["csgraph", "--backend", "file", "-D", "x.db", "status"]);
        let config = Config {
            database: Some(PathBuf::from("y.db")),
            backend: Some(Backend::Redb),
            ..Config::default()
        };
        let ctx = Context::new(&cli, config);
        assert_eq!(ctx.database, PathBuf::from("x.db"));
        assert_eq!(ctx.backend, Backend::File);
    }

    #[test]
    fn config_fills_missing_flags() {
        let cli = Cli::parse_from(["csgraph", "status"]);
        let config = Config {
            database: Some(PathBuf::from("y.db")),
            ..Config::default()
        };
        let ctx = Context::new(&cli, config);
        assert_eq!(ctx.database, PathBuf::from("y.db"));
        assert_eq!(ctx.backend, Backend::Redb);
    }

    #[test]
    fn nested_commands_parse() {
        let cli = Cli::parse_from([
            "csgraph", "--json", "section", "search", "--species", "Ar", "--set", "Biagi",
        ]);
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Some(Commands::Section {
                command: SectionCommands::Search { .. }
            })
        ));

        let cli = Cli::parse_from(["csgraph", "search", "--sort", "contributor", "--desc"]);
        match cli.command {
            Some(Commands::Search { sort, desc, .. }) => {
                assert_eq!(sort, SortKey::Contributor);
                assert!(desc);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn update_requires_message() {
        assert!(Cli::try_parse_from(["csgraph", "update", "1", "set.json"]).is_err());
    }
}

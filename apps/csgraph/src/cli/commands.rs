//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::{Context, SortKey};
use crate::config::Backend;
use crate::resolver::DoiResolver;
use csgraph_core::{
    CsGraphError, Engine, Key, Paging, ReactionTypeTag, SectionDocument, SectionFilter, Session,
    SetDocument, SetFilter, SetSort, SortOrder, Status, import_snapshot,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of an uploaded document (64 MB).
const MAX_DOCUMENT_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Maximum file size for import (500 MB).
///
/// Snapshots hold every revision, so they can be much larger than uploads.
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), CsGraphError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CsGraphError::Storage(format!("Cannot read file metadata: {e}")))?;

    if metadata.len() > max_size {
        return Err(CsGraphError::Validation(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and make sure it is a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, CsGraphError> {
    let canonical = path.canonicalize().map_err(|e| {
        CsGraphError::Storage(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(CsGraphError::Storage(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path against its canonical parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, CsGraphError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        CsGraphError::Storage(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(CsGraphError::Storage(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| CsGraphError::Storage("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Read and parse an upload document.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, CsGraphError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, MAX_DOCUMENT_FILE_SIZE)?;
    let data = std::fs::read(&validated)
        .map_err(|e| CsGraphError::Storage(format!("Read file: {e}")))?;
    serde_json::from_slice(&data)
        .map_err(|e| CsGraphError::Validation(format!("{}: {}", path.display(), e)))
}

// =============================================================================
// ENGINE HANDLING
// =============================================================================

/// Open the database named by the context.
///
/// The file backend loads the snapshot into memory when the file exists and
/// starts empty otherwise. The redb backend opens (or creates) the database.
pub fn open_engine(ctx: &Context) -> Result<Engine, CsGraphError> {
    let session = match ctx.backend {
        Backend::Redb => Session::with_redb(&ctx.database)?,
        Backend::File => {
            if ctx.database.exists() {
                validate_file_size(&ctx.database, MAX_IMPORT_FILE_SIZE)?;
                let data = std::fs::read(&ctx.database)
                    .map_err(|e| CsGraphError::Storage(format!("Read db: {e}")))?;
                Session::with_graph(import_snapshot(&data)?)
            } else {
                Session::new()
            }
        }
    };
    tracing::debug!(database = %ctx.database.display(), backend = %ctx.backend, "opened database");

    let engine = Engine::new(session);
    if ctx.resolver.enabled {
        Ok(engine.with_resolver(DoiResolver::new(&ctx.resolver)?))
    } else {
        Ok(engine)
    }
}

/// Persist the engine. Only the file backend needs an explicit write.
pub fn save_engine(ctx: &Context, engine: &Engine) -> Result<(), CsGraphError> {
    if engine.session().is_persistent() {
        return Ok(());
    }
    let data = engine.export()?;
    std::fs::write(&ctx.database, &data)
        .map_err(|e| CsGraphError::Storage(format!("Write db: {e}")))?;
    tracing::debug!(bytes = data.len(), "wrote snapshot file");
    Ok(())
}

/// Open, mutate and save in one step.
fn mutate<T>(
    ctx: &Context,
    op: impl FnOnce(&mut Engine) -> Result<T, CsGraphError>,
) -> Result<T, CsGraphError> {
    let mut engine = open_engine(ctx)?;
    let value = op(&mut engine)?;
    save_engine(ctx, &engine)?;
    Ok(value)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CsGraphError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print `value` as JSON in json mode, otherwise run the text printer.
fn emit<T: Serialize>(ctx: &Context, value: &T, text: impl FnOnce(&T)) -> Result<(), CsGraphError> {
    if ctx.json {
        print_json(value)
    } else {
        text(value);
        Ok(())
    }
}

fn upload_status(draft: bool) -> Status {
    if draft {
        Status::Draft
    } else {
        Status::Published
    }
}

fn parse_tags(tags: Vec<String>) -> Result<Vec<ReactionTypeTag>, CsGraphError> {
    tags.into_iter()
        .map(|tag| {
            serde_json::from_value(serde_json::Value::String(tag.clone()))
                .map_err(|_| CsGraphError::Validation(format!("Unknown reaction type tag '{tag}'")))
        })
        .collect()
}

// =============================================================================
// DATABASE COMMANDS
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), CsGraphError> {
    if ctx.database.exists() {
        if !force {
            return Err(CsGraphError::Validation(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&ctx.database)
            .map_err(|e| CsGraphError::Storage(format!("Remove db: {e}")))?;
    }

    match ctx.backend {
        Backend::Redb => {
            Session::with_redb(&ctx.database)?;
        }
        Backend::File => save_engine(ctx, &Engine::default())?,
    }
    tracing::info!(database = %ctx.database.display(), backend = %ctx.backend, "initialized database");

    emit(ctx, &serde_json::json!({ "initialized": ctx.database }), |_| {
        println!(
            "Initialized new {} database at {:?}",
            ctx.backend, ctx.database
        );
    })
}

/// Show document counts.
pub fn cmd_status(ctx: &Context) -> Result<(), CsGraphError> {
    let engine = open_engine(ctx)?;
    let stats = engine.stats()?;

    if ctx.json {
        return print_json(&serde_json::json!({
            "database": ctx.database.to_string_lossy(),
            "backend": ctx.backend,
            "collections": stats.collections,
            "last_key": stats.last_key,
        }));
    }

    println!("csgraph Status");
    println!("==============");
    println!("Database: {:?}", ctx.database);
    println!("Backend:  {}", ctx.backend);
    println!();
    for (collection, count) in &stats.collections {
        println!("{collection:<28} {count}");
    }
    println!();
    println!("Last key: {}", stats.last_key);
    Ok(())
}

/// Remove orphaned shared documents.
pub fn cmd_prune(ctx: &Context) -> Result<(), CsGraphError> {
    let report = mutate(ctx, Engine::prune)?;
    emit(ctx, &report, |r| {
        println!(
            "Removed {} reactions, {} references, {} states",
            r.reactions, r.references, r.states
        );
    })
}

/// Export the database as a canonical snapshot.
pub fn cmd_export(ctx: &Context, output: &Path) -> Result<(), CsGraphError> {
    let validated = validate_output_path(output)?;
    let engine = open_engine(ctx)?;
    let data = engine.export()?;
    std::fs::write(&validated, &data)
        .map_err(|e| CsGraphError::Storage(format!("Write export: {e}")))?;
    tracing::info!(output = %validated.display(), bytes = data.len(), "exported snapshot");

    emit(ctx, &serde_json::json!({ "output": validated, "bytes": data.len() }), |_| {
        println!("Exported {} bytes to {:?}", data.len(), validated);
    })
}

/// Import a snapshot into an empty database.
pub fn cmd_import(ctx: &Context, input: &Path) -> Result<(), CsGraphError> {
    let validated = validate_file_path(input)?;
    validate_file_size(&validated, MAX_IMPORT_FILE_SIZE)?;
    let data = std::fs::read(&validated)
        .map_err(|e| CsGraphError::Storage(format!("Read file: {e}")))?;

    let documents = mutate(ctx, |engine| engine.import(&data))?;
    emit(ctx, &serde_json::json!({ "documents": documents }), |_| {
        println!("Imported {documents} documents");
    })
}

/// Print the snapshot hash.
pub fn cmd_hash(ctx: &Context) -> Result<(), CsGraphError> {
    let hash = open_engine(ctx)?.hash()?;
    emit(ctx, &serde_json::json!({ "hash": hash }), |_| println!("{hash}"))
}

// =============================================================================
// SET COMMANDS
// =============================================================================

pub fn cmd_upload(
    ctx: &Context,
    file: &Path,
    draft: bool,
    message: Option<String>,
) -> Result<(), CsGraphError> {
    let doc: SetDocument = read_document(file)?;
    let status = upload_status(draft);
    let key = mutate(ctx, |engine| engine.create_set(&doc, status, message))?;
    emit(ctx, &serde_json::json!({ "_key": key, "status": status }), |_| {
        println!("Created {status} set {key} ({})", doc.name);
    })
}

pub fn cmd_update(
    ctx: &Context,
    key: &Key,
    file: &Path,
    message: String,
) -> Result<(), CsGraphError> {
    let doc: SetDocument = read_document(file)?;
    let revised = mutate(ctx, |engine| engine.update_set(key, &doc, Some(message)))?;
    emit(ctx, &serde_json::json!({ "_key": revised }), |_| {
        if &revised == key {
            println!("Updated draft set {key}");
        } else {
            println!("Created draft {revised} of set {key}");
        }
    })
}

pub fn cmd_publish(ctx: &Context, key: &Key) -> Result<(), CsGraphError> {
    let outcome = mutate(ctx, |engine| engine.publish_set(key))?;
    emit(ctx, &outcome, |o| {
        println!("Published set {key}");
        if let Some(archived) = &o.archived_set {
            println!("Archived set {archived}");
        }
        println!(
            "{} cross sections published, {} archived",
            o.published_items.len(),
            o.archived_items.len()
        );
    })
}

pub fn cmd_delete(ctx: &Context, key: &Key, message: Option<&str>) -> Result<(), CsGraphError> {
    let deletion = mutate(ctx, |engine| engine.delete_set(key, message))?;
    emit(ctx, &deletion, |d| println!("Set {key}: {d:?}"))
}

pub fn cmd_show(ctx: &Context, key: &Key, document: bool) -> Result<(), CsGraphError> {
    let engine = open_engine(ctx)?;
    if document {
        print_json(&engine.set_document(key)?)
    } else {
        print_json(&engine.set_view(key)?)
    }
}

pub fn cmd_history(ctx: &Context, key: &Key) -> Result<(), CsGraphError> {
    let history = open_engine(ctx)?.history_of_set(key)?;
    emit(ctx, &history, |entries| {
        for entry in entries {
            let info = &entry.version_info;
            println!(
                "{:>8}  v{:<4} {:<10} {}  {}",
                entry.key,
                info.version,
                info.status.to_string(),
                info.created_on.as_str(),
                info.commit_message.as_deref().unwrap_or("")
            );
        }
    })
}

/// Arguments of the set search command.
#[derive(Debug, Clone)]
pub struct SearchArgs {
    pub contributors: Vec<String>,
    pub species: Vec<String>,
    pub tags: Vec<String>,
    pub sort: SortKey,
    pub desc: bool,
    pub offset: usize,
    pub count: usize,
}

pub fn cmd_search(ctx: &Context, args: SearchArgs) -> Result<(), CsGraphError> {
    let filter = SetFilter {
        contributors: args.contributors,
        species: args.species,
        tags: parse_tags(args.tags)?,
    };
    let sort = SetSort {
        field: args.sort.into(),
        order: if args.desc {
            SortOrder::Descending
        } else {
            SortOrder::Ascending
        },
    };
    let paging = Paging {
        offset: args.offset,
        count: args.count,
    };

    let hits = open_engine(ctx)?.search_sets(&filter, sort, paging)?;
    emit(ctx, &hits, |hits| {
        for hit in hits {
            println!("{:>8}  {}  ({})", hit.key, hit.name, hit.contributor);
        }
    })
}

pub fn cmd_facets(ctx: &Context) -> Result<(), CsGraphError> {
    let facets = open_engine(ctx)?.set_facets(&SetFilter::default())?;
    emit(ctx, &facets, |f| {
        println!("Contributors: {}", f.contributors.join(", "));
        println!("Species:      {}", f.species.join(", "));
        let tags: Vec<String> = f.tags.iter().map(|t| format!("{t:?}")).collect();
        println!("Tags:         {}", tags.join(", "));
    })
}

pub fn cmd_choices(ctx: &Context) -> Result<(), CsGraphError> {
    print_json(&open_engine(ctx)?.state_choices()?)
}

// =============================================================================
// CROSS SECTION COMMANDS
// =============================================================================

pub fn cmd_section_upload(
    ctx: &Context,
    file: &Path,
    draft: bool,
    message: Option<String>,
) -> Result<(), CsGraphError> {
    let doc: SectionDocument = read_document(file)?;
    let status = upload_status(draft);
    let key = mutate(ctx, |engine| engine.create_section(&doc, status, message))?;
    emit(ctx, &serde_json::json!({ "_key": key, "status": status }), |_| {
        println!("Created {status} cross section {key}");
    })
}

pub fn cmd_section_update(
    ctx: &Context,
    key: &Key,
    file: &Path,
    message: String,
) -> Result<(), CsGraphError> {
    let doc: SectionDocument = read_document(file)?;
    let revised = mutate(ctx, |engine| engine.update_section(key, &doc, Some(message)))?;
    emit(ctx, &serde_json::json!({ "_key": revised }), |_| {
        println!("Cross section {key} revised as {revised}");
    })
}

pub fn cmd_section_show(ctx: &Context, key: &Key, document: bool) -> Result<(), CsGraphError> {
    let engine = open_engine(ctx)?;
    if document {
        print_json(&engine.section_document(key)?)
    } else {
        print_json(&engine.section_view(key)?)
    }
}

pub fn cmd_section_history(ctx: &Context, key: &Key) -> Result<(), CsGraphError> {
    let history = open_engine(ctx)?.history_of_section(key)?;
    emit(ctx, &history, |entries| {
        for entry in entries {
            println!(
                "{:>8}  v{:<4} {}",
                entry.key, entry.version_info.version, entry.version_info.status
            );
        }
    })
}

pub fn cmd_section_publish(ctx: &Context, key: &Key) -> Result<(), CsGraphError> {
    let archived = mutate(ctx, |engine| engine.publish_section(key))?;
    emit(ctx, &serde_json::json!({ "archived": archived }), |_| {
        println!("Published cross section {key}");
        if let Some(archived) = &archived {
            println!("Archived cross section {archived}");
        }
    })
}

pub fn cmd_section_delete(
    ctx: &Context,
    key: &Key,
    message: Option<&str>,
) -> Result<(), CsGraphError> {
    let deletion = mutate(ctx, |engine| engine.delete_section(key, message))?;
    emit(ctx, &deletion, |d| println!("Cross section {key}: {d:?}"))
}

pub fn cmd_section_search(
    ctx: &Context,
    species: Vec<String>,
    tags: Vec<String>,
    set_names: Vec<String>,
    offset: usize,
    count: usize,
) -> Result<(), CsGraphError> {
    let filter = SectionFilter {
        species,
        tags: parse_tags(tags)?,
        set_names,
    };
    let hits = open_engine(ctx)?.search_sections(&filter, Paging { offset, count })?;
    emit(ctx, &hits, |hits| {
        for hit in hits {
            let sets: Vec<&str> = hit.is_part_of.iter().map(|s| s.name.as_str()).collect();
            println!("{:>8}  [{}]", hit.key, sets.join(", "));
        }
    })
}

// =============================================================================
// USER COMMANDS
// =============================================================================

pub fn cmd_member_add(ctx: &Context, email: &str, organization: &str) -> Result<(), CsGraphError> {
    let (user, org) = mutate(ctx, |engine| engine.add_member(email, organization))?;
    emit(ctx, &serde_json::json!({ "user": user, "organization": org }), |_| {
        println!("{email} is a member of {organization}");
    })
}

pub fn cmd_owned(ctx: &Context, email: &str) -> Result<(), CsGraphError> {
    let owned = open_engine(ctx)?.list_owned(email)?;
    emit(ctx, &owned, |sets| {
        for set in sets {
            println!(
                "{:>8}  {:<10} {}",
                set.key,
                set.version_info.status.to_string(),
                set.name
            );
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================

//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::api;
use std::path::{Path, PathBuf};
use varve_core::formats::persistence::{log_checksum, log_from_bytes, log_to_bytes};
use varve_core::transact::TxOp;
use varve_core::{Database, VarveError};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for transaction input (100 MB).
///
/// This prevents memory exhaustion from malicious or accidental large files.
const MAX_INPUT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for import (500 MB).
///
/// Import files can be larger since they contain binary log data.
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), VarveError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| VarveError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(VarveError::Serialization(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate file path for security.
///
/// This function:
/// 1. Canonicalizes the path to resolve symlinks and ".."
/// 2. Ensures the path exists
/// 3. Ensures the path is a file (not a directory)
fn validate_file_path(path: &Path) -> Result<PathBuf, VarveError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| VarveError::Io(format!("Invalid file path '{}': {}", path.display(), e)))?;

    if !canonical.is_file() {
        return Err(VarveError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Validate output path for security.
///
/// For output files, the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, VarveError> {
    let parent = path.parent().unwrap_or(Path::new("."));

    let canonical_parent = parent.canonicalize().map_err(|e| {
        VarveError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(VarveError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| VarveError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    db_path: &Path,
    backend: &str,
    host: &str,
    port: u16,
) -> Result<(), VarveError> {
    let db = load_or_create_database(db_path, backend)?;

    println!("Varve Fact Database Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Backend:  {}", backend);
    println!("  Database: {:?}", db_path);
    println!();
    println!("Endpoints:");
    println!("  POST /transact - Submit a transaction");
    println!("  POST /query    - Execute a query");
    println!("  GET  /status   - Get database status");
    println!("  POST /export   - Export the fact log");
    println!("  GET  /health   - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, db).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show database status.
pub fn cmd_status(db_path: &Path, backend: &str, json_mode: bool) -> Result<(), VarveError> {
    let db = load_or_create_database(db_path, backend)?;

    if json_mode {
        let output = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "backend": backend,
            "fact_count": db.fact_count(),
            "attribute_count": db.attribute_count(),
            "basis": db.basis().0,
            "next_entity": db.next_entity().0
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Varve Database Status");
    println!("=====================");
    println!("Database: {:?}", db_path);
    println!("Backend:  {}", backend);
    println!();
    println!("Facts:      {}", db.fact_count());
    println!("Attributes: {}", db.attribute_count());
    println!("Basis:      {}", db.basis().0);
    println!("Next id:    {}", db.next_entity().0);

    Ok(())
}

// =============================================================================
// TRANSACT COMMAND
// =============================================================================

/// Submit a transaction from a JSON file of operations.
pub fn cmd_transact(
    db_path: &Path,
    backend: &str,
    json_mode: bool,
    file: &Path,
) -> Result<(), VarveError> {
    tracing::info!("Transacting from {:?}", file);

    let mut db = load_or_create_database(db_path, backend)?;

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_INPUT_FILE_SIZE)?;

    let contents = std::fs::read(&validated_path)
        .map_err(|e| VarveError::Io(format!("Read file: {}", e)))?;
    let ops: Vec<TxOp> = serde_json::from_slice(&contents)
        .map_err(|e| VarveError::Serialization(format!("Invalid operations file: {}", e)))?;

    let report = db.transact(ops)?;
    save_database(&db, db_path)?;

    if json_mode {
        let output = serde_json::json!({
            "tx": report.tx.map(|t| t.0),
            "basis": report.snapshot.basis().0,
            "fact_count": report.facts.len(),
            "tempids": report
                .tempids
                .iter()
                .map(|(name, id)| (name.clone(), id.0))
                .collect::<std::collections::BTreeMap<_, _>>()
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    match report.tx {
        Some(tx) => println!("Committed transaction {} ({} facts)", tx.0, report.facts.len()),
        None => println!("Nothing to commit (all operations elided)"),
    }
    for (name, id) in &report.tempids {
        println!("  {} -> {}", name, id.0);
    }

    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Execute a query from a JSON file.
pub fn cmd_query(db_path: &Path, backend: &str, file: &Path) -> Result<(), VarveError> {
    let db = load_or_create_database(db_path, backend)?;

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_INPUT_FILE_SIZE)?;

    let contents = std::fs::read(&validated_path)
        .map_err(|e| VarveError::Io(format!("Read file: {}", e)))?;
    let request: api::QueryRequest = serde_json::from_slice(&contents)
        .map_err(|e| VarveError::Serialization(format!("Invalid query file: {}", e)))?;
    request.validate()?;

    let result = db.query(&request.query, &request.inputs)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result)
            .map_err(|e| VarveError::Serialization(e.to_string()))?
    );

    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export the fact log in canonical format.
pub fn cmd_export(db_path: &Path, backend: &str, output: &Path) -> Result<(), VarveError> {
    let validated_output = validate_output_path(output)?;

    let db = load_or_create_database(db_path, backend)?;
    let log = db.export_log();
    let data = log_to_bytes(&log)?;

    println!("Checksum: {}", log_checksum(&log));

    std::fs::write(&validated_output, &data)
        .map_err(|e| VarveError::Io(format!("Write file: {}", e)))?;

    println!("Exported {} bytes to {:?}", data.len(), validated_output);

    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Import a fact log from canonical format.
pub fn cmd_import(db_path: &Path, backend: &str, input: &Path) -> Result<(), VarveError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;

    let data =
        std::fs::read(&validated_path).map_err(|e| VarveError::Io(format!("Read file: {}", e)))?;

    let facts = log_from_bytes(&data)?;
    let db = Database::from_log(facts)?;

    if backend == "redb" {
        return Err(VarveError::Serialization(
            "Import to redb not yet supported. Use file backend.".to_string(),
        ));
    }

    save_database(&db, db_path)?;

    println!(
        "Imported log: {} facts, basis {}",
        db.fact_count(),
        db.basis().0
    );

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(db_path: &Path, backend: &str, force: bool) -> Result<(), VarveError> {
    if db_path.exists() && !force {
        return Err(VarveError::Io(
            "Database already exists. Use --force to overwrite.".to_string(),
        ));
    }

    match backend {
        "redb" => {
            let _db = Database::open(db_path)?;
            println!("Initialized new redb database at {:?}", db_path);
        }
        _ => {
            let db = Database::in_memory();
            save_database(&db, db_path)?;
            println!("Initialized new file database at {:?}", db_path);
        }
    }

    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Load or create a database from a path with the specified backend.
pub fn load_or_create_database(db_path: &Path, backend: &str) -> Result<Database, VarveError> {
    match backend {
        "redb" => Database::open(db_path),
        _ => {
            if db_path.exists() {
                let data = std::fs::read(db_path)
                    .map_err(|e| VarveError::Io(format!("Read db: {}", e)))?;
                Database::from_log(log_from_bytes(&data)?)
            } else {
                Ok(Database::in_memory())
            }
        }
    }
}

/// Save a database to a path.
pub fn save_database(db: &Database, db_path: &Path) -> Result<(), VarveError> {
    if db.is_persistent() {
        // Redb backend - already persisted, nothing to do
        Ok(())
    } else {
        // File backend - export the log in canonical format
        let data = log_to_bytes(&db.export_log())?;
        std::fs::write(db_path, &data)
            .map_err(|e| VarveError::Io(format!("Write db: {}", e)))?;
        Ok(())
    }
}

//! Inspect command implementation.

use pairsync_core::Timestamp;
use pairsync_testkit::StoreSnapshot;
use serde::Serialize;
use std::path::Path;

/// Snapshot inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Live rows by type.
    pub types: Vec<TypeStats>,
    /// Latest `modified_on` across all rows.
    pub last_modified: Option<Timestamp>,
}

/// Statistics for one entity type.
#[derive(Debug, Serialize)]
pub struct TypeStats {
    /// Type name.
    pub name: String,
    /// Stored rows, soft-deleted ones included.
    pub rows: usize,
    /// Rows flagged deleted.
    pub deleted: usize,
    /// Permanent deletes on record.
    pub tombstones: usize,
}

/// Builds the inspection result for a snapshot.
pub fn inspect(path: &Path, snapshot: &StoreSnapshot) -> InspectResult {
    let deleted = |name: &str| match name {
        "Address" => snapshot.addresses.iter().filter(|a| a.deleted).count(),
        "Person" => snapshot.people.iter().filter(|p| p.deleted).count(),
        _ => 0,
    };
    let types = snapshot
        .counts()
        .into_iter()
        .map(|(name, rows)| TypeStats {
            name: name.to_string(),
            rows,
            deleted: deleted(name),
            tombstones: snapshot.tombstones.get(name).map_or(0, Vec::len),
        })
        .collect();

    let last_modified = snapshot
        .addresses
        .iter()
        .map(|a| a.modified_on)
        .chain(snapshot.people.iter().map(|p| p.modified_on))
        .chain(snapshot.log_events.iter().map(|e| e.modified_on))
        .max();

    InspectResult {
        path: path.display().to_string(),
        types,
        last_modified,
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No snapshot found at {:?}", path).into());
    }
    let snapshot = StoreSnapshot::load(path)?;
    let result = inspect(path, &snapshot);

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Snapshot: {}", result.path);
    println!();
    println!("{:<12} {:>8} {:>8} {:>11}", "Type", "Rows", "Deleted", "Tombstones");
    for t in &result.types {
        println!(
            "{:<12} {:>8} {:>8} {:>11}",
            t.name, t.rows, t.deleted, t.tombstones
        );
    }
    println!();
    match result.last_modified {
        Some(at) => println!("Last modified: {at}"),
        None => println!("Last modified: never"),
    }
}

//! Sync command implementation.
//!
//! Loads two snapshot files into in-memory stores, runs one sync between
//! them and writes both stores back. The options, including the cursors,
//! are kept in a state file so the next run only exchanges new changes.

use pairsync_core::{Clock, MemoryDatabase, SyncOptions, SystemClock};
use pairsync_engine::{
    PeerConfig, StoreSyncClient, SyncConfig, SyncEngine, SyncError, SyncRunResult,
};
use pairsync_testkit::{sample_database, sample_schema, SnapshotError, StoreSnapshot};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the sync command.
#[derive(Debug, Error)]
pub enum SyncCommandError {
    /// A snapshot could not be read or written.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// The state file could not be read or written.
    #[error("state file error: {0}")]
    State(String),
    /// The run failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Arguments of the sync command.
#[derive(Debug, Clone)]
pub struct SyncArgs {
    /// Client snapshot.
    pub client: PathBuf,
    /// Server snapshot.
    pub server: PathBuf,
    /// State file.
    pub state: Option<PathBuf>,
    /// Pass limit.
    pub max_passes: u32,
    /// Stamp received records with the receiver's clock.
    pub restamp: bool,
}

/// What a run reports.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    /// The run.
    pub run: SyncRunResult,
    /// Options saved for the next run.
    pub options: SavedState,
}

/// Options persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedState {
    /// Options, with the cursors of the last run.
    pub options: SyncOptions,
}

impl SavedState {
    fn load(path: &Path) -> Result<Self, SyncCommandError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|e| SyncCommandError::State(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| SyncCommandError::State(e.to_string()))
    }

    fn save(&self, path: &Path) -> Result<(), SyncCommandError> {
        let text =
            serde_json::to_string_pretty(self).map_err(|e| SyncCommandError::State(e.to_string()))?;
        fs::write(path, text).map_err(|e| SyncCommandError::State(e.to_string()))
    }
}

fn open_store(name: &str, path: &Path, clock: Arc<dyn Clock>) -> Result<Arc<MemoryDatabase>, SyncCommandError> {
    let db = sample_database(name, clock, 1, 1);
    StoreSnapshot::load(path)?.restore(&db)?;
    Ok(Arc::new(db))
}

/// Runs one sync between the two snapshot files.
pub fn sync_files(args: &SyncArgs) -> Result<SyncReport, SyncCommandError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let client_db = open_store("client", &args.client, Arc::clone(&clock))?;
    let server_db = open_store("server", &args.server, clock)?;

    let mut state = match &args.state {
        Some(path) => SavedState::load(path)?,
        None => SavedState::default(),
    };
    if args.restamp {
        state.options.maintain_modified_on = false;
    }

    let schema = sample_schema();
    let client = StoreSyncClient::new(
        Arc::clone(&client_db),
        Arc::clone(&schema),
        PeerConfig::new("client"),
    );
    let server = StoreSyncClient::new(Arc::clone(&server_db), schema, PeerConfig::new("server"));

    let config = SyncConfig::new().with_max_passes(args.max_passes);
    let engine = SyncEngine::new(config, client, server).with_options(state.options);
    let run = engine.sync_with_retry()?;

    StoreSnapshot::capture(&client_db)?.save(&args.client)?;
    StoreSnapshot::capture(&server_db)?.save(&args.server)?;

    let saved = SavedState {
        options: engine.options(),
    };
    if let Some(path) = &args.state {
        saved.save(path)?;
    }
    tracing::info!(passes = run.passes, issues = run.issues.len(), "stores written");

    Ok(SyncReport {
        run,
        options: saved,
    })
}

/// Runs the sync command.
pub fn run(args: &SyncArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = sync_files(args)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    Ok(())
}

fn print_text_output(report: &SyncReport) {
    let run = &report.run;
    println!("Session: {}", run.session_id);
    println!(
        "Passes: {} ({})",
        run.passes,
        if run.converged { "converged" } else { "pass limit reached" }
    );
    println!(
        "Client -> server: {} exported, {} applied",
        run.client_statistics.changes_exported, run.server_statistics.changes_applied
    );
    println!(
        "Server -> client: {} exported, {} applied",
        run.server_statistics.changes_exported, run.client_statistics.changes_applied
    );
    println!("Duration: {:?}", run.duration);

    if run.issues.is_empty() {
        println!("No issues.");
    } else {
        println!();
        println!("Issues ({}):", run.issues.len());
        for issue in &run.issues {
            println!("  {issue}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairsync_testkit::{Address, Person, TestPeer};
    use tempfile::TempDir;

    fn write_store(path: &Path, build: impl FnOnce(&TestPeer)) {
        let peer = TestPeer::new("seed");
        build(&peer);
        StoreSnapshot::capture(&peer.db).unwrap().save(path).unwrap();
    }

    #[test]
    fn syncs_two_files() {
        let dir = TempDir::new().unwrap();
        let client = dir.path().join("client.json");
        let server = dir.path().join("server.json");
        let state = dir.path().join("state.json");

        write_store(&client, |peer| {
            let home = peer.insert(Address::new("1 Main St", "Springfield", peer.now()));
            peer.insert(Person::new("Ann", &home, peer.now()));
        });

        let args = SyncArgs {
            client: client.clone(),
            server: server.clone(),
            state: Some(state.clone()),
            max_passes: 10,
            restamp: false,
        };
        let report = sync_files(&args).unwrap();
        assert!(report.run.is_clean());
        assert_eq!(report.run.server_statistics.changes_applied, 2);

        let written = StoreSnapshot::load(&server).unwrap();
        assert_eq!(written.addresses.len(), 1);
        assert_eq!(written.people.len(), 1);

        let saved = SavedState::load(&state).unwrap();
        assert!(!saved.options.last_synced_on_client.is_min());

        let again = sync_files(&args).unwrap();
        assert_eq!(again.run.server_statistics.changes_applied, 0);
    }

    #[test]
    fn corrupt_state_is_reported() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state.json");
        fs::write(&state, "{").unwrap();

        let args = SyncArgs {
            client: dir.path().join("client.json"),
            server: dir.path().join("server.json"),
            state: Some(state),
            max_passes: 10,
            restamp: false,
        };
        assert!(matches!(
            sync_files(&args),
            Err(SyncCommandError::State(_))
        ));
    }
}

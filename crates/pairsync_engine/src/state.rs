//! Sync engine state machine.
//!
//! One run opens a session on both peers and then repeats passes until
//! neither side changes any more:
//!
//! ```text
//! BeginBothSides
//!   -> ExportClientChanges -> ApplyOnServer
//!   -> ExportServerChanges -> ApplyOnClient   (repeated per pass)
//!   -> Reconcile                              (corrections)
//!   -> EndBothSides -> Done
//! ```

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::peer::SyncClient;
use parking_lot::RwLock;
use pairsync_core::{SyncIssue, SyncOptions, SyncRequest, SyncStatistics, Timestamp};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle, not syncing.
    Idle,
    /// Opening the session on both peers.
    BeginBothSides,
    /// Reading changes from the client.
    ExportClientChanges,
    /// Applying client changes on the server.
    ApplyOnServer,
    /// Reading changes from the server.
    ExportServerChanges,
    /// Applying server changes on the client.
    ApplyOnClient,
    /// Exchanging corrections for reported issues.
    Reconcile,
    /// Closing the session on both peers.
    EndBothSides,
    /// The last run completed.
    Done,
    /// Engine encountered an error.
    Error,
    /// Engine is waiting before retrying.
    RetryWait,
}

impl SyncState {
    /// Returns true if the engine is in an active sync state.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            SyncState::Idle | SyncState::Done | SyncState::Error | SyncState::RetryWait
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(
            self,
            SyncState::Idle | SyncState::Done | SyncState::Error | SyncState::RetryWait
        )
    }
}

/// Statistics about sync runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of runs completed.
    pub runs_completed: u64,
    /// Total number of passes.
    pub passes: u64,
    /// Total number of objects sent in either direction.
    pub objects_transferred: u64,
    /// Total number of issues left at the end of runs.
    pub issues: u64,
    /// Total number of retries.
    pub retries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRunResult {
    /// Session shared by both peers.
    pub session_id: Uuid,
    /// Number of passes run.
    pub passes: u32,
    /// Issues neither passes nor corrections resolved.
    pub issues: Vec<SyncIssue>,
    /// Final counters of the client.
    pub client_statistics: SyncStatistics,
    /// Final counters of the server.
    pub server_statistics: SyncStatistics,
    /// True if the last pass changed nothing on either side.
    pub converged: bool,
    /// Duration of the run.
    pub duration: Duration,
}

impl SyncRunResult {
    /// Returns true if the run left no issues.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// What happened between `begin_sync` and `end_sync`.
struct SessionOutcome {
    options: SyncOptions,
    passes: u32,
    issues: Vec<SyncIssue>,
    converged: bool,
}

/// Cursor and open issues of one direction.
struct Direction {
    cursor: Timestamp,
    until: Timestamp,
    issues: Vec<SyncIssue>,
}

impl Direction {
    fn new(cursor: Timestamp, until: Timestamp) -> Self {
        Self {
            cursor,
            until,
            issues: Vec::new(),
        }
    }

    /// Moves the cursor to the end of the window once nothing is pending.
    fn settle(&mut self) {
        if self.issues.is_empty() {
            self.cursor = self.cursor.max(self.until);
        }
    }
}

/// The sync engine drives a bidirectional sync between two peers.
pub struct SyncEngine<C: SyncClient, S: SyncClient> {
    config: SyncConfig,
    client: C,
    server: S,
    options: RwLock<SyncOptions>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    issues: RwLock<Vec<SyncIssue>>,
    cancelled: AtomicBool,
    current_retry: AtomicU64,
}

impl<C: SyncClient, S: SyncClient> SyncEngine<C, S> {
    /// Creates a new sync engine.
    pub fn new(config: SyncConfig, client: C, server: S) -> Self {
        Self {
            config,
            client,
            server,
            options: RwLock::new(SyncOptions::new()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            issues: RwLock::new(Vec::new()),
            cancelled: AtomicBool::new(false),
            current_retry: AtomicU64::new(0),
        }
    }

    /// Sets the options used by the next run.
    pub fn with_options(self, options: SyncOptions) -> Self {
        *self.options.write() = options;
        self
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Options, including the cursors saved by the last successful run.
    pub fn options(&self) -> SyncOptions {
        self.options.read().clone()
    }

    /// Replaces the options used by the next run.
    pub fn set_options(&self, options: SyncOptions) {
        *self.options.write() = options;
    }

    /// Issues left by the last run.
    pub fn sync_issues(&self) -> Vec<SyncIssue> {
        self.issues.read().clone()
    }

    /// The client peer.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// The server peer.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Cancels any ongoing sync operation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Checks if sync was cancelled.
    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sets the state.
    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Performs one sync run.
    ///
    /// Both peers are always told to end the session, even when the run
    /// fails. Cursors are saved only when the run succeeds.
    pub fn sync(&self) -> SyncResult<SyncRunResult> {
        let start = Instant::now();

        if !self.state().can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "sync".into(),
            });
        }

        let session_id = Uuid::new_v4();
        let options = self.options();
        tracing::info!(
            session = %session_id,
            client = self.client.name(),
            server = self.server.name(),
            "sync started"
        );

        let outcome = self.run_session(session_id, &options);

        self.set_state(SyncState::EndBothSides);
        let client_end = self.client.end_sync(session_id);
        let server_end = self.server.end_sync(session_id);

        let result = outcome.and_then(|outcome| {
            let client_statistics = client_end?;
            let server_statistics = server_end?;
            Ok((outcome, client_statistics, server_statistics))
        });
        let (outcome, client_statistics, server_statistics) = match result {
            Ok(parts) => parts,
            Err(e) => {
                self.handle_error(&e);
                return Err(e);
            }
        };

        *self.options.write() = outcome.options;
        *self.issues.write() = outcome.issues.clone();

        let result = SyncRunResult {
            session_id,
            passes: outcome.passes,
            issues: outcome.issues,
            client_statistics,
            server_statistics,
            converged: outcome.converged,
            duration: start.elapsed(),
        };

        {
            let mut stats = self.stats.write();
            stats.runs_completed += 1;
            stats.passes += u64::from(result.passes);
            stats.objects_transferred +=
                client_statistics.changes_exported + server_statistics.changes_exported;
            stats.issues += result.issues.len() as u64;
            stats.last_sync_time = Some(Instant::now());
            stats.last_error = None;
        }
        self.set_state(SyncState::Done);
        self.current_retry.store(0, Ordering::SeqCst);

        tracing::info!(
            session = %session_id,
            passes = result.passes,
            converged = result.converged,
            issues = result.issues.len(),
            elapsed_ms = result.duration.as_millis() as u64,
            "sync finished"
        );
        Ok(result)
    }

    /// Performs a sync with retry on transient errors.
    pub fn sync_with_retry(&self) -> SyncResult<SyncRunResult> {
        let retry_config = &self.config.retry;
        let mut last_error = None;
        self.reset_cancel();

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                self.set_state(SyncState::RetryWait);
                let delay = retry_config.delay_for_attempt(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying sync");
                std::thread::sleep(delay);

                self.stats.write().retries += 1;
            }

            self.check_cancelled()?;
            self.current_retry.store(u64::from(attempt), Ordering::SeqCst);

            match self.sync() {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if e.is_retryable() && attempt + 1 < retry_config.max_attempts {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SyncError::Protocol("no sync attempts made".into())))
    }

    fn run_session(&self, session_id: Uuid, options: &SyncOptions) -> SyncResult<SessionOutcome> {
        self.check_cancelled()?;
        self.set_state(SyncState::BeginBothSides);
        let client_session = self.client.begin_sync(session_id, options)?;
        let server_session = self.server.begin_sync(session_id, options)?;

        let mut upstream = Direction::new(options.last_synced_on_client, client_session.started_on);
        let mut downstream =
            Direction::new(options.last_synced_on_server, server_session.started_on);

        let mut passes = 0u32;
        let mut converged = false;
        while passes < self.config.max_passes {
            self.check_cancelled()?;
            passes += 1;

            upstream.issues = self.transfer(
                session_id,
                &self.client,
                &self.server,
                &upstream,
                (SyncState::ExportClientChanges, SyncState::ApplyOnServer),
            )?;
            upstream.settle();

            downstream.issues = self.transfer(
                session_id,
                &self.server,
                &self.client,
                &downstream,
                (SyncState::ExportServerChanges, SyncState::ApplyOnClient),
            )?;
            downstream.settle();

            let client_statistics = self.client.statistics(session_id)?;
            let server_statistics = self.server.statistics(session_id)?;
            tracing::debug!(
                session = %session_id,
                pass = passes,
                client_applied = client_statistics.individual_process_count,
                server_applied = server_statistics.individual_process_count,
                "pass finished"
            );
            if client_statistics.is_reset && server_statistics.is_reset {
                converged = true;
                break;
            }
        }

        if !upstream.issues.is_empty() || !downstream.issues.is_empty() {
            self.set_state(SyncState::Reconcile);
            self.reconcile(session_id, &mut upstream, &mut downstream)?;
        }

        let mut saved = options.clone();
        saved.last_synced_on_client = upstream.cursor;
        saved.last_synced_on_server = downstream.cursor;

        let mut issues = upstream.issues;
        issues.extend(downstream.issues);
        Ok(SessionOutcome {
            options: saved,
            passes,
            issues,
            converged,
        })
    }

    /// Copies one window from `source` to `destination`.
    ///
    /// All pages are collected first and applied as one batch, so that
    /// references between pages resolve. Returns the destination's issues.
    fn transfer(
        &self,
        session_id: Uuid,
        source: &dyn SyncClient,
        destination: &dyn SyncClient,
        direction: &Direction,
        (export_state, apply_state): (SyncState, SyncState),
    ) -> SyncResult<Vec<SyncIssue>> {
        self.set_state(export_state);
        let mut objects = Vec::new();
        let mut skip = 0;
        loop {
            self.check_cancelled()?;
            let request = SyncRequest::window(direction.cursor, direction.until, skip);
            let page = source.get_changes(session_id, &request)?;
            let more = page.has_more();
            skip = page.next_skip();
            objects.extend(page.collection);
            if !more {
                break;
            }
        }

        self.check_cancelled()?;
        self.set_state(apply_state);
        let request = SyncRequest::apply(direction.cursor, direction.until, objects);
        let issues = destination.apply_changes(session_id, &request)?;
        tracing::debug!(
            session = %session_id,
            from = source.name(),
            to = destination.name(),
            objects = request.collection.len(),
            issues = issues.collection.len(),
            "transferred changes"
        );
        Ok(issues.collection)
    }

    /// Asks the source of each unresolved object for the object and its
    /// parents, until nothing is left or a round makes no progress.
    fn reconcile(
        &self,
        session_id: Uuid,
        upstream: &mut Direction,
        downstream: &mut Direction,
    ) -> SyncResult<()> {
        for attempt in 1..=self.config.max_correction_attempts {
            self.check_cancelled()?;
            let before = upstream.issues.len() + downstream.issues.len();
            if before == 0 {
                break;
            }

            if !upstream.issues.is_empty() {
                upstream.issues =
                    self.correct(session_id, &self.client, &self.server, &upstream.issues)?;
                upstream.settle();
            }
            if !downstream.issues.is_empty() {
                downstream.issues =
                    self.correct(session_id, &self.server, &self.client, &downstream.issues)?;
                downstream.settle();
            }

            let after = upstream.issues.len() + downstream.issues.len();
            tracing::debug!(session = %session_id, attempt, before, after, "correction round");
            if after >= before {
                break;
            }
        }

        for issue in upstream.issues.iter().chain(&downstream.issues) {
            tracing::warn!(
                session = %session_id,
                id = %issue.id,
                type_name = %issue.type_name,
                issue_type = %issue.issue_type,
                "unresolved sync issue"
            );
        }
        Ok(())
    }

    fn correct(
        &self,
        session_id: Uuid,
        source: &dyn SyncClient,
        destination: &dyn SyncClient,
        issues: &[SyncIssue],
    ) -> SyncResult<Vec<SyncIssue>> {
        let corrections = source.get_corrections(session_id, issues)?;
        if corrections.collection.is_empty() {
            return Ok(issues.to_vec());
        }
        let remaining = destination.apply_corrections(session_id, &corrections.collection)?;
        Ok(remaining.collection)
    }

    /// Handles an error by updating state and stats.
    fn handle_error(&self, error: &SyncError) {
        tracing::error!(error = %error, "sync failed");
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}

impl<C: SyncClient, S: SyncClient> std::fmt::Debug for SyncEngine<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("client", &self.client.name())
            .field("server", &self.server.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::{MockTransport, RemoteSyncClient};
    use pairsync_core::{SyncIssueType, SyncResponse, SyncSession};
    use pairsync_protocol::PeerResponse;

    fn quiet_peer(name: &str) -> RemoteSyncClient<MockTransport> {
        let transport = MockTransport::new();
        transport.set_response(
            "begin_sync",
            PeerResponse::Session(SyncSession {
                id: Uuid::nil(),
                started_on: Timestamp::from_micros(1_000),
            }),
        );
        transport.set_response("get_changes", PeerResponse::Changes(SyncResponse::default()));
        transport.set_response("apply_changes", PeerResponse::Issues(SyncResponse::default()));
        transport.set_response(
            "statistics",
            PeerResponse::Statistics(SyncStatistics {
                is_reset: true,
                ..SyncStatistics::default()
            }),
        );
        transport.set_response(
            "end_sync",
            PeerResponse::Statistics(SyncStatistics::default()),
        );
        RemoteSyncClient::new(name, transport)
    }

    fn engine() -> SyncEngine<RemoteSyncClient<MockTransport>, RemoteSyncClient<MockTransport>> {
        SyncEngine::new(
            SyncConfig::default(),
            quiet_peer("client"),
            quiet_peer("server"),
        )
    }

    #[test]
    fn state_transitions() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Done.can_start_sync());
        assert!(SyncState::Error.can_start_sync());
        assert!(!SyncState::ApplyOnServer.can_start_sync());

        assert!(SyncState::Reconcile.is_active());
        assert!(SyncState::BeginBothSides.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Done.is_active());
    }

    #[test]
    fn quiet_peers_converge_in_one_pass() {
        let engine = engine();
        let result = engine.sync().unwrap();

        assert_eq!(result.passes, 1);
        assert!(result.converged);
        assert!(result.is_clean());
        assert_eq!(engine.state(), SyncState::Done);
        assert_eq!(engine.stats().runs_completed, 1);

        let options = engine.options();
        assert_eq!(options.last_synced_on_client, Timestamp::from_micros(1_000));
        assert_eq!(options.last_synced_on_server, Timestamp::from_micros(1_000));
    }

    #[test]
    fn peers_are_called_in_order() {
        let engine = engine();
        engine.sync().unwrap();

        let client_ops: Vec<_> = engine
            .client()
            .transport()
            .requests()
            .iter()
            .map(|r| r.operation())
            .collect();
        assert_eq!(
            client_ops,
            vec!["begin_sync", "get_changes", "apply_changes", "statistics", "end_sync"]
        );
    }

    #[test]
    fn issues_block_the_cursor() {
        let engine = engine();
        let issue = SyncIssue::new(
            Uuid::new_v4(),
            SyncIssueType::RelationshipConstraint,
            "Person",
            "missing address",
        );
        engine.server().transport().set_response(
            "apply_changes",
            PeerResponse::Issues(SyncResponse::complete(vec![issue.clone()])),
        );
        engine.client().transport().set_response(
            "get_corrections",
            PeerResponse::Changes(SyncResponse::default()),
        );

        let result = engine.sync().unwrap();
        assert_eq!(result.issues, vec![issue.clone()]);
        assert_eq!(engine.sync_issues(), vec![issue]);

        let options = engine.options();
        assert!(options.last_synced_on_client.is_min());
        assert_eq!(options.last_synced_on_server, Timestamp::from_micros(1_000));
    }

    #[test]
    fn failure_still_ends_both_sessions() {
        let engine = engine();
        engine
            .server()
            .transport()
            .set_response("get_changes", PeerResponse::error("disk full", false));

        let err = engine.sync().unwrap_err();
        assert!(matches!(err, SyncError::Transport { retryable: false, .. }));
        assert_eq!(engine.state(), SyncState::Error);
        assert!(engine.stats().last_error.is_some());
        assert!(engine.options().last_synced_on_client.is_min());

        for peer in [engine.client(), engine.server()] {
            let last = peer.transport().requests().last().map(|r| r.operation());
            assert_eq!(last, Some("end_sync"));
        }
    }

    #[test]
    fn cancelled_sync() {
        let engine = engine();
        engine.cancel();
        assert!(matches!(engine.sync(), Err(SyncError::Cancelled)));

        engine.reset_cancel();
        assert!(engine.sync().is_ok());
    }

    #[test]
    fn retry_gives_up_on_fatal_errors() {
        let engine = SyncEngine::new(
            SyncConfig::default().with_retry(
                RetryConfig::new(3).with_initial_delay(Duration::from_millis(1)),
            ),
            quiet_peer("client"),
            quiet_peer("server"),
        );
        engine
            .client()
            .transport()
            .set_response("begin_sync", PeerResponse::error("bad token", false));

        assert!(engine.sync_with_retry().is_err());
        assert_eq!(engine.stats().retries, 0);
    }

    #[test]
    fn retry_on_transient_errors() {
        let engine = SyncEngine::new(
            SyncConfig::default().with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            ),
            quiet_peer("client"),
            quiet_peer("server"),
        );
        engine
            .server()
            .transport()
            .set_response("begin_sync", PeerResponse::error("busy", true));

        assert!(engine.sync_with_retry().is_err());
        assert_eq!(engine.stats().retries, 2);
    }
}

//! Peers: the two sides of a sync.
//!
//! The engine talks to both sides through [`SyncClient`]. A
//! [`StoreSyncClient`] serves a local [`Database`]; a
//! [`RemoteSyncClient`](crate::RemoteSyncClient) forwards every call over a
//! transport to a peer host.

use crate::config::PeerConfig;
use crate::error::{SyncError, SyncResult};
use crate::schema::{Applied, BatchIndex, Filters, PeerContext, SyncSchema};
use parking_lot::RwLock;
use pairsync_core::{
    Database, FilterSet, SyncIssue, SyncObject, SyncOptions, SyncRequest, SyncResponse,
    SyncSession, SyncStatistics, Timestamp,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// One side of a sync.
///
/// Every call except `begin_sync` names a session opened by `begin_sync`.
pub trait SyncClient: Send + Sync {
    /// Peer name, used in logs.
    fn name(&self) -> &str;

    /// Opens a session. Calling it again with the same id returns the same
    /// session.
    fn begin_sync(&self, session_id: Uuid, options: &SyncOptions) -> SyncResult<SyncSession>;

    /// Exports one page of the changes in the request window.
    fn get_changes(
        &self,
        session_id: Uuid,
        request: &SyncRequest,
    ) -> SyncResult<SyncResponse<SyncObject>>;

    /// Applies a batch of changes and returns the issues it produced.
    fn apply_changes(
        &self,
        session_id: Uuid,
        request: &SyncRequest,
    ) -> SyncResult<SyncResponse<SyncIssue>>;

    /// Exports the records named by the other side's issues, parents first.
    fn get_corrections(
        &self,
        session_id: Uuid,
        issues: &[SyncIssue],
    ) -> SyncResult<SyncResponse<SyncObject>>;

    /// Applies corrections and returns the issues that remain.
    fn apply_corrections(
        &self,
        session_id: Uuid,
        collection: &[SyncObject],
    ) -> SyncResult<SyncResponse<SyncIssue>>;

    /// Returns the session counters.
    fn statistics(&self, session_id: Uuid) -> SyncResult<SyncStatistics>;

    /// Closes the session and returns its final counters. Closing an
    /// unknown session returns empty counters.
    fn end_sync(&self, session_id: Uuid) -> SyncResult<SyncStatistics>;
}

impl<C: SyncClient + ?Sized> SyncClient for Arc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn begin_sync(&self, session_id: Uuid, options: &SyncOptions) -> SyncResult<SyncSession> {
        (**self).begin_sync(session_id, options)
    }

    fn get_changes(
        &self,
        session_id: Uuid,
        request: &SyncRequest,
    ) -> SyncResult<SyncResponse<SyncObject>> {
        (**self).get_changes(session_id, request)
    }

    fn apply_changes(
        &self,
        session_id: Uuid,
        request: &SyncRequest,
    ) -> SyncResult<SyncResponse<SyncIssue>> {
        (**self).apply_changes(session_id, request)
    }

    fn get_corrections(
        &self,
        session_id: Uuid,
        issues: &[SyncIssue],
    ) -> SyncResult<SyncResponse<SyncObject>> {
        (**self).get_corrections(session_id, issues)
    }

    fn apply_corrections(
        &self,
        session_id: Uuid,
        collection: &[SyncObject],
    ) -> SyncResult<SyncResponse<SyncIssue>> {
        (**self).apply_corrections(session_id, collection)
    }

    fn statistics(&self, session_id: Uuid) -> SyncResult<SyncStatistics> {
        (**self).statistics(session_id)
    }

    fn end_sync(&self, session_id: Uuid) -> SyncResult<SyncStatistics> {
        (**self).end_sync(session_id)
    }
}

/// A window exported once and served page by page.
#[derive(Debug, Clone)]
struct ExportCache {
    since: Timestamp,
    until: Timestamp,
    objects: Arc<Vec<SyncObject>>,
}

#[derive(Debug)]
struct PeerSession {
    session: SyncSession,
    options: SyncOptions,
    statistics: SyncStatistics,
    export: Option<ExportCache>,
}

/// A peer serving a local store.
pub struct StoreSyncClient<D: Database> {
    db: Arc<D>,
    schema: Arc<SyncSchema>,
    filters: FilterSet,
    config: PeerConfig,
    sessions: RwLock<HashMap<Uuid, PeerSession>>,
}

impl<D: Database> StoreSyncClient<D> {
    /// Creates a peer over `db` for the types in `schema`.
    pub fn new(db: Arc<D>, schema: Arc<SyncSchema>, config: PeerConfig) -> Self {
        Self {
            db,
            schema,
            filters: FilterSet::new(),
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the filters this peer always applies, on top of the filters
    /// each session brings.
    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    /// The served store.
    pub fn database(&self) -> &Arc<D> {
        &self.db
    }

    /// The peer's type registry.
    pub fn schema(&self) -> &Arc<SyncSchema> {
        &self.schema
    }

    /// The peer configuration.
    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn session_options(&self, session_id: Uuid) -> SyncResult<SyncOptions> {
        self.sessions
            .read()
            .get(&session_id)
            .map(|s| s.options.clone())
            .ok_or(SyncError::UnknownSession(session_id))
    }

    fn with_session<R>(
        &self,
        session_id: Uuid,
        f: impl FnOnce(&mut PeerSession) -> R,
    ) -> SyncResult<R> {
        self.sessions
            .write()
            .get_mut(&session_id)
            .map(f)
            .ok_or(SyncError::UnknownSession(session_id))
    }

    fn context<'a>(&'a self, options: &'a SyncOptions) -> PeerContext<'a> {
        PeerContext::new(
            self.db.as_ref(),
            &self.schema,
            Filters::new(&self.filters, &options.filters),
            options,
        )
    }

    fn export_window(
        &self,
        options: &SyncOptions,
        since: Timestamp,
        until: Timestamp,
    ) -> SyncResult<Vec<SyncObject>> {
        let ctx = self.context(options);
        let mut objects = Vec::new();
        for handler in self.schema.handlers() {
            handler.export(&ctx, since, until, &mut objects)?;
        }
        Ok(objects)
    }

    /// Applies objects in dependency order, then fills in the optional
    /// foreign keys that pointed forward within the batch.
    ///
    /// An object whose required parent comes later in the batch waits for
    /// the next round. Permanent deletes go last, children first.
    ///
    /// Returns the number of objects that altered the store and the issues.
    fn apply_batch(&self, options: &SyncOptions, objects: &[SyncObject]) -> (u64, Vec<SyncIssue>) {
        let ctx = self.context(options);
        let mut issues = Vec::new();

        let mut ordered: Vec<((bool, isize), &SyncObject)> = Vec::with_capacity(objects.len());
        for object in objects {
            match self.schema.order_of(object.type_name()) {
                Some(order) => {
                    let order = order as isize;
                    let rank = if object.is_tombstone() {
                        (true, -order)
                    } else {
                        (false, order)
                    };
                    ordered.push((rank, object));
                }
                None => issues.push(SyncIssue::unknown(
                    object.sync_id(),
                    object.type_name(),
                    format!("type {} is not registered", object.type_name()),
                )),
            }
        }
        ordered.sort_by_key(|(rank, _)| *rank);

        let mut pending: BatchIndex<'_> = ordered
            .iter()
            .map(|(_, o)| (o.type_name(), o.sync_id()))
            .collect();
        let mut queue: Vec<&SyncObject> = ordered.into_iter().map(|(_, o)| o).collect();

        let mut processed = 0u64;
        let mut deferred = Vec::new();
        while !queue.is_empty() {
            let mut waiting = Vec::new();
            for &object in &queue {
                let Some(handler) = self.schema.handler(object.type_name()) else {
                    continue;
                };
                match handler.apply(&ctx, object, &pending, &mut deferred) {
                    Ok(Applied::Waiting) => {
                        waiting.push(object);
                        continue;
                    }
                    Ok(Applied::Changed) => processed += 1,
                    Ok(Applied::Unchanged) => {}
                    Err(issue) => issues.push(issue),
                }
                pending.remove(&(object.type_name(), object.sync_id()));
            }

            if waiting.len() == queue.len() {
                // Their parents can no longer arrive
                for object in &waiting {
                    pending.remove(&(object.type_name(), object.sync_id()));
                }
            }
            queue = waiting;
        }

        for patch in &deferred {
            let Some(handler) = self.schema.handler(patch.type_name) else {
                continue;
            };
            if let Err(issue) = handler.patch(&ctx, patch) {
                issues.push(issue);
            }
        }

        for issue in &issues {
            tracing::warn!(
                peer = %self.config.name,
                id = %issue.id,
                type_name = %issue.type_name,
                issue_type = %issue.issue_type,
                message = %issue.message,
                "sync issue"
            );
        }

        if !options.include_issue_details {
            issues = issues.iter().map(SyncIssue::without_details).collect();
        }
        (processed, issues)
    }
}

impl<D: Database> SyncClient for StoreSyncClient<D> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn begin_sync(&self, session_id: Uuid, options: &SyncOptions) -> SyncResult<SyncSession> {
        if let Some(existing) = self.sessions.read().get(&session_id) {
            return Ok(existing.session);
        }

        for handler in self.schema.handlers() {
            handler.warm_cache(self.db.as_ref())?;
        }

        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.get(&session_id) {
            return Ok(existing.session);
        }
        if sessions.len() >= self.config.max_sessions {
            return Err(SyncError::TooManySessions {
                limit: self.config.max_sessions,
            });
        }

        let session = SyncSession {
            id: session_id,
            started_on: self.db.clock().now(),
        };
        sessions.insert(
            session_id,
            PeerSession {
                session,
                options: options.clone(),
                statistics: SyncStatistics::default(),
                export: None,
            },
        );
        tracing::info!(
            peer = %self.config.name,
            session = %session_id,
            started_on = %session.started_on,
            "session opened"
        );
        Ok(session)
    }

    fn get_changes(
        &self,
        session_id: Uuid,
        request: &SyncRequest,
    ) -> SyncResult<SyncResponse<SyncObject>> {
        let (options, cached) = {
            let sessions = self.sessions.read();
            let session = sessions
                .get(&session_id)
                .ok_or(SyncError::UnknownSession(session_id))?;
            let cached = session
                .export
                .as_ref()
                .filter(|c| c.since == request.since && c.until == request.until)
                .map(|c| Arc::clone(&c.objects));
            (session.options.clone(), cached)
        };

        let objects = match cached {
            Some(objects) => objects,
            None => {
                let objects = Arc::new(self.export_window(&options, request.since, request.until)?);
                let export = ExportCache {
                    since: request.since,
                    until: request.until,
                    objects: Arc::clone(&objects),
                };
                self.with_session(session_id, |s| s.export = Some(export))?;
                objects
            }
        };

        let start = request.skip.min(objects.len());
        let end = start.saturating_add(self.config.page_size).min(objects.len());
        let page = objects[start..end].to_vec();
        let exported = page.len() as u64;
        self.with_session(session_id, |s| s.statistics.changes_exported += exported)?;

        tracing::debug!(
            peer = %self.config.name,
            since = %request.since,
            until = %request.until,
            skip = start,
            page = page.len(),
            total = objects.len(),
            "exported changes"
        );
        Ok(SyncResponse::new(start, objects.len(), page))
    }

    fn apply_changes(
        &self,
        session_id: Uuid,
        request: &SyncRequest,
    ) -> SyncResult<SyncResponse<SyncIssue>> {
        let options = self.session_options(session_id)?;
        let (processed, issues) = self.apply_batch(&options, &request.collection);
        self.with_session(session_id, |s| {
            s.statistics.record_apply(processed, issues.len() as u64);
            // Local writes may have moved rows into a cached window
            s.export = None;
        })?;

        tracing::debug!(
            peer = %self.config.name,
            received = request.collection.len(),
            processed,
            issues = issues.len(),
            "applied changes"
        );
        Ok(SyncResponse::complete(issues))
    }

    fn get_corrections(
        &self,
        session_id: Uuid,
        issues: &[SyncIssue],
    ) -> SyncResult<SyncResponse<SyncObject>> {
        let options = self.session_options(session_id)?;
        let ctx = self.context(&options);

        let mut objects = Vec::new();
        let mut seen = HashSet::new();
        for issue in issues {
            if let Some(handler) = self.schema.handler(&issue.type_name) {
                handler.collect_by_sync_id(&ctx, issue.id, &mut objects, &mut seen)?;
            }
        }

        let exported = objects.len() as u64;
        self.with_session(session_id, |s| s.statistics.corrections_exported += exported)?;
        tracing::debug!(
            peer = %self.config.name,
            issues = issues.len(),
            corrections = objects.len(),
            "exported corrections"
        );
        Ok(SyncResponse::complete(objects))
    }

    fn apply_corrections(
        &self,
        session_id: Uuid,
        collection: &[SyncObject],
    ) -> SyncResult<SyncResponse<SyncIssue>> {
        let options = self.session_options(session_id)?;
        let (processed, issues) = self.apply_batch(&options, collection);
        self.with_session(session_id, |s| {
            s.statistics.record_corrections(processed, issues.len() as u64);
            s.export = None;
        })?;

        tracing::debug!(
            peer = %self.config.name,
            received = collection.len(),
            processed,
            issues = issues.len(),
            "applied corrections"
        );
        Ok(SyncResponse::complete(issues))
    }

    fn statistics(&self, session_id: Uuid) -> SyncResult<SyncStatistics> {
        self.sessions
            .read()
            .get(&session_id)
            .map(|s| s.statistics)
            .ok_or(SyncError::UnknownSession(session_id))
    }

    fn end_sync(&self, session_id: Uuid) -> SyncResult<SyncStatistics> {
        let removed = self.sessions.write().remove(&session_id);
        let statistics = removed.map(|s| s.statistics).unwrap_or_default();
        tracing::info!(
            peer = %self.config.name,
            session = %session_id,
            applied = statistics.changes_applied,
            issues = statistics.issues,
            "session closed"
        );
        Ok(statistics)
    }
}

impl<D: Database> std::fmt::Debug for StoreSyncClient<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSyncClient")
            .field("name", &self.config.name)
            .field("database", &self.db.name())
            .field("schema", &self.schema)
            .field("sessions", &self.session_count())
            .finish()
    }
}

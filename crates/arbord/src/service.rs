//! Arbor service: scans, cached snapshot reads, designed topology and branch mutations.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use arbor_core::config::ArborConfig;
use arbor_core::events::{ArborEvent, EventKind};
use arbor_core::naming::{BranchNamingRules, PrefixNamingConvention};
use arbor_core::plan::{
    DesignedEdge, PlanError, PlanningSession, SessionId, TaskNode, TreeSpec, TreeSpecEdge,
    TreeSpecNode,
};
use arbor_core::types::{ObservedSnapshot, PinId, RepoId, RepositoryPin};
use arbor_core::validation::{has_errors, render_errors, Validate};
use arbor_gh::{CodeHost, GhCli, GhClient};
use arbor_git::{discover_repo, GitCli, GitError, GitRunner};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{lock, CachedSnapshot, ScanTicket, SharedStore, SnapshotCache};
use crate::events::EventSink;
use crate::lifecycle::{
    BranchOps, DeletableCheck, DeleteOutcome, ErrorClass, LifecycleError, RepoLocks,
};
use crate::overlay::apply_overlay;
use crate::persistence::{PersistenceError, SqliteStore};
use crate::scan::{run_scan, ScanError, ScanRequest};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    Validation { message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("a scan of repository pin {pin_id} is already running")]
    ScanInProgress { pin_id: PinId },
    #[error("cannot open repository at {path}: {source}")]
    Repository {
        path: PathBuf,
        #[source]
        source: GitError,
    },
    #[error("failed to create storage directory {path}: {source}")]
    StorageDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start scan thread: {source}")]
    SpawnScan {
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorClass {
        match self {
            ServiceError::Validation { .. } => ErrorClass::Validation,
            ServiceError::NotFound { .. } => ErrorClass::NotFound,
            ServiceError::ScanInProgress { .. } => ErrorClass::Conflict,
            ServiceError::Repository { source, .. } => match source {
                GitError::NotARepository { .. } | GitError::CommandFailed { .. } => {
                    ErrorClass::Validation
                }
                _ => ErrorClass::ExternalTool,
            },
            ServiceError::Lifecycle(err) => err.kind(),
            ServiceError::Persistence(PersistenceError::UnknownPin { .. }) => ErrorClass::NotFound,
            ServiceError::Persistence(PersistenceError::SessionConfirmed { .. }) => {
                ErrorClass::Conflict
            }
            ServiceError::Plan(PlanError::AlreadyConfirmed { .. }) => ErrorClass::Conflict,
            ServiceError::Plan(_) => ErrorClass::Validation,
            ServiceError::Scan(ScanError::Repository { .. }) => ErrorClass::ExternalTool,
            ServiceError::StorageDir { .. }
            | ServiceError::SpawnScan { .. }
            | ServiceError::Persistence(_)
            | ServiceError::Scan(_) => ErrorClass::Internal,
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound {
            message: message.into(),
        }
    }
}

/// Everything the service is built from.
pub struct ServiceParts {
    pub config: ArborConfig,
    pub store: SqliteStore,
    pub git: Arc<dyn GitRunner>,
    pub host: Arc<dyn CodeHost>,
    pub naming: Arc<dyn BranchNamingRules>,
    pub events: Arc<dyn EventSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanTrigger {
    pub started: bool,
    /// Serialized as `repoId`: clients address repositories by pin.
    #[serde(rename = "repoId")]
    pub pin_id: PinId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotView {
    pub snapshot: ObservedSnapshot,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub pin_id: PinId,
    pub version: u64,
    pub snapshot: ObservedSnapshot,
}

struct Inner {
    config: ArborConfig,
    cache: SnapshotCache,
    git: Arc<dyn GitRunner>,
    host: Arc<dyn CodeHost>,
    naming: Arc<dyn BranchNamingRules>,
    events: Arc<dyn EventSink>,
    locks: RepoLocks,
    /// Pins that asked for a re-scan while one was running.
    pending: Mutex<HashSet<PinId>>,
    rescan_after_mutation: AtomicBool,
}

/// A registered repository resolved for a branch operation.
struct RepoContext {
    pin: RepositoryPin,
    root: PathBuf,
}

#[derive(Clone)]
pub struct ArborService {
    inner: Arc<Inner>,
}

impl ArborService {
    pub fn new(parts: ServiceParts) -> Self {
        let store: SharedStore = Arc::new(Mutex::new(parts.store));
        Self {
            inner: Arc::new(Inner {
                config: parts.config,
                cache: SnapshotCache::new(store),
                git: parts.git,
                host: parts.host,
                naming: parts.naming,
                events: parts.events,
                locks: RepoLocks::default(),
                pending: Mutex::new(HashSet::new()),
                rescan_after_mutation: AtomicBool::new(true),
            }),
        }
    }

    /// Opens the configured store and wires the git and gh CLIs.
    pub fn from_config(
        config: ArborConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ServiceError> {
        let sqlite_path = config.storage.sqlite_path.clone();
        if let Some(parent) = sqlite_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ServiceError::StorageDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let store = SqliteStore::open(&sqlite_path)?;
        store.migrate()?;

        let timeout = config.scan.command_timeout();
        let git = GitCli::new(config.tools.git_binary.clone()).with_timeout(timeout);
        let host = GhClient::new(GhCli::new(config.tools.gh_binary.clone()).with_timeout(timeout));
        let naming = PrefixNamingConvention::from_config(&config.naming);
        info!(sqlite = %sqlite_path.display(), "arbor service ready");

        Ok(Self::new(ServiceParts {
            config,
            store,
            git: Arc::new(git),
            host: Arc::new(host),
            naming: Arc::new(naming),
            events,
        }))
    }

    /// For one-shot callers that exit before a background scan could finish.
    pub fn without_background_rescans(self) -> Self {
        self.inner.rescan_after_mutation.store(false, Ordering::Relaxed);
        self
    }

    pub fn config(&self) -> &ArborConfig {
        &self.inner.config
    }

    pub fn is_scanning(&self, pin_id: PinId) -> bool {
        self.inner.cache.is_scanning(pin_id)
    }

    // --- Scans ---

    /// Registers the path and scans it on a background thread. A trigger for a pin that is
    /// already scanning reports `started: false`.
    pub fn trigger_scan(
        &self,
        local_path: &str,
        active_worktree_path: Option<&str>,
    ) -> Result<ScanTrigger, ServiceError> {
        let (pin, active) = self.prepare_scan(local_path, active_worktree_path)?;
        let Some(ticket) = self.inner.cache.start_scan(pin.id) else {
            debug!(pin_id = %pin.id, "scan trigger coalesced");
            return Ok(ScanTrigger {
                started: false,
                pin_id: pin.id,
            });
        };
        self.spawn_scan(ticket, active)?;
        Ok(ScanTrigger {
            started: true,
            pin_id: pin.id,
        })
    }

    /// Foreground variant of [`ArborService::trigger_scan`].
    pub fn scan_now(
        &self,
        local_path: &str,
        active_worktree_path: Option<&str>,
    ) -> Result<ScanOutcome, ServiceError> {
        let (pin, active) = self.prepare_scan(local_path, active_worktree_path)?;
        let ticket = self
            .inner
            .cache
            .start_scan(pin.id)
            .ok_or(ServiceError::ScanInProgress { pin_id: pin.id })?;
        self.execute_scan(ticket, &active)
    }

    fn prepare_scan(
        &self,
        local_path: &str,
        active_worktree_path: Option<&str>,
    ) -> Result<(RepositoryPin, PathBuf), ServiceError> {
        let local_path = resolve_path("localPath", local_path)?;
        let active = match active_worktree_path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => resolve_path("activeWorktreePath", raw)?,
            None => local_path.clone(),
        };
        let pin = self.register(&local_path)?;
        Ok((pin, active))
    }

    fn spawn_scan(&self, ticket: ScanTicket, active: PathBuf) -> Result<(), ServiceError> {
        let service = self.clone();
        let pin_id = ticket.pin_id();
        thread::Builder::new()
            .name(format!("arbor-scan-{pin_id}"))
            .spawn(move || service.scan_in_background(ticket, active))
            .map(|_| ())
            .map_err(|source| ServiceError::SpawnScan { source })
    }

    fn scan_in_background(&self, first: ScanTicket, active: PathBuf) {
        let mut ticket = first;
        loop {
            let pin_id = ticket.pin_id();
            if let Err(err) = self.execute_scan(ticket, &active) {
                debug!(%pin_id, error = %err, "background scan ended without a snapshot");
            }
            if !lock(&self.inner.pending).remove(&pin_id) {
                return;
            }
            match self.inner.cache.start_scan(pin_id) {
                Some(next) => ticket = next,
                None => return,
            }
        }
    }

    /// Asks for a fresh scan after a mutation. Coalesces into a running scan.
    fn request_rescan(&self, pin: &RepositoryPin) {
        if !self.inner.rescan_after_mutation.load(Ordering::Relaxed) {
            debug!(pin_id = %pin.id, "re-scan after mutation disabled");
            return;
        }
        lock(&self.inner.pending).insert(pin.id);
        let Some(ticket) = self.inner.cache.start_scan(pin.id) else {
            debug!(pin_id = %pin.id, "re-scan queued behind running scan");
            return;
        };
        lock(&self.inner.pending).remove(&pin.id);
        if let Err(err) = self.spawn_scan(ticket, pin.local_path.clone()) {
            warn!(pin_id = %pin.id, error = %err, "could not start re-scan");
        }
    }

    fn execute_scan(&self, ticket: ScanTicket, active: &Path) -> Result<ScanOutcome, ServiceError> {
        let pin = self.pin(ticket.pin_id())?;
        self.publish(&pin, EventKind::ScanStarted);

        match self.scan_and_store(ticket, &pin, active) {
            Ok(outcome) => {
                info!(
                    pin_id = %pin.id,
                    version = outcome.version,
                    branches = outcome.snapshot.branches.len(),
                    "scan finished"
                );
                self.inner.events.publish(ArborEvent::now(
                    Some(pin.id),
                    outcome.snapshot.repo_id.clone(),
                    EventKind::ScanCompleted {
                        version: outcome.version,
                        snapshot: Box::new(outcome.snapshot.clone()),
                    },
                ));
                Ok(outcome)
            }
            Err(err) => {
                warn!(pin_id = %pin.id, error = %err, "scan failed");
                self.publish(
                    &pin,
                    EventKind::ScanFailed {
                        message: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    fn scan_and_store(
        &self,
        ticket: ScanTicket,
        pin: &RepositoryPin,
        active: &Path,
    ) -> Result<ScanOutcome, ServiceError> {
        let request = ScanRequest {
            local_path: pin.local_path.clone(),
            active_path: active.to_path_buf(),
            base_branch: pin.base_branch.clone(),
            repo_id: pin.repo_id.clone(),
            remote: self.inner.config.scan.remote.clone(),
            pr_limit: self.inner.config.scan.pr_limit,
        };
        let scanned = {
            let token = self.inner.locks.token(&pin.local_path);
            let _guard = lock(&token);
            run_scan(self.inner.git.as_ref(), self.inner.host.as_ref(), &request)
        };
        let snapshot = match scanned {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.inner.cache.abandon_scan(ticket);
                return Err(err.into());
            }
        };

        if snapshot.repo_id != pin.repo_id {
            lock(self.store()).set_pin_repo_id(pin.id, &snapshot.repo_id)?;
        }
        let version = self.inner.cache.finish_scan(ticket, snapshot.clone())?;
        let snapshot = self.overlaid(&snapshot)?;
        Ok(ScanOutcome {
            pin_id: pin.id,
            version,
            snapshot,
        })
    }

    // --- Reads ---

    /// Latest snapshot with designed edges merged in.
    pub fn read_snapshot(&self, pin_id: PinId) -> Result<SnapshotView, ServiceError> {
        let cached = match self.inner.cache.read(pin_id) {
            Ok(cached) => cached,
            Err(PersistenceError::UnknownPin { .. }) => {
                return Err(ServiceError::not_found(format!(
                    "repository pin {pin_id} not found"
                )))
            }
            Err(err) => return Err(err.into()),
        };
        match cached {
            CachedSnapshot::NotScanned => Err(ServiceError::not_found(format!(
                "repository pin {pin_id} not yet scanned"
            ))),
            CachedSnapshot::Ready { snapshot, version } => Ok(SnapshotView {
                snapshot: self.overlaid(&snapshot)?,
                version,
            }),
        }
    }

    pub fn list_pins(&self) -> Result<Vec<RepositoryPin>, ServiceError> {
        Ok(lock(self.store()).list_pins()?)
    }

    fn overlaid(&self, snapshot: &ObservedSnapshot) -> Result<ObservedSnapshot, ServiceError> {
        let (sessions, tree_spec) = {
            let store = lock(self.store());
            (
                store.list_confirmed_sessions(&snapshot.repo_id, &snapshot.base_branch)?,
                store.load_tree_spec(&snapshot.repo_id, &snapshot.base_branch)?,
            )
        };
        Ok(apply_overlay(snapshot, &sessions, tree_spec.as_ref()))
    }

    // --- Designed topology ---

    /// Tree spec for the pin's repository. An unsaved spec reads as empty.
    pub fn tree_spec(&self, pin_id: PinId, base_branch: Option<&str>) -> Result<TreeSpec, ServiceError> {
        let pin = self.pin(pin_id)?;
        let base = base_or_pin(base_branch, &pin);
        let stored = lock(self.store()).load_tree_spec(&pin.repo_id, &base)?;
        Ok(stored.unwrap_or_else(|| TreeSpec::empty(pin.repo_id.clone(), base)))
    }

    pub fn replace_tree_spec(
        &self,
        pin_id: PinId,
        base_branch: Option<&str>,
        nodes: Vec<TreeSpecNode>,
        edges: Vec<TreeSpecEdge>,
    ) -> Result<TreeSpec, ServiceError> {
        let pin = self.pin(pin_id)?;
        let spec = TreeSpec {
            repo_id: pin.repo_id.clone(),
            base_branch: base_or_pin(base_branch, &pin),
            nodes,
            edges,
        };
        let issues = spec.validate();
        if has_errors(&issues) {
            return Err(ServiceError::validation(render_errors(&issues)));
        }
        lock(self.store()).save_tree_spec(&spec)?;
        info!(%pin_id, repo_id = %spec.repo_id, edges = spec.edges.len(), "tree spec replaced");
        Ok(spec)
    }

    /// Creates or rewrites a draft planning session for the pin's repository.
    pub fn save_session(
        &self,
        pin_id: PinId,
        session_id: &str,
        base_branch: Option<&str>,
        nodes: Vec<TaskNode>,
        edges: Vec<DesignedEdge>,
    ) -> Result<PlanningSession, ServiceError> {
        let session_id = require("sessionId", session_id)?;
        let pin = self.pin(pin_id)?;
        let id = SessionId(session_id.to_string());
        let existing = lock(self.store()).load_session(&id)?;
        let mut session = existing.unwrap_or_else(|| {
            PlanningSession::new_draft(id, pin.repo_id.clone(), base_or_pin(base_branch, &pin))
        });
        session.replace_plan(nodes, edges)?;
        lock(self.store()).save_session(&session)?;
        Ok(session)
    }

    pub fn confirm_session(&self, session_id: &str) -> Result<PlanningSession, ServiceError> {
        let id = SessionId(require("sessionId", session_id)?.to_string());
        let mut session = lock(self.store())
            .load_session(&id)?
            .ok_or_else(|| ServiceError::not_found(format!("planning session {id} not found")))?;
        session.confirm()?;
        lock(self.store()).save_session(&session)?;
        info!(session_id = %id, repo_id = %session.repo_id, "planning session confirmed");
        Ok(session)
    }

    // --- Branch lifecycle ---

    pub fn create_branch(
        &self,
        local_path: &str,
        branch_name: &str,
        base_branch: &str,
    ) -> Result<(), ServiceError> {
        let branch = require("branchName", branch_name)?;
        let base = require("baseBranch", base_branch)?;
        let repo = self.open_repo(local_path)?;
        self.with_repo_lock(&repo, |ops| ops.create(&repo.root, branch, base))?;
        self.publish(
            &repo.pin,
            EventKind::BranchCreated {
                branch: branch.to_string(),
                base_branch: base.to_string(),
            },
        );
        self.request_rescan(&repo.pin);
        Ok(())
    }

    pub fn push_branch(
        &self,
        local_path: &str,
        branch_name: &str,
        force: bool,
        worktree_path: Option<&str>,
    ) -> Result<(), ServiceError> {
        let branch = require("branchName", branch_name)?;
        let repo = self.open_repo(local_path)?;
        let cwd = match worktree_path.map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => resolve_path("worktreePath", raw)?,
            None => repo.root.clone(),
        };
        self.with_repo_lock(&repo, |ops| ops.push(&cwd, branch, force))?;
        self.publish(
            &repo.pin,
            EventKind::BranchPushed {
                branch: branch.to_string(),
                forced: force,
            },
        );
        self.request_rescan(&repo.pin);
        Ok(())
    }

    pub fn rebase_branch(
        &self,
        local_path: &str,
        branch_name: &str,
        parent_branch: &str,
    ) -> Result<(), ServiceError> {
        let branch = require("branchName", branch_name)?;
        let parent = require("parentBranch", parent_branch)?;
        let repo = self.open_repo(local_path)?;
        self.with_repo_lock(&repo, |ops| ops.rebase(&repo.root, branch, parent))?;
        self.publish(
            &repo.pin,
            EventKind::BranchRebased {
                branch: branch.to_string(),
                parent_branch: parent.to_string(),
            },
        );
        self.request_rescan(&repo.pin);
        Ok(())
    }

    pub fn check_deletable(
        &self,
        local_path: &str,
        branch_name: &str,
    ) -> Result<DeletableCheck, ServiceError> {
        let branch = require("branchName", branch_name)?;
        let repo = self.open_repo(local_path)?;
        let parent = self.known_parent(&repo.pin, branch)?;
        debug!(branch, %parent, "checking whether branch can be deleted");
        Ok(self.with_repo_lock(&repo, |ops| ops.check_deletable(&repo.root, branch, &parent))?)
    }

    pub fn delete_branch(
        &self,
        local_path: &str,
        branch_name: &str,
        force: bool,
        delete_remote: bool,
    ) -> Result<DeleteOutcome, ServiceError> {
        let branch = require("branchName", branch_name)?;
        let repo = self.open_repo(local_path)?;
        let outcome = self.with_repo_lock(&repo, |ops| {
            ops.delete(
                self.store(),
                &repo.pin.repo_id,
                &repo.root,
                branch,
                force,
                delete_remote,
            )
        })?;
        self.publish(
            &repo.pin,
            EventKind::BranchDeleted {
                branch: branch.to_string(),
                reparented_edges: outcome.reparented_edges.clone(),
            },
        );
        self.request_rescan(&repo.pin);
        Ok(outcome)
    }

    /// Tree-spec parent, else the cached snapshot's parent, else the pin's base branch.
    fn known_parent(&self, pin: &RepositoryPin, branch: &str) -> Result<String, ServiceError> {
        let designed = lock(self.store())
            .load_tree_spec(&pin.repo_id, &pin.base_branch)?
            .and_then(|spec| spec.parent_of(branch).map(str::to_string));
        if let Some(parent) = designed {
            return Ok(parent);
        }
        if let CachedSnapshot::Ready { snapshot, .. } = self.inner.cache.read(pin.id)? {
            if let Some(edge) = snapshot.parent_of(branch) {
                return Ok(edge.parent.clone());
            }
        }
        Ok(pin.base_branch.clone())
    }

    fn with_repo_lock<T>(
        &self,
        repo: &RepoContext,
        f: impl FnOnce(&BranchOps<'_>) -> Result<T, LifecycleError>,
    ) -> Result<T, LifecycleError> {
        let ops = BranchOps {
            git: self.inner.git.as_ref(),
            naming: self.inner.naming.as_ref(),
            remote: &self.inner.config.scan.remote,
        };
        let token = self.inner.locks.token(&repo.pin.local_path);
        let _guard = lock(&token);
        f(&ops)
    }

    fn open_repo(&self, local_path: &str) -> Result<RepoContext, ServiceError> {
        let local_path = resolve_path("localPath", local_path)?;
        let handle = discover_repo(&local_path, self.inner.git.as_ref()).map_err(|source| {
            ServiceError::Repository {
                path: local_path.clone(),
                source,
            }
        })?;
        let pin = self.register(&local_path)?;
        Ok(RepoContext {
            pin,
            root: handle.root,
        })
    }

    // --- Shared helpers ---

    fn store(&self) -> &SharedStore {
        self.inner.cache.store()
    }

    fn register(&self, local_path: &Path) -> Result<RepositoryPin, ServiceError> {
        Ok(lock(self.store()).register_pin(
            local_path,
            &RepoId::provisional_for(local_path),
            &self.inner.config.scan.default_base_branch,
            Utc::now(),
        )?)
    }

    fn pin(&self, pin_id: PinId) -> Result<RepositoryPin, ServiceError> {
        lock(self.store())
            .load_pin(pin_id)?
            .ok_or_else(|| ServiceError::not_found(format!("repository pin {pin_id} not found")))
    }

    fn publish(&self, pin: &RepositoryPin, kind: EventKind) {
        self.inner
            .events
            .publish(ArborEvent::now(Some(pin.id), pin.repo_id.clone(), kind));
    }
}

fn require<'a>(field: &str, value: &'a str) -> Result<&'a str, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

fn resolve_path(field: &str, raw: &str) -> Result<PathBuf, ServiceError> {
    let trimmed = require(field, raw)?;
    fs::canonicalize(trimmed).map_err(|err| {
        ServiceError::validation(format!("{field} {trimmed} cannot be used: {err}"))
    })
}

fn base_or_pin(base_branch: Option<&str>, pin: &RepositoryPin) -> String {
    base_branch
        .map(str::trim)
        .filter(|base| !base.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| pin.base_branch.clone())
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use arbor_core::config::ArborConfig;
    use arbor_core::naming::PrefixNamingConvention;
    use arbor_core::plan::{DesignedEdge, TaskNode, TreeSpecEdge};
    use arbor_core::types::{PinId, RepoId, ReparentedEdge};
    use arbor_gh::StaticCodeHost;
    use arbor_git::GitCli;

    use super::{ArborService, ServiceError, ServiceParts};
    use crate::events::RecordingSink;
    use crate::lifecycle::{DeleteBlocker, ErrorClass};
    use crate::persistence::SqliteStore;
    use crate::testutil::{commit_file, init_repo, run_git};

    fn service() -> (ArborService, Arc<RecordingSink>) {
        let store = SqliteStore::open_in_memory().expect("store");
        store.migrate().expect("migrate");
        let events = Arc::new(RecordingSink::default());
        let service = ArborService::new(ServiceParts {
            config: ArborConfig::default(),
            store,
            git: Arc::new(GitCli::default()),
            host: Arc::new(StaticCodeHost {
                repository: Some("acme/widgets".to_string()),
                ..StaticCodeHost::default()
            }),
            naming: Arc::new(PrefixNamingConvention::new(Vec::new(), 100)),
            events: events.clone(),
        });
        (service, events)
    }

    fn path_str(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn edge(parent: &str, child: &str) -> TreeSpecEdge {
        TreeSpecEdge {
            parent: parent.to_string(),
            child: child.to_string(),
        }
    }

    fn task(id: &str, branch: &str) -> TaskNode {
        TaskNode {
            id: id.to_string(),
            title: format!("Build {id}"),
            branch: Some(branch.to_string()),
        }
    }

    #[test]
    fn trigger_without_local_path_is_rejected_before_any_work() {
        let (service, events) = service();
        for blank in ["", "   "] {
            let err = service.trigger_scan(blank, None).expect_err("blank path");
            assert_eq!(err.kind(), ErrorClass::Validation);
            assert!(err.to_string().contains("localPath is required"));
        }
        let err = service
            .trigger_scan("/definitely/not/here/arbor", None)
            .expect_err("missing path");
        assert_eq!(err.kind(), ErrorClass::Validation);

        assert!(service.list_pins().expect("pins").is_empty());
        assert!(events.events().is_empty());
    }

    #[test]
    fn reading_unknown_or_unscanned_pins_is_not_found() {
        let (service, _events) = service();
        let err = service.read_snapshot(PinId(9)).expect_err("unknown");
        assert_eq!(err.kind(), ErrorClass::NotFound);

        let repo = init_repo();
        service
            .check_deletable(&path_str(repo.path()), "main")
            .expect("registers pin");
        let pin = service.list_pins().expect("pins")[0].id;
        let err = service.read_snapshot(pin).expect_err("not scanned");
        assert_eq!(err.kind(), ErrorClass::NotFound);
        assert!(err.to_string().contains("not yet scanned"));
    }

    #[test]
    fn scan_now_resolves_repo_id_and_reads_apply_confirmed_sessions() {
        let repo = init_repo();
        let root = repo.path();
        run_git(root, &["checkout", "--quiet", "-b", "feature/a"]);
        commit_file(root, "a.txt", "a\n", "feature a");
        run_git(root, &["checkout", "--quiet", "-b", "feature/b", "main"]);
        commit_file(root, "b.txt", "b\n", "feature b");
        run_git(root, &["checkout", "--quiet", "main"]);

        let (service, events) = service();
        let outcome = service.scan_now(&path_str(root), None).expect("scan");
        assert_eq!(outcome.version, 1);
        assert_eq!(outcome.snapshot.repo_id, RepoId::new("acme/widgets"));
        assert_eq!(
            outcome.snapshot.parent_of("feature/b").map(|e| e.parent.as_str()),
            Some("main")
        );
        assert_eq!(events.names(), vec!["scan_started", "scan_completed"]);

        let pins = service.list_pins().expect("pins");
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].repo_id, RepoId::new("acme/widgets"));
        let pin = pins[0].id;

        service
            .save_session(
                pin,
                "plan-1",
                None,
                vec![task("a", "feature/a"), task("b", "feature/b")],
                vec![DesignedEdge {
                    parent: "a".to_string(),
                    child: "b".to_string(),
                }],
            )
            .expect("save draft");
        let draft_view = service.read_snapshot(pin).expect("read");
        assert_eq!(
            draft_view.snapshot.parent_of("feature/b").map(|e| e.parent.as_str()),
            Some("main")
        );

        service.confirm_session("plan-1").expect("confirm");
        let view = service.read_snapshot(pin).expect("read");
        assert_eq!(view.version, 1);
        let edge = view.snapshot.parent_of("feature/b").expect("edge");
        assert_eq!(edge.parent, "feature/a");
        assert!(edge.is_designed);
    }

    #[test]
    fn confirmed_sessions_cannot_be_changed() {
        let repo = init_repo();
        let (service, _events) = service();
        let outcome = service.scan_now(&path_str(repo.path()), None).expect("scan");

        service
            .save_session(outcome.pin_id, "plan-1", None, vec![task("a", "feature/a")], Vec::new())
            .expect("save");
        service.confirm_session("plan-1").expect("confirm");

        let err = service.confirm_session("plan-1").expect_err("confirm twice");
        assert_eq!(err.kind(), ErrorClass::Conflict);
        let err = service
            .save_session(outcome.pin_id, "plan-1", None, Vec::new(), Vec::new())
            .expect_err("rewrite confirmed");
        assert_eq!(err.kind(), ErrorClass::Conflict);

        let err = service.confirm_session("plan-404").expect_err("missing");
        assert_eq!(err.kind(), ErrorClass::NotFound);
    }

    #[test]
    fn triggered_scan_completes_in_the_background() {
        let repo = init_repo();
        let (service, events) = service();
        let trigger = service.trigger_scan(&path_str(repo.path()), None).expect("trigger");
        assert!(trigger.started);

        let deadline = Instant::now() + Duration::from_secs(30);
        let view = loop {
            match service.read_snapshot(trigger.pin_id) {
                Ok(view) => break view,
                Err(ServiceError::NotFound { .. }) if Instant::now() < deadline => {
                    thread::sleep(Duration::from_millis(25));
                }
                Err(err) => panic!("scan did not complete: {err}"),
            }
        };
        assert_eq!(view.version, 1);
        assert!(view.snapshot.branches.contains("main"));
        while !events.names().contains(&"scan_completed") {
            assert!(Instant::now() < deadline, "scan_completed was never published");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn scan_of_a_plain_directory_fails_without_a_snapshot() {
        let dir = tempfile::tempdir().expect("dir");
        let (service, events) = service();
        let err = service.scan_now(&path_str(dir.path()), None).expect_err("not a repo");
        assert_eq!(err.kind(), ErrorClass::ExternalTool);
        assert_eq!(events.names(), vec!["scan_started", "scan_failed"]);

        let pin = service.list_pins().expect("pins")[0].id;
        assert!(!service.is_scanning(pin));
        let err = service.read_snapshot(pin).expect_err("no snapshot");
        assert!(err.to_string().contains("not yet scanned"));
    }

    #[test]
    fn tree_spec_round_trips_and_rejects_cycles() {
        let repo = init_repo();
        let (service, _events) = service();
        let pin = service.scan_now(&path_str(repo.path()), None).expect("scan").pin_id;

        let empty = service.tree_spec(pin, None).expect("empty spec");
        assert!(empty.edges.is_empty());
        assert_eq!(empty.base_branch, "main");

        service
            .replace_tree_spec(
                pin,
                None,
                Vec::new(),
                vec![edge("main", "feature/a"), edge("feature/a", "feature/b")],
            )
            .expect("replace");
        let stored = service.tree_spec(pin, Some("main")).expect("stored");
        assert_eq!(stored.parent_of("feature/b"), Some("feature/a"));
        assert_eq!(stored.repo_id, RepoId::new("acme/widgets"));

        let err = service
            .replace_tree_spec(
                pin,
                None,
                Vec::new(),
                vec![edge("feature/a", "feature/b"), edge("feature/b", "feature/a")],
            )
            .expect_err("cycle");
        assert_eq!(err.kind(), ErrorClass::Validation);
        assert_eq!(
            service.tree_spec(pin, None).expect("unchanged").edges.len(),
            2
        );
    }

    #[test]
    fn check_deletable_prefers_the_tree_spec_parent() {
        let repo = init_repo();
        let root = repo.path();
        run_git(root, &["checkout", "--quiet", "-b", "feature/parent"]);
        commit_file(root, "p.txt", "p\n", "parent work");
        run_git(root, &["branch", "feature/child"]);
        run_git(root, &["checkout", "--quiet", "main"]);

        let (service, _events) = service();
        let path = path_str(root);
        let check = service.check_deletable(&path, "feature/child").expect("check");
        assert_eq!(check.reason, Some(DeleteBlocker::HasCommits));

        let pin = service.list_pins().expect("pins")[0].id;
        service
            .replace_tree_spec(
                pin,
                None,
                Vec::new(),
                vec![edge("main", "feature/parent"), edge("feature/parent", "feature/child")],
            )
            .expect("spec");
        let check = service.check_deletable(&path, "feature/child").expect("check");
        assert!(check.deletable);

        let check = service.check_deletable(&path, "main").expect("check");
        assert_eq!(check.reason, Some(DeleteBlocker::CurrentlyCheckedOut));
    }

    #[test]
    fn delete_reparents_tree_spec_and_publishes_the_change() {
        let repo = init_repo();
        let root = repo.path();
        run_git(root, &["branch", "feature/parent"]);
        run_git(root, &["branch", "feature/child"]);

        let (service, events) = service();
        let path = path_str(root);
        let pin = service.scan_now(&path, None).expect("scan").pin_id;
        service
            .replace_tree_spec(
                pin,
                None,
                Vec::new(),
                vec![edge("main", "feature/parent"), edge("feature/parent", "feature/child")],
            )
            .expect("spec");

        let err = service
            .delete_branch(&path, "main", false, false)
            .expect_err("checked out");
        assert_eq!(err.kind(), ErrorClass::Conflict);
        assert!(err.to_string().contains("currently checked out"));

        let outcome = service
            .delete_branch(&path, "feature/parent", false, false)
            .expect("delete");
        assert_eq!(
            outcome.reparented_edges,
            vec![ReparentedEdge {
                child: "feature/child".to_string(),
                new_parent: "main".to_string(),
            }]
        );
        assert!(events.names().contains(&"branch_deleted"));
        assert_eq!(
            service.tree_spec(pin, None).expect("spec").parent_of("feature/child"),
            Some("main")
        );
    }

    #[test]
    fn delete_with_unreachable_remote_still_publishes_and_reparents() {
        let repo = init_repo();
        let root = repo.path();
        let origin = tempfile::tempdir().expect("origin");
        run_git(origin.path(), &["init", "--quiet", "--bare"]);
        run_git(root, &["remote", "add", "origin", &path_str(origin.path())]);
        run_git(root, &["branch", "feature/parent"]);
        run_git(root, &["branch", "feature/child"]);
        run_git(root, &["push", "--quiet", "origin", "main", "feature/parent"]);

        let (service, events) = service();
        let path = path_str(root);
        let pin = service.scan_now(&path, None).expect("scan").pin_id;
        service
            .replace_tree_spec(
                pin,
                None,
                Vec::new(),
                vec![edge("main", "feature/parent"), edge("feature/parent", "feature/child")],
            )
            .expect("spec");
        std::fs::remove_dir_all(origin.path()).expect("remove origin");

        let outcome = service
            .delete_branch(&path, "feature/parent", false, true)
            .expect("local delete succeeds");
        assert_eq!(outcome.reparented_edges.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(events.names().contains(&"branch_deleted"));
        assert_eq!(
            service.tree_spec(pin, None).expect("spec").parent_of("feature/child"),
            Some("main")
        );
    }

    #[test]
    fn branch_operations_validate_required_fields() {
        let repo = init_repo();
        let (service, events) = service();
        let path = path_str(repo.path());

        let err = service.create_branch(&path, "", "main").expect_err("branch");
        assert!(err.to_string().contains("branchName is required"));
        let err = service.create_branch(&path, "feature/x", " ").expect_err("base");
        assert!(err.to_string().contains("baseBranch is required"));
        let err = service.rebase_branch(&path, "feature/x", "").expect_err("parent");
        assert_eq!(err.kind(), ErrorClass::Validation);
        let err = service.delete_branch("", "feature/x", false, false).expect_err("path");
        assert_eq!(err.kind(), ErrorClass::Validation);
        assert!(events.events().is_empty());

        let dir = tempfile::tempdir().expect("dir");
        let err = service
            .create_branch(&path_str(dir.path()), "feature/x", "main")
            .expect_err("not a repository");
        assert_eq!(err.kind(), ErrorClass::Validation);
    }

    #[test]
    fn one_shot_service_skips_the_follow_up_scan() {
        let repo = init_repo();
        let (service, events) = service();
        let service = service.without_background_rescans();
        service
            .create_branch(&path_str(repo.path()), "feature/new", "main")
            .expect("create");

        let pin = service.list_pins().expect("pins")[0].id;
        assert!(!service.is_scanning(pin));
        assert_eq!(events.names(), vec!["branch_created"]);
    }

    #[test]
    fn create_branch_publishes_event() {
        let repo = init_repo();
        let (service, events) = service();
        service
            .create_branch(&path_str(repo.path()), "feature/new", "main")
            .expect("create");
        assert!(run_git(repo.path(), &["branch", "--list", "feature/new"]).contains("feature/new"));
        assert_eq!(events.names().first().copied(), Some("branch_created"));
    }
}

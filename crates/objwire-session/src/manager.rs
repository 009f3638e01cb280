use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::thread::{self, ThreadId};

use objwire_invoke::ServiceCatalog;
use objwire_proxy::IdentityRegistry;
use tracing::{debug, info, warn};

use crate::auto_commit::AutoCommitter;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::session::{CommitReport, Session};

/// A session as handed out by the manager.
pub type SessionHandle = Arc<Mutex<Session>>;

#[derive(Clone)]
struct TaskScope {
    id: u64,
    alive: Arc<()>,
}

tokio::task_local! {
    static TASK_SCOPE: TaskScope;
}

thread_local! {
    /// Dropped when the thread exits, which marks its sessions stale.
    static THREAD_ALIVE: Arc<()> = Arc::new(());
}

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

/// Who a session belongs to: a thread, or a task running inside
/// [`SessionManager::in_task_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Owner {
    Thread(ThreadId),
    Task(u64),
}

impl Owner {
    fn current() -> Self {
        Self::current_with_liveness().0
    }

    /// The caller, and a token that dies with it.
    fn current_with_liveness() -> (Self, Weak<()>) {
        TASK_SCOPE
            .try_with(|scope| (Owner::Task(scope.id), Arc::downgrade(&scope.alive)))
            .unwrap_or_else(|_| {
                let alive = THREAD_ALIVE.try_with(Arc::downgrade).unwrap_or_default();
                (Owner::Thread(thread::current().id()), alive)
            })
    }
}

type AffinityKey = (Owner, u32);

struct Entry {
    session: SessionHandle,
    owner: Weak<()>,
}

impl Entry {
    fn owner_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }
}

/// Hands out one session per caller and partition, and commits them.
///
/// The map of sessions is the only shared structure and is locked only
/// while a session is looked up, created, or removed. Each session has its
/// own lock, so callers working in different sessions never wait on each
/// other.
pub struct SessionManager {
    catalog: Arc<ServiceCatalog>,
    identities: Arc<IdentityRegistry>,
    config: Arc<SessionConfig>,
    sessions: Mutex<HashMap<AffinityKey, Entry>>,
    auto_commit: Mutex<Option<AutoCommitter>>,
}

impl SessionManager {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        identities: Arc<IdentityRegistry>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            catalog,
            identities,
            config,
            sessions: Mutex::new(HashMap::new()),
            auto_commit: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Arc<SessionConfig> {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ServiceCatalog> {
        &self.catalog
    }

    pub fn identities(&self) -> &Arc<IdentityRegistry> {
        &self.identities
    }

    fn sessions(&self) -> SessionResult<MutexGuard<'_, HashMap<AffinityKey, Entry>>> {
        self.sessions.lock().map_err(|_| SessionError::Poisoned)
    }

    /// The caller's session in the default partition.
    pub fn current(&self) -> SessionResult<SessionHandle> {
        self.session_for_partition(self.config.default_partition)
    }

    /// The caller's session in `partition_id`, created on first use.
    pub fn session_for_partition(&self, partition_id: u32) -> SessionResult<SessionHandle> {
        let (owner, alive) = Owner::current_with_liveness();
        let mut sessions = self.sessions()?;
        let entry = sessions.entry((owner, partition_id)).or_insert_with(|| {
            debug!(?owner, partition_id, "session opened");
            Entry {
                session: Arc::new(Mutex::new(Session::new(
                    partition_id,
                    Arc::clone(&self.catalog),
                    Arc::clone(&self.identities),
                    Arc::clone(&self.config),
                ))),
                owner: alive,
            }
        });
        Ok(Arc::clone(&entry.session))
    }

    /// Run `f` against the caller's session in `partition_id`, then commit.
    pub fn scope<R>(
        &self,
        partition_id: u32,
        f: impl FnOnce(&mut Session) -> SessionResult<R>,
    ) -> SessionResult<R> {
        let handle = self.session_for_partition(partition_id)?;
        let mut session = handle.lock().map_err(|_| SessionError::Poisoned)?;
        let result = f(&mut session)?;
        session.commit().into_result()?;
        Ok(result)
    }

    /// Run a future with sessions of its own, separate from those of the
    /// thread it happens to be polled on. Its sessions are committed and
    /// discarded when it finishes.
    pub async fn in_task_session<F: Future>(&self, fut: F) -> (F::Output, CommitReport) {
        let scope = TaskScope {
            id: NEXT_SCOPE.fetch_add(1, Ordering::Relaxed),
            alive: Arc::new(()),
        };
        TASK_SCOPE
            .scope(scope, async {
                let output = fut.await;
                (output, self.cleanup_session())
            })
            .await
    }

    /// Commit every session that is not in use right now.
    ///
    /// Sessions whose owner currently holds them are skipped and picked up
    /// by a later pass. A session left poisoned by a panic is recovered:
    /// its dirty set still describes exactly what is unwritten.
    ///
    /// Afterwards, clean sessions nobody else holds are dropped when their
    /// owner has exited or when they cache nothing.
    pub fn commit_all(&self) -> CommitReport {
        let handles: Vec<(AffinityKey, SessionHandle)> = match self.sessions() {
            Ok(sessions) => sessions
                .iter()
                .map(|(key, entry)| (*key, Arc::clone(&entry.session)))
                .collect(),
            Err(_) => return CommitReport::default(),
        };
        let mut report = CommitReport::default();
        for (_, handle) in &handles {
            let mut session = match handle.try_lock() {
                Ok(session) => session,
                Err(TryLockError::WouldBlock) => {
                    debug!("session busy, skipped");
                    continue;
                }
                Err(TryLockError::Poisoned(poisoned)) => {
                    warn!("recovering poisoned session");
                    handle.clear_poison();
                    poisoned.into_inner()
                }
            };
            report.merge(session.commit());
        }
        self.prune(handles);
        report
    }

    fn prune(&self, handles: Vec<(AffinityKey, SessionHandle)>) {
        let Ok(mut sessions) = self.sessions() else {
            return;
        };
        let mut pruned = 0usize;
        for (key, handle) in handles {
            let Some(entry) = sessions.get(&key) else {
                continue;
            };
            // Held only by the map and by `handles`.
            if !Arc::ptr_eq(&entry.session, &handle) || Arc::strong_count(&handle) != 2 {
                continue;
            }
            let stale = match handle.try_lock() {
                Ok(session) => !session.is_dirty() && (!entry.owner_alive() || session.is_empty()),
                Err(_) => false,
            };
            if stale {
                sessions.remove(&key);
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, remaining = sessions.len(), "stale sessions pruned");
        }
    }

    /// Commit and discard every session of the caller.
    pub fn cleanup_session(&self) -> CommitReport {
        let owner = Owner::current();
        let removed: Vec<SessionHandle> = match self.sessions() {
            Ok(mut sessions) => {
                let keys: Vec<AffinityKey> =
                    sessions.keys().filter(|(o, _)| *o == owner).copied().collect();
                keys.iter()
                    .filter_map(|k| sessions.remove(k))
                    .map(|entry| entry.session)
                    .collect()
            }
            Err(_) => return CommitReport::default(),
        };
        let mut report = CommitReport::default();
        for handle in removed {
            let mut session = handle.lock().unwrap_or_else(|p| p.into_inner());
            report.merge(session.commit());
        }
        debug!(?owner, flushed = report.objects_flushed, "sessions cleaned up");
        report
    }

    pub fn session_count(&self) -> usize {
        self.sessions().map(|s| s.len()).unwrap_or(0)
    }

    /// Start committing every session periodically. Must be called from
    /// within a tokio runtime. Does nothing if already running.
    pub fn start_auto_commit(self: &Arc<Self>) -> SessionResult<()> {
        let mut slot = self.auto_commit.lock().map_err(|_| SessionError::Poisoned)?;
        if slot.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::NoRuntime(e.to_string()))?;
        *slot = Some(AutoCommitter::start(
            &runtime,
            Arc::downgrade(self),
            self.config.auto_commit_interval,
        ));
        Ok(())
    }

    pub fn auto_commit_restarts(&self) -> u64 {
        self.auto_commit
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(AutoCommitter::restarts))
            .unwrap_or(0)
    }

    /// Stop auto-commit, commit every session, and discard them all.
    pub async fn shutdown(&self) -> CommitReport {
        let committer = self.auto_commit.lock().ok().and_then(|mut slot| slot.take());
        if let Some(committer) = committer {
            committer.stop().await;
        }
        let report = self.commit_all();
        if let Ok(mut sessions) = self.sessions() {
            sessions.clear();
        }
        info!(
            flushed = report.objects_flushed,
            failed = report.failures.len(),
            "session manager shut down"
        );
        report
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.session_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use objwire_proxy::NoTransport;
    use objwire_store::InMemoryStateStore;
    use objwire_types::{ObjectIdentity, Value};

    use crate::testing::catalog;

    fn manager_with(config: SessionConfig) -> (Arc<SessionManager>, Arc<InMemoryStateStore>) {
        let catalog = Arc::new(catalog());
        let store = Arc::new(InMemoryStateStore::new());
        let identities = Arc::new(IdentityRegistry::new(
            Arc::clone(catalog.registry()),
            store.clone(),
            Arc::new(NoTransport),
        ));
        let manager = SessionManager::new(catalog, identities, Arc::new(config));
        (Arc::new(manager), store)
    }

    fn manager() -> (Arc<SessionManager>, Arc<InMemoryStateStore>) {
        manager_with(SessionConfig::default())
    }

    fn counter(object_id: u64) -> ObjectIdentity {
        ObjectIdentity::new("Counter", 0, object_id)
    }

    // -----------------------------------------------------------------------
    // Affinity
    // -----------------------------------------------------------------------

    #[test]
    fn same_thread_same_session() {
        let (manager, _) = manager();
        let a = manager.current().unwrap();
        let b = manager.current().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let other = manager.session_for_partition(7).unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(manager.session_count(), 2);
    }

    #[test]
    fn threads_get_their_own_sessions() {
        let (manager, _) = manager();
        let mine = manager.current().unwrap();
        let theirs = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.current().unwrap()).join().unwrap()
        };
        assert!(!Arc::ptr_eq(&mine, &theirs));
    }

    #[tokio::test]
    async fn task_sessions_are_separate_and_cleaned_up() {
        let (manager, store) = manager();
        let outer = manager.current().unwrap();
        let (inner, report) = manager
            .in_task_session(async {
                let inner = manager.current().unwrap();
                inner
                    .lock()
                    .unwrap()
                    .create_object("Counter", Some(counter(1)))
                    .unwrap()
                    .set("count", 1i64)
                    .unwrap();
                inner
            })
            .await;
        assert!(!Arc::ptr_eq(&outer, &inner));
        assert_eq!(report.objects_flushed, 1);
        assert_eq!(store.write_count(), 1);
        assert_eq!(manager.session_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    #[test]
    fn scope_commits_afterwards() {
        let (manager, store) = manager();
        let value = manager
            .scope(0, |session| {
                let object = session.create_object("Counter", Some(counter(1)))?;
                Ok(object.set("count", 4i64)?)
            })
            .unwrap();
        assert_eq!(value, Value::Int(4));
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn scope_reports_commit_failure() {
        let (manager, store) = manager();
        store.fence(&counter(1));
        let err = manager
            .scope(0, |session| {
                session.create_object("Counter", Some(counter(1)))?.set("count", 4i64)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::Commit(_)));
    }

    #[test]
    fn commit_all_skips_busy_sessions() {
        let (manager, store) = manager();
        let handle = manager.current().unwrap();
        let mut session = handle.lock().unwrap();
        session.create_object("Counter", Some(counter(1))).unwrap().set("count", 1i64).unwrap();
        assert!(manager.commit_all().is_noop());
        drop(session);
        assert_eq!(manager.commit_all().objects_flushed, 1);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn sessions_of_finished_threads_are_pruned() {
        let (manager, store) = manager();
        {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager
                    .current()
                    .unwrap()
                    .lock()
                    .unwrap()
                    .create_object("Counter", Some(counter(1)))
                    .unwrap()
                    .set("count", 1i64)
                    .unwrap();
            })
            .join()
            .unwrap();
        }
        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.commit_all().objects_flushed, 1);
        assert_eq!(store.write_count(), 1);
        assert_eq!(manager.session_count(), 0);
    }

    #[test]
    fn live_sessions_survive_pruning() {
        let (manager, _) = manager();
        manager.session_for_partition(3).unwrap();
        manager
            .current()
            .unwrap()
            .lock()
            .unwrap()
            .create_object("Counter", Some(counter(1)))
            .unwrap()
            .set("count", 1i64)
            .unwrap();
        let held = manager.session_for_partition(5).unwrap();
        assert_eq!(manager.session_count(), 3);

        manager.commit_all();
        // The empty, unheld partition-3 session goes; the cached object and
        // the held handle keep the others.
        assert_eq!(manager.session_count(), 2);
        let again = manager.session_for_partition(5).unwrap();
        assert!(Arc::ptr_eq(&held, &again));
        assert!(manager.current().unwrap().lock().unwrap().is_resident(&counter(1)));
    }

    #[test]
    fn cleanup_commits_and_discards() {
        let (manager, store) = manager();
        manager
            .current()
            .unwrap()
            .lock()
            .unwrap()
            .create_object("Counter", Some(counter(1)))
            .unwrap()
            .set("count", 1i64)
            .unwrap();
        let report = manager.cleanup_session();
        assert_eq!(report.objects_flushed, 1);
        assert_eq!(manager.session_count(), 0);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn auto_commit_flushes_in_background() {
        let (manager, store) = manager_with(SessionConfig {
            auto_commit_interval: Duration::from_millis(10),
            ..Default::default()
        });
        manager.start_auto_commit().unwrap();
        manager
            .current()
            .unwrap()
            .lock()
            .unwrap()
            .create_object("Counter", Some(counter(1)))
            .unwrap()
            .set("count", 1i64)
            .unwrap();
        for _ in 0..100 {
            if store.write_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.write_count(), 1);
        let report = manager.shutdown().await;
        assert!(report.is_noop());
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_flushes_remaining_work() {
        let (manager, store) = manager_with(SessionConfig {
            auto_commit_interval: Duration::from_secs(3600),
            ..Default::default()
        });
        manager.start_auto_commit().unwrap();
        manager
            .current()
            .unwrap()
            .lock()
            .unwrap()
            .create_object("Counter", Some(counter(1)))
            .unwrap()
            .set("count", 9i64)
            .unwrap();
        let report = manager.shutdown().await;
        assert_eq!(report.objects_flushed, 1);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn auto_commit_needs_a_runtime() {
        let (manager, _) = manager();
        assert!(matches!(
            manager.start_auto_commit().unwrap_err(),
            SessionError::NoRuntime(_)
        ));
    }
}

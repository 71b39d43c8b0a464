//! Process-wide runtime loader.
//!
//! The first `acquire()` starts a load attempt; every caller that arrives
//! while it is in flight awaits the same shared future and sees the same
//! outcome. A failed attempt is remembered for `status()` but not
//! replayed: the next `acquire()` starts a new attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::artifact::ArtifactSource;
use crate::error::LoadError;
use crate::runtime::Runtime;

type LoadAttempt = Shared<BoxFuture<'static, Result<Arc<RuntimeHandle>, LoadError>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

enum LoadState {
    Unloaded,
    Loading { attempt: u64, future: LoadAttempt },
    Ready(Arc<RuntimeHandle>),
    Failed(LoadError),
}

/// A loaded runtime plus the per-handle bookkeeping the bridge needs.
pub struct RuntimeHandle {
    session: Mutex<Session>,
}

pub struct Session {
    pub runtime: Box<dyn Runtime>,
    pub builtins_registered: bool,
}

impl RuntimeHandle {
    pub fn new(runtime: Box<dyn Runtime>) -> Self {
        Self {
            session: Mutex::new(Session {
                runtime,
                builtins_registered: false,
            }),
        }
    }

    /// Exclusive access to the VM. Held only from blocking threads.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock()
    }
}

pub struct RuntimeLoader {
    source: Arc<dyn ArtifactSource>,
    state: Mutex<LoadState>,
    attempts: AtomicU64,
}

impl RuntimeLoader {
    pub fn new(source: impl ArtifactSource) -> Self {
        Self {
            source: Arc::new(source),
            state: Mutex::new(LoadState::Unloaded),
            attempts: AtomicU64::new(0),
        }
    }

    pub async fn acquire(&self) -> Result<Arc<RuntimeHandle>, LoadError> {
        let (attempt, future) = {
            let mut state = self.state.lock();
            match &*state {
                LoadState::Ready(handle) => return Ok(Arc::clone(handle)),
                LoadState::Loading { attempt, future } => (*attempt, future.clone()),
                LoadState::Unloaded | LoadState::Failed(_) => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    let future = self.start_attempt(attempt);
                    *state = LoadState::Loading {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let outcome = future.await;

        let mut state = self.state.lock();
        if matches!(&*state, LoadState::Loading { attempt: current, .. } if *current == attempt) {
            *state = match &outcome {
                Ok(handle) => LoadState::Ready(Arc::clone(handle)),
                Err(err) => LoadState::Failed(err.clone()),
            };
        }
        outcome
    }

    /// The handle, if a load already succeeded. Never starts a load.
    pub fn loaded(&self) -> Option<Arc<RuntimeHandle>> {
        match &*self.state.lock() {
            LoadState::Ready(handle) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    pub fn status(&self) -> LoadStatus {
        match &*self.state.lock() {
            LoadState::Unloaded => LoadStatus::Unloaded,
            LoadState::Loading { .. } => LoadStatus::Loading,
            LoadState::Ready(_) => LoadStatus::Ready,
            LoadState::Failed(err) => LoadStatus::Failed(err.to_string()),
        }
    }

    /// Number of load attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn start_attempt(&self, attempt: u64) -> LoadAttempt {
        let source = Arc::clone(&self.source);
        async move {
            info!("runtime load attempt {attempt} started");
            let loaded = tokio::task::spawn_blocking(move || source.load())
                .await
                .map_err(|err| LoadError::Instantiate(err.to_string()))
                .and_then(|result| result);
            match loaded {
                Ok(runtime) => {
                    info!("runtime load attempt {attempt} succeeded");
                    Ok(Arc::new(RuntimeHandle::new(runtime)))
                }
                Err(err) => {
                    warn!("runtime load attempt {attempt} failed: {err}");
                    Err(err)
                }
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeFault;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct NullRuntime;

    impl Runtime for NullRuntime {
        fn is_ready(&mut self) -> Result<bool, RuntimeFault> {
            Ok(true)
        }
        fn initialize(&mut self) -> Result<(), RuntimeFault> {
            Ok(())
        }
        fn register_builtins(&mut self) -> Result<(), RuntimeFault> {
            Ok(())
        }
        fn clear_last_error(&mut self) -> Result<(), RuntimeFault> {
            Ok(())
        }
        fn run_source(&mut self, source: &str) -> Result<String, RuntimeFault> {
            Ok(source.to_string())
        }
        fn last_error(&mut self) -> Result<Option<String>, RuntimeFault> {
            Ok(None)
        }
    }

    /// Fails the first `failures` loads, then succeeds. Each load sleeps
    /// briefly so concurrent callers overlap.
    struct FlakySource {
        loads: Arc<AtomicUsize>,
        failures: usize,
    }

    impl ArtifactSource for FlakySource {
        fn load(&self) -> Result<Box<dyn Runtime>, LoadError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            if n < self.failures {
                Err(LoadError::Instantiate("artifact corrupt".to_string()))
            } else {
                Ok(Box::new(NullRuntime))
            }
        }
    }

    fn loader(failures: usize) -> (Arc<RuntimeLoader>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = RuntimeLoader::new(FlakySource {
            loads: Arc::clone(&loads),
            failures,
        });
        (Arc::new(loader), loads)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_load() {
        let (loader, loads) = loader(0);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let loader = Arc::clone(&loader);
                tokio::spawn(async move { loader.acquire().await })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.expect("join").expect("load"));
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.attempts(), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
        assert_eq!(loader.status(), LoadStatus::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_reaches_every_pending_caller() {
        let (loader, loads) = loader(1);
        let (a, b) = tokio::join!(loader.acquire(), loader.acquire());
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(matches!(loader.status(), LoadStatus::Failed(_)));
        assert!(loader.loaded().is_none());
    }

    #[tokio::test]
    async fn retries_with_a_fresh_attempt_after_failure() {
        let (loader, loads) = loader(1);
        assert!(loader.acquire().await.is_err());
        let handle = loader.acquire().await.expect("second attempt succeeds");
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(loader.attempts(), 2);
        assert!(Arc::ptr_eq(&handle, &loader.loaded().expect("ready")));
    }

    #[tokio::test]
    async fn ready_handle_is_reused_without_loading_again() {
        let (loader, loads) = loader(0);
        assert_eq!(loader.status(), LoadStatus::Unloaded);
        loader.acquire().await.expect("load");
        loader.acquire().await.expect("cached");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }
}

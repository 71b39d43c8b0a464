//! Execution bridge: source text in, result text or error out.
//!
//! The bridge never panics or raises into its caller. Every failure mode
//! (artifact unavailable, runtime-reported error, trap or panic inside the
//! VM call) comes back as an [`ExecutionError`]. It does not serialize
//! concurrent requests beyond the handle's lock; that policy belongs to
//! the store.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ExecutionError, RuntimeFault};
use crate::loader::{RuntimeHandle, RuntimeLoader, Session};

/// What the playground store needs from an execution backend.
pub trait Executor: Send + Sync + 'static {
    /// Load and initialize the runtime without running anything.
    fn prepare(&self) -> impl Future<Output = Result<(), ExecutionError>> + Send;

    fn execute(&self, source: &str) -> impl Future<Output = Result<String, ExecutionError>> + Send;
}

pub struct ExecutionBridge {
    loader: Arc<RuntimeLoader>,
}

impl ExecutionBridge {
    pub fn new(loader: Arc<RuntimeLoader>) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &Arc<RuntimeLoader> {
        &self.loader
    }

    /// Call the artifact's teardown entry point if a runtime is loaded.
    pub async fn teardown(&self) -> Result<(), ExecutionError> {
        let Some(handle) = self.loader.loaded() else {
            return Ok(());
        };
        on_runtime_thread(handle, |session| {
            session.runtime.teardown().map_err(unexpected)
        })
        .await
    }
}

impl Executor for ExecutionBridge {
    async fn prepare(&self) -> Result<(), ExecutionError> {
        let handle = self
            .loader
            .acquire()
            .await
            .map_err(ExecutionError::LoadFailed)?;
        on_runtime_thread(handle, ensure_initialized).await
    }

    async fn execute(&self, source: &str) -> Result<String, ExecutionError> {
        let handle = self
            .loader
            .acquire()
            .await
            .map_err(ExecutionError::LoadFailed)?;
        let source = source.to_owned();
        on_runtime_thread(handle, move |session| run_in_session(session, &source)).await
    }
}

/// Run `f` against the locked session on a blocking thread. A panic
/// inside `f` is reported as an unexpected failure.
async fn on_runtime_thread<T, F>(handle: Arc<RuntimeHandle>, f: F) -> Result<T, ExecutionError>
where
    T: Send + 'static,
    F: FnOnce(&mut Session) -> Result<T, ExecutionError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut session = handle.lock();
        f(&mut session)
    })
    .await
    .unwrap_or_else(|err| {
        warn!("runtime call did not complete: {err}");
        Err(ExecutionError::UnexpectedFailure(err.to_string()))
    })
}

fn ensure_initialized(session: &mut Session) -> Result<(), ExecutionError> {
    if !session.runtime.is_ready().map_err(unexpected)? {
        debug!("initializing runtime");
        session.runtime.initialize().map_err(unexpected)?;
    }
    if !session.builtins_registered {
        session.runtime.register_builtins().map_err(unexpected)?;
        session.builtins_registered = true;
    }
    Ok(())
}

fn run_in_session(session: &mut Session, source: &str) -> Result<String, ExecutionError> {
    ensure_initialized(session)?;
    session.runtime.clear_last_error().map_err(unexpected)?;
    let output = session.runtime.run_source(source).map_err(unexpected)?;
    match session.runtime.last_error().map_err(unexpected)? {
        Some(message) => Err(ExecutionError::RuntimeError(message)),
        None => Ok(output),
    }
}

fn unexpected(fault: RuntimeFault) -> ExecutionError {
    ExecutionError::UnexpectedFailure(fault.0)
}

//! The playground state store.
//!
//! Single owner of the open tabs, the run transcript and the persistence
//! bookkeeping. Views read [`Snapshot`]s and send intents through the
//! methods here; nothing below this layer knows about views.
//!
//! Rejected intents never error. Each one leaves state untouched and
//! appends exactly one warning line to the transcript explaining why.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactLocation, WasmArtifact};
use crate::bridge::{ExecutionBridge, Executor};
use crate::config::PlaygroundConfig;
use crate::debounce::Debouncer;
use crate::error::{ExecutionError, PersistenceError};
use crate::files::{DEFAULT_LANGUAGE, FileId, FileSet, FileTab};
use crate::loader::RuntimeLoader;
use crate::storage::{DirectoryStore, KeyValueStore, MemoryStore, load_files, save_files};
use crate::transcript::{OutputLine, Severity, Transcript, now_ms};

/// Read-only view of the whole store, published after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub files: Vec<FileTab>,
    pub active: FileId,
    pub output: Vec<OutputLine>,
    pub running: bool,
    pub runtime_ready: bool,
    pub saving: bool,
    pub last_saved_ms: Option<u64>,
}

impl Snapshot {
    pub fn active_file(&self) -> Option<&FileTab> {
        self.files.iter().find(|tab| tab.id == self.active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Not executed: already running, runtime not ready, or nothing to run.
    Rejected,
    Succeeded,
    Failed,
}

struct PlaygroundState {
    files: FileSet,
    transcript: Transcript,
    running: bool,
    runtime_ready: bool,
    saving: bool,
    last_saved_ms: Option<u64>,
    /// Bumped on every change to `files`; a save only clears `saving`
    /// if nothing changed while it was writing.
    revision: u64,
}

impl PlaygroundState {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            files: self.files.tabs().to_vec(),
            active: self.files.active().id.clone(),
            output: self.transcript.lines().to_vec(),
            running: self.running,
            runtime_ready: self.runtime_ready,
            saving: self.saving,
            last_saved_ms: self.last_saved_ms,
        }
    }

    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!("rejected intent: {message}");
        self.transcript.push(Severity::Warning, message);
    }

    fn files_changed(&mut self) {
        self.revision += 1;
        self.saving = true;
    }
}

struct Inner {
    state: Mutex<PlaygroundState>,
    storage: Arc<dyn KeyValueStore>,
    storage_key: String,
    saver: Debouncer,
    /// Held for the whole of a write so a flush and a debounced save
    /// never interleave.
    writing: Mutex<()>,
    snapshots: watch::Sender<Snapshot>,
}

impl Inner {
    fn mutate<R>(&self, f: impl FnOnce(&mut PlaygroundState) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state);
        self.snapshots.send_replace(state.snapshot());
        result
    }

    /// Debounced write. Without a tokio runtime the write happens in place.
    fn schedule_save(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let scheduled = self.saver.schedule(async move {
            if let Err(err) = tokio::task::spawn_blocking(move || inner.save_now()).await {
                warn!("save task did not complete: {err}");
            }
        });
        if !scheduled {
            debug!("no tokio runtime available, saving files synchronously");
            self.save_now().ok();
        }
    }

    fn save_now(&self) -> Result<(), PersistenceError> {
        let _writing = self.writing.lock();
        let (files, revision) = {
            let state = self.state.lock();
            (state.files.clone(), state.revision)
        };
        let result = save_files(self.storage.as_ref(), &self.storage_key, &files);
        if let Err(err) = &result {
            warn!("failed to save files: {err}");
        }
        self.mutate(|state| {
            // 書き込み中に変更があれば次の保存が `saving` を下ろす。
            if state.revision == revision {
                state.saving = false;
            }
            if result.is_ok() {
                state.last_saved_ms = Some(now_ms());
            }
        });
        result
    }
}

/// Clears the running flag however the run ends, including when the run
/// future is dropped before the executor answers.
struct RunningGuard {
    inner: Arc<Inner>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.inner.mutate(|state| state.running = false);
    }
}

pub struct Playground<E> {
    inner: Arc<Inner>,
    executor: E,
}

impl Playground<ExecutionBridge> {
    /// Wire the production stack: wasm artifact on disk, directory-backed
    /// storage when a storage dir is configured, in-memory otherwise.
    pub fn open(config: &PlaygroundConfig) -> Self {
        let location = ArtifactLocation::new(&config.artifact_dir);
        let loader = RuntimeLoader::new(WasmArtifact::new(location));
        let storage: Arc<dyn KeyValueStore> = match &config.storage_dir {
            Some(dir) => Arc::new(DirectoryStore::new(dir)),
            None => Arc::new(MemoryStore::new()),
        };
        Self::new(ExecutionBridge::new(Arc::new(loader)), storage, config)
    }
}

impl<E: Executor> Playground<E> {
    /// Saved tabs are read once, here. Anything unusable falls back to the
    /// built-in default file.
    ///
    /// If called inside a tokio runtime, debounced saves are spawned on it
    /// even when later intents arrive from other threads. Built outside
    /// one, each change is written synchronously instead.
    pub fn new(executor: E, storage: Arc<dyn KeyValueStore>, config: &PlaygroundConfig) -> Self {
        let files = match load_files(storage.as_ref(), &config.storage_key) {
            Some(files) => {
                info!("restored {} saved file(s)", files.len());
                files
            }
            None => FileSet::default(),
        };
        let mut transcript = Transcript::new();
        transcript.push(Severity::Info, "Welcome to the Orus playground.");

        let state = PlaygroundState {
            files,
            transcript,
            running: false,
            runtime_ready: false,
            saving: false,
            last_saved_ms: None,
            revision: 0,
        };
        let (snapshots, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                storage,
                storage_key: config.storage_key.clone(),
                saver: Debouncer::new(config.save_delay),
                writing: Mutex::new(()),
                snapshots,
            }),
            executor,
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Load and initialize the runtime. Failure is reported in the
    /// transcript and leaves the runtime not ready; it is not retried.
    pub async fn initialize_runtime(&self) -> bool {
        if self.inner.state.lock().runtime_ready {
            return true;
        }
        self.inner
            .mutate(|state| state.transcript.push(Severity::Info, "Loading Orus runtime..."));

        let result = self.executor.prepare().await;
        self.inner.mutate(|state| match result {
            Ok(()) => {
                state.runtime_ready = true;
                state.transcript.push(Severity::Success, "Orus runtime ready.");
                true
            }
            Err(ExecutionError::LoadFailed(err)) => {
                state
                    .transcript
                    .push(Severity::Error, format!("Failed to load Orus runtime: {err}"));
                false
            }
            Err(err) => {
                state
                    .transcript
                    .push(Severity::Error, format!("Runtime initialization failed: {err}"));
                false
            }
        })
    }

    /// Open a new tab with templated content and make it active. A blank
    /// name gets a generated one.
    pub fn add_file(&self, name: &str, language: &str) -> FileId {
        let id = self.inner.mutate(|state| {
            let name = match name.trim() {
                "" => format!("untitled-{}.orus", state.files.len() + 1),
                trimmed => trimmed.to_string(),
            };
            let language = match language.trim() {
                "" => DEFAULT_LANGUAGE,
                trimmed => trimmed,
            };
            let id = state.files.add(&name, language);
            state.files_changed();
            id
        });
        self.inner.schedule_save();
        id
    }

    pub fn close_file(&self, id: &FileId) -> bool {
        let closed = self.inner.mutate(|state| {
            if !state.files.contains(id) {
                state.warn(format!("No open file with id {id}."));
                false
            } else if !state.files.close(id) {
                state.warn("Cannot close the last open file.");
                false
            } else {
                state.files_changed();
                true
            }
        });
        if closed {
            self.inner.schedule_save();
        }
        closed
    }

    pub fn rename_file(&self, id: &FileId, name: &str) -> bool {
        let renamed = self.inner.mutate(|state| {
            if !state.files.contains(id) {
                state.warn(format!("No open file with id {id}."));
                false
            } else if !state.files.rename(id, name) {
                state.warn("File name cannot be empty.");
                false
            } else {
                state.files_changed();
                true
            }
        });
        if renamed {
            self.inner.schedule_save();
        }
        renamed
    }

    /// Replace a tab's content and (re)arm the debounced save.
    pub fn update_content(&self, id: &FileId, content: &str) -> bool {
        let updated = self.inner.mutate(|state| {
            if state.files.update_content(id, content) {
                state.files_changed();
                true
            } else {
                state.warn(format!("No open file with id {id}."));
                false
            }
        });
        if updated {
            self.inner.schedule_save();
        }
        updated
    }

    pub fn set_active(&self, id: &FileId) -> bool {
        self.inner.mutate(|state| {
            if state.files.set_active(id) {
                true
            } else {
                state.warn(format!("No open file with id {id}."));
                false
            }
        })
    }

    /// Run the active tab. At most one run is in flight; the running flag
    /// is cleared however the run ends.
    pub async fn run(&self) -> RunOutcome {
        let admitted = self.inner.mutate(|state| {
            if state.running {
                state.warn("A program is already running.");
                return None;
            }
            if !state.runtime_ready {
                state.warn("Runtime is not ready yet.");
                return None;
            }
            let active = state.files.active();
            if active.content.trim().is_empty() {
                state.warn("No code to execute.");
                return None;
            }
            let job = (active.name.clone(), active.content.clone());
            state.running = true;
            Some(job)
        });
        let Some((name, source)) = admitted else {
            return RunOutcome::Rejected;
        };

        let guard = RunningGuard {
            inner: Arc::clone(&self.inner),
        };
        let started = Instant::now();
        let result = self.executor.execute(&source).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let outcome = self.inner.mutate(|state| record_result(&mut state.transcript, result, elapsed_ms));
        info!("ran {name}: {outcome:?} in {elapsed_ms:.2} ms");
        drop(guard);
        outcome
    }

    pub fn clear_output(&self) {
        self.inner.mutate(|state| {
            state.transcript.clear();
            state.transcript.push(Severity::Info, "Output cleared.");
        });
    }

    /// Write the tabs now instead of waiting for the debounce timer.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        self.inner.saver.cancel();
        self.inner.save_now()
    }
}

fn record_result(
    transcript: &mut Transcript,
    result: Result<String, ExecutionError>,
    elapsed_ms: f64,
) -> RunOutcome {
    match result {
        Ok(output) => {
            transcript.push(
                Severity::Success,
                format!("Program finished in {elapsed_ms:.2} ms."),
            );
            if transcript.push_output(&output) == 0 {
                transcript.push(Severity::Info, "Program produced no output.");
            }
            RunOutcome::Succeeded
        }
        Err(ExecutionError::RuntimeError(message)) => {
            transcript.push(
                Severity::Error,
                format!("Program failed after {elapsed_ms:.2} ms."),
            );
            transcript.push_all(&message, Severity::Error);
            RunOutcome::Failed
        }
        Err(ExecutionError::LoadFailed(err)) => {
            transcript.push(Severity::Error, format!("Runtime unavailable: {err}"));
            RunOutcome::Failed
        }
        Err(ExecutionError::UnexpectedFailure(message)) => {
            transcript.push(
                Severity::Error,
                format!("Unexpected runtime failure: {message}"),
            );
            RunOutcome::Failed
        }
    }
}

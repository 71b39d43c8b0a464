//! Locating and loading the prebuilt runtime artifact.
//!
//! The artifact is two files under a fixed directory: a small JSON
//! manifest and the wasm payload it describes. The payload path goes
//! through a `locate_file` hook so embedders that serve the manifest from
//! one place and the payload from another can redirect it.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::LoadError;
use crate::runtime::{Runtime, WasmRuntime};

pub const RUNTIME_MANIFEST: &str = "orus-runtime.json";
pub const RUNTIME_PAYLOAD: &str = "orus-runtime.wasm";

/// `(manifest_dir, file_name) -> path` of the file to read.
pub type LocateFile = Arc<dyn Fn(&Path, &str) -> PathBuf + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeManifest {
    pub name: String,
    pub version: String,
}

/// Something that can produce a fresh runtime instance.
///
/// Called from a blocking thread; implementations may do file I/O and
/// module compilation directly.
pub trait ArtifactSource: Send + Sync + 'static {
    fn load(&self) -> Result<Box<dyn Runtime>, LoadError>;
}

#[derive(Clone)]
pub struct ArtifactLocation {
    root: PathBuf,
    locate_file: LocateFile,
}

impl ArtifactLocation {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locate_file: Arc::new(|dir: &Path, file: &str| dir.join(file)),
        }
    }

    pub fn with_locate_file(
        mut self,
        locate_file: impl Fn(&Path, &str) -> PathBuf + Send + Sync + 'static,
    ) -> Self {
        self.locate_file = Arc::new(locate_file);
        self
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(RUNTIME_MANIFEST)
    }

    pub fn payload_path(&self) -> PathBuf {
        (self.locate_file)(&self.root, RUNTIME_PAYLOAD)
    }
}

impl fmt::Debug for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactLocation")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// The production source: manifest + wasm payload on disk.
#[derive(Debug, Clone)]
pub struct WasmArtifact {
    location: ArtifactLocation,
}

impl WasmArtifact {
    pub fn new(location: ArtifactLocation) -> Self {
        Self { location }
    }

    pub fn read_manifest(&self) -> Result<RuntimeManifest, LoadError> {
        let path = self.location.manifest_path();
        let text = read_file(&path, |path| fs::read_to_string(path))?;
        serde_json::from_str(&text).map_err(|err| LoadError::Manifest(err.to_string()))
    }
}

impl ArtifactSource for WasmArtifact {
    fn load(&self) -> Result<Box<dyn Runtime>, LoadError> {
        let manifest = self.read_manifest()?;
        let payload_path = self.location.payload_path();
        info!(
            "loading runtime {} {} from {}",
            manifest.name,
            manifest.version,
            payload_path.display()
        );
        let payload = read_file(&payload_path, |path| fs::read(path))?;
        Ok(Box::new(WasmRuntime::instantiate(&payload)?))
    }
}

fn read_file<T>(path: &Path, read: impl FnOnce(&Path) -> io::Result<T>) -> Result<T, LoadError> {
    read(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => LoadError::MissingArtifact(path.to_path_buf()),
        _ => LoadError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        },
    })
}

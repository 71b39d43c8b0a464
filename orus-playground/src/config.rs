use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ARTIFACT_DIR: &str = "static/runtime";
pub const DEFAULT_STORAGE_KEY: &str = "orus-playground-files";
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaygroundConfig {
    /// Directory holding the runtime manifest and payload.
    pub artifact_dir: PathBuf,
    /// `None` keeps saved tabs in memory only.
    pub storage_dir: Option<PathBuf>,
    pub storage_key: String,
    /// Quiet period before an edit is written out.
    pub save_delay: Duration,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
            storage_dir: None,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            save_delay: DEFAULT_SAVE_DELAY,
        }
    }
}

//! Open source buffers ("tabs") and the invariants over them.
//!
//! [`FileSet`] is never empty and always has exactly one active tab.
//! Every mutating method either keeps that invariant or refuses the
//! change and returns `false`.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_LANGUAGE: &str = "orus";
pub const DEFAULT_FILE_NAME: &str = "main.orus";
pub const DEFAULT_SOURCE: &str = r#"// Welcome to the Orus playground.
fn main() {
    print("Hello, Orus!")
}
"#;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One editable buffer. Also the persisted record shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTab {
    pub id: FileId,
    pub name: String,
    pub content: String,
    pub language: String,
    pub active: bool,
}

impl FileTab {
    pub fn new(name: impl Into<String>, language: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: FileId::generate(),
            name: name.into(),
            content: content.into(),
            language: language.into(),
            active: false,
        }
    }
}

/// Starter content for a freshly added tab.
pub fn template_for(name: &str) -> String {
    format!("// {name}\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    tabs: Vec<FileTab>,
}

impl Default for FileSet {
    fn default() -> Self {
        Self::single(FileTab::new(DEFAULT_FILE_NAME, DEFAULT_LANGUAGE, DEFAULT_SOURCE))
    }
}

impl FileSet {
    pub fn single(mut tab: FileTab) -> Self {
        tab.active = true;
        Self { tabs: vec![tab] }
    }

    /// Rebuild from persisted records. `None` for an empty list; otherwise
    /// the active flags are normalized so exactly the first active tab
    /// (or the first tab, if none is active) stays active.
    pub fn from_saved(mut tabs: Vec<FileTab>) -> Option<Self> {
        if tabs.is_empty() {
            return None;
        }
        let keep = tabs.iter().position(|tab| tab.active).unwrap_or(0);
        for (index, tab) in tabs.iter_mut().enumerate() {
            tab.active = index == keep;
        }
        Some(Self { tabs })
    }

    pub fn tabs(&self) -> &[FileTab] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn active(&self) -> &FileTab {
        &self.tabs[self.active_index()]
    }

    pub fn get(&self, id: &FileId) -> Option<&FileTab> {
        self.tabs.iter().find(|tab| &tab.id == id)
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.get(id).is_some()
    }

    /// Append a tab and make it the only active one.
    pub fn add(&mut self, name: &str, language: &str) -> FileId {
        let tab = FileTab::new(name, language, template_for(name));
        let id = tab.id.clone();
        self.tabs.push(tab);
        self.activate(&id);
        id
    }

    /// Remove a tab. Refused for the last tab and for unknown ids. When
    /// the active tab goes, the first remaining tab takes over.
    pub fn close(&mut self, id: &FileId) -> bool {
        if self.tabs.len() <= 1 {
            return false;
        }
        let Some(index) = self.position(id) else {
            return false;
        };
        let removed = self.tabs.remove(index);
        if removed.active {
            self.tabs[0].active = true;
        }
        true
    }

    /// Blank names are refused. Surrounding whitespace is trimmed.
    pub fn rename(&mut self, id: &FileId, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        match self.get_mut(id) {
            Some(tab) => {
                tab.name = name.to_string();
                true
            }
            None => false,
        }
    }

    pub fn update_content(&mut self, id: &FileId, content: &str) -> bool {
        match self.get_mut(id) {
            Some(tab) => {
                tab.content = content.to_string();
                true
            }
            None => false,
        }
    }

    pub fn set_active(&mut self, id: &FileId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.activate(id);
        true
    }

    fn activate(&mut self, id: &FileId) {
        for tab in &mut self.tabs {
            tab.active = &tab.id == id;
        }
    }

    fn active_index(&self) -> usize {
        self.tabs.iter().position(|tab| tab.active).unwrap_or(0)
    }

    fn position(&self, id: &FileId) -> Option<usize> {
        self.tabs.iter().position(|tab| &tab.id == id)
    }

    fn get_mut(&mut self, id: &FileId) -> Option<&mut FileTab> {
        self.tabs.iter_mut().find(|tab| &tab.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_count(files: &FileSet) -> usize {
        files.tabs().iter().filter(|tab| tab.active).count()
    }

    fn names(files: &FileSet) -> Vec<&str> {
        files.tabs().iter().map(|tab| tab.name.as_str()).collect()
    }

    #[test]
    fn default_set_has_one_active_tab() {
        let files = FileSet::default();
        assert_eq!(files.len(), 1);
        assert_eq!(files.active().name, DEFAULT_FILE_NAME);
        assert_eq!(active_count(&files), 1);
    }

    #[test]
    fn added_tab_becomes_sole_active() {
        let mut files = FileSet::default();
        let id = files.add("b.orus", "orus");
        assert_eq!(files.active().id, id);
        assert_eq!(files.active().content, "// b.orus\n");
        assert_eq!(active_count(&files), 1);
    }

    #[test]
    fn closing_last_tab_is_refused() {
        let mut files = FileSet::default();
        let before = files.clone();
        let id = files.active().id.clone();
        assert!(!files.close(&id));
        assert_eq!(files, before);
    }

    #[test]
    fn closing_inactive_tab_keeps_active() {
        let mut files = FileSet::default();
        let original = files.active().id.clone();
        let b = files.add("b.orus", "orus");
        let c = files.add("c.orus", "orus");
        files.set_active(&original);
        assert!(files.close(&b));
        assert_eq!(names(&files), vec![DEFAULT_FILE_NAME, "c.orus"]);
        assert_eq!(files.active().id, original);
        assert!(files.contains(&c));
    }

    #[test]
    fn closing_active_tab_moves_activation_to_first() {
        let mut files = FileSet::default();
        let original = files.active().id.clone();
        files.add("b.orus", "orus");
        let c = files.add("c.orus", "orus");
        assert!(files.close(&c));
        assert_eq!(files.active().id, original);
        assert_eq!(active_count(&files), 1);
    }

    #[test]
    fn add_close_sequences_preserve_invariant() {
        let mut files = FileSet::default();
        let mut ids = vec![files.active().id.clone()];
        for round in 0..20 {
            if round % 3 == 2 {
                let victim = ids.remove(round % ids.len());
                if !files.close(&victim) {
                    ids.push(victim);
                }
            } else {
                ids.push(files.add(&format!("f{round}.orus"), "orus"));
            }
            assert!(!files.is_empty());
            assert_eq!(active_count(&files), 1);
        }
        for id in ids {
            files.close(&id);
            assert!(!files.is_empty());
            assert_eq!(active_count(&files), 1);
        }
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn rename_rejects_blank_and_keeps_order() {
        let mut files = FileSet::default();
        let first = files.active().id.clone();
        files.add("b.orus", "orus");
        assert!(!files.rename(&first, "   "));
        assert!(files.rename(&first, " renamed.orus "));
        assert_eq!(names(&files), vec!["renamed.orus", "b.orus"]);
        assert_eq!(files.get(&first).map(|tab| tab.id.clone()), Some(first));
    }

    #[test]
    fn unknown_ids_are_refused() {
        let mut files = FileSet::default();
        let ghost = FileId::from("ghost");
        assert!(!files.set_active(&ghost));
        assert!(!files.update_content(&ghost, "x"));
        assert!(!files.rename(&ghost, "x"));
        files.add("b.orus", "orus");
        assert!(!files.close(&ghost));
    }

    #[test]
    fn saved_tabs_are_normalized() {
        let mut a = FileTab::new("a", "orus", "");
        let mut b = FileTab::new("b", "orus", "");
        a.active = false;
        b.active = false;
        let files = FileSet::from_saved(vec![a.clone(), b.clone()]).expect("non-empty");
        assert_eq!(files.active().name, "a");

        a.active = true;
        b.active = true;
        let files = FileSet::from_saved(vec![b, a]).expect("non-empty");
        assert_eq!(files.active().name, "b");
        assert_eq!(active_count(&files), 1);

        assert!(FileSet::from_saved(Vec::new()).is_none());
    }
}

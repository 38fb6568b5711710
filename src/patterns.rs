//! Named, immutable snapshots of timeline items.

use crate::config::AgentConfig;
use crate::error::{PatternError, Result};
use crate::logging::pattern_span;
use crate::model::TimelineItem;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(String);

impl PatternId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub id: PatternId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<TimelineItem>,
}

impl Pattern {
    pub fn step_count(&self) -> usize {
        self.items.iter().map(TimelineItem::step_count).sum()
    }

    /// Copies of the pattern's items under fresh ids, ready to load into a timeline.
    pub fn instantiate(&self) -> Vec<TimelineItem> {
        self.items.iter().map(TimelineItem::with_fresh_ids).collect()
    }
}

#[derive(Debug, Default)]
pub struct PatternStore {
    patterns: IndexMap<PatternId, Pattern>,
    selected: Option<PatternId>,
    path: Option<PathBuf>,
}

impl PatternStore {
    /// In-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON file; an absent file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut patterns: Vec<Pattern> = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            Vec::new()
        };
        for pattern in &mut patterns {
            let before = pattern.items.len();
            pattern.items.retain(|item| !item.is_empty_group());
            if pattern.items.len() < before {
                warn!(
                    pattern_id = %pattern.id,
                    dropped = before - pattern.items.len(),
                    "dropped empty groups from stored pattern"
                );
            }
        }
        debug!(path = %path.display(), count = patterns.len(), "opened pattern store");
        Ok(Self {
            patterns: patterns.into_iter().map(|p| (p.id.clone(), p)).collect(),
            selected: None,
            path: Some(path),
        })
    }

    /// File-backed when the configuration names a store path, in-memory otherwise.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        match &config.pattern_store_path {
            Some(path) => Self::open(path.clone()),
            None => Ok(Self::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn list(&self) -> Vec<&Pattern> {
        self.patterns.values().collect()
    }

    pub fn get(&self, id: &PatternId) -> Option<&Pattern> {
        self.patterns.get(id)
    }

    /// Snapshot `items` under `name`. Later edits to the source never reach the pattern.
    pub fn export(&mut self, name: &str, items: &[TimelineItem]) -> Result<Pattern> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PatternError::validation(
                "pattern name",
                "must not be blank",
            ));
        }

        let id = PatternId::generate();
        let _span = pattern_span(id.as_str()).entered();
        let pattern = Pattern {
            id,
            name: name.to_string(),
            created_at: Utc::now(),
            items: items
                .iter()
                .filter(|item| !item.is_empty_group())
                .cloned()
                .collect(),
        };
        self.patterns.insert(pattern.id.clone(), pattern.clone());
        if let Err(error) = self.persist() {
            self.patterns.shift_remove(&pattern.id);
            return Err(error);
        }
        info!(
            pattern_id = %pattern.id,
            name = %pattern.name,
            steps = pattern.step_count(),
            "exported pattern"
        );
        Ok(pattern)
    }

    pub fn select(&mut self, id: &PatternId) -> Option<&Pattern> {
        if !self.patterns.contains_key(id) {
            return None;
        }
        self.selected = Some(id.clone());
        self.patterns.get(id)
    }

    pub fn selected(&self) -> Option<&Pattern> {
        self.selected.as_ref().and_then(|id| self.patterns.get(id))
    }

    pub fn delete(&mut self, id: &PatternId) -> Result<Option<Pattern>> {
        let _span = pattern_span(id.as_str()).entered();
        let Some((index, _, removed)) = self.patterns.shift_remove_full(id) else {
            return Ok(None);
        };
        let previous_selection = self.selected.take_if(|selected| *selected == *id);
        if let Err(error) = self.persist() {
            self.patterns.shift_insert(index, id.clone(), removed);
            if previous_selection.is_some() {
                self.selected = previous_selection;
            }
            return Err(error);
        }
        info!(pattern_id = %id, "deleted pattern");
        Ok(Some(removed))
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let patterns: Vec<&Pattern> = self.patterns.values().collect();
        let json = serde_json::to_vec_pretty(&patterns)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Step;

    #[test]
    fn blank_names_are_rejected() {
        let mut store = PatternStore::new();
        let err = store.export("   ", &[]).unwrap_err();
        assert!(matches!(err, PatternError::Validation { .. }));
        assert!(store.list().is_empty());
    }

    #[test]
    fn deleting_the_selected_pattern_clears_selection() {
        let mut store = PatternStore::new();
        let pattern = store
            .export("cleanup", &[Step::delete_column(0).into()])
            .unwrap();
        assert!(store.select(&pattern.id).is_some());
        assert_eq!(store.selected().map(|p| &p.name), Some(&"cleanup".to_string()));

        store.delete(&pattern.id).unwrap();
        assert!(store.selected().is_none());
        assert!(store.delete(&pattern.id).unwrap().is_none());
    }

    #[test]
    fn failed_delete_keeps_the_pattern_and_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patterns.json");
        let mut store = PatternStore::open(&path).unwrap();
        let first = store.export("first", &[Step::delete_column(0).into()]).unwrap();
        let second = store.export("second", &[Step::delete_column(1).into()]).unwrap();
        store.select(&first.id);

        // A directory in place of the store file makes the rewrite fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        let err = store.delete(&first.id).unwrap_err();
        assert!(matches!(err, PatternError::Io(_)));
        let names: Vec<_> = store.list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(store.selected().map(|p| &p.id), Some(&first.id));
        assert!(store.get(&second.id).is_some());
    }

    #[test]
    fn instantiate_uses_fresh_ids() {
        let mut store = PatternStore::new();
        let pattern = store
            .export("p", &[Step::delete_column(3).into()])
            .unwrap();
        let copies = pattern.instantiate();
        assert_ne!(copies[0].id(), pattern.items[0].id());
    }
}

//! Persisted intro/outro skip rules.
//!
//! Rules live in a JSON array on disk, in creation order:
//!
//! ```json
//! [{ "folder": "Season 1", "start": "00:01:30", "end": "00:21:10-00:22:40", "enabled": true }]
//! ```
//!
//! `start` is the head spec, `end` the tail spec; an empty string means the
//! side is not set. An empty `folder` matches every file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::timespec::TimeSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipRule {
    /// Folder name the rule applies to; empty matches everything.
    pub folder_scope: String,
    pub head: Option<TimeSpec>,
    pub tail: Option<TimeSpec>,
    pub enabled: bool,
}

impl SkipRule {
    pub fn new(folder_scope: impl Into<String>, head: Option<TimeSpec>, tail: Option<TimeSpec>) -> Self {
        Self {
            folder_scope: folder_scope.into(),
            head,
            tail,
            enabled: true,
        }
    }

    /// Builds a rule from user input. Empty strings leave a side unset;
    /// non-empty strings must parse.
    pub fn from_input(folder: &str, head: &str, tail: &str) -> Result<Self, RuleError> {
        Ok(Self::new(
            folder.trim(),
            parse_side(head, Side::Head)?,
            parse_side(tail, Side::Tail)?,
        ))
    }

    pub fn applies_to(&self, folder: &str) -> bool {
        self.folder_scope.is_empty() || self.folder_scope == folder
    }

    fn to_record(&self) -> RuleRecord {
        RuleRecord {
            folder: self.folder_scope.clone(),
            start: self.head.map(|t| t.to_string()).unwrap_or_default(),
            end: self.tail.map(|t| t.to_string()).unwrap_or_default(),
            enabled: self.enabled,
        }
    }

    fn from_record(record: RuleRecord) -> Result<Self, RuleError> {
        let mut rule = Self::from_input(&record.folder, &record.start, &record.end)?;
        rule.enabled = record.enabled;
        Ok(rule)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Head,
    Tail,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Head => f.write_str("head"),
            Side::Tail => f.write_str("tail"),
        }
    }
}

fn parse_side(raw: &str, side: Side) -> Result<Option<TimeSpec>, RuleError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    TimeSpec::parse(raw)
        .map(Some)
        .ok_or_else(|| RuleError::InvalidTime {
            side,
            value: raw.to_string(),
        })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid {side} time {value:?} (expected e.g. 02:30 or 01:45-02:50)")]
    InvalidTime { side: Side, value: String },
    #[error("no rule at index {0}")]
    NoSuchRule(usize),
}

/// Rejection of an import. Nothing is committed when this is returned.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("import must be a JSON array of rules")]
    NotAnArray,
    #[error("record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rule store I/O on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("rule store encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// How imported rules combine with the stored ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    Replace,
    Append,
}

/// On-disk / import-export shape of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleRecord {
    folder: String,
    start: String,
    end: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Name of the folder that directly contains `path`. Both `/` and `\` count
/// as separators; a bare file name has no folder.
///
/// ```
/// use mpc_proto::rules::folder_of;
/// assert_eq!(folder_of(r"D:\Anime\Show\01.mkv"), "Show");
/// assert_eq!(folder_of("/media/tv/Show/01.mkv"), "Show");
/// assert_eq!(folder_of("01.mkv"), "");
/// ```
pub fn folder_of(path: &str) -> String {
    let is_sep = |c: char| c == '/' || c == '\\';
    let Some(last) = path.rfind(is_sep) else {
        return String::new();
    };
    let dir = &path[..last];
    match dir.rfind(is_sep) {
        Some(idx) => dir[idx + 1..].to_string(),
        None => dir.to_string(),
    }
}

/// Ordered rule list backed by a JSON file.
pub struct RuleStore {
    path: PathBuf,
    rules: Vec<SkipRule>,
    /// Modification time of the file as of the last load or save.
    loaded_mtime: Option<SystemTime>,
}

impl RuleStore {
    /// Opens the store at `path`. A missing or unreadable file yields an
    /// empty list; individual malformed records are dropped with a warning.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let loaded_mtime = modified(&path);
        let rules = Self::load_from(&path);
        Self {
            path,
            rules,
            loaded_mtime,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rules(&self) -> &[SkipRule] {
        &self.rules
    }

    /// Re-reads the file, discarding in-memory state.
    pub fn load(&mut self) -> &[SkipRule] {
        self.loaded_mtime = modified(&self.path);
        self.rules = Self::load_from(&self.path);
        &self.rules
    }

    /// Reloads when the file changed on disk since the last load or save,
    /// e.g. after an edit from another process. Returns true on reload.
    pub fn reload_if_changed(&mut self) -> bool {
        if modified(&self.path) == self.loaded_mtime {
            return false;
        }
        self.load();
        info!("reloaded {} skip rules from {:?}", self.rules.len(), self.path);
        true
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = self.export()?;
        std::fs::write(&self.path, json).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.loaded_mtime = modified(&self.path);
        debug!("saved {} skip rules to {:?}", self.rules.len(), self.path);
        Ok(())
    }

    /// First enabled rule whose scope is empty or equals the folder of `file_path`.
    pub fn find_match(&self, file_path: &str) -> Option<&SkipRule> {
        if file_path.is_empty() {
            return None;
        }
        let folder = folder_of(file_path);
        self.rules
            .iter()
            .find(|r| r.enabled && r.applies_to(&folder))
    }

    pub fn add(&mut self, rule: SkipRule) -> Result<(), StoreError> {
        self.rules.push(rule);
        self.save()
    }

    pub fn update(&mut self, index: usize, rule: SkipRule) -> Result<(), StoreError> {
        let slot = self
            .rules
            .get_mut(index)
            .ok_or(RuleError::NoSuchRule(index))?;
        *slot = rule;
        self.save()
    }

    pub fn remove(&mut self, index: usize) -> Result<SkipRule, StoreError> {
        if index >= self.rules.len() {
            return Err(RuleError::NoSuchRule(index).into());
        }
        let removed = self.rules.remove(index);
        self.save()?;
        Ok(removed)
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<(), StoreError> {
        self.rules
            .get_mut(index)
            .ok_or(RuleError::NoSuchRule(index))?
            .enabled = enabled;
        self.save()
    }

    /// Validates every record of `json` before touching the store. The first
    /// invalid record aborts the whole import and is named (1-based) in the error.
    pub fn import(&mut self, json: &str, mode: MergeMode) -> Result<usize, StoreError> {
        let incoming = parse_import(json)?;
        let count = incoming.len();

        let mut next = match mode {
            MergeMode::Replace => Vec::with_capacity(count),
            MergeMode::Append => self.rules.clone(),
        };
        next.extend(incoming);

        let previous = std::mem::replace(&mut self.rules, next);
        if let Err(e) = self.save() {
            self.rules = previous;
            return Err(e);
        }
        info!("imported {} skip rules ({:?})", count, mode);
        Ok(count)
    }

    /// Pretty JSON with every time spec in canonical `HH:MM:SS` form.
    pub fn export(&self) -> Result<String, StoreError> {
        let records: Vec<RuleRecord> = self.rules.iter().map(SkipRule::to_record).collect();
        Ok(serde_json::to_string_pretty(&records)?)
    }

    fn load_from(path: &Path) -> Vec<SkipRule> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let values: Vec<serde_json::Value> = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                warn!("ignoring unreadable rule file {:?}: {}", path, e);
                return Vec::new();
            }
        };
        values
            .into_iter()
            .enumerate()
            .filter_map(|(i, value)| match parse_record(value) {
                Ok(rule) => Some(rule),
                Err(reason) => {
                    warn!("dropping stored rule {}: {}", i + 1, reason);
                    None
                }
            })
            .collect()
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn parse_import(json: &str) -> Result<Vec<SkipRule>, ImportError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let serde_json::Value::Array(items) = value else {
        return Err(ImportError::NotAnArray);
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            parse_record(item).map_err(|reason| ImportError::InvalidRecord {
                index: i + 1,
                reason,
            })
        })
        .collect()
}

fn parse_record(value: serde_json::Value) -> Result<SkipRule, String> {
    let record: RuleRecord = serde_json::from_value(value).map_err(|e| e.to_string())?;
    SkipRule::from_record(record).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> RuleStore {
        RuleStore::open(dir.path().join("rules.json"))
    }

    #[test]
    fn test_folder_of_mixed_separators() {
        assert_eq!(folder_of(r"D:\Anime/Show\01.mkv"), "Show");
        assert_eq!(folder_of(r"C:\01.mkv"), "C:");
        assert_eq!(folder_of("/01.mkv"), "");
        assert_eq!(folder_of(""), "");
    }

    #[test]
    fn test_find_match_first_enabled_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        let mut disabled = SkipRule::from_input("Show", "90", "").unwrap();
        disabled.enabled = false;
        store.add(disabled).unwrap();
        store.add(SkipRule::from_input("Other", "10", "").unwrap()).unwrap();
        store.add(SkipRule::from_input("", "20", "").unwrap()).unwrap();
        store.add(SkipRule::from_input("Show", "30", "").unwrap()).unwrap();

        let hit = store.find_match("/tv/Show/01.mkv").unwrap();
        assert_eq!(hit.folder_scope, "");
        assert_eq!(hit.head, TimeSpec::parse("20"));
        assert!(store.find_match("").is_none());
    }

    #[test]
    fn test_no_match_without_wildcard() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.add(SkipRule::from_input("Show", "90", "").unwrap()).unwrap();
        assert!(store.find_match("/tv/Other/01.mkv").is_none());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = store_in(&dir);
            store
                .add(SkipRule::from_input("Show", "1:30", "21:10-22:40").unwrap())
                .unwrap();
            store.set_enabled(0, false).unwrap();
        }
        let store = store_in(&dir);
        assert_eq!(store.rules().len(), 1);
        let rule = &store.rules()[0];
        assert!(!rule.enabled);
        assert_eq!(rule.head, Some(TimeSpec::Point { ms: 90_000 }));
        assert_eq!(
            rule.tail,
            Some(TimeSpec::Range {
                start_ms: 1_270_000,
                end_ms: 1_360_000
            })
        );
    }

    #[test]
    fn test_missing_enabled_defaults_true() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, r#"[{"folder":"","start":"10","end":""}]"#).unwrap();
        let store = RuleStore::open(&path);
        assert!(store.rules()[0].enabled);
    }

    #[test]
    fn test_export_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        store.add(SkipRule::from_input("S", "2:6", "1:45~2:50").unwrap()).unwrap();
        let exported: serde_json::Value = serde_json::from_str(&store.export().unwrap()).unwrap();
        assert_eq!(exported[0]["start"], "00:02:06");
        assert_eq!(exported[0]["end"], "00:01:45-00:02:50");
        assert_eq!(exported[0]["enabled"], true);
    }

    #[test]
    fn test_edit_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = store_in(&dir);
        assert!(matches!(
            store.remove(3),
            Err(StoreError::Rule(RuleError::NoSuchRule(3)))
        ));
        assert!(store.set_enabled(0, true).is_err());
    }

    #[test]
    fn test_reload_if_changed_picks_up_other_writer() {
        let dir = tempfile::tempdir().unwrap();
        let mut reader = store_in(&dir);
        assert!(!reader.reload_if_changed());

        let mut writer = store_in(&dir);
        writer.add(SkipRule::from_input("Show", "90", "").unwrap()).unwrap();

        assert!(reader.reload_if_changed());
        assert_eq!(reader.rules().len(), 1);
        assert!(!reader.reload_if_changed());
    }

    #[test]
    fn test_from_input_rejects_bad_tail() {
        assert_eq!(
            SkipRule::from_input("", "10", "05:00-02:00"),
            Err(RuleError::InvalidTime {
                side: Side::Tail,
                value: "05:00-02:00".to_string()
            })
        );
    }
}

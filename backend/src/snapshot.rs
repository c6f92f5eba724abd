//! Timestamped CSV snapshots of the task board.
//!
//! Every scrape produces a new file; nothing here rewrites an existing one.
//! "Latest" always means most recently modified, never lexically last.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::AutomationResult;
use crate::models::{BoardColumn, BoardColumns, Message, TaskSnapshot};

const FILE_PREFIX: &str = "scraped_";
const FILE_EXT: &str = ".csv";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    #[serde(rename = "Column")]
    column: String,
    #[serde(rename = "CaseNumber")]
    case_number: String,
    #[serde(rename = "Title")]
    title: String,
    #[serde(rename = "FBG")]
    fbg: String,
    #[serde(rename = "CardText")]
    card_text: String,
    uuid: String,
    messages: String,
}

impl SnapshotRecord {
    fn from_task(task: &TaskSnapshot) -> AutomationResult<Self> {
        Ok(Self {
            column: task.column.label().to_string(),
            case_number: task.case_number.clone(),
            title: task.title.clone(),
            fbg: task.fbg.clone(),
            card_text: task.card_text.clone(),
            uuid: task.uuid.clone().unwrap_or_default(),
            messages: serde_json::to_string(&task.messages)?,
        })
    }

    fn into_task(self) -> Option<TaskSnapshot> {
        let column = BoardColumn::parse(&self.column)?;
        let messages = parse_messages(&self.messages, &self.uuid);
        Some(TaskSnapshot {
            column,
            case_number: self.case_number,
            title: self.title,
            fbg: self.fbg,
            card_text: self.card_text,
            uuid: if self.uuid.is_empty() { None } else { Some(self.uuid) },
            messages,
        })
    }
}

fn parse_messages(raw: &str, uuid: &str) -> Vec<Message> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str(raw) {
        Ok(messages) => messages,
        Err(e) => {
            warn!(uuid, error = %e, "Unparseable messages field, treating as empty");
            Vec::new()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `rows` to a fresh `scraped_<timestamp>.csv`.
    pub fn write(&self, rows: &[TaskSnapshot]) -> AutomationResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.fresh_path();
        let mut writer = csv::Writer::from_path(&path)?;
        for row in rows {
            writer.serialize(SnapshotRecord::from_task(row)?)?;
        }
        if rows.is_empty() {
            writer.write_record(["Column", "CaseNumber", "Title", "FBG", "CardText", "uuid", "messages"])?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = rows.len(), "Snapshot written");
        Ok(path)
    }

    /// Best-effort variant used after a scrape: the rows are already in
    /// memory, so a write failure is only logged.
    pub fn write_logged(&self, rows: &[TaskSnapshot]) -> Option<PathBuf> {
        match self.write(rows) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, dir = %self.dir.display(), "Failed to write snapshot");
                None
            }
        }
    }

    fn fresh_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let mut path = self.dir.join(format!("{}{}{}", FILE_PREFIX, stamp, FILE_EXT));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}{}_{}{}", FILE_PREFIX, stamp, n, FILE_EXT));
            n += 1;
        }
        path
    }

    pub fn list(&self) -> Vec<(PathBuf, SystemTime)> {
        WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy();
                name.starts_with(FILE_PREFIX) && name.ends_with(FILE_EXT)
            })
            .filter_map(|e| {
                let modified = e.metadata().ok()?.modified().ok()?;
                Some((e.into_path(), modified))
            })
            .collect()
    }

    /// Most recently modified snapshot. Ties break on file name so repeated
    /// lookups agree.
    pub fn latest(&self) -> Option<PathBuf> {
        self.list()
            .into_iter()
            .max_by(|(pa, ta), (pb, tb)| ta.cmp(tb).then_with(|| pa.cmp(pb)))
            .map(|(path, _)| path)
    }

    pub fn read(&self, path: &Path) -> AutomationResult<Vec<TaskSnapshot>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize::<SnapshotRecord>() {
            let record = record?;
            let column = record.column.clone();
            match record.into_task() {
                Some(task) => rows.push(task),
                None => warn!(column = %column, path = %path.display(), "Skipping row with unknown column"),
            }
        }
        Ok(rows)
    }

    /// Messages of the latest snapshot keyed by task uuid. Rows without a
    /// uuid are not addressable and are left out.
    pub fn latest_messages(&self) -> HashMap<String, Vec<Message>> {
        let Some(path) = self.latest() else {
            return HashMap::new();
        };
        match self.read(&path) {
            Ok(rows) => rows
                .into_iter()
                .filter_map(|row| row.uuid.map(|uuid| (uuid, row.messages)))
                .collect(),
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Failed to read latest snapshot");
                HashMap::new()
            }
        }
    }

    pub fn purge_all(&self) -> usize {
        let mut deleted = 0;
        for (path, _) in self.list() {
            match std::fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(error = %e, path = %path.display(), "Failed to delete snapshot"),
            }
        }
        info!(deleted, "Purged snapshots");
        deleted
    }

    /// Deletes the oldest snapshots so at most `keep` remain.
    pub fn enforce_retention(&self, keep: usize) -> usize {
        let mut files = self.list();
        if files.len() <= keep {
            return 0;
        }
        files.sort_by(|(pa, ta), (pb, tb)| ta.cmp(tb).then_with(|| pa.cmp(pb)));
        let excess = files.len() - keep;
        let mut deleted = 0;
        for (path, _) in files.into_iter().take(excess) {
            if std::fs::remove_file(&path).is_ok() {
                deleted += 1;
            }
        }
        debug!(deleted, keep, "Snapshot retention applied");
        deleted
    }
}

/// Replaces each task's messages with the snapshot's messages for its uuid.
/// Tasks without a match get an empty list.
pub fn merge_messages(columns: &mut BoardColumns, by_uuid: &HashMap<String, Vec<Message>>) {
    for task in columns.tasks_mut() {
        task.task.messages = task
            .task
            .uuid
            .as_ref()
            .and_then(|uuid| by_uuid.get(uuid))
            .cloned()
            .unwrap_or_default();
        task.has_new_message = !task.task.messages.is_empty();
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password: String,
}

/// The three board columns the bridge tracks, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoardColumn {
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "Pending")]
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
}

impl BoardColumn {
    pub const ALL: [BoardColumn; 3] = [BoardColumn::New, BoardColumn::Pending, BoardColumn::InProgress];

    /// Normalized label used in snapshots and API responses.
    pub fn label(&self) -> &'static str {
        match self {
            BoardColumn::New => "NEW",
            BoardColumn::Pending => "Pending",
            BoardColumn::InProgress => "In Progress",
        }
    }

    /// Header text the portal renders above the column.
    pub fn portal_title(&self) -> &'static str {
        match self {
            BoardColumn::New => "New",
            BoardColumn::Pending => "Pending",
            BoardColumn::InProgress => "In Progress",
        }
    }

    /// DOM id of the column container.
    pub fn element_id(&self) -> String {
        format!("board-col-{}", self.label())
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase();
        BoardColumn::ALL
            .into_iter()
            .find(|c| c.label().to_lowercase() == normalized)
    }
}

impl fmt::Display for BoardColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub sender: String,
    pub message: String,
    pub date: String,
}

/// One board card at scrape time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TaskSnapshot {
    #[serde(rename = "Column")]
    pub column: BoardColumn,
    #[serde(rename = "CaseNumber")]
    pub case_number: String,
    #[serde(rename = "Title")]
    pub title: String,
    #[serde(rename = "FBG")]
    pub fbg: String,
    #[serde(rename = "CardText")]
    pub card_text: String,
    pub uuid: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// A cached task as served to API clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BoardTask {
    #[serde(flatten)]
    pub task: TaskSnapshot,
    #[serde(default)]
    pub has_new_message: bool,
}

impl From<TaskSnapshot> for BoardTask {
    fn from(task: TaskSnapshot) -> Self {
        let has_new_message = !task.messages.is_empty();
        Self { task, has_new_message }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct BoardColumns {
    #[serde(rename = "NEW", default)]
    pub new: Vec<BoardTask>,
    #[serde(rename = "Pending", default)]
    pub pending: Vec<BoardTask>,
    #[serde(rename = "In Progress", default)]
    pub in_progress: Vec<BoardTask>,
}

impl BoardColumns {
    pub fn from_rows(rows: Vec<TaskSnapshot>) -> Self {
        let mut columns = BoardColumns::default();
        for row in rows {
            columns.column_mut(row.column).push(row.into());
        }
        columns
    }

    pub fn column_mut(&mut self, column: BoardColumn) -> &mut Vec<BoardTask> {
        match column {
            BoardColumn::New => &mut self.new,
            BoardColumn::Pending => &mut self.pending,
            BoardColumn::InProgress => &mut self.in_progress,
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &BoardTask> {
        self.new.iter().chain(self.pending.iter()).chain(self.in_progress.iter())
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut BoardTask> {
        self.new
            .iter_mut()
            .chain(self.pending.iter_mut())
            .chain(self.in_progress.iter_mut())
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.pending.len() + self.in_progress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TaskMessages {
    pub messages: Vec<Message>,
    pub uuid: Option<String>,
    pub last_message: Option<String>,
    pub last_message_date: Option<String>,
}

impl TaskMessages {
    pub fn from_task(task: &TaskSnapshot) -> Self {
        let last = task.messages.last();
        Self {
            messages: task.messages.clone(),
            uuid: task.uuid.clone(),
            last_message: last.map(|m| m.message.clone()),
            last_message_date: last.map(|m| m.date.clone()),
        }
    }
}

/// Bearer token plus the instant it was extracted or read from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub token: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerStatus {
    pub phase: String,
    pub account: Option<String>,
    pub pending_actions: usize,
    pub sweeps_completed: u64,
    pub token_observed_at: Option<DateTime<Utc>>,
}

pub type UserBoards = HashMap<String, BoardColumns>;

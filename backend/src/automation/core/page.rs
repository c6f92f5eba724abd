use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AutomationError, AutomationResult};
use crate::models::BoardColumn;

/// How a click is delivered when the plain pointer click is intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickMode {
    /// Scroll into view and dispatch a pointer click at the element center.
    Normal,
    /// Dispatch the mouse event sequence straight onto the element, ignoring
    /// whatever overlays it.
    Forced,
    /// `HTMLElement.click()` from page script.
    Script,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementState {
    pub present: bool,
    pub checked: bool,
    pub enabled: bool,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
}

/// Board-level DOM reads and clicks that need page script. Rendered to
/// JavaScript by the browser backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardQuery {
    /// Titles of every `.board-col`, in DOM order.
    ColumnTitles,
    /// Card metadata of the column titled like `column`, `null` when absent.
    Cards { column: BoardColumn },
    /// Clicks the notes button of one card. Returns whether a button was found.
    OpenNotes { column: BoardColumn, index: usize },
    /// Messages of the open notes popup.
    NoteMessages,
    /// "View task in new tab" hrefs per card of the column with id
    /// `board-col-<label>`, `null` when absent.
    CardLinks { column: BoardColumn },
    /// Clicks "Open task progress" on one card.
    OpenTaskProgress { column: BoardColumn, index: usize },
    /// Inner text of each worker search result row.
    WorkerRows,
    /// Every session storage entry as `{key, value}`.
    SessionStorage,
}

/// One open browser tab on the portal. Every operation addresses elements by
/// CSS selector; nothing hands out element handles.
#[async_trait]
pub trait PortalPage: Send + Sync {
    async fn goto(&self, url: &str) -> AutomationResult<()>;

    async fn content(&self) -> AutomationResult<String>;

    async fn fill(&self, selector: &str, value: &str) -> AutomationResult<()>;

    async fn click(&self, selector: &str, mode: ClickMode) -> AutomationResult<()>;

    /// Fails with [`AutomationError::Transient`] when `timeout` elapses.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> AutomationResult<()>;

    async fn wait_for_detached(&self, selector: &str, timeout: Duration) -> AutomationResult<()>;

    /// `Ok(false)` when the URL never contained `fragment` within `timeout`.
    async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> AutomationResult<bool>;

    async fn element_state(&self, selector: &str) -> AutomationResult<ElementState>;

    async fn query(&self, query: BoardQuery) -> AutomationResult<serde_json::Value>;

    async fn cookies(&self) -> AutomationResult<Vec<BrowserCookie>>;

    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> AutomationResult<()>;

    async fn screenshot(&self, path: &Path) -> AutomationResult<()>;

    /// Fixed wait for the page to finish rendering.
    async fn settle(&self, duration: Duration);

    async fn close(&self);
}

pub async fn query_as<T: DeserializeOwned>(page: &dyn PortalPage, query: BoardQuery) -> AutomationResult<T> {
    let value = page.query(query).await?;
    Ok(serde_json::from_value(value)?)
}

pub(crate) fn not_found(selector: &str) -> AutomationError {
    AutomationError::Transient(format!("element not found: {}", selector))
}

//! Scripted in-memory portal for exercising the driver, scraper and executor
//! without a browser.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::automation::core::page::{not_found, BoardQuery, BrowserCookie, ClickMode, ElementState, PortalPage};
use crate::automation::core::retry::Sleeper;
use crate::automation::core::session::SessionFactory;
use crate::automation::scripts;
use crate::config::Settings;
use crate::error::{AutomationError, AutomationResult};
use crate::models::{Account, BoardColumn, Message};

pub const LOGIN_URL: &str = "https://sso.test/login";
pub const BOARD_URL: &str = "https://portal.test/board/42";

pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::with_data_dir(dir);
    settings.portal.login_url = LOGIN_URL.into();
    settings.portal.board_url = BOARD_URL.into();
    settings
}

pub fn account(name: &str) -> Account {
    Account { username: name.into(), password: format!("{}-pw", name) }
}

#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn secs(&self) -> Vec<u64> {
        self.slept.lock().unwrap().iter().map(|d| d.as_secs()).collect()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

#[derive(Debug, Clone)]
pub struct FakeCard {
    pub case_number: String,
    pub title: String,
    pub fbg: String,
    pub href: Option<String>,
    /// `None` renders the card without a notes button.
    pub messages: Option<Vec<Message>>,
}

impl FakeCard {
    pub fn new(case_number: &str, uuid: &str) -> Self {
        Self {
            case_number: case_number.into(),
            title: format!("Task {}", case_number),
            fbg: format!("FBG-{}", case_number),
            href: Some(format!("/board/task/{}", uuid)),
            messages: Some(Vec::new()),
        }
    }

    pub fn with_messages(mut self, messages: &[(&str, &str)]) -> Self {
        self.messages = Some(
            messages
                .iter()
                .map(|(sender, body)| Message {
                    sender: sender.to_string(),
                    message: body.to_string(),
                    date: "12:00".into(),
                })
                .collect(),
        );
        self
    }

    pub fn without_notes(mut self) -> Self {
        self.messages = None;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardAttempt {
    Ready,
    Timeout,
    Forbidden,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Goto(String),
    Fill(String, String),
    Click(String, ClickMode),
    Query(BoardQuery),
    Screenshot(PathBuf),
    Settle(Duration),
    SetFiles(String, Vec<PathBuf>),
    Close,
}

#[derive(Default)]
struct FakeState {
    attempts: VecDeque<BoardAttempt>,
    board: Option<BoardAttempt>,
    otp: bool,
    notes_open: Option<(BoardColumn, usize)>,
    ignored_closes: usize,
    progress_open: Option<(BoardColumn, usize)>,
    editor_open: bool,
    search: String,
    visible_rows: Vec<String>,
    checked: HashSet<usize>,
    checkbox_sticks: bool,
    failing_normal_clicks: HashSet<String>,
    save_ready_after: usize,
    save_polls: usize,
    failing_queries: Vec<BoardQuery>,
    assigned: Option<(BoardColumn, usize, String)>,
    upload_open: bool,
    session_storage: Vec<(String, String)>,
    cookies: Vec<BrowserCookie>,
    events: Vec<Event>,
}

/// Cloning shares the underlying state, so a test can keep a handle while
/// the code under test owns another.
#[derive(Clone)]
pub struct FakePortal {
    columns: Arc<Vec<(BoardColumn, Vec<FakeCard>)>>,
    workers: Arc<Vec<String>>,
    state: Arc<Mutex<FakeState>>,
}

impl FakePortal {
    pub fn new(columns: Vec<(BoardColumn, Vec<FakeCard>)>) -> Self {
        let state = FakeState { checkbox_sticks: true, ..Default::default() };
        Self {
            columns: Arc::new(columns),
            workers: Arc::new(Vec::new()),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_workers(mut self, workers: &[&str]) -> Self {
        self.workers = Arc::new(workers.iter().map(|w| w.to_string()).collect());
        self
    }

    /// Outcomes of successive board navigations. Once exhausted the board
    /// always loads.
    pub fn with_attempts(self, attempts: &[BoardAttempt]) -> Self {
        self.state.lock().unwrap().attempts = attempts.iter().copied().collect();
        self
    }

    pub fn with_otp(self) -> Self {
        self.state.lock().unwrap().otp = true;
        self
    }

    pub fn with_session_storage(self, entries: &[(&str, &str)]) -> Self {
        self.state.lock().unwrap().session_storage =
            entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self
    }

    pub fn with_cookies(self, cookies: &[(&str, &str)]) -> Self {
        self.state.lock().unwrap().cookies = cookies
            .iter()
            .map(|(name, value)| BrowserCookie { name: name.to_string(), value: value.to_string() })
            .collect();
        self
    }

    /// The next `n` clicks on the notes close button do nothing.
    pub fn ignore_note_closes(self, n: usize) -> Self {
        self.state.lock().unwrap().ignored_closes = n;
        self
    }

    pub fn failing_normal_click(self, selector: &str) -> Self {
        self.state.lock().unwrap().failing_normal_clicks.insert(selector.to_string());
        self
    }

    pub fn unchecking_checkbox(self) -> Self {
        self.state.lock().unwrap().checkbox_sticks = false;
        self
    }

    /// The save button reports disabled for the first `polls` state reads.
    pub fn save_ready_after(self, polls: usize) -> Self {
        self.state.lock().unwrap().save_ready_after = polls;
        self
    }

    /// Evaluating `query` raises a script error.
    pub fn failing_query(self, query: BoardQuery) -> Self {
        self.state.lock().unwrap().failing_queries.push(query);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Screenshot(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn assigned(&self) -> Option<(BoardColumn, usize, String)> {
        self.state.lock().unwrap().assigned.clone()
    }

    fn column(&self, column: BoardColumn) -> Option<&Vec<FakeCard>> {
        self.columns.iter().find(|(c, _)| *c == column).map(|(_, cards)| cards)
    }

    fn card(&self, column: BoardColumn, index: usize) -> Option<&FakeCard> {
        self.column(column).and_then(|cards| cards.get(index))
    }

    fn checkbox_row(&self, selector: &str, rows: usize) -> Option<usize> {
        (0..rows).find(|i| scripts::worker_checkbox(*i) == selector)
    }

    fn timeout(selector: &str) -> AutomationError {
        AutomationError::Transient(format!("timed out waiting for {}", selector))
    }
}

#[async_trait]
impl PortalPage for FakePortal {
    async fn goto(&self, url: &str) -> AutomationResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Goto(url.to_string()));
        if url == BOARD_URL {
            let attempt = state.attempts.pop_front().unwrap_or(BoardAttempt::Ready);
            state.board = Some(attempt);
        }
        Ok(())
    }

    async fn content(&self) -> AutomationResult<String> {
        let state = self.state.lock().unwrap();
        Ok(match state.board {
            Some(BoardAttempt::Forbidden) => "<h1>403 Forbidden</h1>".into(),
            _ => "<html><body>loading</body></html>".into(),
        })
    }

    async fn fill(&self, selector: &str, value: &str) -> AutomationResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Fill(selector.to_string(), value.to_string()));
        if selector == scripts::WORKER_SEARCH {
            state.search = value.to_string();
        }
        Ok(())
    }

    async fn click(&self, selector: &str, mode: ClickMode) -> AutomationResult<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Click(selector.to_string(), mode));
        if mode == ClickMode::Normal && state.failing_normal_clicks.contains(selector) {
            return Err(AutomationError::Transient(format!("click on {} intercepted", selector)));
        }
        match selector {
            scripts::NOTES_CLOSE => {
                if state.ignored_closes > 0 {
                    state.ignored_closes -= 1;
                } else {
                    state.notes_open = None;
                }
            }
            scripts::EDIT_BUTTON => {
                if state.progress_open.is_none() {
                    return Err(not_found(selector));
                }
                state.editor_open = true;
            }
            scripts::SAVE_BUTTON => {
                let worker = state
                    .checked
                    .iter()
                    .next()
                    .and_then(|row| state.visible_rows.get(*row).cloned());
                if let (Some((column, index)), Some(worker)) = (state.progress_open, worker) {
                    state.assigned = Some((column, index, worker));
                }
            }
            scripts::PROGRESS_CLOSE => {
                state.progress_open = None;
                state.editor_open = false;
                state.checked.clear();
            }
            scripts::UPLOAD_BUTTON => state.upload_open = true,
            _ => {
                if let Some(row) = self.checkbox_row(selector, state.visible_rows.len()) {
                    if state.checkbox_sticks {
                        state.checked.insert(row);
                    }
                }
            }
        }
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> AutomationResult<()> {
        let state = self.state.lock().unwrap();
        let present = match selector {
            scripts::MY_UNIT_TASKS | scripts::BOARD_COLUMN => state.board == Some(BoardAttempt::Ready),
            scripts::NOTES_CONTAINER => state.notes_open.is_some(),
            scripts::PROGRESS_MODAL | scripts::EDIT_BUTTON => state.progress_open.is_some(),
            scripts::WORKER_SEARCH => state.editor_open,
            scripts::FILE_INPUT => state.upload_open,
            _ => match BoardColumn::ALL.iter().find(|c| scripts::column_by_id(c.label()) == selector) {
                Some(column) => self.column(*column).is_some(),
                None => true,
            },
        };
        if present { Ok(()) } else { Err(Self::timeout(selector)) }
    }

    async fn wait_for_detached(&self, selector: &str, _timeout: Duration) -> AutomationResult<()> {
        let state = self.state.lock().unwrap();
        let attached = selector == scripts::NOTES_CONTAINER && state.notes_open.is_some();
        if attached {
            Err(AutomationError::Transient(format!("{} still attached", selector)))
        } else {
            Ok(())
        }
    }

    async fn wait_for_url(&self, fragment: &str, _timeout: Duration) -> AutomationResult<bool> {
        Ok(fragment == scripts::OTP_URL_FRAGMENT && self.state.lock().unwrap().otp)
    }

    async fn element_state(&self, selector: &str) -> AutomationResult<ElementState> {
        let mut state = self.state.lock().unwrap();
        let ready = ElementState { present: true, checked: false, enabled: true, visible: true };
        if selector == scripts::NOTES_CONTAINER {
            return Ok(ElementState { present: state.notes_open.is_some(), ..ready });
        }
        if selector == scripts::SAVE_BUTTON {
            state.save_polls += 1;
            let enabled = state.save_polls > state.save_ready_after;
            return Ok(ElementState { enabled, visible: enabled, ..ready });
        }
        if let Some(row) = self.checkbox_row(selector, state.visible_rows.len()) {
            return Ok(ElementState { checked: state.checked.contains(&row), ..ready });
        }
        Ok(ready)
    }

    async fn query(&self, query: BoardQuery) -> AutomationResult<Value> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Query(query.clone()));
        if state.failing_queries.contains(&query) {
            return Err(AutomationError::Browser("script evaluation failed".into()));
        }
        let value = match query {
            BoardQuery::ColumnTitles => {
                json!(self.columns.iter().map(|(c, _)| c.portal_title()).collect::<Vec<_>>())
            }
            BoardQuery::Cards { column } => match self.column(column) {
                Some(cards) => json!(cards
                    .iter()
                    .map(|card| json!({
                        "case_number": card.case_number,
                        "title": card.title,
                        "fbg": card.fbg,
                        "card_text": format!("{}\n{}", card.case_number, card.title),
                        "href": card.href,
                    }))
                    .collect::<Vec<_>>()),
                None => Value::Null,
            },
            BoardQuery::OpenNotes { column, index } => {
                let has_button = self.card(column, index).map_or(false, |c| c.messages.is_some());
                // A popup left open swallows the click.
                if has_button && state.notes_open.is_none() {
                    state.notes_open = Some((column, index));
                }
                json!(has_button)
            }
            BoardQuery::NoteMessages => {
                let messages = state
                    .notes_open
                    .and_then(|(column, index)| self.card(column, index))
                    .and_then(|card| card.messages.clone())
                    .unwrap_or_default();
                serde_json::to_value(messages)?
            }
            BoardQuery::CardLinks { column } => match self.column(column) {
                Some(cards) => json!(cards.iter().map(|c| c.href.clone()).collect::<Vec<_>>()),
                None => Value::Null,
            },
            BoardQuery::OpenTaskProgress { column, index } => {
                let found = self.card(column, index).is_some();
                if found {
                    state.progress_open = Some((column, index));
                }
                json!(found)
            }
            BoardQuery::WorkerRows => {
                let needle = state.search.to_lowercase();
                let rows: Vec<String> = if state.editor_open && !needle.is_empty() {
                    self.workers
                        .iter()
                        .filter(|w| w.to_lowercase().contains(&needle))
                        .cloned()
                        .collect()
                } else {
                    Vec::new()
                };
                state.visible_rows = rows.clone();
                json!(rows)
            }
            BoardQuery::SessionStorage => json!(state
                .session_storage
                .iter()
                .map(|(k, v)| json!({"key": k, "value": v}))
                .collect::<Vec<_>>()),
        };
        Ok(value)
    }

    async fn cookies(&self) -> AutomationResult<Vec<BrowserCookie>> {
        Ok(self.state.lock().unwrap().cookies.clone())
    }

    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> AutomationResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.upload_open {
            return Err(not_found(selector));
        }
        state.events.push(Event::SetFiles(selector.to_string(), files.to_vec()));
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> AutomationResult<()> {
        self.state.lock().unwrap().events.push(Event::Screenshot(path.to_path_buf()));
        Ok(())
    }

    async fn settle(&self, duration: Duration) {
        self.state.lock().unwrap().events.push(Event::Settle(duration));
    }

    async fn close(&self) {
        self.state.lock().unwrap().events.push(Event::Close);
    }
}

/// Hands out clones of one [`FakePortal`] and counts launches.
#[derive(Clone)]
pub struct FakeSessions {
    pub portal: FakePortal,
    launches: Arc<Mutex<usize>>,
}

impl FakeSessions {
    pub fn new(portal: FakePortal) -> Self {
        Self { portal, launches: Arc::new(Mutex::new(0)) }
    }

    pub fn launches(&self) -> usize {
        *self.launches.lock().unwrap()
    }
}

#[async_trait]
impl SessionFactory for FakeSessions {
    async fn open(&self) -> AutomationResult<Box<dyn PortalPage>> {
        *self.launches.lock().unwrap() += 1;
        Ok(Box::new(self.portal.clone()))
    }
}

pub fn count<F: Fn(&Event) -> bool>(events: &[Event], pred: F) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::automation::core::{query_as, BoardQuery, ClickMode, PortalPage, SessionFactory};
use crate::automation::driver::PortalDriver;
use crate::automation::scripts;
use crate::error::{AutomationError, AutomationResult};
use crate::models::{Account, ActionOutcome, BoardColumn};

const COLUMN_WAIT: Duration = Duration::from_secs(15);
const MODAL_WAIT: Duration = Duration::from_secs(10);
const SAVE_POLLS: usize = 10;

/// Step log of one action, returned to the caller as its output.
#[derive(Debug, Default)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn note(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!(target: "fms_bridge::action", "{}", line);
        self.lines.push(line);
    }

    pub fn finish(self, success: bool) -> ActionOutcome {
        ActionOutcome { success, output: self.lines.join("\n") }
    }
}

/// Runs on-demand UI mutations, each in its own freshly launched session.
#[derive(Clone)]
pub struct ActionExecutor {
    sessions: Arc<dyn SessionFactory>,
    driver: PortalDriver,
}

impl ActionExecutor {
    pub fn new(sessions: Arc<dyn SessionFactory>, driver: PortalDriver) -> Self {
        Self { sessions, driver }
    }

    pub async fn assign_worker(&self, task_id: &str, worker: &str, account: &Account) -> ActionOutcome {
        let mut transcript = Transcript::default();
        transcript.note(format!("Assigning '{}' to task {}", worker, task_id));

        let page = match self.sessions.open().await {
            Ok(page) => page,
            Err(e) => {
                transcript.note(format!("Browser launch failed: {}", e));
                return transcript.finish(false);
            }
        };
        let result = self.assign_on_page(page.as_ref(), task_id, worker, account, &mut transcript).await;
        page.close().await;

        match result {
            Ok(true) => {
                transcript.note("Assignment saved");
                transcript.finish(true)
            }
            Ok(false) => {
                transcript.note(format!("Task {} not found on the board", task_id));
                transcript.finish(false)
            }
            Err(e) => {
                transcript.note(format!("Assignment aborted: {}", e));
                transcript.finish(false)
            }
        }
    }

    async fn assign_on_page(
        &self,
        page: &dyn PortalPage,
        task_id: &str,
        worker: &str,
        account: &Account,
        transcript: &mut Transcript,
    ) -> AutomationResult<bool> {
        self.driver.authenticate(page, account).await?;
        transcript.note(format!("Authenticated as {}", account.username));

        for column in BoardColumn::ALL {
            if page.wait_for_selector(&scripts::column_by_id(column.label()), COLUMN_WAIT).await.is_err() {
                transcript.note(format!("Column {} not found", column));
                continue;
            }
            let links: Option<Vec<Option<String>>> = match query_as(page, BoardQuery::CardLinks { column }).await {
                Ok(links) => links,
                Err(e) => {
                    transcript.note(format!("Column {}: could not read cards: {}", column, e));
                    continue;
                }
            };
            let links = links.unwrap_or_default();
            transcript.note(format!("Column {}: {} cards", column, links.len()));

            for (index, href) in links.iter().enumerate() {
                if !href.as_deref().map_or(false, |h| h.contains(task_id)) {
                    continue;
                }
                transcript.note(format!("Task found in {} at card {}", column, index));
                match self.assign_card(page, column, index, worker, transcript).await {
                    Ok(()) => return Ok(true),
                    Err(e) => {
                        transcript.note(format!("Card {} in {} failed: {}", index, column, e));
                        close_progress(page).await;
                    }
                }
            }
        }
        Ok(false)
    }

    async fn assign_card(
        &self,
        page: &dyn PortalPage,
        column: BoardColumn,
        index: usize,
        worker: &str,
        transcript: &mut Transcript,
    ) -> AutomationResult<()> {
        let opened: bool = query_as(page, BoardQuery::OpenTaskProgress { column, index }).await?;
        if !opened {
            return Err(AutomationError::Verification("card has no task progress button".into()));
        }
        page.wait_for_selector(scripts::PROGRESS_MODAL, MODAL_WAIT).await?;
        transcript.note("Task progress opened");

        page.wait_for_selector(scripts::EDIT_BUTTON, MODAL_WAIT).await?;
        page.click(scripts::EDIT_BUTTON, ClickMode::Normal).await?;
        page.wait_for_selector(scripts::WORKER_SEARCH, MODAL_WAIT).await?;
        page.fill(scripts::WORKER_SEARCH, worker).await?;
        page.settle(Duration::from_millis(1200)).await;

        let rows: Vec<String> = query_as(page, BoardQuery::WorkerRows).await?;
        let needle = worker.to_lowercase();
        let row = rows
            .iter()
            .position(|r| r.to_lowercase().contains(&needle))
            .ok_or_else(|| AutomationError::Verification(format!("worker '{}' not in {} results", worker, rows.len())))?;
        transcript.note(format!("Worker matched at row {}", row));

        self.select_row(page, row, transcript).await?;
        self.save(page, transcript).await?;
        close_progress(page).await;
        Ok(())
    }

    async fn select_row(&self, page: &dyn PortalPage, row: usize, transcript: &mut Transcript) -> AutomationResult<()> {
        let checkbox = scripts::worker_checkbox(row);
        let state = page.element_state(&checkbox).await?;
        if !state.present {
            return Err(AutomationError::Verification("worker checkbox missing".into()));
        }
        if !state.checked {
            if let Err(e) = page.click(&checkbox, ClickMode::Normal).await {
                transcript.note(format!("Checkbox click failed ({}), forcing", e));
                page.click(&checkbox, ClickMode::Forced).await?;
            }
        }
        if !page.element_state(&checkbox).await?.checked {
            return Err(AutomationError::Verification("worker checkbox did not stay checked".into()));
        }
        transcript.note("Worker selected");
        Ok(())
    }

    async fn save(&self, page: &dyn PortalPage, transcript: &mut Transcript) -> AutomationResult<()> {
        page.settle(Duration::from_millis(500)).await;
        let mut ready = false;
        for _ in 0..SAVE_POLLS {
            let state = page.element_state(scripts::SAVE_BUTTON).await?;
            if state.present && state.enabled && state.visible {
                ready = true;
                break;
            }
            page.settle(Duration::from_millis(200)).await;
        }
        if !ready {
            return Err(AutomationError::Verification("save button never became clickable".into()));
        }

        for mode in [ClickMode::Normal, ClickMode::Forced, ClickMode::Script] {
            match page.click(scripts::SAVE_BUTTON, mode).await {
                Ok(()) => {
                    transcript.note(format!("Save clicked ({:?})", mode));
                    let label = format!("save_{:?}", mode).to_lowercase();
                    if let Some(path) = self.driver.capture(page, &label).await {
                        transcript.note(format!("Screenshot {}", path.display()));
                    }
                    return Ok(());
                }
                Err(e) => transcript.note(format!("Save click {:?} failed: {}", mode, e)),
            }
        }
        Err(AutomationError::Verification("save button could not be clicked".into()))
    }

    /// Filters the board down to one card and attaches `file` through its
    /// upload dialog.
    pub async fn upload_media(&self, task_filter: &str, file: &Path, account: &Account) -> ActionOutcome {
        let mut transcript = Transcript::default();
        if !file.is_file() {
            transcript.note(format!("File not found: {}", file.display()));
            return transcript.finish(false);
        }
        transcript.note(format!("Uploading {} to '{}'", file.display(), task_filter));

        let page = match self.sessions.open().await {
            Ok(page) => page,
            Err(e) => {
                transcript.note(format!("Browser launch failed: {}", e));
                return transcript.finish(false);
            }
        };
        let result = self.upload_on_page(page.as_ref(), task_filter, file, account).await;
        page.close().await;

        match result {
            Ok(()) => {
                transcript.note("Upload submitted");
                transcript.finish(true)
            }
            Err(e) => {
                warn!(error = %e, "Upload failed");
                transcript.note(format!("Upload failed: {}", e));
                transcript.finish(false)
            }
        }
    }

    async fn upload_on_page(
        &self,
        page: &dyn PortalPage,
        task_filter: &str,
        file: &Path,
        account: &Account,
    ) -> AutomationResult<()> {
        self.driver.authenticate(page, account).await?;
        page.fill(scripts::BOARD_SEARCH, task_filter).await?;
        page.settle(Duration::from_secs(2)).await;
        page.wait_for_selector(scripts::UPLOAD_BUTTON, COLUMN_WAIT).await?;
        page.click(scripts::UPLOAD_BUTTON, ClickMode::Normal).await?;
        page.wait_for_selector(scripts::FILE_INPUT, MODAL_WAIT).await?;
        let files: Vec<PathBuf> = vec![file.to_path_buf()];
        page.set_input_files(scripts::FILE_INPUT, &files).await?;
        page.settle(Duration::from_secs(3)).await;
        Ok(())
    }
}

async fn close_progress(page: &dyn PortalPage) {
    let _ = page.click(scripts::PROGRESS_CLOSE, ClickMode::Script).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::*;

    const WORKERS: &[&str] = &["Ali Salman Ibrahim", "Muhammad Omar Hasan", "Hussein Nizar Hameed"];

    fn executor(dir: &Path, portal: FakePortal) -> (ActionExecutor, FakeSessions) {
        let sessions = FakeSessions::new(portal);
        let driver = PortalDriver::new(&test_settings(dir)).with_sleeper(Arc::new(RecordingSleeper::default()));
        (ActionExecutor::new(Arc::new(sessions.clone()), driver), sessions)
    }

    fn board() -> FakePortal {
        FakePortal::new(vec![
            (BoardColumn::New, vec![FakeCard::new("1", "n1"), FakeCard::new("2", "n2")]),
            (
                BoardColumn::Pending,
                vec![FakeCard::new("3", "p1"), FakeCard::new("4", "p2"), FakeCard::new("5", "target-uuid")],
            ),
            (BoardColumn::InProgress, vec![FakeCard::new("6", "i1")]),
        ])
        .with_workers(WORKERS)
    }

    #[tokio::test]
    async fn test_assigns_task_found_in_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (exec, sessions) = executor(dir.path(), board());

        let outcome = exec.assign_worker("target-uuid", "muhammad omar", &account("ops")).await;

        assert!(outcome.success, "{}", outcome.output);
        assert_eq!(
            sessions.portal.assigned(),
            Some((BoardColumn::Pending, 2, "Muhammad Omar Hasan".to_string()))
        );
        let events = sessions.portal.events();
        let touched_in_progress = count(&events, |e| {
            matches!(e, Event::Query(BoardQuery::CardLinks { column: BoardColumn::InProgress }))
        });
        assert_eq!(touched_in_progress, 0);
        assert_eq!(sessions.launches(), 1);
        assert_eq!(events.last(), Some(&Event::Close));
        assert!(outcome.output.contains("Task found in Pending at card 2"));
    }

    #[tokio::test]
    async fn test_unreadable_column_moves_to_next() {
        let dir = tempfile::tempdir().unwrap();
        let portal = board().failing_query(BoardQuery::CardLinks { column: BoardColumn::New });
        let (exec, sessions) = executor(dir.path(), portal);

        let outcome = exec.assign_worker("target-uuid", "Ali", &account("ops")).await;

        assert!(outcome.success, "{}", outcome.output);
        assert!(outcome.output.contains("Column NEW: could not read cards"));
        assert_eq!(
            sessions.portal.assigned(),
            Some((BoardColumn::Pending, 2, "Ali Salman Ibrahim".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (exec, sessions) = executor(dir.path(), board());

        let outcome = exec.assign_worker("nope", "Ali", &account("ops")).await;

        assert!(!outcome.success);
        assert!(outcome.output.contains("not found"));
        assert!(sessions.portal.assigned().is_none());
    }

    #[tokio::test]
    async fn test_checkbox_falls_back_to_forced_click() {
        let dir = tempfile::tempdir().unwrap();
        let portal = board().failing_normal_click(&scripts::worker_checkbox(0));
        let (exec, sessions) = executor(dir.path(), portal);

        let outcome = exec.assign_worker("target-uuid", "Ali Salman", &account("ops")).await;

        assert!(outcome.success, "{}", outcome.output);
        assert!(sessions
            .portal
            .events()
            .contains(&Event::Click(scripts::worker_checkbox(0), ClickMode::Forced)));
    }

    #[tokio::test]
    async fn test_save_click_strategies_cascade() {
        let dir = tempfile::tempdir().unwrap();
        let portal = board().failing_normal_click(scripts::SAVE_BUTTON).save_ready_after(3);
        let (exec, sessions) = executor(dir.path(), portal);

        let outcome = exec.assign_worker("target-uuid", "Hussein", &account("ops")).await;

        assert!(outcome.success, "{}", outcome.output);
        assert!(outcome.output.contains("Save clicked (Forced)"));
        assert_eq!(sessions.portal.screenshots().len(), 1);
    }

    #[tokio::test]
    async fn test_unchecked_checkbox_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let (exec, sessions) = executor(dir.path(), board().unchecking_checkbox());

        let outcome = exec.assign_worker("target-uuid", "Ali", &account("ops")).await;

        assert!(!outcome.success);
        assert!(outcome.output.contains("did not stay checked"));
        assert!(sessions.portal.assigned().is_none());
    }

    #[tokio::test]
    async fn test_worker_missing_from_results() {
        let dir = tempfile::tempdir().unwrap();
        let (exec, _) = executor(dir.path(), board());

        let outcome = exec.assign_worker("target-uuid", "Nobody Known", &account("ops")).await;

        assert!(!outcome.success);
        assert!(outcome.output.contains("not in 0 results"));
    }

    #[tokio::test]
    async fn test_upload_rejects_missing_file_without_launching() {
        let dir = tempfile::tempdir().unwrap();
        let (exec, sessions) = executor(dir.path(), board());

        let outcome = exec.upload_media("FBG-5", &dir.path().join("missing.jpg"), &account("ops")).await;

        assert!(!outcome.success);
        assert_eq!(sessions.launches(), 0);
    }

    #[tokio::test]
    async fn test_upload_sets_file_input() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.jpg");
        std::fs::write(&file, b"jpeg").unwrap();
        let (exec, sessions) = executor(dir.path(), board());

        let outcome = exec.upload_media("FBG-5", &file, &account("ops")).await;

        assert!(outcome.success, "{}", outcome.output);
        let events = sessions.portal.events();
        assert!(events.contains(&Event::Fill(scripts::BOARD_SEARCH.into(), "FBG-5".into())));
        assert!(events.contains(&Event::SetFiles(scripts::FILE_INPUT.into(), vec![file.clone()])));
    }
}

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::automation::core::{query_as, BoardQuery, ClickMode, PortalPage};
use crate::automation::driver::PortalDriver;
use crate::automation::scripts;
use crate::error::AutomationResult;
use crate::models::{BoardColumn, Message, TaskSnapshot};
use crate::snapshot::SnapshotStore;

const COLUMN_WAIT: Duration = Duration::from_secs(15);
const POPUP_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct CardInfo {
    case_number: String,
    title: String,
    fbg: String,
    card_text: String,
    href: Option<String>,
}

/// Task uuid from a "View task in new tab" link: the path segment after
/// `/task/`.
pub fn task_uuid(href: &str) -> Option<String> {
    let rest = href.split("/task/").nth(1)?;
    let uuid = rest.split(['/', '?', '#']).next()?.trim();
    if uuid.is_empty() { None } else { Some(uuid.to_string()) }
}

pub struct BoardScraper {
    driver: PortalDriver,
    snapshots: SnapshotStore,
}

impl BoardScraper {
    pub fn new(driver: PortalDriver, snapshots: SnapshotStore) -> Self {
        Self { driver, snapshots }
    }

    /// Scrapes the board the page is on and writes one snapshot file.
    /// Snapshot write failures are logged and do not affect the result.
    pub async fn run(&self, page: &dyn PortalPage) -> AutomationResult<Vec<TaskSnapshot>> {
        let rows = self.scrape(page).await?;
        self.snapshots.write_logged(&rows);
        Ok(rows)
    }

    pub async fn scrape(&self, page: &dyn PortalPage) -> AutomationResult<Vec<TaskSnapshot>> {
        page.wait_for_selector(scripts::BOARD_COLUMN, COLUMN_WAIT).await?;
        let titles: Vec<String> = query_as(page, BoardQuery::ColumnTitles).await?;
        info!(?titles, "Board columns detected");

        let mut rows = Vec::new();
        for column in BoardColumn::ALL {
            let cards: Option<Vec<CardInfo>> = query_as(page, BoardQuery::Cards { column }).await?;
            let Some(cards) = cards else {
                warn!(%column, "Column not on board, skipping");
                continue;
            };
            debug!(%column, cards = cards.len(), "Scraping column");

            for (index, card) in cards.into_iter().enumerate() {
                let messages = self.collect_messages(page, column, index).await;
                rows.push(TaskSnapshot {
                    column,
                    case_number: card.case_number,
                    title: card.title,
                    fbg: card.fbg,
                    card_text: card.card_text,
                    uuid: card.href.as_deref().and_then(task_uuid),
                    messages,
                });
            }
        }
        info!(tasks = rows.len(), "Board scraped");
        Ok(rows)
    }

    /// Opens the card's notes popup and reads its thread. Every failure here
    /// degrades to an empty list for this card only.
    async fn collect_messages(&self, page: &dyn PortalPage, column: BoardColumn, index: usize) -> Vec<Message> {
        // A popup left over from the previous card would swallow the click.
        if matches!(page.element_state(scripts::NOTES_CONTAINER).await, Ok(s) if s.present) {
            debug!(%column, index, "Closing stale notes popup");
            close_notes(page).await;
        }

        match query_as::<bool>(page, BoardQuery::OpenNotes { column, index }).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(%column, index, "Card has no notes button");
                return Vec::new();
            }
            Err(e) => {
                warn!(%column, index, error = %e, "Opening notes failed");
                return Vec::new();
            }
        }

        if let Err(e) = page.wait_for_selector(scripts::NOTES_CONTAINER, POPUP_WAIT).await {
            warn!(%column, index, error = %e, "Notes popup did not load");
            self.driver.capture(page, &format!("notes_{}_{}", column.label().replace(' ', "_"), index)).await;
            return Vec::new();
        }
        page.settle(Duration::from_millis(500)).await;

        let messages = match query_as::<Vec<Message>>(page, BoardQuery::NoteMessages).await {
            Ok(m) => m,
            Err(e) => {
                warn!(%column, index, error = %e, "Reading notes failed");
                Vec::new()
            }
        };
        close_notes(page).await;
        messages
    }
}

async fn close_notes(page: &dyn PortalPage) {
    if page.click(scripts::NOTES_CLOSE, ClickMode::Normal).await.is_err() {
        let _ = page.click(scripts::NOTES_CLOSE, ClickMode::Script).await;
    }
    if let Err(e) = page.wait_for_detached(scripts::NOTES_CONTAINER, POPUP_WAIT).await {
        warn!(error = %e, "Notes popup did not close");
    }
}

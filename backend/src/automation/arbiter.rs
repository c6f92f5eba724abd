use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::automation::core::{SessionFactory, TaskGuard};
use crate::automation::driver::PortalDriver;
use crate::automation::scraper::BoardScraper;
use crate::automation::state::{ArbiterState, Phase};
use crate::config::ScheduleConfig;
use crate::error::AutomationResult;
use crate::models::{Account, BoardColumns, TaskSnapshot, UserBoards};
use crate::snapshot::SnapshotStore;
use crate::storage::{RosterStore, TokenStore};

/// One account's unit of scraping work: launch, authenticate, scrape,
/// persist, extract the token, close.
#[async_trait]
pub trait AccountWorker: Send + Sync {
    async fn scrape(&self, account: &Account) -> AutomationResult<Vec<TaskSnapshot>>;
}

pub struct PortalScrapeJob {
    sessions: Arc<dyn SessionFactory>,
    driver: PortalDriver,
    scraper: BoardScraper,
    tokens: Arc<TokenStore>,
}

impl PortalScrapeJob {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        driver: PortalDriver,
        snapshots: SnapshotStore,
        tokens: Arc<TokenStore>,
    ) -> Self {
        let scraper = BoardScraper::new(driver.clone(), snapshots);
        Self { sessions, driver, scraper, tokens }
    }
}

#[async_trait]
impl AccountWorker for PortalScrapeJob {
    async fn scrape(&self, account: &Account) -> AutomationResult<Vec<TaskSnapshot>> {
        let page = self.sessions.open().await?;
        let result = match self.driver.authenticate(page.as_ref(), account).await {
            Ok(()) => self.scraper.run(page.as_ref()).await,
            Err(e) => Err(e),
        };

        // The token is useful even when the scrape itself failed.
        if let Some(token) = self.driver.extract_token(page.as_ref()).await {
            if let Err(e) = self.tokens.save(&token) {
                warn!(error = %e, "Failed to persist token");
            }
        }
        page.close().await;
        result
    }
}

/// Owns the browser lock and the sweep over the account roster. On-demand
/// actions register through [`Arbiter::run_action`] and the sweep yields to
/// them between accounts.
pub struct Arbiter {
    state: ArbiterState,
    browser_lock: Mutex<()>,
    roster: RosterStore,
    snapshots: SnapshotStore,
    worker: Arc<dyn AccountWorker>,
    boards: RwLock<UserBoards>,
    schedule: ScheduleConfig,
    retention: Option<usize>,
    started: AtomicBool,
}

impl Arbiter {
    pub fn new(
        roster: RosterStore,
        snapshots: SnapshotStore,
        worker: Arc<dyn AccountWorker>,
        schedule: ScheduleConfig,
        retention: Option<usize>,
    ) -> Self {
        Self {
            state: ArbiterState::new(),
            browser_lock: Mutex::new(()),
            roster,
            snapshots,
            worker,
            boards: RwLock::new(UserBoards::new()),
            schedule,
            retention,
            started: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &ArbiterState {
        &self.state
    }

    pub async fn board(&self, username: &str) -> Option<BoardColumns> {
        self.boards.read().await.get(username).cloned()
    }

    /// Scrapes one account under the browser lock and caches its board.
    pub async fn scrape_now(&self, account: &Account) -> AutomationResult<BoardColumns> {
        let _guard = self.browser_lock.lock().await;
        self.scrape_locked(account, true).await
    }

    /// Runs one account's scrape. With `restore_phase` the phase seen before
    /// the scrape comes back afterwards, otherwise the arbiter goes idle.
    async fn scrape_locked(&self, account: &Account, restore_phase: bool) -> AutomationResult<BoardColumns> {
        let scraping = Phase::Scraping { account: account.username.clone() };
        let previous = self.state.replace_phase(scraping.clone());
        let result = self.worker.scrape(account).await;
        let next = match previous {
            Phase::Scraping { .. } => Phase::Idle,
            previous if restore_phase => previous,
            _ => Phase::Idle,
        };
        self.state.finish_phase(&scraping, next);

        // Rows keep the messages read from the page; readers merge from disk.
        let columns = BoardColumns::from_rows(result?);
        info!(username = %account.username, tasks = columns.len(), "Board cached");
        self.boards.write().await.insert(account.username.clone(), columns.clone());
        Ok(columns)
    }

    /// Starts the sweep loop once. Later calls return `None`.
    pub fn ensure_started(self: &Arc<Self>, shutdown: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        info!("Background scraping started");
        Some(tokio::spawn(self.clone().run_loop(shutdown)))
    }

    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            if !self.sweep(&mut shutdown).await {
                break;
            }
            self.state.complete_sweep();
            if let Some(keep) = self.retention {
                self.snapshots.enforce_retention(keep);
            }

            self.state.set_phase(Phase::Sleeping);
            let interval = self.schedule.sweep_interval();
            debug!(secs = interval.as_secs(), "Sweep complete, sleeping");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => break,
            }
        }
        self.state.set_phase(Phase::Idle);
        info!("Background scraping stopped");
    }

    /// One pass over the roster. Returns `false` when shutdown was requested.
    async fn sweep(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let accounts = match self.roster.load() {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(error = %e, "Roster unreadable, skipping sweep");
                Vec::new()
            }
        };

        for account in &accounts {
            let guard = loop {
                if !self.yield_to_actions(shutdown).await {
                    return false;
                }
                let guard = self.browser_lock.lock().await;
                // An action may have arrived while we waited for the lock.
                if self.state.action_pending() {
                    drop(guard);
                    continue;
                }
                break guard;
            };

            let result = self.scrape_locked(account, false).await;
            drop(guard);

            if let Err(e) = result {
                error!(username = %account.username, error = %e, "Account scrape failed");
                tokio::select! {
                    _ = tokio::time::sleep(self.schedule.error_grace()) => {}
                    _ = shutdown.recv() => return false,
                }
            }
        }
        true
    }

    /// Blocks while any action ticket is outstanding. Returns `false` on
    /// shutdown.
    async fn yield_to_actions(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        if !self.state.action_pending() {
            return true;
        }
        info!("Action pending, pausing sweep");
        self.state.set_phase(Phase::PausedForAction);
        let resumed = tokio::select! {
            _ = self.state.wait_for_no_actions() => true,
            _ = shutdown.recv() => false,
        };
        if resumed {
            info!("Actions cleared, resuming sweep");
        }
        resumed
    }

    /// Runs an on-demand action in its own task while holding an action
    /// ticket. The task is aborted on timeout or when the caller goes away.
    pub async fn run_action<T, F>(&self, label: &str, action: F) -> AutomationResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let _ticket = self.state.action_ticket();
        let idle_wait = self.schedule.action_idle_wait();
        if !idle_wait.is_zero() && !self.state.wait_for_scrape_idle(idle_wait).await {
            debug!(label, "Scrape still running, launching action anyway");
        }
        TaskGuard::spawn(label, action).join(self.schedule.action_timeout()).await
    }
}

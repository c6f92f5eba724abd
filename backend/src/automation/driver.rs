use chrono::Local;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::automation::core::{query_as, BoardQuery, ClickMode, PortalPage, RetryPolicy, Sleeper, TokioSleeper};
use crate::automation::scripts;
use crate::config::{PortalConfig, Settings};
use crate::error::{AutomationError, AutomationResult};
use crate::models::Account;

const OTP_WAIT: Duration = Duration::from_secs(30);
const ELEMENT_WAIT: Duration = Duration::from_secs(15);

const TOKEN_PREFIX: &str = "eyJ";
const SESSION_TOKEN_KEY: &str = "formauthtoken";
const TOKEN_COOKIES: [&str; 2] = ["__auth_token__", "KEYCLOAK_IDENTITY"];

#[derive(Deserialize)]
struct StorageEntry {
    key: String,
    value: String,
}

/// Logs a page into the portal and brings it to the task board.
#[derive(Clone)]
pub struct PortalDriver {
    portal: PortalConfig,
    retry: RetryPolicy,
    errors_dir: PathBuf,
    sleeper: Arc<dyn Sleeper>,
}

impl PortalDriver {
    pub fn new(settings: &Settings) -> Self {
        Self {
            portal: settings.portal.clone(),
            retry: RetryPolicy::from_config(&settings.retry),
            errors_dir: settings.errors_dir(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn errors_dir(&self) -> &Path {
        &self.errors_dir
    }

    pub async fn authenticate(&self, page: &dyn PortalPage, account: &Account) -> AutomationResult<()> {
        self.login(page, account).await?;
        self.open_board(page).await
    }

    async fn login(&self, page: &dyn PortalPage, account: &Account) -> AutomationResult<()> {
        info!(username = %account.username, "Logging in");
        page.goto(&self.portal.login_url).await?;
        page.fill(scripts::LOGIN_USERNAME, &account.username).await?;
        page.fill(scripts::LOGIN_PASSWORD, &account.password).await?;
        page.click(scripts::LOGIN_SUBMIT, ClickMode::Normal).await?;

        if page.wait_for_url(scripts::OTP_URL_FRAGMENT, OTP_WAIT).await? {
            info!(username = %account.username, "Secondary verification requested");
            page.fill(scripts::OTP_INPUT, &account.password).await?;
            page.click(scripts::OTP_CONFIRM, ClickMode::Normal).await?;
            page.settle(Duration::from_secs(5)).await;
        }
        Ok(())
    }

    /// Board navigation under the retry policy. Each failed attempt leaves a
    /// screenshot behind; an access denial ends the loop at once.
    pub async fn open_board(&self, page: &dyn PortalPage) -> AutomationResult<()> {
        self.retry
            .run(self.sleeper.as_ref(), "board navigation", |attempt| async move {
                match self.board_attempt(page).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        let err = self.classify(page, e).await;
                        self.capture(page, &format!("board_attempt{}", attempt + 1)).await;
                        Err(err)
                    }
                }
            })
            .await?;
        info!("Board ready");
        Ok(())
    }

    async fn board_attempt(&self, page: &dyn PortalPage) -> AutomationResult<()> {
        page.goto(&self.portal.board_url).await?;
        page.settle(Duration::from_secs(2)).await;
        page.wait_for_selector(scripts::MY_UNIT_TASKS, ELEMENT_WAIT).await?;
        page.click(scripts::MY_UNIT_TASKS, ClickMode::Normal).await?;
        page.wait_for_selector(scripts::BOARD_COLUMN, ELEMENT_WAIT).await?;
        page.settle(Duration::from_secs(7)).await;
        Ok(())
    }

    async fn classify(&self, page: &dyn PortalPage, err: AutomationError) -> AutomationError {
        if err.is_terminal() {
            return err;
        }
        match page.content().await {
            Ok(html) if is_access_denied(&html) => {
                AutomationError::PermissionDenied(format!("portal refused board access ({})", err))
            }
            _ => err,
        }
    }

    /// Best-effort screenshot into the error artifact directory.
    pub async fn capture(&self, page: &dyn PortalPage, label: &str) -> Option<PathBuf> {
        let path = self
            .errors_dir
            .join(format!("{}_{}.png", label, Local::now().format("%Y%m%d_%H%M%S")));
        match page.screenshot(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Screenshot saved");
                Some(path)
            }
            Err(e) => {
                warn!(error = %e, label, "Screenshot failed");
                None
            }
        }
    }

    /// Bearer token from session storage, then the auth cookies. `None` when
    /// nothing token-shaped is present.
    pub async fn extract_token(&self, page: &dyn PortalPage) -> Option<String> {
        match query_as::<Vec<StorageEntry>>(page, BoardQuery::SessionStorage).await {
            Ok(entries) => {
                let token = entries
                    .into_iter()
                    .find(|e| e.key == SESSION_TOKEN_KEY && e.value.starts_with(TOKEN_PREFIX));
                if let Some(entry) = token {
                    debug!(source = SESSION_TOKEN_KEY, "Token found in session storage");
                    return Some(entry.value);
                }
            }
            Err(e) => warn!(error = %e, "Session storage unreadable"),
        }

        let cookies = match page.cookies().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Cookies unreadable");
                return None;
            }
        };
        for name in TOKEN_COOKIES {
            if let Some(cookie) = cookies
                .iter()
                .find(|c| c.name == name && c.value.starts_with(TOKEN_PREFIX))
            {
                debug!(source = name, "Token found in cookie");
                return Some(cookie.value.clone());
            }
        }
        info!("No bearer token on page");
        None
    }
}

fn is_access_denied(html: &str) -> bool {
    let lower = html.to_lowercase();
    lower.contains("403") || lower.contains("permission")
}

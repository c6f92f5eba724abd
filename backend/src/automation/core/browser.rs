use async_trait::async_trait;
use chromiumoxide::browser::HeadlessMode;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::element::Element;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::automation::core::page::{not_found, BoardQuery, BrowserCookie, ClickMode, ElementState, PortalPage};
use crate::automation::scripts;
use crate::config::BrowserSettings;
use crate::error::{AutomationError, AutomationResult};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A dedicated Chromium process with a single tab. The profile directory
/// lives as long as the page.
pub struct ChromePage {
    browser: Mutex<Browser>,
    page: Page,
    handler: Option<JoinHandle<()>>,
    _profile: TempDir,
}

impl ChromePage {
    pub async fn launch(settings: &BrowserSettings, user_agent: &str) -> AutomationResult<Self> {
        let profile = tempfile::Builder::new().prefix("fms-bridge-profile-").tempdir()?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile.path())
            .headless_mode(if settings.headless { HeadlessMode::True } else { HeadlessMode::False })
            .window_size(settings.window_width, settings.window_height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-infobars")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--lang=en-US")
            .arg(format!("--user-agent={}", user_agent));
        if let Some(exe) = &settings.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder.build().map_err(AutomationError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "chromiumoxide handler event error");
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(e.into());
            }
        };
        debug!(profile = %profile.path().display(), "Browser launched");

        Ok(Self {
            browser: Mutex::new(browser),
            page,
            handler: Some(handler_task),
            _profile: profile,
        })
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> AutomationResult<T> {
        let result = self.page.evaluate(script).await?;
        Ok(result.into_value::<T>()?)
    }

    async fn find(&self, selector: &str) -> AutomationResult<Element> {
        self.page.find_element(selector).await.map_err(|_| not_found(selector))
    }
}

async fn poll_until<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[async_trait]
impl PortalPage for ChromePage {
    async fn goto(&self, url: &str) -> AutomationResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| AutomationError::Transient(format!("navigation to {} failed: {}", url, e)))?;
        Ok(())
    }

    async fn content(&self) -> AutomationResult<String> {
        Ok(self.page.content().await?)
    }

    async fn fill(&self, selector: &str, value: &str) -> AutomationResult<()> {
        let filled: bool = self.eval(scripts::fill(selector, value)).await?;
        if filled { Ok(()) } else { Err(not_found(selector)) }
    }

    async fn click(&self, selector: &str, mode: ClickMode) -> AutomationResult<()> {
        let clicked = match mode {
            ClickMode::Normal => {
                let element = self.find(selector).await?;
                element
                    .click()
                    .await
                    .map_err(|e| AutomationError::Transient(format!("click on {} failed: {}", selector, e)))?;
                true
            }
            ClickMode::Forced => self.eval::<bool>(scripts::forced_click(selector)).await?,
            ClickMode::Script => self.eval::<bool>(scripts::script_click(selector)).await?,
        };
        if clicked { Ok(()) } else { Err(not_found(selector)) }
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> AutomationResult<()> {
        let found = poll_until(timeout, || async move { self.page.find_element(selector).await.is_ok() }).await;
        if found {
            Ok(())
        } else {
            Err(AutomationError::Transient(format!("timed out waiting for {}", selector)))
        }
    }

    async fn wait_for_detached(&self, selector: &str, timeout: Duration) -> AutomationResult<()> {
        let gone = poll_until(timeout, || async move { self.page.find_element(selector).await.is_err() }).await;
        if gone {
            Ok(())
        } else {
            Err(AutomationError::Transient(format!("{} still attached", selector)))
        }
    }

    async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> AutomationResult<bool> {
        Ok(poll_until(timeout, || async move {
            matches!(self.page.url().await, Ok(Some(url)) if url.contains(fragment))
        })
        .await)
    }

    async fn element_state(&self, selector: &str) -> AutomationResult<ElementState> {
        self.eval(scripts::element_state(selector)).await
    }

    async fn query(&self, query: BoardQuery) -> AutomationResult<serde_json::Value> {
        self.eval(scripts::render(&query)).await
    }

    async fn cookies(&self) -> AutomationResult<Vec<BrowserCookie>> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie { name: c.name, value: c.value })
            .collect())
    }

    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> AutomationResult<()> {
        let element = self.find(selector).await?;
        let params = SetFileInputFilesParams::builder()
            .files(files.iter().map(|f| f.to_string_lossy().to_string()))
            .object_id(element.remote_object_id.clone())
            .build()
            .map_err(AutomationError::Browser)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> AutomationResult<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), path)
            .await?;
        Ok(())
    }

    async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!(error = %e, "Browser close failed");
        }
        let _ = browser.wait().await;
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if let Some(h) = self.handler.take() {
            h.abort();
        }
    }
}

use async_trait::async_trait;
use tracing::info;

use crate::automation::core::browser::ChromePage;
use crate::automation::core::page::PortalPage;
use crate::config::Settings;
use crate::error::AutomationResult;

/// Opens fresh browser pages. Every call launches an independent browser
/// session; nothing is pooled or shared between callers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> AutomationResult<Box<dyn PortalPage>>;
}

#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    settings: crate::config::BrowserSettings,
    user_agent: String,
}

impl ChromeLauncher {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.browser.clone(),
            user_agent: settings.portal.user_agent.clone(),
        }
    }
}

#[async_trait]
impl SessionFactory for ChromeLauncher {
    async fn open(&self) -> AutomationResult<Box<dyn PortalPage>> {
        info!(headless = self.settings.headless, "Launching browser session");
        let page = ChromePage::launch(&self.settings, &self.user_agent).await?;
        Ok(Box::new(page))
    }
}

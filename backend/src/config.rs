use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AutomationError, AutomationResult};
use crate::models::Account;

pub const CONFIG_FILE: &str = "fms-bridge.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_board_url")]
    pub board_url: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_login_url() -> String {
    "https://sso.earthlink.iq/auth/realms/elcld.ai/protocol/openid-connect/auth?response_type=code&client_id=fms-msp&redirect_uri=https%3A%2F%2Fmsp.go2field.iq%2Fboard%2Fmy-unit-tasks&scope=openid".to_string()
}

fn default_board_url() -> String {
    "https://msp.go2field.iq/board/a22c39cb-093c-d83e-7dd1-a8c7a5d0fa7b".to_string()
}

fn default_api_base() -> String {
    "https://fmsapi.el.earthlink.iq".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36".to_string()
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: default_login_url(),
            board_url: default_board_url(),
            api_base: default_api_base(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSettings {
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    /// Overrides chromiumoxide's executable detection.
    #[serde(default)]
    pub executable: Option<PathBuf>,
}

fn default_headless() -> bool {
    true
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    800
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            executable: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_error_grace_secs")]
    pub error_grace_secs: u64,
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
    /// How long an action waits for an in-flight scrape before launching
    /// its own session anyway. Zero launches immediately.
    #[serde(default)]
    pub action_idle_wait_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    120
}

fn default_error_grace_secs() -> u64 {
    5
}

fn default_action_timeout_secs() -> u64 {
    180
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            error_grace_secs: default_error_grace_secs(),
            action_timeout_secs: default_action_timeout_secs(),
            action_idle_wait_secs: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn error_grace(&self) -> Duration {
        Duration::from_secs(self.error_grace_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn action_idle_wait(&self) -> Duration {
        Duration::from_secs(self.action_idle_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Credentials used for on-demand actions. Falls back to the first
    /// roster account when unset.
    #[serde(default)]
    pub action_account: Option<Account>,
    /// Keep at most this many snapshot files after each sweep. `None` keeps
    /// everything.
    #[serde(default)]
    pub snapshot_retention: Option<usize>,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Settings {
    /// Reads `fms-bridge.json` from `data_dir`, falling back to defaults when
    /// the file does not exist.
    pub fn load(data_dir: &Path) -> AutomationResult<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str::<Settings>(&content)
                .map_err(|e| AutomationError::Config(format!("{}: {}", path.display(), e)))?
        } else {
            Settings::default()
        };
        settings.data_dir = data_dir.to_path_buf();
        Ok(settings)
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn accounts_file(&self) -> PathBuf {
        self.data_dir.join("accounts.json")
    }

    pub fn workers_file(&self) -> PathBuf {
        self.data_dir.join("workers.json")
    }

    pub fn token_file(&self) -> PathBuf {
        self.data_dir.join("token.json")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("scraped_results")
    }

    pub fn errors_dir(&self) -> PathBuf {
        self.data_dir.join("Errors")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.data_dir.join("form-templates")
    }

    pub fn api_form_file(&self) -> PathBuf {
        self.data_dir.join("api-form.json")
    }
}

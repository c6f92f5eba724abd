use std::fs::File;
use std::io::{Read, Write, Result};
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Serialize, Deserialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{AutomationError, AutomationResult};
use crate::models::{Account, TokenRecord};

// --- File I/O ---

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let data = serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(data)
}

pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;

    let json = serde_json::to_string_pretty(data)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(())
}

/// Advisory lock on `<path>.lock`, released on drop.
pub struct FileLock {
    file: File,
}

impl FileLock {
    pub fn new(path: &Path) -> Result<Self> {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = File::create(PathBuf::from(lock_path))?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

// --- Account roster ---

/// Ordered account list, deduplicated by username. Read from disk on every
/// access.
#[derive(Debug, Clone)]
pub struct RosterStore {
    path: PathBuf,
}

impl RosterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> AutomationResult<Vec<Account>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Ok(read_json(&self.path)?)
    }

    /// Appends `account` unless its username is already present. Returns
    /// whether the roster changed.
    pub fn add(&self, account: &Account) -> AutomationResult<bool> {
        let _lock = FileLock::new(&self.path)?;
        let mut accounts = self.load()?;
        if accounts.iter().any(|a| a.username == account.username) {
            return Ok(false);
        }
        accounts.push(account.clone());
        atomic_write_json(&self.path, &accounts)?;
        info!(username = %account.username, "Added account to roster");
        Ok(true)
    }

    pub fn first(&self) -> AutomationResult<Option<Account>> {
        Ok(self.load()?.into_iter().next())
    }
}

// --- Worker roster ---

pub const DEFAULT_WORKERS: &[&str] = &[
    "Amir Laith Samir",
    "Muhammad Jasim Muhammad",
    "Khaldoun Adel Mohalhal Zaji",
    "yousif muyad majeed",
    "sadiq faaiq Jassim",
    "Hussein Nizar Hameed",
    "Ali Salman Ibrahim",
    "Ali Abdul Hussein Abdul Wahid",
    "Muhammad Omar Hasan",
];

/// Technician display names offered as assignment candidates.
#[derive(Debug, Clone)]
pub struct WorkerStore {
    path: PathBuf,
}

impl WorkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Seeds the file with [`DEFAULT_WORKERS`] on first access.
    pub fn load(&self) -> AutomationResult<Vec<String>> {
        if !self.path.exists() {
            let defaults: Vec<String> = DEFAULT_WORKERS.iter().map(|s| s.to_string()).collect();
            atomic_write_json(&self.path, &defaults)?;
            return Ok(defaults);
        }
        Ok(read_json(&self.path)?)
    }

    pub fn add(&self, name: &str) -> AutomationResult<Vec<String>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AutomationError::Config("worker name is empty".into()));
        }
        let _lock = FileLock::new(&self.path)?;
        let mut workers = self.load()?;
        if !workers.iter().any(|w| w == name) {
            workers.push(name.to_string());
            atomic_write_json(&self.path, &workers)?;
        }
        Ok(workers)
    }

    pub fn remove(&self, name: &str) -> AutomationResult<Vec<String>> {
        let _lock = FileLock::new(&self.path)?;
        let mut workers = self.load()?;
        let before = workers.len();
        workers.retain(|w| w != name);
        if workers.len() == before {
            return Err(AutomationError::NotFound(format!("worker {}", name)));
        }
        atomic_write_json(&self.path, &workers)?;
        Ok(workers)
    }
}

// --- Token slot ---

#[derive(Serialize, Deserialize)]
struct TokenFile {
    token: String,
}

/// One-slot bearer token store. Last writer wins; every `save` overwrites
/// the file.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn save(&self, token: &str) -> AutomationResult<TokenRecord> {
        atomic_write_json(&self.path, &TokenFile { token: token.to_string() })?;
        let record = TokenRecord {
            token: token.to_string(),
            observed_at: Utc::now(),
        };
        debug!(path = %self.path.display(), "Token saved");
        Ok(record)
    }

    /// Reads the token file. The observation time is the file's modification
    /// time, so tokens written by another process are dated correctly.
    pub fn current(&self) -> Option<TokenRecord> {
        if !self.path.exists() {
            return None;
        }
        let file: TokenFile = match read_json(&self.path) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "Token file unreadable");
                return None;
            }
        };
        if file.token.is_empty() {
            return None;
        }
        let observed_at = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Some(TokenRecord {
            token: file.token,
            observed_at,
        })
    }
}

// --- Form templates ---

#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save(&self, task_id: &str, form: &serde_json::Value) -> AutomationResult<PathBuf> {
        let name = sanitize_file_stem(task_id)
            .ok_or_else(|| AutomationError::Config(format!("invalid task id {:?}", task_id)))?;
        let path = self.dir.join(format!("{}.json", name));
        atomic_write_json(&path, form)?;
        Ok(path)
    }

    pub fn list(&self) -> AutomationResult<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<String> = std::fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.ends_with(".json"))
            .collect();
        files.sort();
        Ok(files)
    }

    pub fn get(&self, filename: &str) -> AutomationResult<serde_json::Value> {
        let valid = filename.ends_with(".json")
            && !filename.contains(['/', '\\'])
            && !filename.starts_with('.');
        let path = self.dir.join(filename);
        if !valid || !path.is_file() {
            return Err(AutomationError::NotFound(filename.to_string()));
        }
        Ok(read_json(&path)?)
    }
}

fn sanitize_file_stem(raw: &str) -> Option<String> {
    let stem: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if stem.is_empty() { None } else { Some(stem) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str) -> Account {
        Account { username: name.into(), password: "secret".into() }
    }

    #[test]
    fn test_roster_dedupes_by_username() {
        let dir = tempfile::tempdir().unwrap();
        let roster = RosterStore::new(dir.path().join("accounts.json"));

        assert!(roster.load().unwrap().is_empty());
        assert!(roster.add(&account("a")).unwrap());
        assert!(roster.add(&account("b")).unwrap());
        assert!(!roster.add(&Account { username: "a".into(), password: "other".into() }).unwrap());

        let names: Vec<_> = roster.load().unwrap().into_iter().map(|a| a.username).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(roster.first().unwrap().unwrap().password, "secret");
    }

    #[test]
    fn test_workers_seed_add_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkerStore::new(dir.path().join("workers.json"));

        let seeded = store.load().unwrap();
        assert_eq!(seeded.len(), DEFAULT_WORKERS.len());

        let after_add = store.add("Zaid Abbas").unwrap();
        assert_eq!(after_add.last().map(String::as_str), Some("Zaid Abbas"));
        assert_eq!(store.add("Zaid Abbas").unwrap().len(), after_add.len());

        let after_remove = store.remove("Zaid Abbas").unwrap();
        assert_eq!(after_remove, seeded);
        assert!(matches!(store.remove("Nobody"), Err(AutomationError::NotFound(_))));
    }

    #[test]
    fn test_token_store_last_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        assert!(store.current().is_none());

        store.save("eyJfirst").unwrap();
        store.save("eyJsecond").unwrap();

        assert_eq!(store.current().unwrap().token, "eyJsecond");

        let raw = std::fs::read_to_string(dir.path().join("token.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"token": "eyJsecond"}));
    }

    #[test]
    fn test_templates_reject_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path().join("form-templates"));

        store.save("task-42", &serde_json::json!({"components": []})).unwrap();
        assert_eq!(store.list().unwrap(), vec!["task-42.json"]);
        assert!(store.get("task-42.json").is_ok());
        assert!(matches!(store.get("task-42.txt"), Err(AutomationError::NotFound(_))));
        assert!(matches!(store.get("../accounts.json"), Err(AutomationError::NotFound(_))));
        assert!(store.save("///", &serde_json::json!({})).is_err());
    }
}

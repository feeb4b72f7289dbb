use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::models::Task;

const APP_DIR: &str = ".questify";
const TASKS_FILE: &str = "tasks.txt";
const CONFIG_FILE: &str = "config.properties";
const BACKUP_DIR: &str = "backups";
const BACKUP_LIMIT: usize = 5;

/// Joins the `id`, `title` and `done` fields of one record. Titles are not escaped.
pub const FIELD_SEPARATOR: &str = "||SEP||";

#[derive(Debug)]
pub enum StoreError {
    Load { path: PathBuf, source: io::Error },
    Save { path: PathBuf, source: io::Error },
    Json(serde_json::Error),
    Backup(String),
}

impl StoreError {
    fn load(path: &Path, source: io::Error) -> Self {
        StoreError::Load {
            path: path.to_path_buf(),
            source,
        }
    }

    fn save(path: &Path, source: io::Error) -> Self {
        StoreError::Save {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Load { path, source } => {
                write!(f, "failed to load {}: {source}", path.display())
            }
            StoreError::Save { path, source } => {
                write!(f, "failed to save {}: {source}", path.display())
            }
            StoreError::Json(err) => write!(f, "json error: {err}"),
            StoreError::Backup(message) => write!(f, "backup error: {message}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Load { source, .. } | StoreError::Save { source, .. } => Some(source),
            StoreError::Json(err) => Some(err),
            StoreError::Backup(_) => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        StoreError::Json(value)
    }
}

/// Locations of the per-user files. Everything lives side by side in one directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `~/.questify`, or `./.questify` when the home directory is unknown.
    pub fn from_home() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(APP_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.root.join(TASKS_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }
}

/// Persistence backend for the whole task list.
///
/// Both calls block. Implementations must be callable from any thread.
pub trait TaskStore: Send + Sync {
    /// Returns every stored task in stored order. A store that was never written is empty.
    fn load_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Replaces the stored list with `tasks`, keeping their order.
    fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub modified: i64,
}

/// Line-per-task flat file. Saves go through a temp file and a rename, one at a time.
pub struct FileTaskStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(BACKUP_DIR)
    }

    /// Copies the current task file into the backup directory and drops the oldest
    /// copies beyond the retention limit. Returns `None` when there is nothing to copy.
    pub fn create_backup(&self) -> Result<Option<String>, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.path.exists() {
            return Ok(None);
        }
        let dir = self.backup_dir();
        fs::create_dir_all(&dir).map_err(|err| StoreError::save(&dir, err))?;

        // Fixed-width timestamp plus counter, so names sort in creation order.
        let stem = self.backup_stem();
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S-%3f").to_string();
        let mut attempt = 0;
        let mut name = format!("{stem}-{timestamp}-{attempt:03}.txt");
        while dir.join(&name).exists() {
            attempt += 1;
            name = format!("{stem}-{timestamp}-{attempt:03}.txt");
        }

        let backup_path = dir.join(&name);
        fs::copy(&self.path, &backup_path).map_err(|err| StoreError::save(&backup_path, err))?;
        self.trim_backups()?;
        log::info!("backup created name={name}");
        Ok(Some(name))
    }

    /// Backups made by this store, oldest first. Other files in the backup
    /// directory are ignored. A missing backup directory means no backups.
    pub fn list_backups(&self) -> Result<Vec<BackupEntry>, StoreError> {
        let prefix = format!("{}-", self.backup_stem());
        let dir = self.backup_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::load(&dir, err)),
        };
        let mut results: Vec<BackupEntry> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                if !name.starts_with(&prefix) || !name.ends_with(".txt") {
                    return None;
                }
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|time| time.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|dur| dur.as_millis() as i64)
                    .unwrap_or(0);
                Some(BackupEntry { name, modified })
            })
            .collect();
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    /// Makes the named backup the current task list and returns its tasks.
    pub fn restore_backup(&self, name: &str) -> Result<Vec<Task>, StoreError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(StoreError::Backup(format!("invalid backup name: {name}")));
        }
        let path = self.backup_dir().join(name);
        if !path.is_file() {
            return Err(StoreError::Backup(format!("backup not found: {name}")));
        }
        let tasks = FileTaskStore::new(path).load_tasks()?;
        self.save_tasks(&tasks)?;
        log::info!("backup restored name={name} tasks={}", tasks.len());
        Ok(tasks)
    }

    fn backup_stem(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("tasks")
    }

    fn trim_backups(&self) -> Result<(), StoreError> {
        let entries = self.list_backups()?;
        let to_remove = entries.len().saturating_sub(BACKUP_LIMIT);
        let dir = self.backup_dir();
        for entry in entries.into_iter().take(to_remove) {
            let _ = fs::remove_file(dir.join(entry.name));
        }
        Ok(())
    }
}

impl TaskStore for FileTaskStore {
    fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::debug!("no task file yet path={}", self.path.display());
                return Ok(Vec::new());
            }
            Err(err) => return Err(StoreError::load(&self.path, err)),
        };
        let tasks = decode_tasks(&contents);
        log::debug!(
            "tasks loaded path={} count={}",
            self.path.display(),
            tasks.len()
        );
        Ok(tasks)
    }

    fn save_tasks(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let encoded = encode_tasks(tasks);
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        write_atomic(&self.path, encoded.as_bytes())?;
        log::debug!(
            "tasks saved path={} count={}",
            self.path.display(),
            tasks.len()
        );
        Ok(())
    }
}

pub fn encode_tasks(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        out.push_str(&encode_line(task));
        out.push('\n');
    }
    out
}

pub fn decode_tasks(contents: &str) -> Vec<Task> {
    contents.lines().filter_map(decode_line).collect()
}

fn encode_line(task: &Task) -> String {
    [task.id(), task.title(), if task.is_done() { "true" } else { "false" }]
        .join(FIELD_SEPARATOR)
}

// Lines with fewer than three fields are dropped. The third field keeps any extra separators.
fn decode_line(line: &str) -> Option<Task> {
    let mut parts = line.splitn(3, FIELD_SEPARATOR);
    let id = parts.next()?;
    let title = parts.next()?;
    let done = parts.next()?;
    Some(Task::with_id(id, title, done.eq_ignore_ascii_case("true")))
}

/// Writes the snapshot as pretty JSON for use outside the app.
pub fn export_json(path: &Path, tasks: &[Task]) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(tasks)?;
    write_atomic(path, &json)
}

/// Replaces `path` with `bytes` so readers see either the old or the new content.
///
/// Creates the parent directory when missing. The temp file sits next to the target
/// so the final rename never crosses a filesystem.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| StoreError::save(parent, err))?;
    }
    let temp_path = temp_path_for(path);
    {
        let mut file = File::create(&temp_path).map_err(|err| StoreError::save(path, err))?;
        file.write_all(bytes)
            .map_err(|err| StoreError::save(path, err))?;
        file.sync_all().map_err(|err| StoreError::save(path, err))?;
    }
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(StoreError::save(path, err));
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "questify".to_string());
    path.with_file_name(format!("{name}.tmp"))
}

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::ConfigStore;
use crate::events::SaveReport;
use crate::saver::SaveQueue;
use crate::state::{Board, BoardChange, BoardError};
use crate::storage::{export_json, FileTaskStore, StoreError, TaskStore};

pub const PRIVACY_NOTICE: &str = "\
Questify keeps everything on this computer. Your tasks are stored in a plain
text file and your preferences (including this acceptance) in a small
properties file, both in the .questify folder of your home directory.
Nothing is sent over the network.";

const HELP: &str = "\
commands:
  add <title>          add an active task
  edit <n> <title>     rename task n
  done <n>             complete task n, or reopen it if already completed
  rm <n>               delete task n
  list                 show both lists with their numbers
  xp                   show experience points
  backup               copy the task file into backups/
  backups              list backups, oldest first
  restore <name>       replace the task list with a backup
  export <path>        write the tasks as JSON
  help                 show this text
  quit                 leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Edit(usize, String),
    Toggle(usize),
    Delete(usize),
    List,
    Xp,
    Backup,
    Backups,
    Restore(String),
    Export(PathBuf),
    Help,
    Quit,
}

#[derive(Debug)]
pub enum CommandError {
    Usage(String),
    NoSuchTask(usize),
    Board(BoardError),
    Store(StoreError),
    Worker(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Usage(message) => write!(f, "{message}"),
            CommandError::NoSuchTask(position) => write!(f, "there is no task {position}"),
            CommandError::Board(err) => write!(f, "{err}"),
            CommandError::Store(err) => write!(f, "{err}"),
            CommandError::Worker(message) => write!(f, "background work failed: {message}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<BoardError> for CommandError {
    fn from(value: BoardError) -> Self {
        CommandError::Board(value)
    }
}

impl From<StoreError> for CommandError {
    fn from(value: StoreError) -> Self {
        CommandError::Store(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "add" => Command::Add(rest.to_string()),
        "edit" => {
            let (position, title) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| usage("edit <n> <title>"))?;
            Command::Edit(parse_position(position)?, title.trim().to_string())
        }
        "done" | "toggle" => Command::Toggle(parse_position(rest)?),
        "rm" | "delete" => Command::Delete(parse_position(rest)?),
        "list" | "ls" => Command::List,
        "xp" => Command::Xp,
        "backup" => Command::Backup,
        "backups" => Command::Backups,
        "restore" if !rest.is_empty() => Command::Restore(rest.to_string()),
        "restore" => return Err(usage("restore <name>")),
        "export" if !rest.is_empty() => Command::Export(PathBuf::from(rest)),
        "export" => return Err(usage("export <path>")),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "" => return Err(CommandError::Usage("type a command, or help".to_string())),
        other => {
            return Err(CommandError::Usage(format!(
                "unknown command: {other} (try help)"
            )))
        }
    };
    Ok(command)
}

fn parse_position(value: &str) -> Result<usize, CommandError> {
    value
        .trim()
        .parse()
        .map_err(|_| CommandError::Usage(format!("expected a task number, got {value:?}")))
}

fn usage(form: &str) -> CommandError {
    CommandError::Usage(format!("usage: {form}"))
}

/// Records the user's answer to the privacy notice. Returns whether it was accepted.
pub fn record_privacy_answer(config: &ConfigStore, answer: &str) -> Result<bool, StoreError> {
    let accepted = matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "accept"
    );
    if accepted {
        config.set_privacy_accepted(true)?;
    }
    Ok(accepted)
}

/// Runs a blocking store call on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, CommandError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| CommandError::Worker(err.to_string()))?
        .map_err(CommandError::from)
}

/// The board plus the stores it persists to. Every mutation queues a full snapshot save.
pub struct Session {
    board: Board,
    store: Arc<FileTaskStore>,
    config: Arc<ConfigStore>,
    saver: SaveQueue,
}

impl Session {
    /// Loads tasks and XP off the calling task and starts the save worker.
    pub async fn open(
        store: Arc<FileTaskStore>,
        config: Arc<ConfigStore>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SaveReport>), CommandError> {
        let loader = Arc::clone(&store);
        let xp_source = Arc::clone(&config);
        let (tasks, xp) =
            blocking(move || Ok((loader.load_tasks()?, xp_source.xp()))).await?;
        log::info!("session opened tasks={} xp={xp}", tasks.len());

        let board = Board::from_tasks(tasks, xp);
        let (saver, reports) = SaveQueue::start(store.clone());
        let session = Self {
            board,
            store,
            config,
            saver,
        };
        Ok((session, reports))
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub async fn execute(&mut self, command: Command) -> Result<Reply, CommandError> {
        let text = match command {
            Command::Add(title) => {
                let change = self.board.add(&title)?;
                self.persist(&change).await
            }
            Command::Edit(position, title) => {
                let id = self.id_at(position)?;
                let change = self.board.edit(&id, &title)?;
                self.persist(&change).await
            }
            Command::Toggle(position) => {
                let id = self.id_at(position)?;
                let change = self.board.toggle(&id)?;
                self.persist(&change).await
            }
            Command::Delete(position) => {
                let id = self.id_at(position)?;
                let change = self.board.delete(&id)?;
                self.persist(&change).await
            }
            Command::List => render_board(&self.board),
            Command::Xp => format!("XP: {}", self.board.xp()),
            Command::Backup => {
                self.saver.flush().await;
                let store = Arc::clone(&self.store);
                match blocking(move || store.create_backup()).await? {
                    Some(name) => format!("backup created: {name}"),
                    None => "nothing to back up yet".to_string(),
                }
            }
            Command::Backups => {
                let store = Arc::clone(&self.store);
                let entries = blocking(move || store.list_backups()).await?;
                if entries.is_empty() {
                    "no backups".to_string()
                } else {
                    entries
                        .iter()
                        .map(|entry| entry.name.as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            Command::Restore(name) => {
                self.saver.flush().await;
                let store = Arc::clone(&self.store);
                let tasks = blocking(move || store.restore_backup(&name)).await?;
                let change = self.board.replace(tasks);
                describe(&change, self.board.xp())
            }
            Command::Export(path) => {
                let snapshot = self.board.snapshot();
                let count = snapshot.len();
                let target = path.clone();
                blocking(move || export_json(&target, &snapshot)).await?;
                format!("exported {count} tasks to {}", path.display())
            }
            Command::Help => HELP.to_string(),
            Command::Quit => return Ok(Reply::Quit),
        };
        Ok(Reply::Text(text))
    }

    /// Waits until every queued save has been written or has failed.
    pub async fn flush(&self) {
        self.saver.flush().await;
    }

    pub async fn close(self) {
        self.saver.shutdown().await;
    }

    fn id_at(&self, position: usize) -> Result<String, CommandError> {
        self.board
            .task_at(position)
            .map(|task| task.id().to_string())
            .ok_or(CommandError::NoSuchTask(position))
    }

    /// Queues the snapshot save and stores XP, then describes the change.
    ///
    /// The board change stands even when XP cannot be written; the failure is
    /// appended to the reply as a warning.
    async fn persist(&self, change: &BoardChange) -> String {
        self.saver.submit(self.board.snapshot());
        let mut reply = describe(change, self.board.xp());
        if change.xp_delta() != 0 {
            let xp = self.board.xp();
            let config = Arc::clone(&self.config);
            if let Err(err) = blocking(move || config.set_xp(xp)).await {
                log::warn!("xp not saved xp={xp} err={err}");
                let _ = write!(reply, "\nwarning: XP was not saved: {err}");
            }
        }
        reply
    }
}

fn describe(change: &BoardChange, xp: i64) -> String {
    match change {
        BoardChange::Added(task) => format!("added: {task}"),
        BoardChange::Edited(task) => format!("renamed: {task}"),
        BoardChange::Toggled { task, xp_delta } => {
            let verb = if task.is_done() { "completed" } else { "reopened" };
            format!("{verb}: {task} ({xp_delta:+} XP, total {xp})")
        }
        BoardChange::Deleted(task) => format!("deleted: {task}"),
        BoardChange::Replaced { count } => format!("restored {count} tasks"),
    }
}

pub fn render_board(board: &Board) -> String {
    let mut out = String::new();
    let mut position = 1;
    for (heading, tasks) in [("Active", board.active()), ("Completed", board.completed())] {
        let _ = writeln!(out, "{heading}:");
        if tasks.is_empty() {
            let _ = writeln!(out, "  (none)");
        }
        for task in tasks {
            let _ = writeln!(out, "  {position}. {task}");
            position += 1;
        }
    }
    let _ = write!(out, "XP: {}", board.xp());
    out
}

use std::collections::HashSet;

use crate::models::Task;
use crate::storage::FIELD_SEPARATOR;

pub const XP_PER_COMPLETION: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    EmptyTitle,
    InvalidTitle(String),
    NotFound(String),
}

impl std::fmt::Display for BoardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoardError::EmptyTitle => write!(f, "title must not be empty"),
            BoardError::InvalidTitle(reason) => write!(f, "title must not contain {reason}"),
            BoardError::NotFound(id) => write!(f, "no task with id {id}"),
        }
    }
}

impl std::error::Error for BoardError {}

/// What an update did, so the caller knows what to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardChange {
    Added(Task),
    Edited(Task),
    Toggled { task: Task, xp_delta: i64 },
    Deleted(Task),
    Replaced { count: usize },
}

impl BoardChange {
    pub fn xp_delta(&self) -> i64 {
        match self {
            BoardChange::Toggled { xp_delta, .. } => *xp_delta,
            _ => 0,
        }
    }
}

/// The live task lists and XP counter, owned by the interactive loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Board {
    active: Vec<Task>,
    completed: Vec<Task>,
    xp: i64,
}

impl Board {
    /// Splits loaded tasks by completion, keeping their relative order.
    /// A repeated id keeps only its first occurrence.
    pub fn from_tasks(tasks: Vec<Task>, xp: i64) -> Self {
        let mut board = Self {
            xp,
            ..Self::default()
        };
        board.fill(tasks);
        board
    }

    pub fn active(&self) -> &[Task] {
        &self.active
    }

    pub fn completed(&self) -> &[Task] {
        &self.completed
    }

    pub fn xp(&self) -> i64 {
        self.xp
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Active tasks first, then completed ones. This is the order that gets saved.
    pub fn snapshot(&self) -> Vec<Task> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.active.iter().chain(self.completed.iter())
    }

    /// 1-based position in snapshot order.
    pub fn task_at(&self, position: usize) -> Option<&Task> {
        position.checked_sub(1).and_then(|index| self.iter().nth(index))
    }

    pub fn add(&mut self, title: &str) -> Result<BoardChange, BoardError> {
        let title = normalize_title(title)?;
        let task = Task::new(title);
        self.active.push(task.clone());
        Ok(BoardChange::Added(task))
    }

    pub fn edit(&mut self, id: &str, title: &str) -> Result<BoardChange, BoardError> {
        let title = normalize_title(title)?;
        let task = self
            .active
            .iter_mut()
            .chain(self.completed.iter_mut())
            .find(|task| task.id() == id)
            .ok_or_else(|| BoardError::NotFound(id.to_string()))?;
        task.set_title(title);
        Ok(BoardChange::Edited(task.clone()))
    }

    /// Completing moves the task to the end of the completed list and awards XP;
    /// reopening moves it to the end of the active list and takes the XP back.
    pub fn toggle(&mut self, id: &str) -> Result<BoardChange, BoardError> {
        if let Some(index) = self.active.iter().position(|task| task.id() == id) {
            let mut task = self.active.remove(index);
            task.set_done(true);
            self.completed.push(task.clone());
            self.xp += XP_PER_COMPLETION;
            return Ok(BoardChange::Toggled {
                task,
                xp_delta: XP_PER_COMPLETION,
            });
        }
        if let Some(index) = self.completed.iter().position(|task| task.id() == id) {
            let mut task = self.completed.remove(index);
            task.set_done(false);
            self.active.push(task.clone());
            self.xp -= XP_PER_COMPLETION;
            return Ok(BoardChange::Toggled {
                task,
                xp_delta: -XP_PER_COMPLETION,
            });
        }
        Err(BoardError::NotFound(id.to_string()))
    }

    pub fn delete(&mut self, id: &str) -> Result<BoardChange, BoardError> {
        for list in [&mut self.active, &mut self.completed] {
            if let Some(index) = list.iter().position(|task| task.id() == id) {
                return Ok(BoardChange::Deleted(list.remove(index)));
            }
        }
        Err(BoardError::NotFound(id.to_string()))
    }

    /// Swaps in a whole new task list, e.g. after restoring a backup. XP is kept.
    pub fn replace(&mut self, tasks: Vec<Task>) -> BoardChange {
        self.active.clear();
        self.completed.clear();
        self.fill(tasks);
        BoardChange::Replaced { count: self.len() }
    }

    fn fill(&mut self, tasks: Vec<Task>) {
        let mut seen = HashSet::new();
        for task in tasks {
            if !seen.insert(task.id().to_string()) {
                log::warn!("dropping task with repeated id={}", task.id());
                continue;
            }
            if task.is_done() {
                self.completed.push(task);
            } else {
                self.active.push(task);
            }
        }
    }
}

// Titles end up as one field of one line in the task file.
fn normalize_title(title: &str) -> Result<&str, BoardError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(BoardError::EmptyTitle);
    }
    if title.contains(FIELD_SEPARATOR) {
        return Err(BoardError::InvalidTitle(FIELD_SEPARATOR.to_string()));
    }
    if title.contains(['\n', '\r']) {
        return Err(BoardError::InvalidTitle("line breaks".to_string()));
    }
    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(Task::title).collect()
    }

    #[test]
    fn from_tasks_splits_by_done_and_keeps_order() {
        let board = Board::from_tasks(
            vec![
                Task::with_id("1", "a", true),
                Task::with_id("2", "b", false),
                Task::with_id("3", "c", true),
                Task::with_id("4", "d", false),
            ],
            20,
        );
        assert_eq!(titles(board.active()), vec!["b", "d"]);
        assert_eq!(titles(board.completed()), vec!["a", "c"]);
        assert_eq!(board.xp(), 20);
        assert_eq!(titles(&board.snapshot()), vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn from_tasks_drops_repeated_ids() {
        let board = Board::from_tasks(
            vec![
                Task::with_id("1", "first", false),
                Task::with_id("1", "second", true),
            ],
            0,
        );
        assert_eq!(board.len(), 1);
        assert_eq!(board.active()[0].title(), "first");
    }

    #[test]
    fn add_trims_and_rejects_blank_titles() {
        let mut board = Board::default();
        let change = board.add("  Buy milk ").unwrap();
        match change {
            BoardChange::Added(task) => {
                assert_eq!(task.title(), "Buy milk");
                assert!(!task.is_done());
            }
            other => panic!("unexpected change {other:?}"),
        }
        assert_eq!(board.add("   "), Err(BoardError::EmptyTitle));
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn add_rejects_titles_the_task_file_cannot_hold() {
        let mut board = Board::default();
        assert_eq!(
            board.add("call ||SEP|| mom"),
            Err(BoardError::InvalidTitle("||SEP||".to_string()))
        );
        assert_eq!(
            board.add("line1\nline2"),
            Err(BoardError::InvalidTitle("line breaks".to_string()))
        );
        assert_eq!(
            board.add("line1\rline2"),
            Err(BoardError::InvalidTitle("line breaks".to_string()))
        );
        assert!(board.is_empty());

        // Surrounding line breaks are trimmed away like other whitespace.
        board.add("\nok\r\n").unwrap();
        assert_eq!(board.active()[0].title(), "ok");
    }

    #[test]
    fn edit_rejects_titles_the_task_file_cannot_hold() {
        let mut board = Board::from_tasks(vec![Task::with_id("1", "a", false)], 0);
        assert!(matches!(
            board.edit("1", "a||SEP||b"),
            Err(BoardError::InvalidTitle(_))
        ));
        assert!(matches!(
            board.edit("1", "a\nb"),
            Err(BoardError::InvalidTitle(_))
        ));
        assert_eq!(board.active()[0].title(), "a");
    }

    #[test]
    fn accepted_titles_survive_a_save_and_reload() {
        use crate::storage::{FileTaskStore, TaskStore};

        let dir = tempfile::tempdir().unwrap();
        let store = FileTaskStore::new(dir.path().join("tasks.txt"));
        let mut board = Board::default();
        let id = match board.add("call | mom").unwrap() {
            BoardChange::Added(task) => task.id().to_string(),
            other => panic!("unexpected change {other:?}"),
        };
        board.toggle(&id).unwrap();
        assert!(board.add("line1\nline2").is_err());
        board.add("pay: bills = 2").unwrap();
        store.save_tasks(&board.snapshot()).unwrap();

        let reloaded = Board::from_tasks(store.load_tasks().unwrap(), board.xp());
        assert_eq!(reloaded, board);
    }

    #[test]
    fn edit_updates_title_in_either_list() {
        let mut board = Board::from_tasks(
            vec![Task::with_id("1", "a", false), Task::with_id("2", "b", true)],
            0,
        );
        board.edit("2", " renamed ").unwrap();
        assert_eq!(board.completed()[0].title(), "renamed");
        assert_eq!(board.completed()[0].id(), "2");
        assert_eq!(board.edit("2", ""), Err(BoardError::EmptyTitle));
        assert_eq!(
            board.edit("missing", "x"),
            Err(BoardError::NotFound("missing".to_string()))
        );
    }

    #[test]
    fn toggle_moves_tasks_and_adjusts_xp() {
        let mut board = Board::from_tasks(
            vec![
                Task::with_id("1", "a", false),
                Task::with_id("2", "b", false),
                Task::with_id("3", "c", true),
            ],
            0,
        );

        let change = board.toggle("1").unwrap();
        assert_eq!(change.xp_delta(), XP_PER_COMPLETION);
        assert_eq!(titles(board.active()), vec!["b"]);
        assert_eq!(titles(board.completed()), vec!["c", "a"]);
        assert!(board.completed()[1].is_done());
        assert_eq!(board.xp(), 10);

        let change = board.toggle("3").unwrap();
        assert_eq!(change.xp_delta(), -XP_PER_COMPLETION);
        assert_eq!(titles(board.active()), vec!["b", "c"]);
        assert!(!board.active()[1].is_done());
        assert_eq!(board.xp(), 0);

        board.toggle("1").unwrap();
        assert_eq!(board.xp(), -10);

        assert!(board.toggle("missing").is_err());
    }

    #[test]
    fn delete_removes_from_either_list() {
        let mut board = Board::from_tasks(
            vec![Task::with_id("1", "a", false), Task::with_id("2", "b", true)],
            0,
        );
        assert!(matches!(board.delete("2"), Ok(BoardChange::Deleted(task)) if task.id() == "2"));
        assert!(board.completed().is_empty());
        board.delete("1").unwrap();
        assert!(board.is_empty());
        assert!(board.delete("1").is_err());
    }

    #[test]
    fn task_at_is_one_based_over_snapshot_order() {
        let board = Board::from_tasks(
            vec![Task::with_id("1", "done", true), Task::with_id("2", "open", false)],
            0,
        );
        assert_eq!(board.task_at(0), None);
        assert_eq!(board.task_at(1).map(Task::id), Some("2"));
        assert_eq!(board.task_at(2).map(Task::id), Some("1"));
        assert_eq!(board.task_at(3), None);
    }

    #[test]
    fn replace_keeps_xp() {
        let mut board = Board::from_tasks(vec![Task::with_id("1", "a", false)], 40);
        let change = board.replace(vec![Task::with_id("9", "z", true), Task::with_id("8", "y", false)]);
        assert_eq!(change, BoardChange::Replaced { count: 2 });
        assert_eq!(board.xp(), 40);
        assert_eq!(titles(&board.snapshot()), vec!["y", "z"]);
    }
}

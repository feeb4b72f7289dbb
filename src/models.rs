use std::fmt;

use serde::Serialize;
use uuid::Uuid;

pub const KEY_PRIVACY_ACCEPTED: &str = "privacyAccepted";
pub const KEY_XP: &str = "xp";

/// A single entry on the board. The id is assigned once and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    id: String,
    title: String,
    done: bool,
}

impl Task {
    /// Creates an active task with a fresh random id.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            done: false,
        }
    }

    /// Rebuilds a task whose id was assigned earlier, e.g. one read back from disk.
    pub fn with_id(id: impl Into<String>, title: impl Into<String>, done: bool) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            done,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_done(&mut self, done: bool) {
        self.done = done;
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.done { "[x]" } else { "[ ]" };
        write!(f, "{mark} {}", self.title)
    }
}

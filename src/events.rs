use std::fmt;

/// Outcome of one queued save, sent back to the interactive loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveReport {
    Saved { seq: u64, count: usize },
    Failed { seq: u64, error: String },
}

impl SaveReport {
    pub fn seq(&self) -> u64 {
        match self {
            SaveReport::Saved { seq, .. } | SaveReport::Failed { seq, .. } => *seq,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SaveReport::Failed { .. })
    }
}

impl fmt::Display for SaveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveReport::Saved { seq, count } => write!(f, "save #{seq} wrote {count} tasks"),
            SaveReport::Failed { seq, error } => {
                write!(f, "save #{seq} failed, changes are only in memory: {error}")
            }
        }
    }
}

//! Pending-work state read from disk.
//!
//! The engine edits the task file between iterations, so a
//! [`TaskSource`] never caches: every call re-reads storage.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reading or validating a task source.
#[derive(Debug, Error)]
pub enum TaskSourceError {
    #[error("failed to read task file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse task file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("task file must contain at least one task")]
    NoTasks,

    #[error("task at position {0} has an empty id")]
    EmptyId(usize),

    #[error("duplicate task id: {0:?}")]
    DuplicateId(String),
}

/// One unit of pending work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub acceptance: Vec<String>,
}

impl WorkItem {
    /// `id title`, for headers and logs.
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            self.id.clone()
        } else {
            format!("{} {}", self.id, self.title)
        }
    }
}

/// Authoritative source of pending work.
pub trait TaskSource: Send + Sync {
    /// The first pending unit of work, or `None` when everything is done.
    fn next_pending(&self) -> Result<Option<WorkItem>, TaskSourceError>;

    /// Number of units still pending.
    fn pending_count(&self) -> Result<usize, TaskSourceError>;

    /// Where the work list lives, as the engine should be told.
    fn location(&self) -> String;
}

// ---------------------------------------------------------------------------
// TOML task file
// ---------------------------------------------------------------------------

/// Top-level structure of a task file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskList {
    #[serde(default)]
    pub project: ProjectMeta,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

/// `[project]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectMeta {
    #[serde(default)]
    pub name: String,
}

/// A single `[[tasks]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Checks the engine should satisfy before marking the task done.
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub done: bool,
}

impl From<&TaskEntry> for WorkItem {
    fn from(entry: &TaskEntry) -> Self {
        WorkItem {
            id: entry.id.clone(),
            title: entry.title.clone(),
            description: entry.description.clone(),
            acceptance: entry.acceptance.clone(),
        }
    }
}

impl TaskList {
    /// Parse and validate task file contents.
    pub fn parse(content: &str, path: &Path) -> Result<Self, TaskSourceError> {
        let list: TaskList = toml::from_str(content).map_err(|source| TaskSourceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        list.validate()?;
        Ok(list)
    }

    fn validate(&self) -> Result<(), TaskSourceError> {
        if self.tasks.is_empty() {
            return Err(TaskSourceError::NoTasks);
        }
        let mut seen = HashSet::new();
        for (i, task) in self.tasks.iter().enumerate() {
            let id = task.id.trim();
            if id.is_empty() {
                return Err(TaskSourceError::EmptyId(i + 1));
            }
            if !seen.insert(id) {
                return Err(TaskSourceError::DuplicateId(id.to_string()));
            }
        }
        Ok(())
    }

    /// Pending tasks in file order.
    pub fn pending(&self) -> impl Iterator<Item = &TaskEntry> {
        self.tasks.iter().filter(|t| !t.done)
    }
}

/// A TOML task file on disk.
#[derive(Debug, Clone)]
pub struct TaskFile {
    path: PathBuf,
}

impl TaskFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the file as it is right now.
    pub fn load(&self) -> Result<TaskList, TaskSourceError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| {
            TaskSourceError::Read {
                path: self.path.clone(),
                source,
            }
        })?;
        TaskList::parse(&content, &self.path)
    }
}

impl TaskSource for TaskFile {
    fn next_pending(&self) -> Result<Option<WorkItem>, TaskSourceError> {
        Ok(self.load()?.pending().next().map(WorkItem::from))
    }

    fn pending_count(&self) -> Result<usize, TaskSourceError> {
        Ok(self.load()?.pending().count())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

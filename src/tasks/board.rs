use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::{AnalyzeResponse, PipelineStep, Task};
use crate::error::{Error, Result};

/// Notice shown when `/analyze` returned no `tasks` array.
pub const NO_SUBTASKS: &str = "no subtasks detected";

static HEADER_OP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"—\s*(\S+)").expect("valid regex"));

/// Dispatch state of a single card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStatus {
    #[default]
    Pending,
    Dispatching,
    Done,
    Failed,
}

impl TaskStatus {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatching => "dispatching...",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A rendered subtask.
///
/// The card keeps the task's original JSON so a pipeline rebuilt from the
/// board carries every field the backend sent, `target_node` included.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCard {
    header: String,
    body: String,
    pub status: TaskStatus,
    raw: Option<String>,
}

impl TaskCard {
    /// Renders `task` as card number `n` (1-based).
    #[must_use]
    pub fn new(n: usize, task: &Task) -> Self {
        let target = task.target_node.as_deref().unwrap_or("local");
        Self {
            header: format!("Task {n} — {} (target: {target})", task.op),
            body: serde_json::to_string_pretty(&task.params).unwrap_or_else(|_| "null".to_string()),
            status: TaskStatus::Pending,
            raw: serde_json::to_string(task).ok(),
        }
    }

    /// Rebuilds a card from its rendered text alone, with no retained task.
    #[must_use]
    pub fn from_rendered(header: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            body: body.into(),
            status: TaskStatus::Pending,
            raw: None,
        }
    }

    #[must_use]
    pub fn header(&self) -> &str {
        &self.header
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The task behind this card, as position `idx` (0-based) on the board.
    ///
    /// Prefers the retained JSON. Without it the task is recovered from the
    /// rendered text, which loses `target_node`; `op` falls back to
    /// `op{idx}` and unparseable params to `{}`.
    #[must_use]
    pub fn task(&self, idx: usize) -> Task {
        if let Some(task) = self
            .raw
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Task>(raw).ok())
        {
            return task;
        }

        let op = HEADER_OP_RE
            .captures(&self.header)
            .map_or_else(|| format!("op{idx}"), |c| c[1].to_string());
        let params = serde_json::from_str::<Value>(&self.body)
            .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));
        Task {
            id: None,
            op,
            params,
            target_node: None,
        }
    }
}

/// The cards produced by the last analyze.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskBoard {
    cards: Vec<TaskCard>,
    notice: Option<String>,
}

impl TaskBoard {
    /// Renders an analyze response. A response without `tasks` yields an
    /// empty board carrying [`NO_SUBTASKS`].
    #[must_use]
    pub fn render(response: &AnalyzeResponse) -> Self {
        match &response.tasks {
            Some(tasks) => Self {
                cards: tasks
                    .iter()
                    .enumerate()
                    .map(|(i, task)| TaskCard::new(i + 1, task))
                    .collect(),
                notice: None,
            },
            None => Self {
                cards: Vec::new(),
                notice: Some(NO_SUBTASKS.to_string()),
            },
        }
    }

    /// Builds a board from existing cards.
    #[must_use]
    pub const fn from_cards(cards: Vec<TaskCard>) -> Self {
        Self {
            cards,
            notice: None,
        }
    }

    #[must_use]
    pub fn cards(&self) -> &[TaskCard] {
        &self.cards
    }

    pub fn card_mut(&mut self, idx: usize) -> Option<&mut TaskCard> {
        self.cards.get_mut(idx)
    }

    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// The pipeline for every card, in board order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyPipeline`] when the board has no cards.
    pub fn pipeline(&self) -> Result<Vec<PipelineStep>> {
        if self.cards.is_empty() {
            return Err(Error::EmptyPipeline);
        }
        Ok(self
            .cards
            .iter()
            .enumerate()
            .map(|(idx, card)| PipelineStep::from(card.task(idx)))
            .collect())
    }
}

/// Timestamped activity lines, newest last.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    lines: Vec<String>,
}

impl ActivityLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `[HH:MM:SS] msg` and mirrors it to the log.
    pub fn push(&mut self, msg: impl fmt::Display) {
        let msg = msg.to_string();
        log::info!("{msg}");
        let at = chrono::Local::now().format("%H:%M:%S");
        self.lines.push(format!("[{at}] {msg}"));
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }
}

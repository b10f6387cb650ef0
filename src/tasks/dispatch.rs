use std::sync::Arc;

use serde_json::Value;

use super::board::{ActivityLog, TaskBoard, TaskStatus};
use super::{PipelineReceipt, TaskBackend};
use crate::error::{Error, Result};

/// Drives analyze, single dispatch and pipeline submission against a backend,
/// keeping the board and activity log in step.
pub struct Dispatcher {
    backend: Arc<dyn TaskBackend>,
    board: TaskBoard,
    log: ActivityLog,
    last_receipt: Option<PipelineReceipt>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(backend: Arc<dyn TaskBackend>) -> Self {
        Self {
            backend,
            board: TaskBoard::default(),
            log: ActivityLog::new(),
            last_receipt: None,
        }
    }

    /// Switches backends, e.g. toggling mock mode. The board is kept.
    pub fn set_backend(&mut self, backend: Arc<dyn TaskBackend>) {
        self.backend = backend;
    }

    #[must_use]
    pub fn is_mock(&self) -> bool {
        self.backend.is_mock()
    }

    #[must_use]
    pub const fn board(&self) -> &TaskBoard {
        &self.board
    }

    #[must_use]
    pub const fn log(&self) -> &ActivityLog {
        &self.log
    }

    #[must_use]
    pub const fn last_receipt(&self) -> Option<&PipelineReceipt> {
        self.last_receipt.as_ref()
    }

    /// Analyzes a command and renders the result onto a fresh board.
    ///
    /// Non-blank `file_text` wins over `typed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyCommand`] if both are blank, or the backend error.
    pub async fn analyze(&mut self, file_text: Option<&str>, typed: &str) -> Result<&TaskBoard> {
        self.board = TaskBoard::default();
        let command = file_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| typed.trim());
        if command.is_empty() {
            return Err(Error::EmptyCommand);
        }

        self.log.push("Analyzing command...");
        if self.backend.is_mock() {
            self.log.push("Using mock response");
        }
        match self.backend.analyze(command).await {
            Ok(response) => {
                self.board = TaskBoard::render(&response);
                self.log.push("Analysis complete");
                Ok(&self.board)
            }
            Err(e) => {
                self.log.push(format!("Analyze failed: {e}"));
                Err(e)
            }
        }
    }

    /// Dispatches card `idx` (0-based) on its own.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] for an unknown card, or the backend
    /// error after marking the card failed.
    pub async fn dispatch(&mut self, idx: usize) -> Result<Value> {
        let Some(card) = self.board.card_mut(idx) else {
            return Err(Error::InvalidState(format!("no task card {}", idx + 1)));
        };
        let task = card.task(idx);
        card.status = TaskStatus::Dispatching;

        if self.backend.is_mock() {
            self.log.push(format!("Mock dispatch of task {}", task.op));
        }
        let outcome = self.backend.dispatch(&task).await;

        let status = if outcome.is_ok() {
            TaskStatus::Done
        } else {
            TaskStatus::Failed
        };
        if let Some(card) = self.board.card_mut(idx) {
            card.status = status;
        }
        match &outcome {
            Ok(result) => self.log.push(format!("Task {} done: {result}", task.op)),
            Err(e) => self.log.push(format!("Dispatch failed: {e}")),
        }
        outcome
    }

    /// Submits every card as one pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyPipeline`] for an empty board, or the backend
    /// error (including its response body).
    pub async fn submit_pipeline(&mut self) -> Result<&PipelineReceipt> {
        let steps = self.board.pipeline()?;

        self.log.push("Submitting pipeline to /task");
        match self.backend.submit_pipeline(&steps).await {
            Ok(receipt) => {
                self.log
                    .push(format!("Submitted, task_id={}", receipt.task_id()));
                if receipt.final_state.is_some() {
                    self.log.push("final_state received");
                }
                Ok(self.last_receipt.insert(receipt))
            }
            Err(e) => {
                self.log.push(format!("Submit failed: {e}"));
                Err(e)
            }
        }
    }
}

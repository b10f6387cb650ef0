//! Task dispatch: analyze a command into subtasks, render them as cards and
//! send them to the backend one at a time or as a pipeline.

mod backend;
mod board;
mod dispatch;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use backend::{HttpTaskBackend, MockTaskBackend, TaskBackend, mock_analyze};
pub use board::{ActivityLog, NO_SUBTASKS, TaskBoard, TaskCard, TaskStatus};
pub use dispatch::Dispatcher;

/// One subtask returned by `/analyze`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Task {
    /// Passed through as sent; backends use both strings and numbers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub params: Value,
    /// Node the task should run on; `None` means local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
}

/// Body of a successful `/analyze` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    /// Absent when the backend detected no subtasks.
    #[serde(default)]
    pub tasks: Option<Vec<Task>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

/// One entry of a submitted pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub op: String,
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
}

impl From<Task> for PipelineStep {
    fn from(task: Task) -> Self {
        let params = if task.params.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            task.params
        };
        Self {
            op: task.op,
            params,
            target_node: task.target_node,
        }
    }
}

/// Poems produced by a synchronously completed pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FinalState {
    #[serde(default)]
    pub english_poem: Option<String>,
    #[serde(default)]
    pub chinese_poem: Option<String>,
}

impl FinalState {
    const NONE: &str = "(none)";

    #[must_use]
    pub fn english(&self) -> &str {
        Self::or_none(self.english_poem.as_deref())
    }

    #[must_use]
    pub fn chinese(&self) -> &str {
        Self::or_none(self.chinese_poem.as_deref())
    }

    fn or_none(poem: Option<&str>) -> &str {
        poem.filter(|p| !p.is_empty()).unwrap_or(Self::NONE)
    }
}

/// Backend acknowledgement of a submitted pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineReceipt {
    #[serde(default)]
    pub task_id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_state: Option<FinalState>,
}

impl PipelineReceipt {
    /// The task id as text, without JSON quoting.
    #[must_use]
    pub fn task_id(&self) -> String {
        match &self.task_id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pipeline_step_defaults_params_to_object() {
        let step = PipelineStep::from(Task {
            op: "noop".to_string(),
            ..Task::default()
        });
        assert_eq!(step.params, json!({}));
        assert_eq!(serde_json::to_value(&step).unwrap(), json!({"op": "noop", "params": {}}));
    }

    #[test]
    fn analyze_response_accepts_numeric_task_ids() {
        let resp: AnalyzeResponse = serde_json::from_str(
            r#"{"tasks":[{"id":1,"op":"generate_poem_en","params":{},"target_node":"nodeA"},
                         {"id":"t2","op":"translate_zh","params":{}}]}"#,
        )
        .unwrap();
        let tasks = resp.tasks.unwrap();
        assert_eq!(tasks[0].id, Some(json!(1)));
        assert_eq!(tasks[0].target_node.as_deref(), Some("nodeA"));
        assert_eq!(tasks[1].id, Some(json!("t2")));
    }

    #[test]
    fn final_state_defaults_to_none() {
        let state: FinalState =
            serde_json::from_value(json!({"english_poem": "Leaves fall", "chinese_poem": ""}))
                .unwrap();
        assert_eq!(state.english(), "Leaves fall");
        assert_eq!(state.chinese(), "(none)");
    }

    #[test]
    fn receipt_task_id_accepts_strings_and_numbers() {
        let r: PipelineReceipt = serde_json::from_value(json!({"task_id": "abc"})).unwrap();
        assert_eq!(r.task_id(), "abc");
        let r: PipelineReceipt = serde_json::from_value(json!({"task_id": 42})).unwrap();
        assert_eq!(r.task_id(), "42");
        assert!(r.final_state.is_none());
    }

    #[test]
    fn analyze_response_without_tasks() {
        let resp: AnalyzeResponse = serde_json::from_value(json!({"info": "nothing"})).unwrap();
        assert!(resp.tasks.is_none());
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{AnalyzeResponse, PipelineReceipt, PipelineStep, Task};
use crate::config::TaskConfig;
use crate::error::{Error, Result};
use crate::network::build_http_client;

const TOKEN_HEADER: &str = "X-User-Token";

/// The `/analyze` and `/task` endpoints.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Splits `command` into subtasks.
    async fn analyze(&self, command: &str) -> Result<AnalyzeResponse>;

    /// Runs a single subtask and returns the backend's JSON result.
    async fn dispatch(&self, task: &Task) -> Result<Value>;

    /// Submits the whole pipeline in one request.
    async fn submit_pipeline(&self, steps: &[PipelineStep]) -> Result<PipelineReceipt>;

    /// Whether responses are canned rather than fetched.
    fn is_mock(&self) -> bool {
        false
    }
}

/// Talks to the real backend.
#[derive(Debug, Clone)]
pub struct HttpTaskBackend {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTaskBackend {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &TaskConfig) -> Result<Self> {
        Ok(Self::with_client(build_http_client()?, config))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, config: &TaskConfig) -> Self {
        let token = config.token.trim();
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: (!token.is_empty()).then(|| token.to_string()),
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let mut req = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body);
        if let Some(token) = &self.token {
            req = req.header(TOKEN_HEADER, token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(Error::Backend {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl TaskBackend for HttpTaskBackend {
    async fn analyze(&self, command: &str) -> Result<AnalyzeResponse> {
        let value = self.post("/analyze", &json!({ "command": command })).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn dispatch(&self, task: &Task) -> Result<Value> {
        let step = PipelineStep::from(task.clone());
        let body = json!({ "op": step.op, "params": step.params, "state": {} });
        self.post("/task", &body).await
    }

    async fn submit_pipeline(&self, steps: &[PipelineStep]) -> Result<PipelineReceipt> {
        let value = self.post("/task", &json!({ "pipeline": steps })).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// The canned two-step split: an English poem on `nodeA`, translated on `nodeB`.
#[must_use]
pub fn mock_analyze(command: &str) -> AnalyzeResponse {
    AnalyzeResponse {
        tasks: Some(vec![
            Task {
                id: Some(json!("t1")),
                op: "generate_poem_en".to_string(),
                params: json!({ "prompt": format!("Generate an English poem about: {command}") }),
                target_node: Some("nodeA".to_string()),
            },
            Task {
                id: Some(json!("t2")),
                op: "translate_zh".to_string(),
                params: json!({ "text_var": "english_poem" }),
                target_node: Some("nodeB".to_string()),
            },
        ]),
        info: Some("mock split: English poem -> Chinese translation".to_string()),
    }
}

/// Answers analyze and single dispatch locally after a short delay.
///
/// Pipeline submits always go to `live`; mock mode never fakes a run.
#[derive(Clone)]
pub struct MockTaskBackend {
    live: Arc<dyn TaskBackend>,
    analyze_delay: Duration,
    dispatch_delay: Duration,
}

impl MockTaskBackend {
    #[must_use]
    pub fn new(live: Arc<dyn TaskBackend>) -> Self {
        Self {
            live,
            analyze_delay: Duration::from_millis(500),
            dispatch_delay: Duration::from_millis(700),
        }
    }

    #[must_use]
    pub const fn with_delays(mut self, analyze: Duration, dispatch: Duration) -> Self {
        self.analyze_delay = analyze;
        self.dispatch_delay = dispatch;
        self
    }
}

#[async_trait]
impl TaskBackend for MockTaskBackend {
    async fn analyze(&self, command: &str) -> Result<AnalyzeResponse> {
        let response = mock_analyze(command);
        tokio::time::sleep(self.analyze_delay).await;
        Ok(response)
    }

    async fn dispatch(&self, task: &Task) -> Result<Value> {
        tokio::time::sleep(self.dispatch_delay).await;
        Ok(json!({ "ok": true, "result": { "mock": "ok", "op": task.op } }))
    }

    async fn submit_pipeline(&self, steps: &[PipelineStep]) -> Result<PipelineReceipt> {
        self.live.submit_pipeline(steps).await
    }

    fn is_mock(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn spawn_backend(seen: Seen) -> String {
        let record = move |headers: HeaderMap, axum::Json(body): axum::Json<Value>| {
            let seen = seen.clone();
            async move {
                let token = headers
                    .get(TOKEN_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(ToString::to_string);
                seen.lock().unwrap().push((token, body.clone()));
                if body.get("pipeline").is_some() {
                    (
                        StatusCode::OK,
                        axum::Json(json!({"task_id": "p-1", "final_state": {"english_poem": "Autumn"}})),
                    )
                } else if body.get("command").is_some() {
                    (
                        StatusCode::OK,
                        axum::Json(serde_json::to_value(mock_analyze("x")).unwrap()),
                    )
                } else if body["op"] == "explode" {
                    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(json!({"error": "boom"})))
                } else {
                    (StatusCode::OK, axum::Json(json!({"ok": true})))
                }
            }
        };
        let app = Router::new()
            .route("/analyze", post(record.clone()))
            .route("/task", post(record));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(base_url: &str, token: &str) -> TaskConfig {
        TaskConfig {
            base_url: base_url.to_string(),
            token: token.to_string(),
            mock: false,
        }
    }

    #[tokio::test]
    async fn analyze_sends_command_and_trimmed_token() {
        let seen: Seen = Arc::default();
        let url = spawn_backend(seen.clone()).await;
        let backend = HttpTaskBackend::new(&config(&url, "  secret  ")).unwrap();

        let resp = backend.analyze("write a poem").await.unwrap();
        assert_eq!(resp.tasks.unwrap().len(), 2);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0.as_deref(), Some("secret"));
        assert_eq!(seen[0].1, json!({"command": "write a poem"}));
    }

    #[tokio::test]
    async fn blank_token_sends_no_header() {
        let seen: Seen = Arc::default();
        let url = spawn_backend(seen.clone()).await;
        let backend = HttpTaskBackend::new(&config(&url, "   ")).unwrap();

        backend
            .dispatch(&Task {
                op: "noop".to_string(),
                ..Task::default()
            })
            .await
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, None);
        assert_eq!(seen[0].1, json!({"op": "noop", "params": {}, "state": {}}));
    }

    #[tokio::test]
    async fn error_status_becomes_backend_error() {
        let url = spawn_backend(Arc::default()).await;
        let backend = HttpTaskBackend::new(&config(&url, "")).unwrap();

        let err = backend
            .dispatch(&Task {
                op: "explode".to_string(),
                ..Task::default()
            })
            .await
            .unwrap_err();
        match err {
            Error::Backend { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn pipeline_receipt_includes_final_state() {
        let seen: Seen = Arc::default();
        let url = spawn_backend(seen.clone()).await;
        let backend = HttpTaskBackend::new(&config(&url, "")).unwrap();

        let steps = vec![PipelineStep {
            op: "generate_poem_en".to_string(),
            params: json!({}),
            target_node: Some("nodeA".to_string()),
        }];
        let receipt = backend.submit_pipeline(&steps).await.unwrap();
        assert_eq!(receipt.task_id(), "p-1");
        let state = receipt.final_state.unwrap();
        assert_eq!(state.english(), "Autumn");
        assert_eq!(state.chinese(), "(none)");

        let body = &seen.lock().unwrap()[0].1;
        assert_eq!(body["pipeline"][0]["target_node"], "nodeA");
    }

    #[tokio::test(start_paused = true)]
    async fn mock_backend_waits_and_answers_locally() {
        let live = HttpTaskBackend::new(&config("http://127.0.0.1:9", "")).unwrap();
        let backend = MockTaskBackend::new(Arc::new(live));
        assert!(backend.is_mock());

        let started = tokio::time::Instant::now();
        let resp = backend.analyze("autumn").await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        let tasks = resp.tasks.unwrap();
        assert_eq!(tasks[0].params["prompt"], "Generate an English poem about: autumn");

        let started = tokio::time::Instant::now();
        let result = backend.dispatch(&tasks[1]).await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(700));
        assert_eq!(result, json!({"ok": true, "result": {"mock": "ok", "op": "translate_zh"}}));
    }

    #[tokio::test]
    async fn mock_backend_submits_pipeline_to_live_backend() {
        let seen: Seen = Arc::default();
        let url = spawn_backend(seen.clone()).await;
        let live = HttpTaskBackend::new(&config(&url, "")).unwrap();
        let backend = MockTaskBackend::new(Arc::new(live))
            .with_delays(Duration::ZERO, Duration::ZERO);

        let steps: Vec<PipelineStep> = mock_analyze("autumn")
            .tasks
            .unwrap()
            .into_iter()
            .map(PipelineStep::from)
            .collect();
        let receipt = backend.submit_pipeline(&steps).await.unwrap();
        assert_eq!(receipt.task_id(), "p-1");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1["pipeline"][1]["op"], "translate_zh");
    }

    #[tokio::test]
    async fn dispatch_without_params_sends_empty_object() {
        let seen: Seen = Arc::default();
        let url = spawn_backend(seen.clone()).await;
        let backend = HttpTaskBackend::new(&config(&url, "")).unwrap();

        let task: Task = serde_json::from_value(json!({"op": "noop", "target_node": "nodeA"})).unwrap();
        backend.dispatch(&task).await.unwrap();
        assert_eq!(seen.lock().unwrap()[0].1["params"], json!({}));
    }
}

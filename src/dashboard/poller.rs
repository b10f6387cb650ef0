use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{DashboardView, InfoPayload, NodeStatus};
use crate::config::DashboardConfig;
use crate::error::{Error, Result};
use crate::network::build_http_client;

/// Source of `/info` and `/nodes` payloads.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn info(&self) -> Result<InfoPayload>;
    async fn nodes(&self) -> Result<Vec<NodeStatus>>;
}

/// Reads telemetry from the backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTelemetry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTelemetry {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self::with_client(build_http_client()?, base_url))
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Backend {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetry {
    async fn info(&self) -> Result<InfoPayload> {
        self.get_json("/info").await
    }

    async fn nodes(&self) -> Result<Vec<NodeStatus>> {
        self.get_json("/nodes").await
    }
}

/// Draws a [`DashboardView`].
pub trait Renderer {
    fn render(&mut self, view: &DashboardView);
}

/// Writes each view as plain text lines.
#[derive(Debug)]
pub struct PlainRenderer<W> {
    out: W,
}

impl<W: Write> PlainRenderer<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_view(&mut self, view: &DashboardView) -> std::io::Result<()> {
        writeln!(
            self.out,
            "[{}] CPU: {}% Battery: {}%",
            view.clock, view.cpu, view.battery
        )?;
        for line in &view.nodes {
            writeln!(self.out, "  {line}")?;
        }
        self.out.flush()
    }
}

impl<W: Write> Renderer for PlainRenderer<W> {
    fn render(&mut self, view: &DashboardView) {
        if let Err(e) = self.write_view(view) {
            log::warn!("Failed to render dashboard: {e}");
        }
    }
}

async fn within<T>(limit: Option<Duration>, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout)?,
        None => fut.await,
    }
}

/// Periodic `/info` + `/nodes` poller.
pub struct Poller {
    source: Arc<dyn TelemetrySource>,
    config: DashboardConfig,
    view: DashboardView,
}

impl Poller {
    #[must_use]
    pub fn new(source: Arc<dyn TelemetrySource>, config: DashboardConfig) -> Self {
        Self {
            source,
            config,
            view: DashboardView::default(),
        }
    }

    #[must_use]
    pub const fn view(&self) -> &DashboardView {
        &self.view
    }

    /// Runs one update cycle and returns the rebuilt view.
    ///
    /// Both requests run concurrently; a failure in one never affects the
    /// other. On failure the guarded mode shows placeholders while the basic
    /// mode keeps the previous values.
    pub async fn cycle(&mut self) -> &DashboardView {
        let limit = self.config.request_timeout();
        let (info, nodes) = tokio::join!(
            within(limit, self.source.info()),
            within(limit, self.source.nodes()),
        );
        let guarded = self.config.placeholder_on_error;

        match info {
            Ok(info) => self.view.show_info(&info),
            Err(e) => {
                log::warn!("Failed to update /info: {e}");
                if guarded {
                    self.view.show_placeholder_info();
                }
            }
        }
        match nodes {
            Ok(nodes) => self.view.show_nodes(&nodes),
            Err(e) => {
                log::warn!("Failed to update /nodes: {e}");
                if guarded {
                    self.view.nodes.clear();
                }
            }
        }

        self.view.clock = chrono::Local::now().format("%H:%M:%S").to_string();
        self.view.cycles += 1;
        &self.view
    }

    /// Cycles on the configured interval until `cancel` fires, rendering
    /// each view. The first cycle runs immediately.
    pub async fn run<R: Renderer + ?Sized>(&mut self, renderer: &mut R, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        log::info!(
            "Polling {} every {} ms",
            self.config.base_url,
            self.config.interval_ms
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        view = self.cycle() => renderer.render(view),
                    }
                }
            }
        }
        log::info!("Dashboard stopped after {} cycle(s)", self.view.cycles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::PLACEHOLDER;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Telemetry whose `/info` can be made to hang or fail.
    #[derive(Default)]
    struct ScriptedTelemetry {
        hang_info: AtomicBool,
        fail_all: AtomicBool,
    }

    #[async_trait]
    impl TelemetrySource for ScriptedTelemetry {
        async fn info(&self) -> Result<InfoPayload> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(Error::Backend {
                    status: 500,
                    body: String::new(),
                });
            }
            if self.hang_info.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(serde_json::from_str(r#"{"cpu": 33, "battery": 71}"#).unwrap())
        }

        async fn nodes(&self) -> Result<Vec<NodeStatus>> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(Error::Timeout);
            }
            Ok(serde_json::from_str(
                r#"[{"id": "nodeA", "cpu": 10, "battery": 90},
                    {"id": "nodeB", "cpu": 20, "battery": 80}]"#,
            )
            .unwrap())
        }
    }

    struct Recorder {
        seen: Arc<Mutex<Vec<(tokio::time::Instant, DashboardView)>>>,
        stop_after: usize,
        cancel: CancellationToken,
    }

    impl Renderer for Recorder {
        fn render(&mut self, view: &DashboardView) {
            let mut seen = self.seen.lock().unwrap();
            seen.push((tokio::time::Instant::now(), view.clone()));
            if seen.len() >= self.stop_after {
                self.cancel.cancel();
            }
        }
    }

    #[tokio::test]
    async fn cycle_renders_info_and_nodes() {
        let mut poller = Poller::new(
            Arc::new(ScriptedTelemetry::default()),
            DashboardConfig::guarded(),
        );
        let view = poller.cycle().await;
        assert_eq!(view.cpu, "33");
        assert_eq!(view.battery, "71");
        assert_eq!(
            view.nodes,
            vec![
                "nodeA — CPU: 10% — Battery: 90%".to_string(),
                "nodeB — CPU: 20% — Battery: 80%".to_string(),
            ]
        );
        assert_eq!(view.clock.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_info_shows_placeholder_and_nodes_still_render() {
        let source = Arc::new(ScriptedTelemetry::default());
        source.hang_info.store(true, Ordering::SeqCst);
        let mut poller = Poller::new(source, DashboardConfig::guarded());

        let started = tokio::time::Instant::now();
        let view = poller.cycle().await.clone();
        assert_eq!(started.elapsed(), Duration::from_millis(2000));
        assert_eq!(view.cpu, PLACEHOLDER);
        assert_eq!(view.battery, PLACEHOLDER);
        assert_eq!(view.nodes.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_keeps_its_schedule_while_info_hangs() {
        let source = Arc::new(ScriptedTelemetry::default());
        source.hang_info.store(true, Ordering::SeqCst);
        let mut poller = Poller::new(source, DashboardConfig::guarded());

        let cancel = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = Recorder {
            seen: seen.clone(),
            stop_after: 3,
            cancel: cancel.clone(),
        };

        let started = tokio::time::Instant::now();
        poller.run(&mut recorder, cancel).await;

        let seen = seen.lock().unwrap();
        let offsets: Vec<u64> = seen
            .iter()
            .map(|(at, _)| at.duration_since(started).as_secs())
            .collect();
        assert_eq!(offsets, vec![2, 6, 10]);
        assert!(seen.iter().all(|(_, v)| v.cpu == PLACEHOLDER && v.nodes.len() == 2));
        assert_eq!(poller.view().cycles, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_runs_the_loop() {
        let source = Arc::new(ScriptedTelemetry::default());
        let mut poller = Poller::new(source, DashboardConfig::guarded().with_interval_ms(0));

        let cancel = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = Recorder {
            seen: seen.clone(),
            stop_after: 3,
            cancel: cancel.clone(),
        };
        poller.run(&mut recorder, cancel).await;

        assert_eq!(seen.lock().unwrap().len(), 3);
        assert_eq!(poller.view().cycles, 3);
    }

    #[tokio::test]
    async fn basic_mode_keeps_stale_values_on_failure() {
        let source = Arc::new(ScriptedTelemetry::default());
        let mut poller = Poller::new(source.clone(), DashboardConfig::basic());
        poller.cycle().await;

        source.fail_all.store(true, Ordering::SeqCst);
        let view = poller.cycle().await;
        assert_eq!(view.cpu, "33");
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.cycles, 2);
    }

    #[tokio::test]
    async fn guarded_mode_clears_on_failure() {
        let source = Arc::new(ScriptedTelemetry::default());
        let mut poller = Poller::new(source.clone(), DashboardConfig::guarded());
        poller.cycle().await;

        source.fail_all.store(true, Ordering::SeqCst);
        let view = poller.cycle().await;
        assert_eq!(view.cpu, PLACEHOLDER);
        assert!(view.nodes.is_empty());
    }

    #[test]
    fn plain_renderer_writes_header_and_nodes() {
        let mut renderer = PlainRenderer::new(Vec::new());
        renderer.render(&DashboardView {
            clock: "12:00:00".to_string(),
            cpu: "5".to_string(),
            battery: "99".to_string(),
            nodes: vec!["nodeA — CPU: 1% — Battery: 2%".to_string()],
            cycles: 1,
        });
        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(
            out,
            "[12:00:00] CPU: 5% Battery: 99%\n  nodeA — CPU: 1% — Battery: 2%\n"
        );
    }

    #[tokio::test]
    async fn http_telemetry_reads_backend() {
        use axum::Router;
        use axum::routing::get;

        let app = Router::new()
            .route(
                "/info",
                get(|| async { axum::Json(serde_json::json!({"cpu": 3, "battery": 4, "status": "ok"})) }),
            )
            .route(
                "/nodes",
                get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "down") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let telemetry = HttpTelemetry::new(&format!("http://{addr}/")).unwrap();
        let info = telemetry.info().await.unwrap();
        assert_eq!(info.cpu.to_string(), "3");
        match telemetry.nodes().await.unwrap_err() {
            Error::Backend { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

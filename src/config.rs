//! Configuration for the worker, proxy, dashboard and task dispatch.
//!
//! Values come from defaults, then an optional TOML file, then environment
//! overrides (`ECHONET_ORIGIN`, `ECHONET_TOKEN`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::worker::strategy::{CacheStrategy, FetchPolicy, TELEMETRY_PATHS};

/// Default backend origin.
pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:5000";

/// Asset manifest precached by the precache-first strategy.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    "/static/index.html",
    "/static/style.css",
    "/static/app.js",
    "/static/icon.png",
];

/// Worker configuration: strategy, cache namespace and manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Caching strategy for this deployment.
    pub strategy: CacheStrategy,
    /// Name of the current cache namespace.
    pub cache_name: String,
    /// URLs filled into the cache at install (precache-first only).
    pub manifest: Vec<String>,
    /// Paths that bypass the cache (network-first-exempt only).
    pub exempt_paths: Vec<String>,
    /// Store successful network responses in the cache.
    pub write_back: bool,
    /// Delete caches other than `cache_name` on activation.
    pub purge_stale_caches: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            strategy: CacheStrategy::default(),
            cache_name: "echonet-cache".to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(ToString::to_string).collect(),
            exempt_paths: TELEMETRY_PATHS.iter().map(ToString::to_string).collect(),
            write_back: false,
            purge_stale_caches: false,
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the caching strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the cache namespace.
    #[must_use]
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Sets the precache manifest.
    #[must_use]
    pub fn with_manifest<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifest = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Sets whether network responses are written back into the cache.
    #[must_use]
    pub const fn with_write_back(mut self, write_back: bool) -> Self {
        self.write_back = write_back;
        self
    }

    /// Sets whether stale caches are deleted on activation.
    #[must_use]
    pub const fn with_purge_stale_caches(mut self, purge: bool) -> Self {
        self.purge_stale_caches = purge;
        self
    }

    /// Routing policy derived from this configuration.
    #[must_use]
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy::new(self.strategy, self.exempt_paths.clone())
    }
}

/// Intercepting proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Backend origin requests are forwarded to.
    pub origin: String,
    /// Seconds without requests after which a page counts as closed.
    pub client_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            origin: DEFAULT_ORIGIN.to_string(),
            client_idle_secs: 60,
        }
    }
}

impl ServerConfig {
    /// Idle time after which a page counts as closed.
    #[must_use]
    pub const fn client_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.client_idle_secs)
    }
}

/// Dashboard poller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Base URL serving `/info` and `/nodes`.
    pub base_url: String,
    /// Milliseconds between update cycles.
    pub interval_ms: u64,
    /// Per-request timeout in milliseconds; `0` disables it.
    pub request_timeout_ms: u64,
    /// Show `??` on failure instead of keeping the last values.
    pub placeholder_on_error: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self::guarded()
    }
}

impl DashboardConfig {
    /// Plain loop: 2 s interval, no timeout, stale values kept on failure.
    #[must_use]
    pub fn basic() -> Self {
        Self {
            base_url: DEFAULT_ORIGIN.to_string(),
            interval_ms: 2000,
            request_timeout_ms: 0,
            placeholder_on_error: false,
        }
    }

    /// Guarded loop: 4 s interval, 2 s timeout, placeholders on failure.
    #[must_use]
    pub fn guarded() -> Self {
        Self {
            base_url: DEFAULT_ORIGIN.to_string(),
            interval_ms: 4000,
            request_timeout_ms: 2000,
            placeholder_on_error: true,
        }
    }

    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the update interval in milliseconds.
    #[must_use]
    pub const fn with_interval_ms(mut self, ms: u64) -> Self {
        self.interval_ms = ms;
        self
    }

    /// Sets the request timeout in milliseconds (`0` disables it).
    #[must_use]
    pub const fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = ms;
        self
    }

    /// Time between cycles, never shorter than 1 ms.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        if self.interval_ms == 0 {
            Duration::from_millis(1)
        } else {
            Duration::from_millis(self.interval_ms)
        }
    }

    /// Per-request deadline, if any.
    #[must_use]
    pub const fn request_timeout(&self) -> Option<Duration> {
        if self.request_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.request_timeout_ms))
        }
    }
}

/// Task dispatch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Base URL serving `/analyze` and `/task`.
    pub base_url: String,
    /// Value sent as `X-User-Token`; empty means no header.
    pub token: String,
    /// Answer analyze requests with canned data instead of calling the backend.
    pub mock: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_ORIGIN.to_string(),
            token: String::new(),
            mock: true,
        }
    }
}

/// Path configuration for the cache and config files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory holding the persistent cache store.
    pub cache_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_dir: data_dir.join("echonet").join("caches"),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub server: ServerConfig,
    pub dashboard: DashboardConfig,
    pub tasks: TaskConfig,
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("echonet")
            .join("config.toml")
    }

    /// Parses a TOML document; missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML for this schema.
    pub fn from_toml_str(contents: &str) -> crate::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads configuration from `path`, `ECHONET_CONFIG`, or the default
    /// location, then applies environment overrides.
    ///
    /// A missing file yields the defaults; an explicit `path` must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => {
                let path = std::env::var_os("ECHONET_CONFIG")
                    .map_or_else(Self::default_path, PathBuf::from);
                match std::fs::read_to_string(&path) {
                    Ok(contents) => {
                        log::debug!("Loaded config from {}", path.display());
                        Self::from_toml_str(&contents)?
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
                    Err(e) => return Err(e.into()),
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(origin) = lookup("ECHONET_ORIGIN").filter(|v| !v.trim().is_empty()) {
            let origin = origin.trim().to_string();
            self.server.origin.clone_from(&origin);
            self.dashboard.base_url.clone_from(&origin);
            self.tasks.base_url = origin;
        }
        if let Some(token) = lookup("ECHONET_TOKEN") {
            self.tasks.token = token.trim().to_string();
        }
    }

    /// Serializes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            crate::Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_worker_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.strategy, CacheStrategy::NetworkFirstExempt);
        assert_eq!(config.cache_name, "echonet-cache");
        assert_eq!(config.manifest.len(), 5);
        assert_eq!(config.exempt_paths, vec!["/info", "/nodes"]);
        assert!(!config.write_back);
        assert!(!config.purge_stale_caches);
    }

    #[test]
    fn worker_config_builder_pattern() {
        let config = WorkerConfig::new()
            .with_strategy(CacheStrategy::PrecacheFirst)
            .with_cache_name("echonet-v2")
            .with_manifest(["/", "/static/app.js"])
            .with_write_back(true)
            .with_purge_stale_caches(true);

        assert_eq!(config.strategy, CacheStrategy::PrecacheFirst);
        assert_eq!(config.cache_name, "echonet-v2");
        assert_eq!(config.manifest, vec!["/", "/static/app.js"]);
        assert!(config.write_back);
        assert!(config.purge_stale_caches);
    }

    #[test]
    fn dashboard_variants() {
        let basic = DashboardConfig::basic();
        assert_eq!(basic.interval(), Duration::from_millis(2000));
        assert_eq!(basic.request_timeout(), None);
        assert!(!basic.placeholder_on_error);

        let guarded = DashboardConfig::default();
        assert_eq!(guarded.interval(), Duration::from_millis(4000));
        assert_eq!(guarded.request_timeout(), Some(Duration::from_millis(2000)));
        assert!(guarded.placeholder_on_error);
        assert_eq!(
            guarded.with_interval_ms(0).interval(),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [worker]
            strategy = "precache-first"

            [dashboard]
            interval_ms = 2000
            "#,
        )
        .unwrap();

        assert_eq!(config.worker.strategy, CacheStrategy::PrecacheFirst);
        assert_eq!(config.worker.cache_name, "echonet-cache");
        assert_eq!(config.dashboard.interval_ms, 2000);
        assert_eq!(config.dashboard.request_timeout_ms, 2000);
        assert_eq!(config.server.port, 8080);
        assert!(config.tasks.mock);
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let err = AppConfig::from_toml_str("[worker]\nstrategy = \"lazy\"\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn config_serializes_to_toml() {
        let config = AppConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        let back = AppConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn env_overrides_origin_and_token() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "ECHONET_ORIGIN" => Some("http://10.0.0.5:5000".to_string()),
            "ECHONET_TOKEN" => Some(" secret ".to_string()),
            _ => None,
        });

        assert_eq!(config.server.origin, "http://10.0.0.5:5000");
        assert_eq!(config.dashboard.base_url, "http://10.0.0.5:5000");
        assert_eq!(config.tasks.base_url, "http://10.0.0.5:5000");
        assert_eq!(config.tasks.token, "secret");
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9000").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn load_fails_for_missing_explicit_file() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/echonet.toml"))).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}

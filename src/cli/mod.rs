//! Command-line front end: argument parsing and the subcommands.

mod progress;
mod render;
mod tasks;

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStore, DiskCacheStore};
use crate::config::AppConfig;
use crate::dashboard::{HttpTelemetry, PlainRenderer, Poller, Renderer};
use crate::error::{Error, Result};
use crate::worker::{CacheStrategy, service_worker_js};

use progress::print_namespace;
use render::ConsoleRenderer;
pub use tasks::TasksArgs;

/// Options for `echonet serve`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ServeArgs {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub origin: Option<String>,
    pub strategy: Option<CacheStrategy>,
    pub cache_name: Option<String>,
    pub write_back: bool,
    pub purge_stale: bool,
    /// Keep caches in memory instead of on disk.
    pub memory: bool,
}

impl ServeArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(origin) = &self.origin {
            config.server.origin.clone_from(origin);
        }
        if let Some(strategy) = self.strategy {
            config.worker.strategy = strategy;
        }
        if let Some(name) = &self.cache_name {
            config.worker.cache_name.clone_from(name);
        }
        config.worker.write_back |= self.write_back;
        config.worker.purge_stale_caches |= self.purge_stale;
    }
}

/// Options for `echonet dashboard`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DashboardArgs {
    pub url: Option<String>,
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    /// Use the basic loop: 2 s, no timeout, stale values kept.
    pub basic: bool,
    /// Run a single cycle and exit.
    pub once: bool,
    /// Plain line output instead of redrawing the screen.
    pub plain: bool,
}

impl DashboardArgs {
    fn apply(&self, config: &mut AppConfig) {
        if self.basic {
            let base_url = std::mem::take(&mut config.dashboard.base_url);
            config.dashboard = crate::config::DashboardConfig::basic().with_base_url(base_url);
        }
        if let Some(url) = &self.url {
            config.dashboard.base_url.clone_from(url);
        }
        if let Some(ms) = self.interval_ms {
            config.dashboard.interval_ms = ms;
        }
        if let Some(ms) = self.timeout_ms {
            config.dashboard.request_timeout_ms = ms;
        }
    }
}

/// A parsed subcommand.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Serve(ServeArgs),
    Dashboard(DashboardArgs),
    Tasks(TasksArgs),
    Sw { strategy: Option<CacheStrategy> },
    CacheList,
    CachePurge { all: bool },
    ShowConfig,
    Help,
}

/// Parsed command line.
#[derive(Debug, PartialEq, Eq)]
pub struct Cli {
    /// Explicit config file (`--config`).
    pub config: Option<PathBuf>,
    pub command: Command,
}

pub fn print_usage() {
    eprintln!("Usage: echonet [--config PATH] <COMMAND> [OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve               Run the caching proxy in front of the backend");
    eprintln!("  dashboard           Poll /info and /nodes and show the status dashboard");
    eprintln!("  tasks               Analyze a command and dispatch its subtasks");
    eprintln!("  sw                  Print the browser service worker script");
    eprintln!("  cache list          List cache namespaces and entries");
    eprintln!("  cache purge [--all] Delete stale cache namespaces (or all of them)");
    eprintln!("  config              Print the effective configuration as TOML");
    eprintln!();
    eprintln!("serve options:");
    eprintln!("  --host <HOST>       Bind address (default: 127.0.0.1)");
    eprintln!("  --port <PORT>       Bind port (default: 8080)");
    eprintln!("  --origin <URL>      Backend origin (default: http://127.0.0.1:5000)");
    eprintln!("  --strategy <NAME>   precache-first | network-first-exempt | network-first-uniform");
    eprintln!("  --cache-name <NAME> Current cache namespace");
    eprintln!("  --write-back        Store successful network responses");
    eprintln!("  --purge-stale       Delete other namespaces on activation");
    eprintln!("  --memory            Keep caches in memory only");
    eprintln!();
    eprintln!("dashboard options:");
    eprintln!("  --url <URL>         Backend base URL");
    eprintln!("  --interval <MS>     Milliseconds between cycles");
    eprintln!("  --timeout <MS>      Per-request timeout, 0 disables");
    eprintln!("  --basic             2 s loop without timeout or placeholders");
    eprintln!("  --once              Run one cycle and exit");
    eprintln!("  --plain             Print lines instead of redrawing");
    eprintln!();
    eprintln!("tasks options:");
    eprintln!("  --url <URL>         Backend base URL");
    eprintln!("  --token <TOKEN>     Value for X-User-Token");
    eprintln!("  --mock | --live     Use canned responses or the backend");
    eprintln!("  -c, --command <TXT> Analyze TXT and exit");
    eprintln!("  -f, --file <PATH>   Analyze the file's contents and exit");
    eprintln!("  --submit            Also submit the pipeline (with -c/-f)");
    eprintln!();
    eprintln!("Without -c/-f, tasks starts an interactive prompt.");
    eprintln!("Config: {} (or ECHONET_CONFIG)", AppConfig::default_path().display());
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> std::result::Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn number<T: std::str::FromStr>(raw: &str, flag: &str) -> std::result::Result<T, String> {
    raw.parse()
        .map_err(|_| format!("{flag} expects a number, got '{raw}'"))
}

fn strategy(raw: &str) -> std::result::Result<CacheStrategy, String> {
    raw.parse().map_err(|e: Error| e.to_string())
}

/// Parses the arguments after the program name.
///
/// # Errors
///
/// Returns a message describing the first invalid argument.
pub fn parse_args(args: &[String]) -> std::result::Result<Cli, String> {
    let mut config = None;
    let mut i = 0;

    while i < args.len() && args[i].starts_with('-') {
        match args[i].as_str() {
            "--config" => config = Some(PathBuf::from(value(args, &mut i, "--config")?)),
            "-h" | "--help" => {
                return Ok(Cli {
                    config,
                    command: Command::Help,
                });
            }
            other => return Err(format!("Unknown option: {other}")),
        }
        i += 1;
    }

    let Some(name) = args.get(i) else {
        return Ok(Cli {
            config,
            command: Command::Help,
        });
    };
    let rest = &args[i + 1..];
    let command = match name.as_str() {
        "serve" => Command::Serve(parse_serve(rest)?),
        "dashboard" => Command::Dashboard(parse_dashboard(rest)?),
        "tasks" => Command::Tasks(parse_tasks(rest)?),
        "sw" => parse_sw(rest)?,
        "cache" => parse_cache(rest)?,
        "config" if rest.is_empty() => Command::ShowConfig,
        "help" => Command::Help,
        other => return Err(format!("Unknown command: {other}")),
    };
    Ok(Cli { config, command })
}

fn parse_serve(args: &[String]) -> std::result::Result<ServeArgs, String> {
    let mut out = ServeArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => out.host = Some(value(args, &mut i, "--host")?.to_string()),
            "--port" => out.port = Some(number(value(args, &mut i, "--port")?, "--port")?),
            "--origin" => out.origin = Some(value(args, &mut i, "--origin")?.to_string()),
            "--strategy" => out.strategy = Some(strategy(value(args, &mut i, "--strategy")?)?),
            "--cache-name" => {
                out.cache_name = Some(value(args, &mut i, "--cache-name")?.to_string());
            }
            "--write-back" => out.write_back = true,
            "--purge-stale" => out.purge_stale = true,
            "--memory" => out.memory = true,
            other => return Err(format!("Unknown serve option: {other}")),
        }
        i += 1;
    }
    Ok(out)
}

fn parse_dashboard(args: &[String]) -> std::result::Result<DashboardArgs, String> {
    let mut out = DashboardArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--url" => out.url = Some(value(args, &mut i, "--url")?.to_string()),
            "--interval" => {
                let ms = number(value(args, &mut i, "--interval")?, "--interval")?;
                if ms == 0 {
                    return Err("--interval must be at least 1 ms".to_string());
                }
                out.interval_ms = Some(ms);
            }
            "--timeout" => {
                out.timeout_ms = Some(number(value(args, &mut i, "--timeout")?, "--timeout")?);
            }
            "--basic" => out.basic = true,
            "--once" => out.once = true,
            "--plain" => out.plain = true,
            other => return Err(format!("Unknown dashboard option: {other}")),
        }
        i += 1;
    }
    Ok(out)
}

fn parse_tasks(args: &[String]) -> std::result::Result<TasksArgs, String> {
    let mut out = TasksArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--url" => out.base_url = Some(value(args, &mut i, "--url")?.to_string()),
            "--token" => out.token = Some(value(args, &mut i, "--token")?.to_string()),
            "--mock" => out.mock = Some(true),
            "--live" => out.mock = Some(false),
            "-c" | "--command" => {
                out.command = Some(value(args, &mut i, "--command")?.to_string());
            }
            "-f" | "--file" => out.file = Some(PathBuf::from(value(args, &mut i, "--file")?)),
            "--submit" => out.submit = true,
            other => return Err(format!("Unknown tasks option: {other}")),
        }
        i += 1;
    }
    Ok(out)
}

fn parse_sw(args: &[String]) -> std::result::Result<Command, String> {
    let mut selected = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--strategy" => selected = Some(strategy(value(args, &mut i, "--strategy")?)?),
            other => return Err(format!("Unknown sw option: {other}")),
        }
        i += 1;
    }
    Ok(Command::Sw { strategy: selected })
}

fn parse_cache(args: &[String]) -> std::result::Result<Command, String> {
    match args.first().map(String::as_str) {
        Some("list") if args.len() == 1 => Ok(Command::CacheList),
        Some("purge") => match &args[1..] {
            [] => Ok(Command::CachePurge { all: false }),
            [flag] if flag == "--all" => Ok(Command::CachePurge { all: true }),
            [other, ..] => Err(format!("Unknown cache purge option: {other}")),
        },
        Some(other) => Err(format!("Unknown cache command: {other}")),
        None => Err("cache requires 'list' or 'purge'".to_string()),
    }
}

/// Runs a parsed command line.
///
/// # Errors
///
/// Returns configuration, network and cache errors from the subcommand.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Help => {
            print_usage();
            Ok(())
        }
        Command::Serve(args) => {
            args.apply(&mut config);
            serve(config, args.memory).await
        }
        Command::Dashboard(args) => {
            args.apply(&mut config);
            dashboard(&config, &args).await
        }
        Command::Tasks(args) => tasks::run(config.tasks, args).await,
        Command::Sw { strategy } => {
            if let Some(strategy) = strategy {
                config.worker.strategy = strategy;
            }
            print!("{}", service_worker_js(&config.worker));
            Ok(())
        }
        Command::CacheList => cache_list(&config).await,
        Command::CachePurge { all } => cache_purge(&config, all).await,
        Command::ShowConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

#[cfg(feature = "server")]
async fn serve(config: AppConfig, memory: bool) -> Result<()> {
    use crate::cache::MemoryCacheStore;
    use crate::network::HttpNetwork;
    use crate::server::{self, ProxyState};

    let cache: Arc<dyn CacheStore> = if memory {
        Arc::new(MemoryCacheStore::new())
    } else {
        Arc::new(DiskCacheStore::new(&config.paths.cache_dir))
    };
    let network = Arc::new(HttpNetwork::new(&config.server.origin)?);
    let state = ProxyState::with_progress(
        config.worker.clone(),
        cache,
        network,
        config.server.client_idle_timeout(),
        Arc::new(progress::InstallBar::new()),
    );

    log::info!(
        "Proxying {} with strategy {}",
        config.server.origin,
        config.worker.strategy
    );
    if let Err(e) = state.install().await {
        log::error!("No worker installed, passing requests through: {e}");
    }
    server::serve(
        &config.server.host,
        config.server.port,
        state,
        server::shutdown_signal(),
    )
    .await
}

#[cfg(not(feature = "server"))]
async fn serve(_config: AppConfig, _memory: bool) -> Result<()> {
    Err(Error::InvalidState(
        "proxy support not compiled in (enable the 'server' feature)".to_string(),
    ))
}

async fn dashboard(config: &AppConfig, args: &DashboardArgs) -> Result<()> {
    let source = Arc::new(HttpTelemetry::new(&config.dashboard.base_url)?);
    let mut poller = Poller::new(source, config.dashboard.clone());

    if args.once {
        let view = poller.cycle().await;
        PlainRenderer::new(std::io::stdout()).render(view);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mut renderer: Box<dyn Renderer> = if args.plain {
        Box::new(PlainRenderer::new(std::io::stdout()))
    } else {
        Box::new(ConsoleRenderer::new())
    };
    poller.run(renderer.as_mut(), cancel).await;
    Ok(())
}

async fn cache_list(config: &AppConfig) -> Result<()> {
    let store = DiskCacheStore::new(&config.paths.cache_dir);
    let names = store.namespaces().await?;
    if names.is_empty() {
        println!("No caches in {}", store.root().display());
        return Ok(());
    }
    for name in names {
        let entries = store.entries(&name).await?;
        print_namespace(&name, name == config.worker.cache_name, &entries);
    }
    Ok(())
}

async fn cache_purge(config: &AppConfig, all: bool) -> Result<()> {
    let store = DiskCacheStore::new(&config.paths.cache_dir);
    let mut deleted = 0;
    for name in store.namespaces().await? {
        if all || name != config.worker.cache_name {
            store.delete_namespace(&name).await?;
            println!("Deleted {name}");
            deleted += 1;
        }
    }
    println!("{deleted} namespace(s) deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(ToString::to_string).collect()
    }

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(parse_args(&[]).unwrap().command, Command::Help);
    }

    #[test]
    fn parses_serve_with_overrides() {
        let cli = parse_args(&args(
            "--config /tmp/e.toml serve --port 9000 --strategy cache-first --write-back --memory",
        ))
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/e.toml")));
        let Command::Serve(serve) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(serve.port, Some(9000));
        assert_eq!(serve.strategy, Some(CacheStrategy::PrecacheFirst));
        assert!(serve.write_back && serve.memory && !serve.purge_stale);

        let mut config = AppConfig::default();
        serve.apply(&mut config);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.worker.strategy, CacheStrategy::PrecacheFirst);
        assert!(config.worker.write_back);
    }

    #[test]
    fn basic_dashboard_keeps_base_url() {
        let cli = parse_args(&args("dashboard --basic --interval 1500")).unwrap();
        let Command::Dashboard(dash) = cli.command else {
            panic!("expected dashboard");
        };
        let mut config = AppConfig::default();
        config.dashboard.base_url = "http://10.1.1.1:5000".to_string();
        dash.apply(&mut config);

        assert_eq!(config.dashboard.base_url, "http://10.1.1.1:5000");
        assert_eq!(config.dashboard.interval_ms, 1500);
        assert_eq!(config.dashboard.request_timeout_ms, 0);
        assert!(!config.dashboard.placeholder_on_error);
    }

    #[test]
    fn parses_tasks_one_shot() {
        let cli = parse_args(&args("tasks --live -c poem --submit")).unwrap();
        assert_eq!(
            cli.command,
            Command::Tasks(TasksArgs {
                mock: Some(false),
                command: Some("poem".to_string()),
                submit: true,
                ..TasksArgs::default()
            })
        );
    }

    #[test]
    fn parses_cache_subcommands() {
        assert_eq!(parse_args(&args("cache list")).unwrap().command, Command::CacheList);
        assert_eq!(
            parse_args(&args("cache purge --all")).unwrap().command,
            Command::CachePurge { all: true }
        );
        assert!(parse_args(&args("cache")).is_err());
        assert!(parse_args(&args("cache purge --force")).is_err());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_args(&args("serve --port many")).is_err());
        assert!(parse_args(&args("dashboard --interval 0")).is_err());
        assert!(parse_args(&args("sw --strategy lazy")).is_err());
        assert!(parse_args(&args("serve --host")).is_err());
        assert!(parse_args(&args("launch")).is_err());
        assert!(parse_args(&args("config --verbose")).is_err());
    }

    #[tokio::test]
    async fn purge_keeps_current_namespace() {
        use crate::cache::CacheEntry;
        use crate::network::Response;

        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.cache_dir = dir.path().to_path_buf();

        let store = DiskCacheStore::new(dir.path());
        for ns in ["echonet-cache", "echonet-v0"] {
            store
                .put(ns, CacheEntry::capture("/", &Response::new(200, "x")))
                .await
                .unwrap();
        }

        cache_purge(&config, false).await.unwrap();
        assert_eq!(store.namespaces().await.unwrap(), vec!["echonet-cache".to_string()]);

        cache_purge(&config, true).await.unwrap();
        assert!(store.namespaces().await.unwrap().is_empty());
    }
}

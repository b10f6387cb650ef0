//! Interactive and one-shot task dispatch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::render::{print_board, print_log, print_receipt};
use crate::config::TaskConfig;
use crate::error::Result;
use crate::tasks::{Dispatcher, HttpTaskBackend, MockTaskBackend, TaskBackend};

/// Options for `echonet tasks`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TasksArgs {
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub mock: Option<bool>,
    /// Command text for one-shot mode.
    pub command: Option<String>,
    /// File whose contents take precedence over `command`.
    pub file: Option<PathBuf>,
    /// Submit the pipeline after a one-shot analyze.
    pub submit: bool,
}

impl TasksArgs {
    pub fn apply(&self, config: &mut TaskConfig) {
        if let Some(url) = &self.base_url {
            config.base_url.clone_from(url);
        }
        if let Some(token) = &self.token {
            config.token.clone_from(token);
        }
        if let Some(mock) = self.mock {
            config.mock = mock;
        }
    }

    const fn one_shot(&self) -> bool {
        self.command.is_some() || self.file.is_some()
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Analyze(String),
    Attach(Option<PathBuf>),
    Dispatch(usize),
    Submit,
    Mock(bool),
    Board,
    Log,
    Help,
    Quit,
}

fn parse_line(line: &str) -> std::result::Result<ReplCommand, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();

    match word {
        "analyze" | "a" => Ok(ReplCommand::Analyze(rest.to_string())),
        "file" | "f" => Ok(ReplCommand::Attach(
            (!rest.is_empty()).then(|| PathBuf::from(rest)),
        )),
        "dispatch" | "d" => rest
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(|n| ReplCommand::Dispatch(n - 1))
            .ok_or_else(|| format!("expected a task number, got '{rest}'")),
        "submit" | "s" => Ok(ReplCommand::Submit),
        "mock" => match rest {
            "on" => Ok(ReplCommand::Mock(true)),
            "off" => Ok(ReplCommand::Mock(false)),
            _ => Err("usage: mock on|off".to_string()),
        },
        "board" | "b" => Ok(ReplCommand::Board),
        "log" | "l" => Ok(ReplCommand::Log),
        "help" | "h" | "?" => Ok(ReplCommand::Help),
        "quit" | "q" | "exit" => Ok(ReplCommand::Quit),
        other => Err(format!("unknown command '{other}' (try 'help')")),
    }
}

fn print_repl_help() {
    println!("Commands:");
    println!("  analyze <text>   Split a command into subtasks");
    println!("  file [path]      Attach a command file (overrides typed text); no path detaches");
    println!("  dispatch <n>     Dispatch task card n");
    println!("  submit           Submit all cards as one pipeline");
    println!("  mock on|off      Toggle canned responses");
    println!("  board | log      Show the task cards or the activity log");
    println!("  quit             Leave");
}

fn backend_for(config: &TaskConfig) -> Result<Arc<dyn TaskBackend>> {
    let live: Arc<dyn TaskBackend> = Arc::new(HttpTaskBackend::new(config)?);
    Ok(if config.mock {
        Arc::new(MockTaskBackend::new(live))
    } else {
        live
    })
}

async fn read_attachment(path: &Path) -> Result<String> {
    Ok(tokio::fs::read_to_string(path).await?)
}

/// Runs `echonet tasks`: one-shot when a command or file is given,
/// otherwise an interactive prompt on stdin.
///
/// # Errors
///
/// One-shot mode returns analyze and submit errors; the prompt reports them
/// and keeps going.
pub async fn run(mut config: TaskConfig, args: TasksArgs) -> Result<()> {
    args.apply(&mut config);
    let mut dispatcher = Dispatcher::new(backend_for(&config)?);

    if args.one_shot() {
        let file_text = match &args.file {
            Some(path) => Some(read_attachment(path).await?),
            None => None,
        };
        let typed = args.command.as_deref().unwrap_or_default();
        print_board(dispatcher.analyze(file_text.as_deref(), typed).await?);
        if args.submit {
            print_receipt(dispatcher.submit_pipeline().await?);
        }
        return Ok(());
    }

    println!(
        "echonet tasks ({}). Type 'help' for commands.",
        if config.mock { "mock" } else { config.base_url.as_str() }
    );
    let mut attached: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::Write::flush(&mut std::io::stdout());
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(msg) => {
                eprintln!("{}", style(msg).red());
                continue;
            }
        };

        let outcome: Result<()> = match command {
            ReplCommand::Analyze(text) => dispatcher
                .analyze(attached.as_deref(), &text)
                .await
                .map(print_board),
            ReplCommand::Attach(Some(path)) => match read_attachment(&path).await {
                Ok(text) => {
                    println!("Attached {} ({} bytes)", path.display(), text.len());
                    attached = Some(text);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            ReplCommand::Attach(None) => {
                attached = None;
                println!("Attachment cleared");
                Ok(())
            }
            ReplCommand::Dispatch(idx) => dispatcher.dispatch(idx).await.map(|result| {
                println!("{result}");
                print_board(dispatcher.board());
            }),
            ReplCommand::Submit => dispatcher.submit_pipeline().await.map(print_receipt),
            ReplCommand::Mock(on) => {
                config.mock = on;
                backend_for(&config).map(|backend| {
                    dispatcher.set_backend(backend);
                    println!("Mock mode {}", if on { "on" } else { "off" });
                })
            }
            ReplCommand::Board => {
                print_board(dispatcher.board());
                Ok(())
            }
            ReplCommand::Log => {
                print_log(dispatcher.log());
                Ok(())
            }
            ReplCommand::Help => {
                print_repl_help();
                Ok(())
            }
            ReplCommand::Quit => break,
        };

        if let Err(e) = outcome {
            eprintln!("{}", style(e).red());
        }
    }
    Ok(())
}

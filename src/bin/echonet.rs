//! echonet - caching proxy, dashboard poller and task dispatcher.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;

#[tokio::main]
async fn main() -> echonet::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();

    #[cfg(feature = "cli")]
    {
        let cli = match echonet::cli::parse_args(&args) {
            Ok(cli) => cli,
            Err(msg) => {
                eprintln!("Error: {msg}");
                eprintln!();
                echonet::cli::print_usage();
                std::process::exit(2);
            }
        };
        echonet::cli::run(cli).await
    }
    #[cfg(not(feature = "cli"))]
    {
        let _ = args;
        eprintln!("CLI support not compiled in");
        std::process::exit(1);
    }
}

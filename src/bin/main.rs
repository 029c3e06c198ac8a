use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tdbridge::config::{self, BridgeSettings};
use tdbridge::engine::{Engine, Loopback, TdJson};
use tdbridge::{BridgeResult, TdBridge};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Drive TDLib JSON clients from the command line
#[derive(Parser)]
#[command(name = "tdbridge")]
#[command(version)]
#[command(about = "Drive TDLib JSON clients from the command line")]
struct Cli {
    /// Config file layered on top of the user config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to libtdjson (overrides library_path from config)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    /// Use the in-process loopback engine instead of libtdjson
    #[arg(long, global = true)]
    loopback: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronously execute a request that needs no client and print the response
    Execute {
        /// JSON request, e.g. {"@type":"getOption","name":"version"}
        request: String,
    },
    /// Create a client, stream its messages to stdout and send stdin lines as requests
    Listen {
        /// Request to send before reading stdin (repeatable)
        #[arg(long = "request")]
        requests: Vec<String>,

        /// How long to keep streaming after stdin is closed
        #[arg(long, default_value_t = 1000)]
        linger_ms: u64,
    },
    /// Print the user config file location
    ConfigPath,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> BridgeResult<()> {
    if let Commands::ConfigPath = cli.command {
        match config::user_config_path() {
            Some(path) => println!("{}", path.display()),
            None => eprintln!("Could not determine the user config directory"),
        }
        return Ok(());
    }

    let outcome = config::load_settings(cli.config.as_deref())?;
    for event in &outcome.events {
        event.log();
    }
    let mut settings = outcome.settings;
    if cli.library.is_some() {
        settings.library_path = cli.library;
    }

    if cli.loopback {
        execute_command(Loopback::new(), &settings, cli.command).await
    } else {
        let engine = match &settings.library_path {
            Some(path) => TdJson::load(path)?,
            None => TdJson::load_default()?,
        };
        execute_command(engine, &settings, cli.command).await
    }
}

async fn execute_command<E: Engine>(
    engine: E,
    settings: &BridgeSettings,
    command: Commands,
) -> BridgeResult<()> {
    let bridge = TdBridge::from_settings(engine, settings)?;

    match command {
        Commands::Execute { request } => {
            println!("{}", bridge.execute_static(&request));
            Ok(())
        }
        Commands::Listen {
            requests,
            linger_ms,
        } => listen(&bridge, requests, Duration::from_millis(linger_ms)).await,
        Commands::ConfigPath => Ok(()),
    }
}

async fn listen<E: Engine>(
    bridge: &TdBridge<E>,
    requests: Vec<String>,
    linger: Duration,
) -> BridgeResult<()> {
    let id = bridge.create()?;
    log::info!(target: "tdbridge::cli", "Created client {}", id);
    bridge.register_sink(id, Box::new(std::io::stdout()))?;

    for request in &requests {
        bridge.send(id, request)?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!(target: "tdbridge::cli", "Interrupted");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => bridge.send(id, line.trim())?,
                None => {
                    tokio::time::sleep(linger).await;
                    break;
                }
            }
        }
    }

    bridge.destroy(id)
}

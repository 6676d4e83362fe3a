mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand, ValueEnum};
use cmd::config::ConfigSubcommand;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ferry",
    about = "Resumable object-storage migration: copy, schedule, verify",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: walk up from the current directory for ferry.yaml)
    #[arg(long = "config", global = true, env = "FERRY_CONFIG", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log line format on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy catalog objects from the source store to the destination
    Transfer(cmd::transfer::TransferArgs),

    /// Show the schedule, or run the scheduling daemon with --daemon
    Schedule(cmd::schedule::ScheduleArgs),

    /// Spot-check a random sample of catalog rows against the destination
    Verify(cmd::verify::VerifyArgs),

    /// Summarize the checkpoint and the scheduler state
    Status,

    /// Create, validate, or print the config file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    // A missing .env is normal.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Transfer(_) | Commands::Schedule(_) | Commands::Verify(_) => {
            tracing::Level::INFO
        }
        _ => tracing::Level::WARN,
    };
    let filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into());

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none())
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }

    let config_path = cli.config_path.as_deref();
    let result = match cli.command {
        Commands::Transfer(args) => root::resolve_config_path(config_path)
            .and_then(|path| cmd::transfer::run(&path, args, cli.json)),
        Commands::Schedule(args) => root::resolve_config_path(config_path)
            .and_then(|path| cmd::schedule::run(&path, args, cli.json)),
        Commands::Verify(args) => root::resolve_config_path(config_path)
            .and_then(|path| cmd::verify::run(&path, args, cli.json)),
        Commands::Status => root::resolve_config_path(config_path)
            .and_then(|path| cmd::status::run(&path, cli.json)),
        Commands::Config { subcommand } => cmd::config::run(config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        if e.downcast_ref::<cmd::Interrupted>().is_some() {
            eprintln!("{e}");
            std::process::exit(130);
        }
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use squeakd::dbus;
use squeakd::device_database::DeviceDb;
use squeakd::udev_monitor;

/* Where the `.device` descriptor files are installed. */
const DATA_DIR: &str = "/usr/share/squeakd";

const USAGE: &str = "Usage: squeakd [--version | --quiet | --verbose[=debug]]";

#[derive(Parser, Debug)]
#[command(name = "squeakd", disable_version_flag = true, disable_help_flag = true)]
struct Cli {
    /// Print the version and exit.
    #[arg(long)]
    version: bool,

    /// Only log errors.
    #[arg(long)]
    quiet: bool,

    /// Raise verbosity; "raw" includes protocol dumps.
    #[arg(long, value_name = "LEVEL", num_args = 0..=1, default_missing_value = "raw")]
    verbose: Option<String>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(_) => {
            eprintln!("{USAGE}");
            /* EINVAL, same as every other bad invocation. */
            return ExitCode::from(22);
        }
    };

    if cli.version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let default_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose.as_deref() {
            None => "info",
            Some("debug") => "debug",
            Some("raw") => "trace",
            Some(_) => {
                eprintln!("{USAGE}");
                return ExitCode::from(22);
            }
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(zbus::Error::NameTaken) = e.downcast_ref::<zbus::Error>() {
                eprintln!(
                    "squeakd error: bus name is taken, another instance of squeakd is already running"
                );
            } else {
                eprintln!("squeakd error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    tracing::debug!(
        "Starting squeakd version {} (API version {})",
        env!("CARGO_PKG_VERSION"),
        dbus::manager::API_VERSION
    );

    let db = DeviceDb::load(Path::new(DATA_DIR));

    let (tx, rx) = mpsc::channel(32);
    let monitor_task = udev_monitor::start(tx)?;

    let result = dbus::run_server(rx, db).await;
    monitor_task.abort();
    result
}

//! fswatchd - inotify event daemon

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli_lib::{Config, DaemonLock};
use fsw_core::EventKind;
use std::path::PathBuf;
use tracing::Level;

/// fswatchd - debounced task execution on filesystem events
#[derive(Parser)]
#[command(name = "fswatchd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/fswatchd/config.toml"
    )]
    config: PathBuf,

    /// Log debugging messages
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Run,
    /// Validate the config file and exit
    Configtest,
    /// List supported event types and exit
    Events,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Events => {
            for kind in EventKind::ALL {
                println!("{}", kind.maskname());
            }
            Ok(())
        }
        Commands::Configtest => {
            let config = Config::load(&cli.config)?;
            config.build()?;
            println!("config file ok");
            Ok(())
        }
        Commands::Run => run(&cli).await,
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    init_logging(cli.debug, config.log_level.as_deref())?;

    let _lock = match &config.lock_file {
        Some(path) => Some(DaemonLock::acquire(path)?),
        None => None,
    };

    let mut daemon = config.build()?;
    daemon.run().await
}

fn init_logging(debug: bool, config_level: Option<&str>) -> Result<()> {
    let level = if debug {
        Level::DEBUG
    } else {
        config_level
            .unwrap_or("info")
            .parse::<Level>()
            .map_err(|_| anyhow::anyhow!("invalid log_level '{}'", config_level.unwrap_or("")))?
    };

    tracing_subscriber::fmt().with_max_level(level).init();
    Ok(())
}

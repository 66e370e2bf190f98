pub mod process;
pub mod show;

use std::{env, path::PathBuf, sync::Arc};

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use process::{kill_previous_servers, restart_server};
use show::{process_show_command, ShowCommand};
use tracing::level_filters::LevelFilter;

use crate::{
    daemon::{reconstruct::Reconstructor, start_daemon, DaemonConfig},
    server::{self, DEFAULT_PORT},
    store::record_store::FsRecordStore,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, CLI_PREFIX, DAEMON_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "Playlog", version, long_about = None)]
#[command(about = "Reconstructs play sessions from cumulative playtime polls", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Starts the sampling daemon for the application")]
    Init {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
    },
    #[command(
        about = "Run the daemon directly in the current console. Used for creating a daemon internally and for debugging"
    )]
    Serve {
        #[arg(
            long,
            help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
        )]
        dir: Option<PathBuf>,
        #[arg(long = "interval-minutes", help = "Minutes between upstream polls")]
        interval_minutes: Option<u64>,
        #[arg(long = "api-url", help = "Game library base url. Falls back to PLAYLOG_API_URL")]
        api_url: Option<String>,
        #[arg(long = "api-token", help = "Bearer token. Falls back to PLAYLOG_API_TOKEN")]
        api_token: Option<String>,
    },
    #[command(about = "Stop the currently running daemon.")]
    Stop {},
    #[command(about = "Reconstruct play periods for one UTC day")]
    Reconstruct {
        #[arg(long, help = "UTC day to process, YYYY-MM-DD. Defaults to yesterday")]
        date: Option<NaiveDate>,
        #[arg(
            long,
            help = "Re-derive the whole day from its samples, replacing stored periods"
        )]
        recompute: bool,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    #[command(about = "Serve the HTTP query api")]
    Api {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    #[command(about = "Display reconstructed periods for a date or recent window")]
    Show {
        #[command(flatten)]
        command: ShowCommand,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };

    match args.commands {
        Commands::Init { dir } => {
            restart_server(dir.as_deref())?;
            Ok(())
        }
        Commands::Stop {} => {
            let process_name = env::current_exe().expect("Can't operate without an executable");
            kill_previous_servers(&process_name);
            Ok(())
        }
        Commands::Serve {
            dir,
            interval_minutes,
            api_url,
            api_token,
        } => {
            let config = DaemonConfig::resolve(dir, interval_minutes, api_url, api_token)?;
            enable_logging(DAEMON_PREFIX, &config.dir, logging_level, args.log)?;
            start_daemon(config).await
        }
        Commands::Reconstruct {
            date,
            recompute,
            dir,
        } => {
            let dir = dir.map_or_else(create_application_default_path, Ok)?;
            enable_logging(CLI_PREFIX, &dir, logging_level, args.log)?;
            let store = Arc::new(FsRecordStore::new(dir.join("records"))?);
            let day = date.unwrap_or_else(|| Utc::now().date_naive() - Duration::days(1));
            let written = Reconstructor::new(store).run_day(day, recompute).await?;
            println!("{written} periods stored for UTC day {day}");
            Ok(())
        }
        Commands::Api { port, dir } => {
            let dir = dir.map_or_else(create_application_default_path, Ok)?;
            enable_logging(CLI_PREFIX, &dir, logging_level, args.log)?;
            server::serve(dir.join("records"), port).await
        }
        Commands::Show { command } => process_show_command(command).await,
    }
}

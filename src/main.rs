use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

use scheduletime::commands::{self, CreateArgs, SubmitArgs};
use scheduletime::models::StoreBackend;
use scheduletime::{config, store, web};

/// ScheduleTime: find a meeting time everyone can make.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short = 'c', long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Log store requests and sync activity
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the web server
    Serve {
        /// Listen address, overrides [server].addr (e.g. "0.0.0.0:3009")
        #[arg(short = 'a', long)]
        addr: Option<String>,
    },

    /// Create an event
    ///
    /// Example:
    ///   create --title "Team sync" --dates 2025-06-01,2025-06-03 --start-hour 9 --end-hour 17
    Create {
        #[arg(short, long)]
        title: String,

        /// Candidate days, comma-separated YYYY-MM-DD
        #[arg(short, long)]
        dates: String,

        #[arg(long, default_value_t = 9)]
        start_hour: u8,

        #[arg(long, default_value_t = 17)]
        end_hour: u8,

        /// IANA timezone name
        #[arg(long, default_value = "UTC")]
        timezone: String,

        #[arg(long)]
        description: Option<String>,
    },

    /// Submit or replace a participant's availability
    Submit {
        #[arg(short, long)]
        event: String,

        #[arg(short, long)]
        name: String,

        /// Slot keys, comma-separated (e.g. "2025-06-01-9,2025-06-01-10")
        #[arg(short, long)]
        slots: String,

        #[arg(long)]
        email: Option<String>,

        /// Lock the name so only the password holder can change it
        #[arg(long)]
        lock: bool,

        #[arg(short, long)]
        password: Option<String>,
    },

    /// Print the best times for an event
    BestTimes {
        #[arg(short, long)]
        event: String,
    },

    /// Show who is and is not available for one slot
    Slot {
        #[arg(short, long)]
        event: String,

        /// Slot key, e.g. "2025-06-01-9"
        key: String,
    },

    /// Reprint the best times whenever the event changes
    Watch {
        #[arg(short, long)]
        event: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut cfg = config::load_or_default(&cli.config)?;
    if cfg.store.backend == StoreBackend::Memory && !matches!(cli.command, Command::Serve { .. }) {
        warn!("Using the in-memory store: nothing persists after this command exits");
    }

    match cli.command {
        Command::Serve { addr } => {
            if let Some(addr) = addr {
                cfg.server.addr = addr;
            }
            let backend = store::connect(&cfg.store)?;
            web::serve(cfg, backend).await?;
        }
        Command::Create {
            title,
            dates,
            start_hour,
            end_hour,
            timezone,
            description,
        } => {
            let backend = store::connect(&cfg.store)?;
            let args = CreateArgs {
                title: &title,
                description: description.as_deref(),
                dates: &dates,
                start_hour,
                end_hour,
                timezone: &timezone,
            };
            commands::run_create(&backend, args, &cfg.server.public_url).await?;
        }
        Command::Submit {
            event,
            name,
            slots,
            email,
            lock,
            password,
        } => {
            let backend = store::connect(&cfg.store)?;
            let args = SubmitArgs {
                event: &event,
                name: &name,
                slots: &slots,
                email: email.as_deref(),
                lock,
                password: password.as_deref(),
            };
            commands::run_submit(&backend, args).await?;
        }
        Command::BestTimes { event } => {
            let backend = store::connect(&cfg.store)?;
            commands::run_best_times(&backend, &event).await?;
        }
        Command::Slot { event, key } => {
            let backend = store::connect(&cfg.store)?;
            commands::run_slot(&backend, &event, &key).await?;
        }
        Command::Watch { event } => {
            let backend = store::connect(&cfg.store)?;
            commands::run_watch(&backend, &event).await?;
        }
    }

    Ok(())
}

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use clinic_router::app::{ClinicService, StoreMode, build_service};
use clinic_router::{ClinicRouterServer, PatientId, RouterConfig, SessionStatus, Slots, TurnRequest};

/// Clinic-Router CLI: multi-turn appointment assistant
#[derive(Parser, Debug)]
#[command(name = "clinic-router")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Path to configuration file (auto-detected when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding session files (overrides storage.sessions_dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep sessions in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat interactively as a patient
    #[command(name = "chat")]
    Chat {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Process a single turn and print the response as JSON
    #[command(name = "turn")]
    Turn {
        #[command(flatten)]
        session: SessionArgs,

        /// The patient's message
        #[arg(short, long)]
        message: String,

        /// Intent tag to use instead of classifying (e.g. "book")
        #[arg(long)]
        intent: Option<String>,

        /// Slot value to use instead of extracting, as field=value (repeatable)
        #[arg(long = "slot", value_name = "FIELD=VALUE")]
        slots: Vec<String>,
    },

    /// List, delete or prune sessions
    #[command(name = "sessions")]
    Sessions {
        /// Patient id (7 or 8 digits); required unless pruning
        #[arg(short, long, required_unless_present = "prune")]
        patient_id: Option<String>,

        /// Delete this session of the patient instead of listing
        #[arg(long, value_name = "SESSION")]
        delete: Option<String>,

        /// Remove sessions of every patient idle longer than the retention period
        #[arg(long, conflicts_with = "delete")]
        prune: bool,

        /// Retention period in days (overrides storage.retention_days)
        #[arg(long, requires = "prune")]
        older_than_days: Option<u32>,
    },

    /// Run the MCP server over stdio
    #[command(name = "mcp")]
    Mcp,
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Patient id (7 or 8 digits)
    #[arg(short, long)]
    patient_id: String,

    /// Session key (default: "default")
    #[arg(short, long)]
    session: Option<String>,
}

impl SessionArgs {
    fn request(&self, message: impl Into<String>) -> Result<TurnRequest> {
        let patient_id = PatientId::parse(&self.patient_id)?;
        let mut request = TurnRequest::new(patient_id, message);
        request.session_key = self.session.clone();
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let Some(command) = cli.command else {
        eprintln!("No command specified. Use --help for usage information.");
        eprintln!("Example: clinic-router chat --patient-id 1234567");
        std::process::exit(1);
    };

    let config = load_config(&cli.global)?;
    let mode = if cli.global.ephemeral {
        StoreMode::Ephemeral
    } else {
        StoreMode::Files
    };

    match command {
        Command::Mcp => handle_mcp_command(&config, mode).await,
        Command::Chat { session } => {
            let service = build_service(&config, mode).await?;
            handle_chat_command(&service, &session).await
        }
        Command::Turn {
            session,
            message,
            intent,
            slots,
        } => {
            let service = build_service(&config, mode).await?;
            let mut request = session.request(message)?;
            request.explicit_intent = intent;
            if !slots.is_empty() {
                request.explicit_slots = Some(parse_slot_args(&slots)?);
            }
            let response = service.handle(request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Sessions {
            patient_id,
            delete,
            prune,
            older_than_days,
        } => {
            let service = build_service(&config, mode).await?;
            if prune {
                let days = older_than_days.unwrap_or(config.storage.retention_days);
                let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(days));
                let removed = service.cleanup(cutoff).await?;
                println!("Removed {} sessions idle for more than {} days", removed, days);
                return Ok(());
            }

            let patient_id = patient_id
                .as_deref()
                .map(PatientId::parse)
                .transpose()?
                .context("--patient-id is required")?;
            match delete {
                Some(session_key) => {
                    if service.delete_session(patient_id, &session_key).await? {
                        println!("Deleted session {}", session_key);
                    } else {
                        println!("No session {} for patient {}", session_key, patient_id);
                    }
                }
                None => {
                    let sessions = service.sessions(patient_id).await?;
                    println!("{}", serde_json::to_string_pretty(&sessions)?);
                }
            }
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout stays clean for JSON output and MCP stdio.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Config file, then `CLINIC_ROUTER_*` env overrides, then CLI flags.
fn load_config(args: &GlobalArgs) -> Result<RouterConfig> {
    let path = match &args.config {
        Some(path) => Some(path.clone()),
        None => {
            let base_dir = std::env::current_dir().context("Failed to read current directory")?;
            RouterConfig::auto_detect(&base_dir)
        }
    };
    if let Some(path) = &path {
        info!("Using config file: {}", path.display());
    }

    let mut config = RouterConfig::load_with_env(path.as_deref())?;
    if let Some(dir) = &args.data_dir {
        config.storage.sessions_dir = dir.clone();
    }
    Ok(config)
}

fn parse_slot_args(args: &[String]) -> Result<Slots> {
    let pairs = args
        .iter()
        .map(|arg| {
            arg.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| anyhow::anyhow!("Invalid --slot '{}', expected FIELD=VALUE", arg))
        })
        .collect::<Result<Vec<_>>>()?;
    Slots::from_pairs(pairs)
}

async fn handle_mcp_command(config: &RouterConfig, mode: StoreMode) -> Result<()> {
    let service = Arc::new(build_service(config, mode).await?);
    ClinicRouterServer::with_service(service).run_stdio().await
}

async fn handle_chat_command(service: &ClinicService, session: &SessionArgs) -> Result<()> {
    println!("Clinic assistant. Type your message, or 'quit' to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message, "quit" | "exit") {
            break;
        }

        let response = service.handle(session.request(message)?).await;
        println!("{}", response.reply);

        if response.status == SessionStatus::Finished {
            println!("(session finished, start another with --session)");
            break;
        }
    }
    Ok(())
}

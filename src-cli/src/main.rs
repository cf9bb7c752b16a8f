//! # `mca`
//!
//! Command line front end for machinery compliance assessments: machines live in a local
//! SQLite workspace, assessments and chat answers are grounded on a retrieval service and a
//! local Ollama model.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mca init` | Create the workspace database and run migrations |
//! | `mca machine add --name <name>` | Register a machine |
//! | `mca machine list` | List machines (optionally by name or category) |
//! | `mca machine show <id>` | A machine with its assessments |
//! | `mca machine delete <id>` | Delete a machine and its assessments |
//! | `mca assess <machine_id>` | Generate and store a new assessment |
//! | `mca assessments <machine_id>` | Stored assessments, newest first |
//! | `mca chat "<question>"` | Question over the document corpus |
//! | `mca assessment-chat <id> "<question>"` | Question about one stored assessment |
//! | `mca export-chat <conversation.json>` | Conversation transcript as CSV |
//! | `mca health` | Check the local Ollama instance |

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use mca_cli::AppConfig;
use mca_core::domain::MachineInput;
use mca_core::error::AppError;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Machinery compliance assessments with cited sources.
///
/// Configuration comes from the environment: MCA_DATA_DIR, OLLAMA_BASE_URL,
/// MCA_ANSWER_MODEL, MCA_SEARCH_URL, MCA_HTTP_TIMEOUT_SECS. Logging honours RUST_LOG.
/// Exits with 2 when a machine or assessment id is unknown, 1 on any other error.
#[derive(Parser)]
#[command(name = "mca", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the workspace database. Safe to run more than once.
    Init,

    /// Manage machines.
    #[command(subcommand)]
    Machine(MachineCommand),

    /// Generate and persist an assessment for a machine.
    Assess { machine_id: i64 },

    /// List the stored assessments of a machine.
    Assessments { machine_id: i64 },

    /// Ask a question over the document corpus.
    Chat {
        question: String,
        /// JSON file with prior turns (`[{role, content}]` or `{messages: [...]}`).
        #[arg(long)]
        history: Option<PathBuf>,
        /// Text file replacing the default chat instruction.
        #[arg(long)]
        system_prompt: Option<PathBuf>,
    },

    /// Ask a follow-up question about one stored assessment.
    AssessmentChat {
        assessment_id: i64,
        question: String,
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Render a saved conversation as CSV on stdout.
    ExportChat { conversation: PathBuf },

    /// Check that Ollama answers on 127.0.0.1.
    Health,
}

#[derive(Subcommand)]
enum MachineCommand {
    Add(MachineArgs),
    List {
        /// Case-insensitive substring of the name.
        #[arg(long)]
        search: Option<String>,
        #[arg(long, conflicts_with = "search")]
        category: Option<String>,
    },
    Show { machine_id: i64 },
    Delete { machine_id: i64 },
}

#[derive(Args)]
struct MachineArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    manufacturer: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    serial_number: Option<String>,
    #[arg(long)]
    production_year: Option<i32>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    technical_specs: Option<String>,
}

impl From<MachineArgs> for MachineInput {
    fn from(args: MachineArgs) -> Self {
        MachineInput {
            name: args.name,
            description: args.description,
            manufacturer: args.manufacturer,
            model: args.model,
            serial_number: args.serial_number,
            production_year: args.production_year,
            category: args.category,
            technical_specs: args.technical_specs,
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(code = %err.code, "command failed");
            let body = serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string());
            eprintln!("{body}");
            ExitCode::from(mca_cli::exit_status(&err))
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let body = serde_json::to_string_pretty(value).map_err(|e| {
        AppError::new("CLI_OUTPUT_FAILED", "Failed to serialize output").with_details(e.to_string())
    })?;
    println!("{body}");
    Ok(())
}

fn run(command: Commands, config: &AppConfig) -> Result<(), AppError> {
    match command {
        Commands::Init => print_json(&mca_cli::init_db(config)?),
        Commands::Machine(cmd) => match cmd {
            MachineCommand::Add(args) => print_json(&mca_cli::machine_add(config, args.into())?),
            MachineCommand::List { search, category } => print_json(&mca_cli::machine_list(
                config,
                search.as_deref(),
                category.as_deref(),
            )?),
            MachineCommand::Show { machine_id } => {
                print_json(&mca_cli::machine_show(config, machine_id)?)
            }
            MachineCommand::Delete { machine_id } => {
                print_json(&mca_cli::machine_delete(config, machine_id)?)
            }
        },
        Commands::Assess { machine_id } => print_json(&mca_cli::assess(config, machine_id)?),
        Commands::Assessments { machine_id } => {
            print_json(&mca_cli::assessments(config, machine_id)?)
        }
        Commands::Chat {
            question,
            history,
            system_prompt,
        } => print_json(&mca_cli::chat_once(
            config,
            &question,
            history.as_deref(),
            system_prompt.as_deref(),
        )?),
        Commands::AssessmentChat {
            assessment_id,
            question,
            history,
        } => print_json(&mca_cli::assessment_chat_once(
            config,
            assessment_id,
            &question,
            history.as_deref(),
        )?),
        Commands::ExportChat { conversation } => {
            print!("{}", mca_cli::export_chat(&conversation)?);
            Ok(())
        }
        Commands::Health => print_json(&mca_cli::ai_health_check(config)?),
    }
}

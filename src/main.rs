use clap::{Parser, Subcommand};
use hostops::config;
use hostops::errors::ToolError;
use hostops::services::classifier::OutcomeClassifier;
use hostops::services::command_builder::ActionKind;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hostops")]
#[command(about = "Remote command execution and job tracking over SSH, served as MCP tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the MCP tools over stdin/stdout (default)
    Serve,
    /// Classify a finished job log and print the outcome as JSON
    Classify {
        /// Action kind the log belongs to (e.g. create-site)
        #[arg(short, long)]
        action: String,

        /// Log file to read; stdin when omitted or "-"
        #[arg(short, long)]
        log: Option<PathBuf>,

        /// Extra outcome rules file (defaults to HOSTOPS_OUTCOME_RULES_PATH)
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },
}

fn read_log(path: Option<&PathBuf>) -> Result<String, ToolError> {
    let mut raw = Vec::new();
    match path {
        Some(path) if path.as_os_str() != "-" => {
            raw = std::fs::read(path).map_err(|err| {
                ToolError::invalid_params(format!("Cannot read {}: {}", path.display(), err))
            })?;
        }
        _ => {
            std::io::stdin().read_to_end(&mut raw)?;
        }
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn classify(action: &str, log: Option<&PathBuf>, rules: Option<PathBuf>) -> Result<(), ToolError> {
    let action = ActionKind::parse(action)?;
    let rules = rules.or_else(config::resolve_outcome_rules_path);
    let classifier = OutcomeClassifier::from_path(rules.as_deref())?;
    let outcome = classifier.classify(action, &read_log(log)?);
    let rendered = serde_json::to_string_pretty(&outcome)
        .map_err(|err| ToolError::internal(err.to_string()))?;
    println!("{}", rendered);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => hostops::mcp::server::run_stdio().await,
        Commands::Classify {
            action,
            log,
            rules,
        } => classify(&action, log.as_ref(), rules),
    };
    if let Err(err) = result {
        eprintln!("hostops: {}", err);
        std::process::exit(1);
    }
}

use arbor_core::config::{load_config_or_default, ArborConfig, ConfigError, DEFAULT_CONFIG_PATH};
use arbor_core::validation::{Validate, ValidationIssue, ValidationLevel};
use arbor_web::{run_web_server, BroadcastSink, WebError, WebState};
use arbord::{configured_sink, ArborService, EventLogError, EventSink, ServiceError};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    config_path: PathBuf,
    bind_override: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Run(CliArgs),
    Help(String),
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("{0}")]
    Args(String),
    #[error("failed to load config at {path}: {source}")]
    LoadConfig {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },
    #[error("{0}")]
    InvalidConfig(String),
    #[error("failed to prepare event log: {0}")]
    EventLog(#[from] EventLogError),
    #[error("failed to start arbor service: {0}")]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Web(#[from] WebError),
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("arbor-web failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), MainError> {
    let mut argv = env::args();
    let program = argv.next().unwrap_or_else(|| "arbor-web".to_string());
    let args = match parse_cli_args(argv.collect::<Vec<_>>(), &program)? {
        CliCommand::Run(args) => args,
        CliCommand::Help(text) => {
            println!("{text}");
            return Ok(());
        }
    };

    let config = load_config_or_default(&args.config_path).map_err(|source| {
        MainError::LoadConfig {
            path: args.config_path.clone(),
            source,
        }
    })?;
    init_logging(&config);
    validate_config(&config.validate())?;
    let bind = resolve_bind(args.bind_override, &config.server.bind)?;

    let broadcast = BroadcastSink::new(config.server.event_buffer);
    let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(broadcast.clone())];
    let events = configured_sink(&config.storage, sinks)?;
    let service = ArborService::from_config(config, events)?;

    run_web_server(&bind, WebState::new(service, broadcast)).await?;
    Ok(())
}

fn init_logging(config: &ArborConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn resolve_bind(bind_override: Option<String>, config_bind: &str) -> Result<String, MainError> {
    let candidate = bind_override.unwrap_or_else(|| config_bind.to_string());
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return Err(MainError::Args(
            "bind address must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_config(issues: &[ValidationIssue]) -> Result<(), MainError> {
    for issue in issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Warning)
    {
        warn!(code = issue.code, "{}", issue.message);
    }
    let errors = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .collect::<Vec<_>>();
    if errors.is_empty() {
        return Ok(());
    }

    let rendered = errors
        .iter()
        .map(|issue| format!("{}: {}", issue.code, issue.message))
        .collect::<Vec<_>>()
        .join("; ");
    Err(MainError::InvalidConfig(format!(
        "config validation failed ({rendered})"
    )))
}

fn parse_cli_args(args: Vec<String>, program: &str) -> Result<CliCommand, MainError> {
    let mut parsed = CliArgs {
        config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        bind_override: None,
    };

    let mut idx = 0usize;
    while idx < args.len() {
        let arg = &args[idx];
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliCommand::Help(usage(program))),
            "--config" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| MainError::Args("missing value for --config".to_string()))?;
                parsed.config_path = PathBuf::from(value);
            }
            "--bind" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| MainError::Args("missing value for --bind".to_string()))?;
                parsed.bind_override = Some(value.clone());
            }
            other => {
                return Err(MainError::Args(format!(
                    "unknown argument: {other}\n\n{}",
                    usage(program)
                )));
            }
        }
        idx += 1;
    }

    Ok(CliCommand::Run(parsed))
}

fn usage(program: &str) -> String {
    format!(
        "Usage: {program} [--config <path>] [--bind <ip:port>]\n\
Defaults:\n\
  --config {DEFAULT_CONFIG_PATH}\n\
  --bind from [server] bind"
    )
}

mod chat_commands;
mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::{debug, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    veritas_chat::{ChatService, ChatSettings},
    veritas_config::VeritasConfig,
    veritas_orchestrator::{Depth, Orchestrator},
};

#[derive(Parser)]
#[command(
    name = "veritas",
    version,
    about = "VERITAS: evidence-seeking research assistant over a resilient model chain"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of the standard search locations.
    #[arg(long, global = true, env = "VERITAS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question.
    Ask {
        message: String,
        /// Knowledge layer: SURFACE, DEEP, DARK or VAULT.
        #[arg(long)]
        depth: Option<Depth>,
        /// Print the reply (or error) as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Interactive chat session.
    Chat {
        /// Starting knowledge layer.
        #[arg(long)]
        depth: Option<Depth>,
    },
    /// Show the model chain, routing and breaker state.
    Models,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<VeritasConfig> {
    match path {
        Some(path) => veritas_config::load_config(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(veritas_config::discover_and_load()),
    }
}

/// Build the chat service once; everything downstream shares it.
fn build_service(config: &VeritasConfig) -> anyhow::Result<ChatService> {
    let orchestrator =
        Orchestrator::from_config(config).context("invalid [orchestrator] config")?;
    if orchestrator.registry().is_empty() {
        warn!("no providers available; set an API key or enable ollama");
    }
    debug!(families = ?orchestrator.registry().families(), "providers registered");

    let settings = ChatSettings::try_from(&config.chat).context("invalid [chat] config")?;
    let service = ChatService::new(Arc::new(orchestrator), settings)?;
    debug!(sources = ?service.context_sources(), "context sources configured");
    Ok(service)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_telemetry(&cli);
    debug!(version = env!("CARGO_PKG_VERSION"), "veritas starting");

    match cli.command {
        Commands::Config { action } => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
        Commands::Ask {
            message,
            depth,
            json,
        } => {
            let service = build_service(&load_config(cli.config.as_ref())?)?;
            chat_commands::ask(&service, &message, depth, json).await
        },
        Commands::Chat { depth } => {
            let service = build_service(&load_config(cli.config.as_ref())?)?;
            chat_commands::repl(&service, depth).await
        },
        Commands::Models => {
            let service = build_service(&load_config(cli.config.as_ref())?)?;
            chat_commands::print_models(service.orchestrator());
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use {super::*, clap::CommandFactory};

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ask_with_depth() {
        let cli =
            Cli::try_parse_from(["veritas", "ask", "who?", "--depth", "deep", "--json"]).unwrap();
        match cli.command {
            Commands::Ask {
                message,
                depth,
                json,
            } => {
                assert_eq!(message, "who?");
                assert_eq!(depth, Some(Depth::Deep));
                assert!(json);
            },
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn rejects_unknown_depth() {
        assert!(Cli::try_parse_from(["veritas", "chat", "--depth", "abyss"]).is_err());
    }

    #[test]
    fn explicit_config_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("veritas.toml");
        std::fs::write(&path, "[orchestrator]\nmodels = [\"ollama/llama3\"]\n").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.orchestrator.models, vec!["ollama/llama3"]);

        let missing = dir.path().join("missing.toml");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(format!("{err:#}").contains("missing.toml"));
    }

    #[test]
    fn build_service_rejects_invalid_settings() {
        let mut cfg = VeritasConfig::default();
        cfg.orchestrator.retry.max_attempts = 0;
        assert!(build_service(&cfg).is_err());

        let mut cfg = VeritasConfig::default();
        cfg.chat.history_window = Some(0);
        assert!(build_service(&cfg).is_err());

        let mut cfg = VeritasConfig::default();
        cfg.chat.context_sources = vec!["altavista".into()];
        assert!(build_service(&cfg).is_err());
    }
}

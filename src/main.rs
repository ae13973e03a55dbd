use agent_core::agent_loop::AgentLoop;
use agent_core::config::AppConfig;
use agent_core::conversation::Conversation;
use agent_core::tool_registry::ToolRegistry;
use agent_core::types::Message;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "clock-agent",
    about = "A tool-calling chat agent served over HTTP",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/clock-agent/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the model name
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Send one message to the agent and print the reply
    Ask {
        /// The message to send
        message: String,
    },

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            "clock_agent=info,agent_core=info,agent_server=info,tower_http=info,warn".into()
        }))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let init_requested = matches!(
        cli.command,
        Some(Commands::Config {
            action: Some(ConfigAction::Init)
        })
    );
    let mut config = match &cli.config {
        Some(path) if init_requested && !path.exists() => AppConfig::default(),
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }
    if let Some(api_base) = &cli.api_base {
        config.provider.api_base = api_base.clone();
    }

    let mut registry = ToolRegistry::new();
    agent_tools::register_all(&mut registry);
    let registry = Arc::new(registry);

    tracing::info!(
        "Loaded {} tool(s), model: {}, endpoint: {}",
        registry.len(),
        config.provider.model,
        config.provider.api_base,
    );

    match cli.command {
        Some(Commands::Serve { host, port }) => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            agent_server::serve(config, registry).await?;
        }
        Some(Commands::Ask { message }) => {
            let agent = AgentLoop::from_config(&config, registry);
            let mut conversation = Conversation::new();
            conversation.push(Message::user(message));
            let reply = agent.run(&mut conversation).await?;
            println!("{}", reply.content);
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, &config, cli.config.as_deref())?;
        }
        None => {
            agent_server::serve(config, registry).await?;
        }
    }

    Ok(())
}

fn handle_config_command(
    action: Option<ConfigAction>,
    config: &AppConfig,
    explicit_path: Option<&std::path::Path>,
) -> Result<()> {
    let path = explicit_path
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);

    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                config.save_to(&path)?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", path.display());
        }
    }
    Ok(())
}

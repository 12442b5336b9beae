use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rtun_agent::{AgentApiClient, AgentWorker};
use rtun_core::config::Settings;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "rtun-agent", about = "Remote worker that owns a project and tunnels it to an rtun edge")]
struct Cli {
    /// Path to a TOML config file (default: ~/.rtun/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL of the edge to report to, e.g. https://tunnel.example.com
    #[arg(long)]
    server: Option<String>,

    /// Agent API key (overrides AGENT_API_KEY and the config file)
    #[arg(long)]
    api_key: Option<String>,

    /// Maximum consecutive heartbeat/poll errors before the agent re-execs itself
    #[arg(long)]
    max_consecutive_errors: Option<u32>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    rtun_agent::init_tracing();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_ref())?;
    settings.ensure_directories()?;

    if let Some(server) = cli.server {
        settings.agent.server_url = server;
    }
    if let Some(api_key) = cli.api_key {
        settings.agent.api_key = api_key;
    }
    if let Some(max_errors) = cli.max_consecutive_errors {
        settings.agent.max_consecutive_errors = max_errors;
    }

    if settings.agent.api_key.is_empty() {
        return Err(color_eyre::eyre::eyre!(
            "no API key configured: pass --api-key, set AGENT_API_KEY, or add it to the config file"
        ));
    }

    let api = AgentApiClient::new(settings.agent.server_url.clone(), settings.agent.api_key.clone());
    let worker = Arc::new(AgentWorker::new(api, settings.agent.clone()));

    let shutdown = CancellationToken::new();
    rtun_agent::spawn_signal_handler(shutdown.clone());

    if worker.run(shutdown).await {
        rtun_agent::worker::restart_process();
    }

    Ok(())
}

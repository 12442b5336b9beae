use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rtun_core::config::Settings;
use rtun_core::store::{InMemoryStore, SharedStore};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "rtun-edge", about = "Public ingress and control-channel edge")]
struct Cli {
    /// Path to a TOML config file (default: ~/.rtun/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    rtun_edge::init_tracing();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_ref())?;
    settings.ensure_directories()?;

    let store: SharedStore = Arc::new(InMemoryStore::new());
    let shutdown = CancellationToken::new();
    rtun_edge::spawn_signal_handler(shutdown.clone());

    rtun_edge::serve(settings, store, shutdown).await
}

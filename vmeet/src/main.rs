mod server;

use anyhow::Result;
use tracing::info;

use vmeet_core::{logging, Config};

use server::{Services, VMeetServer};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (VMEET_CONFIG file if set, env vars on top)
    let config_file = std::env::var("VMEET_CONFIG").ok();
    let config = Config::load(config_file.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("VMeet server starting...");
    info!("HTTP address: {}", config.http_address());
    info!("Directory: {}", config.directory.base_url);
    info!("Blob store: {} (bucket {})", config.storage.base_url, config.storage.bucket);

    // 3. Build services and run until shutdown
    let services = Services::init(&config)?;
    VMeetServer::new(config, services).start().await
}

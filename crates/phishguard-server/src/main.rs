//! Service entry point

use phishguard_common::AppConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Fatal in production: name the key and exit non-zero.
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        mailbox = %config.mailbox.address,
        environment = ?config.environment,
        "starting phishguard"
    );

    let bind_addr = config.bind_addr.clone();
    let service = phishguard_server::build(config).await?;
    phishguard_server::serve(service, &bind_addr).await
}

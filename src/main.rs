use clap::Parser;
use qrscp::config::Cli;
use qrscp::storage::{self, ingest};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    qrscp::init_logging(&config.logging)?;

    tracing::info!("Listening on port: {}", config.dimse.port);
    tracing::info!("Network timeout: {:?}", config.dimse.network_timeout());
    tracing::info!("Bind address: {}", config.dimse.bind_addr);
    tracing::info!(
        "Database location: {}",
        config.storage.database_location.display()
    );

    std::fs::create_dir_all(&config.storage.instance_location)?;
    let repository = storage::create_repository(&config.storage)?;

    if !cli.import.is_empty() {
        let indexed = ingest::index_files(&*repository, &cli.import);
        tracing::info!("Imported {} of {} file(s)", indexed, cli.import.len());
    }
    tracing::info!("{} instance(s) available", repository.count()?);

    let shutdown = CancellationToken::new();
    let server = qrscp::start_with_repository(&config, repository, shutdown.clone()).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();
    server.wait().await;

    Ok(())
}

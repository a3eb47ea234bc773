//! DICOM Query/Retrieve (C-FIND), Modality Worklist and MPPS service core
//!
//! Decoded requests enter through the [`dimse`] router; [`start`] wires the
//! instance repository, the procedure step registry and the DIMSE dispatcher
//! together.

pub mod adapters;
pub mod config;
pub mod mpps;
pub mod qr;
pub mod storage;
pub mod worklist;

use std::sync::Arc;

use dimse::router::RouterSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::adapters::dimse::{DimseAdapter, QrScpProvider};
use crate::config::{Config, ConfigError, LoggingConfig};
use crate::mpps::ProcedureStepRegistry;
use crate::storage::{InstanceRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open instance repository: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Failed to start DIMSE service: {0}")]
    Dimse(#[from] dimse::DimseError),

    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<(), StartupError> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .map_err(|e| StartupError::Logging(e.to_string()))
    };

    if config.log_to_file {
        let file = std::fs::File::create(&config.log_file_path).map_err(|e| {
            StartupError::Logging(format!("cannot create {}: {}", config.log_file_path, e))
        })?;

        let file_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_writer(Arc::new(file));

        let stdout_appender = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(filter()?)
            .with(file_appender)
            .with(stdout_appender)
            .try_init()
            .map_err(|e| StartupError::Logging(e.to_string()))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter()?)
            .with_file(true)
            .with_line_number(true)
            .try_init()
            .map_err(|e| StartupError::Logging(e.to_string()))
    }
}

/// A running service: the router sender a transport layer submits decoded
/// requests through, plus the shared state behind it
pub struct Server {
    sender: RouterSender,
    repository: Arc<dyn InstanceRepository>,
    registry: Arc<ProcedureStepRegistry>,
    handle: JoinHandle<()>,
}

impl Server {
    pub fn sender(&self) -> RouterSender {
        self.sender.clone()
    }

    pub fn repository(&self) -> &Arc<dyn InstanceRepository> {
        &self.repository
    }

    pub fn registry(&self) -> &Arc<ProcedureStepRegistry> {
        &self.registry
    }

    /// Wait for the dispatcher to stop (after its shutdown token is cancelled)
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            tracing::error!("DIMSE dispatcher task failed: {}", e);
        }
    }
}

/// Open the configured repository and start serving
pub async fn start(config: &Config, shutdown: CancellationToken) -> Result<Server, StartupError> {
    config.validate()?;
    let repository = storage::create_repository(&config.storage)?;
    start_with_repository(config, repository, shutdown).await
}

/// Start serving over an already opened repository
pub async fn start_with_repository(
    config: &Config,
    repository: Arc<dyn InstanceRepository>,
    shutdown: CancellationToken,
) -> Result<Server, StartupError> {
    let registry = Arc::new(ProcedureStepRegistry::new());
    let provider = Arc::new(QrScpProvider::new(
        Arc::clone(&repository),
        Arc::clone(&registry),
        config.dimse.local_aet.clone(),
    ));

    let adapter = DimseAdapter::new(config.dimse.clone(), provider);
    tracing::info!("🔧 Starting {}", adapter.summary());
    let (sender, handle) = adapter.start(shutdown).await?;

    Ok(Server {
        sender,
        repository,
        registry,
        handle,
    })
}

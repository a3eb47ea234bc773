mod provider;
pub mod status_mapper;

pub use provider::QrScpProvider;

use dimse::router::{InMemoryRouter, RouterSender};
use dimse::{DimseConfig, DimseError, DimseScp, ServiceProvider};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Registry of started dispatchers to prevent duplicate service providers
/// Key format: "{local_aet}@{bind_addr}:{port}"
static STARTED_SCP: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// DIMSE protocol adapter
///
/// Owns the dispatcher that drains decoded requests from the router and hands
/// them to the service provider.
pub struct DimseAdapter {
    config: DimseConfig,
    provider: Arc<dyn ServiceProvider>,
}

impl DimseAdapter {
    pub fn new(config: DimseConfig, provider: Arc<dyn ServiceProvider>) -> Self {
        Self { config, provider }
    }

    fn key(&self) -> String {
        format!(
            "{}@{}:{}",
            self.config.local_aet, self.config.bind_addr, self.config.port
        )
    }

    /// Register an SCP in the global registry
    fn register_scp(key: String) -> bool {
        let mut guard = STARTED_SCP.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key)
    }

    /// Unregister an SCP from the global registry
    fn unregister_scp(key: &str) {
        let mut guard = STARTED_SCP.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(key);
    }

    /// Start the dispatcher.
    ///
    /// Returns the sender a transport layer submits requests through and the
    /// dispatcher task, which ends once `shutdown` is cancelled.
    pub async fn start(
        &self,
        shutdown: CancellationToken,
    ) -> dimse::Result<(RouterSender, JoinHandle<()>)> {
        self.config.validate()?;

        let key = self.key();
        if !Self::register_scp(key.clone()) {
            return Err(DimseError::config(format!(
                "DIMSE SCP '{}' is already running",
                key
            )));
        }

        let (sender, receiver) = InMemoryRouter::new().split();
        let scp = DimseScp::new(self.config.clone(), Arc::clone(&self.provider));

        tracing::info!(
            "Starting DIMSE SCP AET='{}' on {}:{} (network timeout {:?})",
            self.config.local_aet,
            self.config.bind_addr,
            self.config.port,
            self.config.network_timeout()
        );

        let handle = tokio::spawn(async move {
            if let Err(e) = scp.serve(receiver, shutdown).await {
                tracing::error!("DIMSE SCP '{}' failed: {}", key, e);
            } else {
                tracing::info!("DIMSE SCP '{}' stopped gracefully", key);
            }
            Self::unregister_scp(&key);
        });

        Ok((sender, handle))
    }

    pub fn summary(&self) -> String {
        format!("DimseAdapter for {}", self.key())
    }
}

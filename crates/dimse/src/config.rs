//! Configuration types for DIMSE services

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::DEFAULT_DIMSE_PORT;

/// Configuration for DIMSE services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimseConfig {
    /// Local Application Entity Title, reported as Retrieve AE Title in C-FIND responses
    #[serde(default = "default_local_aet")]
    pub local_aet: String,

    /// Bind address for the SCP listener
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Port for the SCP listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// Network idle timeout in milliseconds (enforced by the transport layer)
    #[serde(default = "default_network_timeout")]
    pub network_timeout_ms: u64,

    /// Maximum number of requests dispatched concurrently
    #[serde(default = "default_max_associations")]
    pub max_associations: u32,

    /// Enable the Verification service (C-ECHO)
    #[serde(default = "default_true")]
    pub enable_echo: bool,

    /// Enable the query services (C-FIND)
    #[serde(default = "default_true")]
    pub enable_find: bool,

    /// Enable Modality Performed Procedure Step (N-CREATE / N-SET)
    #[serde(default = "default_true")]
    pub enable_mpps: bool,
}

impl Default for DimseConfig {
    fn default() -> Self {
        Self {
            local_aet: default_local_aet(),
            bind_addr: default_bind_addr(),
            port: default_port(),
            network_timeout_ms: default_network_timeout(),
            max_associations: default_max_associations(),
            enable_echo: true,
            enable_find: true,
            enable_mpps: true,
        }
    }
}

impl DimseConfig {
    /// Get network timeout as Duration
    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        let aet = self.local_aet.trim();
        if aet.is_empty() || aet.len() > 16 {
            return Err(crate::error::DimseError::InvalidAeTitle(
                "Local AE title must be 1-16 characters".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(crate::error::DimseError::config("Port must be greater than 0"));
        }

        if self.max_associations == 0 {
            return Err(crate::error::DimseError::config(
                "max_associations must be greater than 0",
            ));
        }

        Ok(())
    }
}

// Default value functions
fn default_local_aet() -> String {
    "QRSCP".to_string()
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    DEFAULT_DIMSE_PORT
}

fn default_network_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_max_associations() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::config::{Config, ConfigError};

/// Command line options. Every option overrides the matching config file value.
#[derive(Parser, Debug, Default)]
#[command(
    name = "qrscp",
    version,
    about = "DICOM Query/Retrieve, Modality Worklist and MPPS service provider"
)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// TCP/IP port number to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Override the configured AE title
    #[arg(long = "ae-title", visible_alias = "aet", value_name = "AETITLE")]
    pub ae_title: Option<String>,

    /// Timeout for the network, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub network_timeout: Option<f64>,

    /// Address of the network interface to listen on
    #[arg(long, value_name = "ADDRESS")]
    pub bind_address: Option<IpAddr>,

    /// Location of the instance database
    #[arg(long, value_name = "FILE")]
    pub database_location: Option<PathBuf>,

    /// Directory holding stored instances
    #[arg(long, value_name = "DIRECTORY")]
    pub instance_location: Option<PathBuf>,

    /// Index DICOM Part 10 files into the database before serving
    #[arg(long, value_name = "FILE", num_args = 1..)]
    pub import: Vec<PathBuf>,

    /// Log filter directive (e.g. `debug` or `qrscp=trace`)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Load the config file (or defaults), then apply command line overrides
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        self.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(port) = self.port {
            config.dimse.port = port;
        }
        if let Some(ae_title) = &self.ae_title {
            config.dimse.local_aet = ae_title.clone();
        }
        if let Some(seconds) = self.network_timeout {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(ConfigError::Dimse(dimse::DimseError::config(format!(
                    "network timeout must be a non-negative number of seconds, got {}",
                    seconds
                ))));
            }
            config.dimse.network_timeout_ms = (seconds * 1000.0).round() as u64;
        }
        if let Some(bind_address) = self.bind_address {
            config.dimse.bind_addr = bind_address;
        }
        if let Some(path) = &self.database_location {
            config.storage.database_location = path.clone();
        }
        if let Some(path) = &self.instance_location {
            config.storage.instance_location = path.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        Ok(())
    }
}

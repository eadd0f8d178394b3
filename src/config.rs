use std::path::PathBuf;
use std::time::Duration;

use crate::commands::RootCommand;

/// Static configuration for one discovery instance, covering a single
/// (backend host, role) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveryConfig {
    /// Address of the Prometheus HTTP API, e.g. "localhost:9090".
    pub address: String,

    /// Pattern matched against the `role` label of `up` series.
    pub role: String,

    /// Time between refresh cycles.
    pub refresh_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// The address the metrics endpoint listens on.
    pub listen_address: String,

    /// Directory the per-role file_sd files are written to.
    pub output_path: PathBuf,

    /// One entry per (backend host, role) pair.
    pub discoveries: Vec<DiscoveryConfig>,
}

impl Config {
    /// Expand the flag surface into per-instance configurations, one for
    /// every (host, role) combination.
    pub fn from_command(cmd: &RootCommand) -> Config {
        let refresh_interval = Duration::from_secs(cmd.refresh_interval);

        let mut discoveries = Vec::new();
        for address in split_list(&cmd.target_address) {
            for role in split_list(&cmd.roles) {
                discoveries.push(DiscoveryConfig {
                    address: address.to_string(),
                    role: role.to_string(),
                    refresh_interval,
                });
            }
        }

        Config {
            listen_address: cmd.listen_address.clone(),
            output_path: PathBuf::from(&cmd.output_path),
            discoveries,
        }
    }
}

fn split_list(input: &str) -> impl Iterator<Item = &str> {
    input.split(',').map(str::trim).filter(|part| !part.is_empty())
}

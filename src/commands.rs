use argh::FromArgs;

/// Generate file_sd target files for Prometheus from instant queries.
#[derive(Debug, FromArgs)]
pub struct RootCommand {
    /// print version information
    #[argh(switch, short = 'V')]
    pub version: bool,

    /// the address to listen on for the metrics endpoint
    #[argh(option, default = "String::from(\"localhost:9091\")")]
    pub listen_address: String,

    /// comma-separated addresses of the Prometheus HTTP APIs to query
    #[argh(option, default = "String::from(\"localhost:9090\")")]
    pub target_address: String,

    /// comma-separated role patterns to discover targets for
    #[argh(option, default = "String::from(\"jmx_exporter\")")]
    pub roles: String,

    /// directory the file_sd files are written to
    #[argh(option, default = "String::from(\"/opt/prometheus/conf/files_sd/\")")]
    pub output_path: String,

    /// seconds between refresh cycles
    #[argh(option, default = "30")]
    pub refresh_interval: u64,

    /// log level, one of trace, debug, info, warn, error or off
    #[argh(option, default = "String::from(\"info\")")]
    pub log_level: String,

    /// number of worker threads, defaults to the number of cpu cores
    #[argh(option)]
    pub threads: Option<usize>,
}

impl RootCommand {
    pub fn show_version(&self) {
        println!("promsd {}", env!("CARGO_PKG_VERSION"));
    }
}

//! Provides a means to read, parse and hold configuration options for scans.
use crate::port_source::PortSource;
use crate::scanner::{ScanConfig, DEFAULT_MAX_SOCKETS, DEFAULT_TIMEOUT};
use anyhow::Context;
use clap::{ArgGroup, Parser};
use serde_derive::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Parses a timeout given in (possibly fractional) seconds.
fn parse_timeout(input: &str) -> Result<f64, String> {
    let seconds: f64 = input
        .trim()
        .parse()
        .map_err(|_| format!("Invalid timeout '{input}'. Expected seconds, e.g. 0.5"))?;

    check_timeout(seconds)
}

fn check_timeout(seconds: f64) -> Result<f64, String> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!(
            "Timeout {seconds} must be a non-negative number of seconds"
        ));
    }

    Duration::try_from_secs_f64(seconds)
        .map(|_| seconds)
        .map_err(|_| format!("Timeout {seconds} is too large"))
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sweepscan",
    version = env!("CARGO_PKG_VERSION"),
    max_term_width = 120,
    group(ArgGroup::new("port_source").required(true).args(["ports", "all", "range"])),
)]
#[allow(clippy::struct_excessive_bools)]
/// Concurrent TCP connect port scanner.
/// Ports are probed in windows of at most `--sockets` connections; a window
/// is fully drained before the next one starts.
pub struct Opts {
    /// The IPv4/IPv6 address or DNS name of the target device.
    pub host: String,

    /// Port numbers to scan. Values outside 1-65535 are ignored.
    #[arg(short, long, num_args = 1.., allow_negative_numbers = true)]
    pub ports: Option<Vec<i64>>,

    /// Scan all port numbers 1 to 65535.
    #[arg(short, long)]
    pub all: bool,

    /// Scan all port numbers in the inclusive range START END.
    #[arg(short, long, num_args = 2, value_names = ["START", "END"], allow_negative_numbers = true)]
    pub range: Option<Vec<i64>>,

    /// The timeout of socket connections in seconds [default: 0.5]
    #[arg(short, long, value_parser = parse_timeout)]
    pub timeout: Option<f64>,

    /// The maximum number of concurrently connected sockets [default: 100]
    #[arg(short, long)]
    pub sockets: Option<usize>,

    /// A comma-delimited list or file of DNS resolvers.
    #[arg(long)]
    pub resolver: Option<String>,

    /// Automatically ups the ULIMIT with the value you provided.
    #[arg(short, long)]
    pub ulimit: Option<u64>,

    /// Greppable mode. Only output the open sockets.
    #[arg(short, long)]
    pub greppable: bool,

    /// Accessible mode. Turns off features which negatively affect screen readers.
    #[arg(long)]
    pub accessible: bool,

    /// Whether to ignore the configuration file or not.
    #[arg(short, long)]
    pub no_config: bool,

    /// Custom path to config file
    #[arg(short, long, value_parser)]
    pub config_path: Option<PathBuf>,
}

impl Opts {
    /// Reads the command line arguments.
    pub fn read() -> Self {
        Self::parse()
    }

    /// Merges values found within the user configuration file. Values given
    /// on the command line always win.
    pub fn merge(&mut self, config: &Config) {
        if !self.no_config {
            self.merge_flags(config);
            self.merge_optional(config);
        }
    }

    fn merge_flags(&mut self, config: &Config) {
        macro_rules! merge_flags {
            ($($field: ident),+) => {
                $(
                    if let Some(true) = config.$field {
                        self.$field = true;
                    }
                )+
            }
        }

        merge_flags!(greppable, accessible);
    }

    fn merge_optional(&mut self, config: &Config) {
        macro_rules! merge_optional {
            ($($field: ident),+) => {
                $(
                    if self.$field.is_none() {
                        self.$field = config.$field.clone();
                    }
                )+
            }
        }

        merge_optional!(timeout, sockets, resolver, ulimit);
    }

    /// The port source selected on the command line.
    pub fn port_source(&self) -> PortSource {
        if self.all {
            return PortSource::All;
        }

        match (&self.ports, &self.range) {
            (Some(ports), _) => PortSource::List(ports.clone()),
            (None, Some(range)) => match range.as_slice() {
                [start, end] => PortSource::Range {
                    start: *start,
                    end: *end,
                },
                _ => PortSource::List(Vec::new()),
            },
            (None, None) => PortSource::List(Vec::new()),
        }
    }

    /// Builds the immutable scan configuration, applying defaults.
    pub fn scan_config(&self) -> ScanConfig {
        let timeout = self
            .timeout
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
            .unwrap_or(DEFAULT_TIMEOUT);

        ScanConfig::new(self.sockets.unwrap_or(DEFAULT_MAX_SOCKETS), timeout)
    }
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: String::new(),
            ports: None,
            all: false,
            range: None,
            timeout: None,
            sockets: None,
            resolver: None,
            ulimit: None,
            greppable: true,
            accessible: false,
            no_config: true,
            config_path: None,
        }
    }
}

/// Struct used to deserialize the options specified within our config file.
/// These will be further merged with our command line arguments in order to
/// generate the final Opts struct.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    timeout: Option<f64>,
    sockets: Option<usize>,
    resolver: Option<String>,
    ulimit: Option<u64>,
    greppable: Option<bool>,
    accessible: Option<bool>,
}

impl Config {
    /// Reads the configuration file with TOML format and parses it into a
    /// Config struct. A missing file yields an empty configuration.
    ///
    /// # Format
    ///
    /// timeout = 0.75
    /// sockets = 250
    /// resolver = "1.1.1.1,8.8.8.8"
    /// greppable = false
    ///
    pub fn read(custom_config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let config_path = match custom_config_path {
            Some(path) => path,
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Could not read {}", config_path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Found an error in configuration file {}", config_path.display()))
    }

    fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        if let Some(timeout) = config.timeout {
            check_timeout(timeout).map_err(anyhow::Error::msg)?;
        }
        Ok(config)
    }
}

/// Constructs default path to config toml
pub fn default_config_path() -> Option<PathBuf> {
    let mut config_path = dirs::home_dir()?;
    config_path.push(".sweepscan.toml");
    Some(config_path)
}

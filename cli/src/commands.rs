pub mod scan;

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, ArgGroup, Parser};
use smbscout_common::config::{
    Config, Credentials, DEFAULT_AUTH_PORT, DEFAULT_MAX_CONCURRENT, DEFAULT_PORTS, ScanConfig,
};
use smbscout_common::network::target::TargetSource;

#[derive(Parser, Debug)]
#[command(name = "smbscout")]
#[command(version)]
#[command(about = "Finds hosts exposing SMB and tries one set of credentials against them.")]
#[command(group(
    ArgGroup::new("targets")
        .required(true)
        .multiple(true)
        .args(["ip", "cidr", "file"])
))]
pub struct CommandLine {
    /// Single IP address to scan
    #[arg(long, value_name = "ADDR")]
    pub ip: Option<String>,

    /// IPv4 block to scan, e.g. 192.168.1.0/24
    #[arg(short, long, value_name = "CIDR")]
    pub cidr: Option<String>,

    /// File with one IP address per line
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Username, optionally as DOMAIN\user
    #[arg(short, long, requires = "password")]
    pub username: Option<String>,

    /// Password for --username
    #[arg(short, long, requires = "username")]
    pub password: Option<String>,

    /// Ports probed on every target
    #[arg(long, value_delimiter = ',', default_values_t = DEFAULT_PORTS)]
    pub ports: Vec<u16>,

    /// Port used for authentication
    #[arg(long, default_value_t = DEFAULT_AUTH_PORT)]
    pub auth_port: u16,

    /// Connect timeout per probe, in milliseconds
    #[arg(long = "timeout", value_name = "MS", default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Hard deadline per probe task, in milliseconds
    #[arg(long = "deadline", value_name = "MS", default_value_t = 5000)]
    pub deadline_ms: u64,

    /// Maximum probes in flight
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_CONCURRENT)]
    pub max_concurrent: usize,

    /// Authenticate without asking
    #[arg(short = 'y', long = "yes")]
    pub assume_yes: bool,

    /// Less output, repeat for even less
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,

    /// Do not print the banner
    #[arg(long)]
    pub no_banner: bool,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn config(&self) -> Config {
        Config {
            no_banner: self.no_banner,
            quiet: self.quiet,
            assume_yes: self.assume_yes,
        }
    }

    pub fn scan_config(&self) -> anyhow::Result<ScanConfig> {
        let credentials: Option<Credentials> = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some(Credentials::new(user, pass)),
            _ => None,
        };

        let cfg = ScanConfig::default()
            .with_ports(self.ports.clone())
            .with_connect_timeout(Duration::from_millis(self.timeout_ms))
            .with_deadline(Duration::from_millis(self.deadline_ms))
            .with_max_concurrent(self.max_concurrent)
            .with_auth_port(self.auth_port)
            .with_credentials(credentials);

        cfg.validate()?;
        Ok(cfg)
    }

    /// Target sources in the order host, block, file.
    pub fn sources(&self) -> Vec<TargetSource> {
        let mut sources: Vec<TargetSource> = Vec::new();
        if let Some(ip) = &self.ip {
            sources.push(TargetSource::Host(ip.clone()));
        }
        if let Some(block) = &self.cidr {
            sources.push(TargetSource::Cidr(block.clone()));
        }
        if let Some(path) = &self.file {
            sources.push(TargetSource::List(path.clone()));
        }
        sources
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

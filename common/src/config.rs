use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_PORTS: [u16; 2] = [445, 139];
pub const DEFAULT_AUTH_PORT: u16 = 445;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_TASK_DEADLINE: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONCURRENT: usize = 512;

/// Output settings for the terminal front end.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Skips the start-up banner.
    pub no_banner: bool,
    /// `0` prints everything, `1` drops headers and trees, `2` only prints the summary.
    pub quiet: u8,
    /// Answers the authentication prompt with "yes".
    pub assume_yes: bool,
}

/// Everything the scan engine needs to know about a run.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Ports probed on every target, in the order given.
    pub ports: Vec<u16>,
    /// Bound on a single TCP connect attempt.
    pub connect_timeout: Duration,
    /// Hard outer deadline for one probe task.
    ///
    /// Some platforms do not honour the connect timeout promptly,
    /// so the coordinator enforces this one itself.
    pub per_task_deadline: Duration,
    /// Upper bound on probes in flight at the same time.
    pub max_concurrent: usize,
    /// Port dialed for the authentication handshake.
    pub auth_port: u16,
    pub credentials: Option<Credentials>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PORTS.to_vec(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            per_task_deadline: DEFAULT_TASK_DEADLINE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            auth_port: DEFAULT_AUTH_PORT,
            credentials: None,
        }
    }
}

impl ScanConfig {
    pub fn with_ports(mut self, ports: impl Into<Vec<u16>>) -> Self {
        self.ports = ports.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.per_task_deadline = deadline;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_auth_port(mut self, port: u16) -> Self {
        self.auth_port = port;
        self
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::NoPorts);
        }
        if self.ports.contains(&0) || self.auth_port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("connect timeout"));
        }
        if self.per_task_deadline.is_zero() {
            return Err(ConfigError::ZeroDuration("per-task deadline"));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }

    /// Number of probe tasks a run over `target_count` targets launches.
    pub fn task_count(&self, target_count: usize) -> usize {
        target_count.saturating_mul(self.ports.len())
    }
}

/// A single username/password pair.
///
/// A username written as `DOMAIN\user` carries its own domain.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        let (domain, username) = match username.split_once('\\') {
            Some((domain, user)) => (domain.to_string(), user.to_string()),
            None => (String::new(), username.to_string()),
        };

        Self {
            username,
            password: password.to_string(),
            domain,
        }
    }

    /// `DOMAIN\user`, or just `user` when no domain was given.
    pub fn principal(&self) -> String {
        if self.domain.is_empty() {
            self.username.clone()
        } else {
            format!("{}\\{}", self.domain, self.username)
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
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

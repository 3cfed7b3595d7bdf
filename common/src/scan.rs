//! # Scan Records
//!
//! Immutable records that flow through a run:
//! [`ProbeTask`] → [`ProbeResult`] → [`TargetSummary`] → [`AuthOutcome`].

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::error::{AuthError, ProbeError};

/// One connectivity check. Consumed by exactly one probe, never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTask {
    pub target: IpAddr,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl ProbeTask {
    pub fn new(target: IpAddr, port: u16, connect_timeout: Duration) -> Self {
        Self {
            target,
            port,
            connect_timeout,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.target, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub target: IpAddr,
    pub port: u16,
    pub is_open: bool,
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub fn open(task: &ProbeTask) -> Self {
        Self {
            target: task.target,
            port: task.port,
            is_open: true,
            error: None,
        }
    }

    pub fn closed(task: &ProbeTask, error: ProbeError) -> Self {
        Self {
            target: task.target,
            port: task.port,
            is_open: false,
            error: Some(error),
        }
    }

    pub fn timed_out(task: &ProbeTask, after: Duration) -> Self {
        Self::closed(task, ProbeError::ProbeTimedOut { after })
    }
}

/// Everything learned about one target once all of its results are folded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSummary {
    pub target: IpAddr,
    pub open_ports: BTreeSet<u16>,
    /// Last error seen per port that did not answer.
    pub errors: BTreeMap<u16, ProbeError>,
    /// Number of probe results folded into this summary.
    pub results: usize,
}

impl TargetSummary {
    pub fn new(target: IpAddr) -> Self {
        Self {
            target,
            open_ports: BTreeSet::new(),
            errors: BTreeMap::new(),
            results: 0,
        }
    }

    /// Folds one result. Order of calls does not change the final summary
    /// except for which error is kept when the same port failed twice.
    ///
    /// A port that answered once is open: errors from other attempts at the
    /// same port are dropped.
    pub fn absorb(&mut self, result: ProbeResult) {
        debug_assert_eq!(self.target, result.target);
        self.results += 1;

        if result.is_open {
            self.open_ports.insert(result.port);
            self.errors.remove(&result.port);
            return;
        }
        if let Some(err) = result.error {
            if !self.open_ports.contains(&result.port) {
                self.errors.insert(result.port, err);
            }
        }
    }

    pub fn has_open_port(&self) -> bool {
        !self.open_ports.is_empty()
    }

    pub fn had_any_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Life cycle of a single authentication attempt.
///
/// ```text
/// NotAttempted -> Connecting -> Handshaking -> Succeeded
///                     |              |
///                     +--------------+-------> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    NotAttempted,
    Connecting,
    Handshaking,
    Succeeded,
    Failed,
}

impl AuthState {
    pub fn is_terminal(self) -> bool {
        matches!(self, AuthState::Succeeded | AuthState::Failed)
    }

    /// Returns `true` if moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: AuthState) -> bool {
        use AuthState::*;
        matches!(
            (self, next),
            (NotAttempted, Connecting)
                | (Connecting, Handshaking)
                | (Connecting, Failed)
                | (Handshaking, Succeeded)
                | (Handshaking, Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub target: IpAddr,
    pub success: bool,
    pub error: Option<AuthError>,
    pub state: AuthState,
}

impl AuthOutcome {
    pub fn succeeded(target: IpAddr) -> Self {
        Self {
            target,
            success: true,
            error: None,
            state: AuthState::Succeeded,
        }
    }

    pub fn failed(target: IpAddr, error: AuthError) -> Self {
        Self {
            target,
            success: false,
            error: Some(error),
            state: AuthState::Failed,
        }
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

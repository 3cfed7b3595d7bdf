//! The **authenticator**.
//!
//! Tries one credential pair against each candidate, strictly one target at
//! a time: failed logins count against lockout thresholds, so attempts are
//! never concurrent and never retried.
//!
//! The handshake itself is delegated to a [`SessionDialer`]; [`SmbDialer`]
//! is the production one.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use smbscout_common::config::{Credentials, ScanConfig};
use smbscout_common::error::AuthError;
use smbscout_common::scan::{AuthOutcome, AuthState};
use tokio::time::timeout;
use tracing::{debug, info, warn};

mod smb;

pub use smb::{SmbDialer, SmbSession};

/// Transport and handshake capability for one authentication protocol.
#[async_trait]
pub trait SessionDialer: Send + Sync {
    type Session: Send;

    /// Opens the transport connection.
    async fn dial(&self, addr: SocketAddr) -> std::io::Result<Self::Session>;

    /// Runs the handshake once with `credentials`. Any error means rejected.
    async fn authenticate(
        &self,
        session: &mut Self::Session,
        credentials: &Credentials,
    ) -> anyhow::Result<()>;

    /// Tears down an authenticated session. Runs after the verdict and
    /// cannot change it.
    async fn close(&self, _session: &mut Self::Session) {}
}

/// Bound on [`SessionDialer::close`] once a login has been accepted.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Tracks one attempt through its states.
struct Attempt {
    target: IpAddr,
    state: AuthState,
}

impl Attempt {
    fn new(target: IpAddr) -> Self {
        Self {
            target,
            state: AuthState::NotAttempted,
        }
    }

    fn advance(&mut self, next: AuthState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal auth transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("{}: {:?} -> {:?}", self.target, self.state, next);
        self.state = next;
    }

    fn succeed(mut self) -> AuthOutcome {
        self.advance(AuthState::Succeeded);
        AuthOutcome::succeeded(self.target)
    }

    fn fail(mut self, error: AuthError) -> AuthOutcome {
        self.advance(AuthState::Failed);
        AuthOutcome::failed(self.target, error)
    }
}

pub struct Authenticator<D: SessionDialer> {
    dialer: D,
    port: u16,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl<D: SessionDialer> Authenticator<D> {
    /// Dials `cfg.auth_port`, bounding the connect by `cfg.connect_timeout`
    /// and the handshake by `cfg.per_task_deadline`.
    pub fn new(dialer: D, cfg: &ScanConfig) -> Self {
        Self {
            dialer,
            port: cfg.auth_port,
            connect_timeout: cfg.connect_timeout,
            handshake_timeout: cfg.per_task_deadline,
        }
    }

    /// One attempt per target, in the order given.
    pub async fn authenticate(
        &self,
        targets: &[IpAddr],
        credentials: &Credentials,
    ) -> Vec<AuthOutcome> {
        let mut outcomes: Vec<AuthOutcome> = Vec::with_capacity(targets.len());
        for &target in targets {
            info!(
                "Attempting to log in to {target} as {}",
                credentials.principal()
            );
            let outcome = self.attempt(target, credentials).await;
            match &outcome.error {
                None => info!("Successfully authenticated to {target}"),
                Some(err) => warn!("Failed to authenticate to {target}: {err}"),
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    pub async fn attempt(&self, target: IpAddr, credentials: &Credentials) -> AuthOutcome {
        let addr = SocketAddr::new(target, self.port);
        let mut attempt = Attempt::new(target);

        attempt.advance(AuthState::Connecting);
        let mut session = match timeout(self.connect_timeout, self.dialer.dial(addr)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => return attempt.fail(AuthError::connect_failed(e)),
            Err(_) => {
                return attempt.fail(AuthError::connect_failed(format!(
                    "no answer from {addr} within {}ms",
                    self.connect_timeout.as_millis()
                )));
            }
        };

        attempt.advance(AuthState::Handshaking);
        let handshake = self.dialer.authenticate(&mut session, credentials);
        match timeout(self.handshake_timeout, handshake).await {
            Ok(Ok(())) => {
                if timeout(CLOSE_TIMEOUT, self.dialer.close(&mut session))
                    .await
                    .is_err()
                {
                    debug!("{target}: session teardown did not finish, dropping it");
                }
                attempt.succeed()
            }
            Ok(Err(e)) => attempt.fail(AuthError::rejected(format!("{e:#}"))),
            Err(_) => attempt.fail(AuthError::rejected(format!(
                "handshake did not finish within {}ms",
                self.handshake_timeout.as_millis()
            ))),
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

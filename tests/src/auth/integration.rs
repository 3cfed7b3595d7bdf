#![cfg(test)]
use super::fake_server::{Account, FakeSmbServer};
use smbscout_common::config::{Credentials, ScanConfig};
use smbscout_common::error::AuthError;
use smbscout_common::scan::AuthState;
use smbscout_core::auth::{Authenticator, CLOSE_TIMEOUT, SmbDialer};
use smbscout_core::scanner::{self, aggregator};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::TcpListener;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn alice() -> Account {
    Account {
        domain: "CORP".into(),
        username: "alice".into(),
        password: "Winter2024!".into(),
    }
}

fn cfg_for(port: u16) -> ScanConfig {
    ScanConfig::default()
        .with_auth_port(port)
        .with_connect_timeout(Duration::from_secs(1))
        .with_deadline(Duration::from_secs(3))
}

/// Wrong credentials are refused by the server and tried exactly once.
#[tokio::test]
async fn wrong_password_is_rejected_after_single_attempt() {
    let server = FakeSmbServer::start(alice()).await;
    let auth = Authenticator::new(SmbDialer, &cfg_for(server.port()));

    let outcomes = auth
        .authenticate(&[LOCALHOST], &Credentials::new("CORP\\alice", "Summer2024!"))
        .await;

    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert!(!outcome.success);
    assert_eq!(outcome.state, AuthState::Failed);
    match &outcome.error {
        Some(AuthError::AuthRejected(reason)) => {
            assert!(reason.contains("STATUS_LOGON_FAILURE"), "{reason}")
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
    assert_eq!(server.authenticate_count(), 1);
}

#[tokio::test]
async fn correct_password_is_accepted() {
    let server = FakeSmbServer::start(alice()).await;
    let auth = Authenticator::new(SmbDialer, &cfg_for(server.port()));

    let outcome = auth
        .attempt(LOCALHOST, &Credentials::new("CORP\\ALICE", "Winter2024!"))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.state, AuthState::Succeeded);
    assert_eq!(server.authenticate_count(), 1);
}

#[tokio::test]
async fn closed_auth_port_is_a_connect_failure() {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let auth = Authenticator::new(SmbDialer, &cfg_for(port));
    let outcome = auth
        .attempt(LOCALHOST, &Credentials::new("CORP\\alice", "Winter2024!"))
        .await;

    assert!(!outcome.success);
    assert!(matches!(outcome.error, Some(AuthError::ConnectFailed(_))));
}

/// The server accepts the login, then never answers LOGOFF.
#[tokio::test]
async fn accepted_login_survives_unanswered_logoff() {
    let server = FakeSmbServer::ignoring_logoff(alice()).await;
    let cfg = cfg_for(server.port()).with_deadline(Duration::from_secs(1));
    let auth = Authenticator::new(SmbDialer, &cfg);

    let start = std::time::Instant::now();
    let outcome = auth
        .attempt(LOCALHOST, &Credentials::new("CORP\\alice", "Winter2024!"))
        .await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.state, AuthState::Succeeded);
    assert_eq!(server.authenticate_count(), 1);
    assert!(start.elapsed() < Duration::from_secs(1) + CLOSE_TIMEOUT + Duration::from_millis(500));
}

/// A server that accepts the connection but never speaks SMB.
#[tokio::test]
async fn silent_server_is_rejected_within_deadline() {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hold = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let cfg = cfg_for(port).with_deadline(Duration::from_millis(500));
    let auth = Authenticator::new(SmbDialer, &cfg);

    let start = std::time::Instant::now();
    let outcome = auth
        .attempt(LOCALHOST, &Credentials::new("alice", "pw"))
        .await;

    assert!(matches!(outcome.error, Some(AuthError::AuthRejected(_))));
    assert!(start.elapsed() < Duration::from_secs(2));
    hold.abort();
}

/// Scan, pick candidates, then authenticate against them.
#[tokio::test]
async fn scan_then_authenticate_open_hosts() {
    let server = FakeSmbServer::start(alice()).await;

    let closed = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let closed_port = closed.local_addr().unwrap().port();
    drop(closed);

    let cfg = cfg_for(server.port()).with_ports(vec![server.port(), closed_port]);
    let summary = scanner::perform_scan(vec![LOCALHOST], &cfg, None).await;

    let candidates = aggregator::select_auth_candidates(&summary);
    assert_eq!(candidates, vec![LOCALHOST]);

    let auth = Authenticator::new(SmbDialer, &cfg);
    let outcomes = auth
        .authenticate(&candidates, &Credentials::new("CORP\\alice", "Winter2024!"))
        .await;

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success, "{:?}", outcomes[0].error);
    // The scan probe only completes the TCP handshake.
    assert_eq!(server.authenticate_count(), 1);
}

#![cfg(test)]
use smbscout_common::config::ScanConfig;
use smbscout_common::error::ProbeError;
use smbscout_common::network::target::{self, TargetSource};
use smbscout_common::scan::ProbeResult;
use smbscout_core::network::tcp::TcpProber;
use smbscout_core::scanner::{self, aggregator};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn open_and_closed_ports() -> (TcpListener, u16, u16) {
    let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let open = listener.local_addr().unwrap().port();

    let scratch = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let closed = scratch.local_addr().unwrap().port();
    drop(scratch);

    (listener, open, closed)
}

fn quick_cfg(ports: Vec<u16>) -> ScanConfig {
    ScanConfig::default()
        .with_ports(ports)
        .with_connect_timeout(Duration::from_millis(500))
        .with_deadline(Duration::from_secs(2))
}

/// This test verifies that a loopback scan reports the listening port
/// open and the unused one closed.
#[tokio::test]
async fn loopback_scan_separates_open_and_closed() {
    let (_listener, open, closed) = open_and_closed_ports().await;
    let cfg = quick_cfg(vec![open, closed]);

    let seen: Arc<Mutex<Vec<ProbeResult>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let summary = scanner::perform_scan(
        vec![LOCALHOST],
        &cfg,
        Some(Box::new(move |r: &ProbeResult| sink.lock().unwrap().push(r.clone()))),
    )
    .await;

    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(summary.len(), 1);
    assert_eq!(summary.result_count(), 2);

    let host = summary.get(&LOCALHOST).expect("localhost missing from summary");
    assert_eq!(host.open_ports, BTreeSet::from([open]));
    assert!(matches!(
        host.errors.get(&closed),
        Some(ProbeError::ConnectFailed { .. })
    ));
    assert_eq!(aggregator::select_auth_candidates(&summary), vec![LOCALHOST]);
}

#[tokio::test]
async fn list_file_scan_skips_bad_lines() {
    let (_listener, open, _closed) = open_and_closed_ports().await;

    let path: PathBuf = std::env::temp_dir().join(format!("smbscout-list-{}.txt", std::process::id()));
    std::fs::write(&path, "127.0.0.1\r\nnot-an-ip\n\n127.0.0.1\n").unwrap();

    let enumeration = target::enumerate(&[TargetSource::List(path.clone())]);
    std::fs::remove_file(&path).ok();

    assert_eq!(enumeration.targets, vec![LOCALHOST, LOCALHOST]);
    assert_eq!(enumeration.rejected.len(), 1);
    assert_eq!(enumeration.rejected[0].line_no, 2);
    assert!(enumeration.failures.is_empty());

    let cfg = quick_cfg(vec![open]);
    let stream = scanner::run(enumeration.targets, &cfg, Arc::new(TcpProber));
    let summary = aggregator::fold(stream).await;

    // Duplicates are probed twice and folded into one summary.
    assert_eq!(summary.result_count(), 2);
    assert_eq!(summary.len(), 1);
    assert_eq!(summary.open_count(), 1);
}

#[test]
fn missing_list_does_not_stop_other_sources() {
    let sources = [
        TargetSource::List(PathBuf::from("/definitely/not/here.txt")),
        TargetSource::Cidr("127.0.0.0/31".into()),
    ];

    let enumeration = target::enumerate(&sources);

    assert_eq!(enumeration.failures.len(), 1);
    assert_eq!(
        enumeration.targets,
        vec![
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 0)),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        ]
    );
}

#[tokio::test]
async fn loopback_block_scan_reports_every_address() {
    let (_listener, open, _closed) = open_and_closed_ports().await;
    let targets = target::expand_cidr("127.0.0.0/30").unwrap();
    let cfg = quick_cfg(vec![open]);

    let summary = scanner::perform_scan(targets.clone(), &cfg, None).await;

    let scanned: Vec<IpAddr> = summary.iter().map(|s| s.target).collect();
    assert_eq!(scanned, targets);
    assert_eq!(summary.result_count(), 4);
    assert!(summary.get(&LOCALHOST).unwrap().has_open_port());
}

//! The **scan coordinator**.
//!
//! Fans a run out into one probe task per `(target, port)` pair and funnels
//! every outcome into a single [`ScanStream`].
//!
//! * In-flight tasks are capped by a counting semaphore sized by
//!   [`ScanConfig::max_concurrent`], so large blocks do not exhaust local
//!   ports or file descriptors.
//! * Each task is wrapped in [`ScanConfig::per_task_deadline`]. A probe that
//!   overruns it is aborted and replaced by a synthetic
//!   [`ProbeError::ProbeTimedOut`] result.
//! * The stream yields exactly one result per task and closes once every
//!   task has reported.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use smbscout_common::config::ScanConfig;
use smbscout_common::error::ProbeError;
use smbscout_common::scan::{ProbeResult, ProbeTask};
use tokio::sync::{Semaphore, mpsc};
use tokio::time::timeout;
use tracing::{debug, warn};

pub mod aggregator;

use crate::network::tcp::TcpProber;
use aggregator::ScanSummary;

const RESULT_BUFFER: usize = 1024;

/// Checks whether a single port of a single target accepts connections.
#[async_trait]
pub trait PortProber: Send + Sync + 'static {
    async fn probe(&self, task: ProbeTask) -> ProbeResult;
}

/// Results of a run, in completion order.
pub struct ScanStream {
    rx: mpsc::Receiver<ProbeResult>,
    expected: usize,
}

impl ScanStream {
    pub fn new(rx: mpsc::Receiver<ProbeResult>, expected: usize) -> Self {
        Self { rx, expected }
    }

    /// Number of results this stream yields before closing.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Waits for the next result; `None` once every task has reported.
    pub async fn next(&mut self) -> Option<ProbeResult> {
        self.rx.recv().await
    }
}

/// Starts probing every port of `cfg` on every target.
///
/// Returns immediately; tasks are launched in the background as permits
/// free up. Dropping the stream stops new tasks from being launched and
/// lets the ones in flight drain.
pub fn run<P: PortProber>(targets: Vec<IpAddr>, cfg: &ScanConfig, prober: Arc<P>) -> ScanStream {
    let expected: usize = cfg.task_count(targets.len());
    let (tx, rx) = mpsc::channel::<ProbeResult>(RESULT_BUFFER);

    let ports: Vec<u16> = cfg.ports.clone();
    let connect_timeout: Duration = cfg.connect_timeout;
    let deadline: Duration = cfg.per_task_deadline;
    let gate = Arc::new(Semaphore::new(
        cfg.max_concurrent.clamp(1, Semaphore::MAX_PERMITS),
    ));

    debug!(
        "Dispatching {expected} probes with at most {} in flight",
        cfg.max_concurrent
    );

    tokio::spawn(async move {
        'dispatch: for target in targets {
            for &port in &ports {
                if tx.is_closed() {
                    debug!("Result stream dropped, no further probes launched");
                    break 'dispatch;
                }

                let Ok(permit) = gate.clone().acquire_owned().await else {
                    warn!("Probe gate closed unexpectedly");
                    break 'dispatch;
                };

                let task = ProbeTask::new(target, port, connect_timeout);
                let tx = tx.clone();
                let prober = prober.clone();

                tokio::spawn(async move {
                    let result = execute(prober, task, deadline).await;
                    let _ = tx.send(result).await;
                    drop(permit);
                });
            }
        }
    });

    ScanStream::new(rx, expected)
}

/// Runs one probe under the outer deadline.
async fn execute<P: PortProber>(prober: Arc<P>, task: ProbeTask, deadline: Duration) -> ProbeResult {
    let mut handle = tokio::spawn(async move { prober.probe(task).await });

    match timeout(deadline, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            warn!("Probe of {} crashed: {join_err}", task.socket_addr());
            ProbeResult::closed(&task, ProbeError::Aborted(join_err.to_string()))
        }
        Err(_elapsed) => {
            handle.abort();
            debug!(
                "Probe of {} overran its {}ms deadline",
                task.socket_addr(),
                deadline.as_millis()
            );
            ProbeResult::timed_out(&task, deadline)
        }
    }
}

/// Executes a full probe cycle against `targets` with the TCP prober.
///
/// `on_result` sees every result as it arrives, before it is folded.
pub async fn perform_scan(
    targets: Vec<IpAddr>,
    cfg: &ScanConfig,
    on_result: Option<Box<dyn FnMut(&ProbeResult) + Send>>,
) -> ScanSummary {
    let stream = run(targets, cfg, Arc::new(TcpProber));
    match on_result {
        Some(callback) => aggregator::fold_with(stream, callback).await,
        None => aggregator::fold(stream).await,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Opens exactly the listed pairs, with a small jitter so results
    /// complete out of submission order.
    struct FixedProber {
        open: HashSet<(IpAddr, u16)>,
    }

    #[async_trait]
    impl PortProber for FixedProber {
        async fn probe(&self, task: ProbeTask) -> ProbeResult {
            let jitter = u64::from(task.port % 7) + u64::from(task.target.is_loopback());
            tokio::time::sleep(Duration::from_millis(jitter)).await;
            if self.open.contains(&(task.target, task.port)) {
                ProbeResult::open(&task)
            } else {
                ProbeResult::closed(
                    &task,
                    ProbeError::from(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
                )
            }
        }
    }

    struct HangingProber;

    #[async_trait]
    impl PortProber for HangingProber {
        async fn probe(&self, _task: ProbeTask) -> ProbeResult {
            std::future::pending::<ProbeResult>().await
        }
    }

    struct CountingProber {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PortProber for CountingProber {
        async fn probe(&self, task: ProbeTask) -> ProbeResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ProbeResult::open(&task)
        }
    }

    struct PanickingProber;

    #[async_trait]
    impl PortProber for PanickingProber {
        async fn probe(&self, task: ProbeTask) -> ProbeResult {
            if task.port == 139 {
                panic!("prober bug");
            }
            ProbeResult::open(&task)
        }
    }

    fn hosts(n: u8) -> Vec<IpAddr> {
        (0..n).map(|i| IpAddr::V4(Ipv4Addr::new(10, 0, 0, i))).collect()
    }

    async fn drain(mut stream: ScanStream) -> Vec<ProbeResult> {
        let mut results = Vec::new();
        while let Some(result) = stream.next().await {
            results.push(result);
        }
        results
    }

    #[tokio::test]
    async fn emits_exactly_one_result_per_task() {
        let prober = Arc::new(FixedProber {
            open: HashSet::new(),
        });

        for (n_targets, ports) in [(0u8, vec![445]), (1, vec![445]), (5, vec![445, 139]), (17, vec![1, 2, 3])] {
            let cfg = ScanConfig::default()
                .with_ports(ports.clone())
                .with_max_concurrent(3);
            let stream = run(hosts(n_targets), &cfg, prober.clone());
            assert_eq!(stream.expected(), n_targets as usize * ports.len());

            let results = drain(stream).await;
            assert_eq!(results.len(), n_targets as usize * ports.len());

            let unique: HashSet<(IpAddr, u16)> =
                results.iter().map(|r| (r.target, r.port)).collect();
            assert_eq!(unique.len(), results.len(), "duplicated result");
        }
    }

    #[tokio::test]
    async fn duplicate_targets_are_probed_independently() {
        let target = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let prober = Arc::new(FixedProber {
            open: HashSet::from([(target, 445)]),
        });
        let cfg = ScanConfig::default().with_ports(vec![445]);

        let results = drain(run(vec![target, target], &cfg, prober)).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_open));
    }

    #[tokio::test]
    async fn hanging_probe_is_cut_off_by_deadline() {
        let cfg = ScanConfig::default()
            .with_ports(vec![445])
            .with_deadline(Duration::from_secs(1));

        let start = Instant::now();
        let results = drain(run(hosts(1), &cfg, Arc::new(HangingProber))).await;
        let elapsed = start.elapsed();

        assert_eq!(results.len(), 1);
        assert!(!results[0].is_open);
        assert_eq!(
            results[0].error,
            Some(ProbeError::ProbeTimedOut {
                after: Duration::from_secs(1)
            })
        );
        assert!(elapsed >= Duration::from_millis(950), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    }

    #[tokio::test]
    async fn in_flight_probes_never_exceed_cap() {
        let prober = Arc::new(CountingProber {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let cfg = ScanConfig::default()
            .with_ports(vec![445, 139])
            .with_max_concurrent(4);

        let results = drain(run(hosts(25), &cfg, prober.clone())).await;

        assert_eq!(results.len(), 50);
        let peak = prober.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak in-flight was {peak}");
        assert!(peak >= 2, "probes never overlapped");
    }

    #[tokio::test]
    async fn crashed_probe_still_reports() {
        let cfg = ScanConfig::default().with_ports(vec![445, 139]);
        let results = drain(run(hosts(2), &cfg, Arc::new(PanickingProber))).await;

        assert_eq!(results.len(), 4);
        let aborted = results
            .iter()
            .filter(|r| matches!(r.error, Some(ProbeError::Aborted(_))))
            .count();
        assert_eq!(aborted, 2);
        assert!(results.iter().filter(|r| r.port == 445).all(|r| r.is_open));
    }
}

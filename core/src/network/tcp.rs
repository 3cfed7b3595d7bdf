use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use smbscout_common::error::ProbeError;
use smbscout_common::scan::{ProbeResult, ProbeTask};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::scanner::PortProber;

/// Full TCP handshake prober. No payload is ever sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl PortProber for TcpProber {
    async fn probe(&self, task: ProbeTask) -> ProbeResult {
        probe_task(&task).await
    }
}

/// One bounded connect attempt against `target:port`.
///
/// Refused, unreachable and silent ports all come back as closed;
/// the error only keeps the reason for diagnostics.
pub async fn probe(target: IpAddr, port: u16, connect_timeout: Duration) -> ProbeResult {
    probe_task(&ProbeTask::new(target, port, connect_timeout)).await
}

pub async fn probe_task(task: &ProbeTask) -> ProbeResult {
    bounded_connect(task, TcpStream::connect(task.socket_addr())).await
}

/// Turns a pending connect into a verdict within `task.connect_timeout`.
async fn bounded_connect<F, S>(task: &ProbeTask, connect: F) -> ProbeResult
where
    F: Future<Output = io::Result<S>>,
{
    let socket_addr = task.socket_addr();

    match timeout(task.connect_timeout, connect).await {
        Ok(Ok(stream)) => {
            drop(stream);
            trace!("{socket_addr} accepted the connection");
            ProbeResult::open(task)
        }
        Ok(Err(e)) => {
            trace!("{socket_addr} connect failed: {e}");
            ProbeResult::closed(task, ProbeError::from(e))
        }
        Err(_elapsed) => {
            let err = io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no answer within {}ms", task.connect_timeout.as_millis()),
            );
            ProbeResult::closed(task, ProbeError::from(err))
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

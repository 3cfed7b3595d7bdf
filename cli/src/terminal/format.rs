use crate::terminal::colors;
use colored::*;
use smbscout_common::error::{AuthError, ProbeError};
use smbscout_common::scan::{AuthOutcome, ProbeResult, TargetSummary};

pub type Detail = (String, ColoredString);

/// The line logged as each result arrives.
pub fn result_line(result: &ProbeResult) -> String {
    let verdict: &str = if result.is_open { "open" } else { "closed" };
    let line: String = format!(
        "SMB port {} is {verdict} on {}",
        result.port, result.target
    );
    match &result.error {
        Some(ProbeError::ProbeTimedOut { after }) => {
            format!("{line} (no verdict in {}ms)", after.as_millis())
        }
        Some(ProbeError::Aborted(_)) => format!("{line} (aborted)"),
        _ => line,
    }
}

/// Single line for a target without any open port, e.g.
/// `10.0.0.7  445/tcp closed, 139/tcp closed`.
pub fn closed_host_line(summary: &TargetSummary, ports: &[u16]) -> String {
    let ports: String = ports_to_detail(summary, ports)
        .into_iter()
        .map(|(key, value)| format!("{key} {value}"))
        .collect::<Vec<String>>()
        .join(", ");
    format!("{}  {ports}", summary.target)
}

/// One line per scanned port, in the order the ports were requested.
pub fn ports_to_detail(summary: &TargetSummary, ports: &[u16]) -> Vec<Detail> {
    ports
        .iter()
        .map(|port| {
            let key: String = format!("{port}/tcp");
            if summary.open_ports.contains(port) {
                return (key, "open".color(colors::PORT_OPEN).bold());
            }
            let value: ColoredString = match summary.errors.get(port) {
                Some(err) => probe_error_to_str(err),
                None => "closed".color(colors::PORT_CLOSED),
            };
            (key, value)
        })
        .collect()
}

pub fn probe_error_to_str(err: &ProbeError) -> ColoredString {
    match err {
        ProbeError::ConnectFailed { .. } => "closed".color(colors::PORT_CLOSED),
        ProbeError::ProbeTimedOut { after } => {
            format!("closed (no verdict in {}ms)", after.as_millis()).color(colors::PORT_CLOSED)
        }
        ProbeError::Aborted(_) => "probe error".color(colors::PORT_ERROR),
    }
}

pub fn outcome_to_detail(outcome: &AuthOutcome, principal: &str) -> Vec<Detail> {
    let mut details: Vec<Detail> = vec![("Account".to_string(), principal.normal())];

    match &outcome.error {
        None => details.push((
            "Status".to_string(),
            "authenticated".color(colors::AUTH_OK).bold(),
        )),
        Some(err) => {
            let status: &str = match err {
                AuthError::ConnectFailed(_) => "unreachable",
                AuthError::AuthRejected(_) => "rejected",
            };
            details.push(("Status".to_string(), status.color(colors::AUTH_FAILED).bold()));
            details.push(("Reason".to_string(), auth_reason(err).dimmed()));
        }
    }

    details
}

fn auth_reason(err: &AuthError) -> &str {
    match err {
        AuthError::ConnectFailed(reason) | AuthError::AuthRejected(reason) => reason,
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

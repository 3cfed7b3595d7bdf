use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::*;
use console::Term;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::mprint;
use crate::terminal::{colors, format, print, spinner};
use smbscout_common::config::{Config, Credentials, ScanConfig};
use smbscout_common::network::target::{self, Enumeration, TargetSource};
use smbscout_common::scan::{AuthOutcome, ProbeResult};
use smbscout_core::auth::{Authenticator, SmbDialer};
use smbscout_core::network::tcp::TcpProber;
use smbscout_core::scanner::{self, aggregator, aggregator::ScanSummary};

pub async fn scan(sources: Vec<TargetSource>, scan_cfg: ScanConfig, cfg: &Config) -> anyhow::Result<()> {
    print::header("resolving targets", cfg.quiet);
    let enumeration: Enumeration = target::enumerate(&sources);
    report_enumeration(&enumeration);

    if enumeration.targets.is_empty() {
        anyhow::bail!("none of the given sources produced a valid target");
    }

    print_settings(enumeration.targets.len(), &scan_cfg, cfg);

    let start_time: Instant = Instant::now();
    let summary: ScanSummary = probe_targets(enumeration.targets, &scan_cfg).await;
    scan_ends(&summary, &scan_cfg, start_time.elapsed(), cfg);

    let Some(credentials) = scan_cfg.credentials.as_ref() else {
        return Ok(());
    };

    let candidates: Vec<IpAddr> = aggregator::select_auth_candidates(&summary);
    if candidates.is_empty() {
        return Ok(());
    }

    if !cfg.assume_yes && !confirm_authentication(candidates.len()).await? {
        info!("Skipping authentication");
        return Ok(());
    }

    authenticate(&candidates, credentials, &scan_cfg, cfg).await;
    Ok(())
}

fn report_enumeration(enumeration: &Enumeration) {
    let rejected: usize = enumeration.rejected.len();
    if rejected > 0 {
        warn!("{rejected} invalid line(s) were excluded from the target list");
    }
}

fn print_settings(target_count: usize, scan_cfg: &ScanConfig, cfg: &Config) {
    if cfg.quiet > 0 {
        return;
    }

    let ports: String = scan_cfg
        .ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<String>>()
        .join(", ");

    print::set_key_width(["Targets", "Ports", "Timeout", "Deadline", "Parallel", "Account"]);
    print::aligned_line("Targets", target_count.to_string());
    print::aligned_line("Ports", ports);
    print::aligned_line("Timeout", millis(scan_cfg.connect_timeout));
    print::aligned_line("Deadline", millis(scan_cfg.per_task_deadline));
    print::aligned_line("Parallel", scan_cfg.max_concurrent.to_string());
    if let Some(credentials) = &scan_cfg.credentials {
        print::aligned_line("Account", credentials.principal());
    }
}

async fn probe_targets(targets: Vec<IpAddr>, scan_cfg: &ScanConfig) -> ScanSummary {
    let span = info_span!("scan", indicatif.pb_show = true);
    spinner::track_probes(&span, scan_cfg.task_count(targets.len()));

    let stream = scanner::run(targets, scan_cfg, Arc::new(TcpProber));
    let mut open_hosts: HashSet<IpAddr> = HashSet::new();

    aggregator::fold_with(stream, |result| {
        report_result(result);
        if result.is_open {
            open_hosts.insert(result.target);
        }
        spinner::probe_finished(&span, open_hosts.len());
    })
    .instrument(span.clone())
    .await
}

fn report_result(result: &ProbeResult) {
    info!("{}", format::result_line(result));
    if let Some(err) = &result.error {
        debug!("{}:{}: {err}", result.target, result.port);
    }
}

fn scan_ends(summary: &ScanSummary, scan_cfg: &ScanConfig, total_time: Duration, cfg: &Config) {
    if summary.open_count() == 0 {
        no_hosts_found(summary, scan_cfg, total_time, cfg);
        return;
    }

    if cfg.quiet > 0 {
        mprint!();
    }

    print::header("SMB hosts", cfg.quiet);
    if cfg.quiet < 2 {
        print_hosts(summary, &scan_cfg.ports);
        print_closed_hosts(summary, &scan_cfg.ports, cfg);
    }
    print_summary(summary, total_time, cfg);
}

fn no_hosts_found(summary: &ScanSummary, scan_cfg: &ScanConfig, total_time: Duration, cfg: &Config) {
    print::header("zero smb hosts detected", cfg.quiet);
    if cfg.quiet == 0 {
        print::no_results();
    }
    if cfg.quiet < 2 {
        print_closed_hosts(summary, &scan_cfg.ports, cfg);
    }
    print_summary(summary, total_time, cfg);
}

fn print_hosts(summary: &ScanSummary, ports: &[u16]) {
    let open: Vec<_> = summary.iter().filter(|s| s.has_open_port()).collect();
    for (idx, host) in open.iter().enumerate() {
        print::tree_head(idx, &host.target.to_string());
        print::as_tree_one_level(format::ports_to_detail(host, ports));
        if idx + 1 != open.len() {
            mprint!();
        }
    }
}

/// Targets without an open port, one compact line each.
fn print_closed_hosts(summary: &ScanSummary, ports: &[u16], cfg: &Config) {
    let closed: Vec<_> = summary.iter().filter(|s| !s.has_open_port()).collect();
    if closed.is_empty() {
        return;
    }

    print::header("closed targets", cfg.quiet);
    for host in closed {
        mprint!(&format::closed_host_line(host, ports));
    }
}

fn print_summary(summary: &ScanSummary, total_time: Duration, cfg: &Config) {
    let open_hosts: ColoredString = format!("{} SMB hosts", summary.open_count()).bold().green();
    let scanned: ColoredString = summary.len().to_string().bold();
    let total_time: ColoredString = format!("{:.2}s", total_time.as_secs_f64()).bold().yellow();
    let output: ColoredString =
        format!("Scan Complete: {open_hosts} out of {scanned} in {total_time}")
            .color(colors::TEXT_DEFAULT);

    match cfg.quiet {
        0 => {
            print::fat_separator();
            print::centerln(&output.to_string());
        }
        _ => info!("{}", output),
    }
}

async fn confirm_authentication(candidates: usize) -> anyhow::Result<bool> {
    print::print(&format!(
        "{} Would you like to authenticate to these {} host(s)? (y/n) ",
        "[?]".blue(),
        candidates
    ));

    let answer: String = tokio::task::spawn_blocking(|| Term::stdout().read_line()).await??;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn authenticate(
    candidates: &[IpAddr],
    credentials: &Credentials,
    scan_cfg: &ScanConfig,
    cfg: &Config,
) {
    print::header("authenticating", cfg.quiet);

    let authenticator = Authenticator::new(SmbDialer, scan_cfg);
    let outcomes: Vec<AuthOutcome> = authenticator.authenticate(candidates, credentials).await;

    if cfg.quiet < 2 {
        mprint!();
        let principal: String = credentials.principal();
        for (idx, outcome) in outcomes.iter().enumerate() {
            print::tree_head(idx, &outcome.target.to_string());
            print::as_tree_one_level(format::outcome_to_detail(outcome, &principal));
        }
    }

    let accepted: usize = outcomes.iter().filter(|o| o.success).count();
    let line = format!("{accepted} of {} host(s) accepted the credentials", outcomes.len());
    if accepted > 0 {
        info!("{line}");
    } else {
        warn!("{line}");
    }
}

fn millis(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

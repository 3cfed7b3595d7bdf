//! Folds a [`ScanStream`] into per-target summaries.
//!
//! The aggregator is the only writer of the summary map: it owns it while
//! the stream is drained and hands it out read-only afterwards.

use std::collections::BTreeMap;
use std::net::IpAddr;

use smbscout_common::scan::{ProbeResult, TargetSummary};

use super::ScanStream;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    targets: BTreeMap<IpAddr, TargetSummary>,
    /// Targets in the order their first open port was seen.
    open_order: Vec<IpAddr>,
    results: usize,
}

impl ScanSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, result: ProbeResult) {
        self.results += 1;
        let summary = self
            .targets
            .entry(result.target)
            .or_insert_with(|| TargetSummary::new(result.target));

        if result.is_open && !summary.has_open_port() {
            self.open_order.push(result.target);
        }
        summary.absorb(result);
    }

    pub fn get(&self, target: &IpAddr) -> Option<&TargetSummary> {
        self.targets.get(target)
    }

    /// Summaries in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &TargetSummary> {
        self.targets.values()
    }

    /// Number of distinct targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Number of probe results folded, duplicates included.
    pub fn result_count(&self) -> usize {
        self.results
    }

    /// Number of targets with at least one open port.
    pub fn open_count(&self) -> usize {
        self.open_order.len()
    }

    pub fn into_summaries(self) -> Vec<TargetSummary> {
        self.targets.into_values().collect()
    }
}

/// Drains `stream` and returns the final summaries.
pub async fn fold(stream: ScanStream) -> ScanSummary {
    fold_with(stream, |_| {}).await
}

/// Like [`fold`], calling `on_result` for every result as it arrives.
pub async fn fold_with<F>(mut stream: ScanStream, mut on_result: F) -> ScanSummary
where
    F: FnMut(&ProbeResult),
{
    let mut summary = ScanSummary::new();
    while let Some(result) = stream.next().await {
        on_result(&result);
        summary.absorb(result);
    }
    debug_assert_eq!(summary.result_count(), stream.expected());
    summary
}

/// Targets worth authenticating against, in first-open-discovered order.
pub fn select_auth_candidates(summary: &ScanSummary) -> Vec<IpAddr> {
    summary.open_order.clone()
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

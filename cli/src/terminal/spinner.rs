use colored::*;
use indicatif::ProgressStyle;
use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;

const TICKS: &[&str] = &[
    "▁▁▁▁▁",
    "▁▂▂▂▁",
    "▁▄▂▄▁",
    "▂▄▆▄▂",
    "▄▆█▆▄",
    "▂▄▆▄▂",
    "▁▄▂▄▁",
    "▁▂▂▂▁",
];

fn probe_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.blue} {msg} [{bar:28.green/bright_black}] {pos}/{len} ({elapsed})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .tick_strings(TICKS)
    .progress_chars("━╸─")
}

/// Turns `span` into a progress bar over `total` probes.
pub fn track_probes(span: &Span, total: usize) {
    span.pb_set_style(&probe_style());
    span.pb_set_length(total as u64);
    report_scan_progress(span, 0);
}

/// Advances the bar by one finished probe.
pub fn probe_finished(span: &Span, open_hosts: usize) {
    span.pb_inc(1);
    report_scan_progress(span, open_hosts);
}

fn report_scan_progress(span: &Span, open_hosts: usize) {
    span.pb_set_message(&format!(
        "{} SMB hosts so far",
        open_hosts.to_string().green().bold()
    ));
}

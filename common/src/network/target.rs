//! # Target Enumeration
//!
//! Turns user input into the ordered list of addresses a scan will probe.
//!
//! Three kinds of source are understood:
//! * A single IP address (IPv4 or IPv6), e.g. `192.168.1.5`.
//! * An IPv4 CIDR block, e.g. `192.168.1.0/24`.
//! * A file with one address per line.
//!
//! No network I/O happens here and duplicates are kept: an address listed
//! twice is probed twice.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::error::EnumerationError;
use crate::network::range::{self, Ipv4Range};

/// Where a batch of targets comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSource {
    /// A single address literal.
    Host(String),
    /// An IPv4 block in `address/prefix` notation.
    Cidr(String),
    /// A line-delimited file of addresses.
    List(PathBuf),
}

impl fmt::Display for TargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSource::Host(ip) => write!(f, "address {ip}"),
            TargetSource::Cidr(block) => write!(f, "block {block}"),
            TargetSource::List(path) => write!(f, "list {}", path.display()),
        }
    }
}

/// A list line that did not hold a valid address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number in the source.
    pub line_no: usize,
    pub text: String,
    pub reason: EnumerationError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListEnumeration {
    pub targets: Vec<IpAddr>,
    pub rejected: Vec<RejectedLine>,
}

impl ListEnumeration {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// Combined result of enumerating every source of a run.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub targets: Vec<IpAddr>,
    pub rejected: Vec<RejectedLine>,
    /// Sources that could not be used at all.
    pub failures: Vec<(TargetSource, EnumerationError)>,
}

/// Parses an IPv4 CIDR block into the range it covers.
pub fn parse_cidr(block: &str) -> Result<Ipv4Range, EnumerationError> {
    let block = block.trim();
    let Some((ip_str, prefix_str)) = block.split_once('/') else {
        return Err(EnumerationError::invalid_cidr(block, "missing '/prefix'"));
    };

    if ip_str.parse::<Ipv6Addr>().is_ok() {
        return Err(EnumerationError::invalid_cidr(
            block,
            "only IPv4 blocks can be expanded",
        ));
    }

    let ipv4_addr = ip_str.parse::<Ipv4Addr>().map_err(|e| {
        EnumerationError::invalid_cidr(block, format!("invalid IP '{ip_str}': {e}"))
    })?;

    let prefix = prefix_str.parse::<u8>().map_err(|e| {
        EnumerationError::invalid_cidr(block, format!("invalid prefix '{prefix_str}': {e}"))
    })?;

    range::cidr_range(ipv4_addr, prefix).map_err(|e| EnumerationError::invalid_cidr(block, e))
}

/// Shortest prefix [`expand_cidr`] accepts. Every address of a block is held
/// in memory and gets its own summary, so a `/12` (about a million
/// addresses) is the largest block a run will take.
pub const MIN_EXPANDED_PREFIX: u8 = 12;

/// Every address of `block`, network and broadcast included, ascending.
///
/// Blocks shorter than [`MIN_EXPANDED_PREFIX`] are refused as `InvalidCidr`.
pub fn expand_cidr(block: &str) -> Result<Vec<IpAddr>, EnumerationError> {
    let ipv4_range = parse_cidr(block)?;
    if ipv4_range.len() > 1u64 << (32 - MIN_EXPANDED_PREFIX) {
        return Err(EnumerationError::invalid_cidr(
            block.trim(),
            format!(
                "block too large to expand ({} addresses, at most /{MIN_EXPANDED_PREFIX})",
                ipv4_range.len()
            ),
        ));
    }
    debug!("Expanding {block} into {} addresses", ipv4_range.len());
    Ok(ipv4_range.to_iter().collect())
}

/// Accepts any IPv4 or IPv6 literal, ignoring surrounding whitespace.
pub fn validate_single(input: &str) -> Result<IpAddr, EnumerationError> {
    input
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| EnumerationError::invalid_address(input.trim()))
}

/// Validates a line-delimited source.
///
/// Blank lines are skipped. Invalid lines are collected in
/// [`ListEnumeration::rejected`] and never abort the remaining lines.
/// Fails only when the reader itself fails.
pub fn parse_list<R: BufRead>(mut reader: R) -> Result<ListEnumeration, EnumerationError> {
    let mut result = ListEnumeration::default();
    let mut buf: Vec<u8> = Vec::new();
    let mut line_no: usize = 0;

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| EnumerationError::unreadable("input", e))?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match validate_single(line) {
            Ok(ip) => result.targets.push(ip),
            Err(reason) => result.rejected.push(RejectedLine {
                line_no,
                text: line.to_string(),
                reason,
            }),
        }
    }

    Ok(result)
}

/// Opens `path` and runs [`parse_list`] over it.
pub fn read_list_file(path: &Path) -> Result<ListEnumeration, EnumerationError> {
    let origin = path.display().to_string();
    let file = File::open(path).map_err(|e| EnumerationError::unreadable(origin.as_str(), e))?;

    parse_list(BufReader::new(file)).map_err(|err| match err {
        EnumerationError::SourceUnreadable { reason, .. } => {
            EnumerationError::SourceUnreadable { origin, reason }
        }
        other => other,
    })
}

/// Resolves every source independently, in the order given.
///
/// A broken source is recorded in [`Enumeration::failures`] and the
/// remaining sources are still processed.
pub fn enumerate(sources: &[TargetSource]) -> Enumeration {
    let mut enumeration = Enumeration::default();

    for source in sources {
        match resolve_source(source) {
            Ok(list) => {
                for rejected in &list.rejected {
                    warn!(
                        "Invalid IP format found on line {}: {} ({})",
                        rejected.line_no, rejected.text, rejected.reason
                    );
                }
                enumeration.targets.extend(list.targets);
                enumeration.rejected.extend(list.rejected);
            }
            Err(e) => {
                error!("Skipping {source}: {e}");
                enumeration.failures.push((source.clone(), e));
            }
        }
    }

    enumeration
}

fn resolve_source(source: &TargetSource) -> Result<ListEnumeration, EnumerationError> {
    match source {
        TargetSource::Host(ip) => Ok(ListEnumeration {
            targets: vec![validate_single(ip)?],
            rejected: Vec::new(),
        }),
        TargetSource::Cidr(block) => Ok(ListEnumeration {
            targets: expand_cidr(block)?,
            rejected: Vec::new(),
        }),
        TargetSource::List(path) => read_list_file(path),
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

// Firmware version identity and ordering.

use std::cmp::Ordering;

// Cargo package version from Cargo.toml
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Full version string for the boot banner and status pages.
pub fn full_version() -> String {
    format!("v{FIRMWARE_VERSION}")
}

/// Parsed dotted version. Missing trailing segments read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionTriple {
    pub major: i32,
    pub minor: i32,
    pub patch: i32,
}

/// Parse a dotted version string. One leading `v`/`V` is accepted, each
/// segment contributes its leading decimal digits, and anything that does
/// not parse reads as zero. Never fails.
pub fn parse(s: &str) -> VersionTriple {
    let s = s.trim();
    let s = s
        .strip_prefix('v')
        .or_else(|| s.strip_prefix('V'))
        .unwrap_or(s);
    let mut segments = s.split('.').map(leading_int);
    VersionTriple {
        major: segments.next().unwrap_or(0),
        minor: segments.next().unwrap_or(0),
        patch: segments.next().unwrap_or(0),
    }
}

fn leading_int(segment: &str) -> i32 {
    let digits: String = segment.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

/// Numeric segment-wise ordering: major, then minor, then patch.
pub fn compare(a: &str, b: &str) -> Ordering {
    parse(a).cmp(&parse(b))
}

/// True when `candidate` is strictly newer than `current`.
pub fn needs_update(current: &str, candidate: &str) -> bool {
    compare(current, candidate) == Ordering::Less
}

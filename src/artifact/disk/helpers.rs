//! Size arithmetic for partition and disk images.

use anyhow::{bail, Context, Result};

pub const MIB: u64 = 1024 * 1024;

/// Round `bytes` up to a whole number of MiB.
pub fn align_mib(bytes: u64) -> u64 {
    bytes.div_ceil(MIB) * MIB
}

/// Partition size for a tree of `content_bytes`: 50% headroom, whole MiB,
/// never below 1 MiB.
pub fn padded_partition_size(content_bytes: u64) -> u64 {
    let padded = content_bytes.saturating_add(content_bytes / 2);
    align_mib(padded).max(MIB)
}

/// Parse a size such as `4096`, `512K`, `200M` or `4G` (binary units).
pub fn parse_size(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    let (digits, multiplier) = match raw.chars().last() {
        Some('K' | 'k') => (&raw[..raw.len() - 1], 1024),
        Some('M' | 'm') => (&raw[..raw.len() - 1], MIB),
        Some('G' | 'g') => (&raw[..raw.len() - 1], 1024 * MIB),
        Some(c) if c.is_ascii_digit() => (raw, 1),
        _ => bail!("invalid size '{}'; expected bytes or a K/M/G suffix", raw),
    };
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid size '{}'", raw))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("size '{}' overflows", raw))
}

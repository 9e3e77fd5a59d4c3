//! Resource limits for a confined node.

use crate::error::SandboxError;

/// Resource limits applied to a node's cgroup.
///
/// Values are kept as strings because cgroup v2 control files take textual
/// forms (`"100000 50000"` for `cpu.max`, `"max"` for unlimited memory).
/// Size-valued fields accept human units via [`parse_size`].
#[derive(Debug, Clone, Default)]
pub struct Limits {
    /// `cpu.max` in "period quota" form, e.g. `"100000 50000"` for 50%.
    pub cpu_quota: String,
    /// `memory.max` — bytes, or a size with a `K`/`M`/`G` suffix.
    pub memory_max: String,
    /// Upper bound on scratch disk, same unit forms as `memory_max`.
    pub disk_quota: String,
    /// `io.weight`, 10–1000.
    pub io_weight: String,
}

impl Limits {
    /// Whether any limit is set at all.
    pub fn is_empty(&self) -> bool {
        self.cpu_quota.is_empty()
            && self.memory_max.is_empty()
            && self.disk_quota.is_empty()
            && self.io_weight.is_empty()
    }
}

/// Convert a human-readable size (`"512K"`, `"100M"`, `"2G"`, or a bare
/// byte count) to a byte-count string suitable for a cgroup control file.
///
/// # Errors
/// Returns [`SandboxError::BadLimits`] for an unknown unit suffix or a
/// non-numeric value. An empty input maps to an empty output.
pub fn parse_size(value: &str) -> Result<String, SandboxError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(String::new());
    }

    // Already a plain byte count.
    if value.parse::<u64>().is_ok() {
        return Ok(value.to_string());
    }

    let (number, unit) = value.split_at(value.len() - 1);
    let number: u64 = number
        .trim()
        .parse()
        .map_err(|_| SandboxError::BadLimits(value.to_string()))?;

    let multiplier: u64 = match unit.to_ascii_uppercase().as_str() {
        "K" => 1024,
        "M" => 1024 * 1024,
        "G" => 1024 * 1024 * 1024,
        _ => return Err(SandboxError::BadLimits(value.to_string())),
    };

    Ok((number * multiplier).to_string())
}

//! Common types shared across the Trellis core.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for persisted lifecycle records.
pub type Timestamp = DateTime<Utc>;

/// Identity and version of the embedding host application.
///
/// Plugins declare a minimum host version in their manifest; the lifecycle
/// orchestrator compares it against this at enable time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Host application name.
    pub name: String,

    /// Host application version.
    pub version: Version,
}

impl HostInfo {
    /// Create host info from a name and a parsed version.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self { name: name.into(), version }
    }
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_info_display() {
        let info = HostInfo::new("trellis", Version::new(1, 4, 0));
        assert_eq!(info.to_string(), "trellis 1.4.0");
    }
}

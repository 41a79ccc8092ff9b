//! Host requirements a filter needs before it may run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A `major.minor.patch` version.
///
/// Missing components default to zero, and pre-release or build suffixes
/// (`-beta`, `+abc`) are ignored for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{0}'")]
pub struct VersionError(String);

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let core = s.split(['-', '+']).next().unwrap_or_default().trim();
        let mut parts = [0u64; 3];
        let mut count = 0;

        for part in core.split('.') {
            if count == parts.len() || part.is_empty() {
                return Err(VersionError(s.to_string()));
            }
            parts[count] = part.parse().map_err(|_| VersionError(s.to_string()))?;
            count += 1;
        }

        Ok(Version::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

/// What the running host offers: its version and enabled extensions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEnvironment {
    pub version: Version,
    #[serde(default)]
    pub extensions: BTreeSet<String>,
}

impl HostEnvironment {
    /// The host as built: this library's version and no extensions.
    pub fn current() -> Self {
        let version = env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or(Version::new(0, 0, 0));
        Self::new(version)
    }

    pub fn new(version: Version) -> Self {
        Self {
            version,
            extensions: BTreeSet::new(),
        }
    }

    /// Builder-style extension registration.
    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.insert(name.into());
        self
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self::current()
    }
}

/// Preconditions a filter requires of its host.
///
/// Absent bounds are always satisfied; both bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeEnvironment {
    #[serde(default)]
    pub min_version: Option<Version>,
    #[serde(default)]
    pub max_version: Option<Version>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// The specific requirement a host failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvironmentMismatch {
    #[error("host version {host} is older than the required {required}")]
    TooOld { host: Version, required: Version },

    #[error("host version {host} is newer than the supported {supported}")]
    TooNew { host: Version, supported: Version },

    #[error("required host extension '{0}' is not enabled")]
    MissingExtension(String),
}

/// Raised when a filter is executed on a host that cannot run it.
///
/// This is a deployment problem, not a data problem, so it is returned as
/// an error rather than folded into the "no output" path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("filter '{filter}' cannot run on this host: {reason}")]
pub struct UnsupportedRuntimeEnvironment {
    pub filter: String,
    #[source]
    pub reason: EnvironmentMismatch,
}

impl RuntimeEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_version(mut self, version: Version) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn max_version(mut self, version: Version) -> Self {
        self.max_version = Some(version);
        self
    }

    pub fn extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }

    /// Check the host, reporting the first unmet requirement.
    pub fn check(&self, host: &HostEnvironment) -> Result<(), EnvironmentMismatch> {
        if let Some(required) = self.min_version
            && host.version < required
        {
            return Err(EnvironmentMismatch::TooOld {
                host: host.version,
                required,
            });
        }

        if let Some(supported) = self.max_version
            && host.version > supported
        {
            return Err(EnvironmentMismatch::TooNew {
                host: host.version,
                supported,
            });
        }

        if let Some(missing) = self.extensions.iter().find(|ext| !host.has_extension(ext)) {
            return Err(EnvironmentMismatch::MissingExtension(missing.clone()));
        }

        Ok(())
    }

    pub fn is_satisfied_by(&self, host: &HostEnvironment) -> bool {
        self.check(host).is_ok()
    }
}

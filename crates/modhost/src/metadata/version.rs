//! Four-component module versions.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A `major.minor.build.revision` version, ordered component by component.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ModuleVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl ModuleVersion {
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse a symbol-version tag such as `GLIBC_2.34` or `GCC_3.0`.
    ///
    /// Returns `None` for tags without a numeric suffix (`GLIBC_PRIVATE`).
    pub fn from_version_tag(tag: &str) -> Option<Self> {
        let (_, numbers) = tag.rsplit_once('_')?;
        numbers.parse().ok()
    }

    pub fn to_semver(&self) -> semver::Version {
        semver::Version::new(
            u64::from(self.major),
            u64::from(self.minor),
            u64::from(self.build),
        )
    }
}

impl Display for ModuleVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid module version: {0}")]
pub struct InvalidVersion(String);

impl FromStr for ModuleVersion {
    type Err = InvalidVersion;

    /// Accepts one to four dot-separated numeric components; missing ones are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u32; 4];
        let mut count = 0;
        for component in s.trim().split('.') {
            if count == parts.len() {
                return Err(InvalidVersion(s.to_string()));
            }
            parts[count] = component
                .parse()
                .map_err(|_| InvalidVersion(s.to_string()))?;
            count += 1;
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ExecutorError;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*v?(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("version pattern is valid")
});

/// First `SQLite` release accepting `INSERT ... VALUES (..), (..)`.
pub const MULTI_ROW_INSERT: BackendVersion = BackendVersion::new(3, 7, 11);

/// Backend library version as a numeric `(major, minor, patch)` tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BackendVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl BackendVersion {
    #[must_use]
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted version string such as `3.45.1`; missing components default to zero.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ConfigError`] when the string does not start with a number.
    pub fn parse(value: &str) -> Result<Self, ExecutorError> {
        let captures = VERSION_PATTERN.captures(value).ok_or_else(|| {
            ExecutorError::ConfigError(format!("unrecognised backend version: {value:?}"))
        })?;
        let component = |idx: usize| -> Result<u32, ExecutorError> {
            captures.get(idx).map_or(Ok(0), |m| {
                m.as_str().parse::<u32>().map_err(|e| {
                    ExecutorError::ConfigError(format!("invalid version component in {value:?}: {e}"))
                })
            })
        };
        Ok(Self::new(component(1)?, component(2)?, component(3)?))
    }

    /// Version of the `SQLite` library linked through `rusqlite`.
    #[must_use]
    pub fn linked() -> Self {
        Self::parse(rusqlite::version()).unwrap_or_else(|_| {
            let number = u32::try_from(rusqlite::version_number()).unwrap_or_default();
            Self::new(number / 1_000_000, (number / 1_000) % 1_000, number % 1_000)
        })
    }

    #[must_use]
    pub fn supports_multi_row_insert(self) -> bool {
        self >= MULTI_ROW_INSERT
    }
}

impl FromStr for BackendVersion {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for BackendVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotted_versions() {
        assert_eq!(
            BackendVersion::parse("3.45.1").unwrap(),
            BackendVersion::new(3, 45, 1)
        );
        assert_eq!(
            BackendVersion::parse("3.8").unwrap(),
            BackendVersion::new(3, 8, 0)
        );
        assert_eq!(
            BackendVersion::parse("3.7.11-beta").unwrap(),
            BackendVersion::new(3, 7, 11)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            BackendVersion::parse("sqlite"),
            Err(ExecutorError::ConfigError(_))
        ));
    }

    #[test]
    fn compares_numerically_not_lexically() {
        let old = BackendVersion::parse("3.7.9").unwrap();
        let gate = BackendVersion::parse("3.7.11").unwrap();
        assert!(old < gate);
        assert!(!old.supports_multi_row_insert());
        assert!(gate.supports_multi_row_insert());
        assert!(BackendVersion::parse("3.10.0").unwrap().supports_multi_row_insert());
    }

    #[test]
    fn linked_library_is_recent() {
        assert!(BackendVersion::linked().supports_multi_row_insert());
    }
}

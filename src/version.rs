//! Three-component cluster versions.
//!
//! Cluster versions are strictly `major.minor.patch` with every component a
//! non-negative integer. Ordering is numeric per component, so `1.9.0`
//! sorts before `1.10.0`. Callers usually request a version by prefix
//! (`1.17`), which is resolved against a candidate list with
//! [`max_matching`].

use crate::error::VersionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed `major.minor.patch` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    /// Major component.
    pub major: u64,
    /// Minor component.
    pub minor: u64,
    /// Patch component.
    pub patch: u64,
}

impl Version {
    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_error = || VersionError::Parse {
            input: s.to_string(),
        };

        let mut components = [0_u64; 3];
        let mut parts = s.split('.');
        for slot in &mut components {
            let part = parts.next().ok_or_else(parse_error)?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(parse_error());
            }
            *slot = part.parse().map_err(|_| parse_error())?;
        }
        if parts.next().is_some() {
            return Err(parse_error());
        }

        let [major, minor, patch] = components;
        Ok(Self::new(major, minor, patch))
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Plain string-prefix test used for version requests.
///
/// `"1.17"` accepts `"1.17.0"` and `"1.17.3"`; an empty prefix accepts
/// anything.
#[must_use]
pub fn has_prefix(version: &str, prefix: &str) -> bool {
    version.starts_with(prefix)
}

/// Returns the highest candidate whose textual form starts with `prefix`.
///
/// Candidates that do not parse as versions are ignored.
///
/// # Errors
///
/// Returns [`VersionError::NoMatch`] when the candidate list is empty or no
/// well-formed candidate carries the prefix.
pub fn max_matching<S: AsRef<str>>(candidates: &[S], prefix: &str) -> Result<Version, VersionError> {
    candidates
        .iter()
        .map(AsRef::as_ref)
        .filter(|candidate| has_prefix(candidate, prefix))
        .filter_map(|candidate| candidate.parse::<Version>().ok())
        .max()
        .ok_or_else(|| VersionError::NoMatch {
            prefix: prefix.to_string(),
            available: candidates.iter().map(|c| c.as_ref().to_string()).collect(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_valid() {
        assert_eq!(v("1.17.3"), Version::new(1, 17, 3));
        assert_eq!(v("0.0.0"), Version::new(0, 0, 0));
        assert_eq!(v("1.17.3").to_string(), "1.17.3");
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        for input in ["", "1", "1.17", "1.17.3.4", "v1.17.3", "1.x.3", "1..3", "1.17.-3", "1.17.3 "] {
            assert!(
                input.parse::<Version>().is_err(),
                "expected `{input}` to be rejected"
            );
        }
    }

    #[test]
    fn test_ordering_is_numeric() {
        assert!(v("1.9.0") < v("1.10.0"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("1.17.2") < v("1.17.10"));
        assert_eq!(v("1.17.3").cmp(&v("1.17.3")), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_ordering_is_total() {
        let mut versions = vec![v("1.17.10"), v("1.9.0"), v("2.0.0"), v("1.17.2"), v("1.10.0")];
        versions.sort();
        let rendered: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["1.9.0", "1.10.0", "1.17.2", "1.17.10", "2.0.0"]);
    }

    #[test]
    fn test_has_prefix() {
        assert!(has_prefix("1.17.0", "1.17"));
        assert!(has_prefix("1.17.3", "1.17"));
        assert!(has_prefix("1.17.3", ""));
        assert!(!has_prefix("1.16.9", "1.17"));
    }

    #[test]
    fn test_max_matching_picks_highest() {
        let candidates = ["1.16.7", "1.17.2", "1.17.10"];
        assert_eq!(max_matching(&candidates, "1.17").unwrap(), v("1.17.10"));
        assert_eq!(max_matching(&candidates, "").unwrap(), v("1.17.10"));
    }

    #[test]
    fn test_max_matching_no_match() {
        let candidates = ["1.16.7", "1.17.2", "1.17.10"];
        let err = max_matching(&candidates, "2.0").unwrap_err();
        assert!(matches!(err, VersionError::NoMatch { ref prefix, .. } if prefix == "2.0"));

        let empty: [&str; 0] = [];
        assert!(max_matching(&empty, "1.17").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&v("1.17.3")).unwrap();
        assert_eq!(json, "\"1.17.3\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v("1.17.3"));
    }
}

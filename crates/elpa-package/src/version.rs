use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PackageError;

const MAX_COMPONENT: u64 = i64::MAX as u64;

/// A package version: a non-empty list of non-negative integers, each no
/// larger than `i64::MAX` so it prints as a Lisp integer unchanged.
///
/// Comparison is component-wise with missing trailing components treated as
/// `0`, so `1.0` and `1` compare (and test) equal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct Version(Vec<u64>);

impl Version {
    pub fn new(components: Vec<u64>) -> Result<Self, PackageError> {
        if components.is_empty() || components.iter().any(|&c| c > MAX_COMPONENT) {
            return Err(PackageError::InvalidVersion(format!("{components:?}")));
        }
        Ok(Self(components))
    }

    /// Parses a dotted version string such as `1.2.3` or `20240131.1402`.
    pub fn parse(text: &str) -> Result<Self, PackageError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PackageError::InvalidVersion(text.to_owned()));
        }

        let mut components = Vec::new();
        for part in trimmed.split('.') {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(PackageError::InvalidVersion(text.to_owned()));
            }
            let value = part
                .parse::<u64>()
                .ok()
                .filter(|&value| value <= MAX_COMPONENT)
                .ok_or_else(|| PackageError::InvalidVersion(text.to_owned()))?;
            components.push(value);
        }
        Ok(Self(components))
    }

    pub fn components(&self) -> &[u64] {
        &self.0
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for idx in 0..len {
            let a = self.0.get(idx).copied().unwrap_or(0);
            let b = other.0.get(idx).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl TryFrom<Vec<u64>> for Version {
    type Error = PackageError;

    fn try_from(value: Vec<u64>) -> Result<Self, Self::Error> {
        Version::new(value)
    }
}

impl From<Version> for Vec<u64> {
    fn from(value: Version) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn compares_component_wise_with_zero_padding() {
        assert!(v("1.2") > v("1.0"));
        assert!(v("0.9") < v("1.0"));
        assert!(v("1.10") > v("1.9"));
        assert_eq!(v("1.0"), v("1"));
        assert_eq!(v("1.0.0").cmp(&v("1")), Ordering::Equal);
        assert!(v("1.0.1") > v("1"));
    }

    #[test]
    fn rejects_malformed_versions() {
        for bad in ["", "  ", "1..2", ".1", "1.", "1.0beta", "-1", "a.b"] {
            assert!(Version::parse(bad).is_err(), "expected {bad:?} to be rejected");
        }
        assert!(Version::new(Vec::new()).is_err());
    }

    #[test]
    fn components_fit_a_lisp_integer() {
        assert_eq!(
            v("9223372036854775807").components(),
            &[i64::MAX as u64]
        );
        assert!(Version::parse("9223372036854775808").is_err());
        assert!(Version::parse("1.18446744073709551615").is_err());
        assert!(Version::new(vec![1, u64::MAX]).is_err());
    }

    #[test]
    fn displays_dotted() {
        assert_eq!(v("20240131.1402").to_string(), "20240131.1402");
        assert_eq!(v(" 2.0 ").components(), &[2, 0]);
    }
}

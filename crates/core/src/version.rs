//! Dotted-integer version identifiers.
//!
//! Versions are sequences of non-negative integer components
//! (`"18.5.300"`). Trailing zero components are insignificant:
//! `18.5.300 == 18.5.300.0.0`. Ordering is componentwise with missing
//! components treated as zero.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::VersionError;

/// A dotted-integer version identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    /// Parse a dotted version string such as `"18.5.300"`.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }
        let mut components = Vec::new();
        for part in trimmed.split('.') {
            let n = part
                .parse::<u64>()
                .map_err(|_| VersionError::InvalidComponent {
                    input: s.to_string(),
                    component: part.to_string(),
                })?;
            components.push(n);
        }
        Ok(Self { components })
    }

    /// The bottom element: compares less than every non-zero version.
    pub fn zero() -> Self {
        Self { components: vec![0] }
    }

    /// Components with trailing zeros stripped.
    fn normalized(&self) -> &[u64] {
        let mut len = self.components.len();
        while len > 0 && self.components[len - 1] == 0 {
            len -= 1;
        }
        &self.components[..len]
    }

    /// True if `self < other`.
    pub fn is_older_than(&self, other: &Version) -> bool {
        self < other
    }

    /// Half-open interval membership: `from < self <= to`.
    pub fn is_within(&self, from: &Version, to: &Version) -> bool {
        from < self && self <= to
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.normalized();
        let b = other.normalized();
        let len = a.len().max(b.len());
        for i in 0..len {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            match x.cmp(&y) {
                Ordering::Equal => continue,
                ord => return ord,
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

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let norm = self.normalized();
        if norm.is_empty() {
            return write!(f, "0");
        }
        let parts: Vec<String> = norm.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        let v1 = Version::parse("18.5.299").unwrap();
        let v2 = Version::parse("18.5.300").unwrap();
        assert!(v1.is_older_than(&v2));
        assert!(!v2.is_older_than(&v1));
        assert!(Version::parse("2").unwrap() < Version::parse("10").unwrap());
        assert!(Version::parse("18.5").unwrap() < Version::parse("18.5.1").unwrap());
    }

    #[test]
    fn test_trailing_zeros_ignored() {
        let a = Version::parse("18.5.300").unwrap();
        let b = Version::parse("18.5.300.0.0").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);

        let mut hasher_a = std::collections::hash_map::DefaultHasher::new();
        let mut hasher_b = std::collections::hash_map::DefaultHasher::new();
        use std::hash::{Hash, Hasher};
        a.hash(&mut hasher_a);
        b.hash(&mut hasher_b);
        assert_eq!(hasher_a.finish(), hasher_b.finish());
    }

    #[test]
    fn test_is_within_half_open() {
        let from = Version::parse("50").unwrap();
        let to = Version::parse("60").unwrap();
        // From bound is exclusive.
        assert!(!Version::parse("50").unwrap().is_within(&from, &to));
        assert!(Version::parse("51").unwrap().is_within(&from, &to));
        // To bound is inclusive.
        assert!(Version::parse("60").unwrap().is_within(&from, &to));
        assert!(!Version::parse("61").unwrap().is_within(&from, &to));
    }

    #[test]
    fn test_zero_is_bottom() {
        let zero = Version::zero();
        assert!(zero < Version::parse("0.0.1").unwrap());
        assert_eq!(zero, Version::parse("0.0.0").unwrap());
    }

    #[test]
    fn test_display_normalizes() {
        assert_eq!(Version::parse("18.5.300.0").unwrap().to_string(), "18.5.300");
        assert_eq!(Version::zero().to_string(), "0");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Version::parse(""), Err(VersionError::Empty)));
        assert!(matches!(
            Version::parse("18.x.3"),
            Err(VersionError::InvalidComponent { .. })
        ));
        assert!(matches!(
            Version::parse("18..3"),
            Err(VersionError::InvalidComponent { .. })
        ));
    }
}

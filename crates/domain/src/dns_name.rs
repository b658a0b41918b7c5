use crate::errors::DomainError;
use compact_str::CompactString;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

const MAX_NAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// A domain name in presentation form, without the trailing dot.
///
/// The original spelling is kept so answers can echo the client's case,
/// but equality, ordering and hashing are ASCII case-insensitive, which is
/// how DNS compares owner names.
#[derive(Clone)]
pub struct DomainName(CompactString);

impl DomainName {
    pub fn new(name: &str) -> Result<Self, DomainError> {
        let trimmed = name.strip_suffix('.').unwrap_or(name);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        if trimmed.len() > MAX_NAME_LEN {
            return Err(DomainError::InvalidDomainName(format!(
                "{} exceeds {} characters",
                name, MAX_NAME_LEN
            )));
        }
        for label in trimmed.split('.') {
            if label.is_empty() {
                return Err(DomainError::InvalidDomainName(format!(
                    "{} has an empty label",
                    name
                )));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(DomainError::InvalidDomainName(format!(
                    "label {} exceeds {} characters",
                    label, MAX_LABEL_LEN
                )));
            }
        }
        Ok(Self(CompactString::from(trimmed)))
    }

    pub fn root() -> Self {
        Self(CompactString::const_new(""))
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn label_count(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split('.').count()
        }
    }

    /// Wire-format length, counting the root label.
    pub fn wire_len(&self) -> usize {
        if self.is_root() {
            1
        } else {
            self.0.len() + 2
        }
    }

    /// True if `self` equals `zone` or lies below it.
    pub fn is_subdomain_of(&self, zone: &DomainName) -> bool {
        if zone.is_root() || self == zone {
            return true;
        }
        let name = self.0.as_bytes();
        let suffix = zone.0.as_bytes();
        name.len() > suffix.len()
            && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
            && name[name.len() - suffix.len() - 1] == b'.'
    }

    fn lower_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.bytes().map(|b| b.to_ascii_lowercase())
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for DomainName {}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.lower_bytes() {
            state.write_u8(b);
        }
        state.write_u8(0xff);
    }
}

impl Ord for DomainName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lower_bytes().cmp(other.lower_bytes())
    }
}

impl PartialOrd for DomainName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str(".")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainName({})", self)
    }
}

impl FromStr for DomainName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(name: &DomainName) -> u64 {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_case_insensitive_equality_and_hash() {
        let a = DomainName::new("WWW.Example.COM").unwrap();
        let b = DomainName::new("www.example.com.").unwrap();
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a.as_str(), "WWW.Example.COM");
    }

    #[test]
    fn test_root_name() {
        let root = DomainName::new(".").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), ".");
        assert_eq!(root.wire_len(), 1);
        assert_eq!(root.label_count(), 0);
    }

    #[test]
    fn test_rejects_empty_label_and_long_label() {
        assert!(DomainName::new("a..b").is_err());
        let long = "x".repeat(64);
        assert!(DomainName::new(&format!("{}.com", long)).is_err());
    }

    #[test]
    fn test_subdomain() {
        let zone = DomainName::new("example.com").unwrap();
        let name = DomainName::new("www.EXAMPLE.com").unwrap();
        let other = DomainName::new("badexample.com").unwrap();
        assert!(name.is_subdomain_of(&zone));
        assert!(zone.is_subdomain_of(&zone));
        assert!(!other.is_subdomain_of(&zone));
        assert!(name.is_subdomain_of(&DomainName::root()));
    }
}

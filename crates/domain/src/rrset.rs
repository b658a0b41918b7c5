use super::{DomainName, RecordClass, RecordType, RrsetTrust, SecurityStatus};
use bytes::Bytes;
use std::mem::size_of;
use std::sync::Arc;

/// Bits of [`RrsetKey::flags`]. They split RRsets that share an owner,
/// type and class but must be cached separately.
pub mod rrset_flags {
    /// NSEC record found at a zone apex.
    pub const NSEC_AT_APEX: u32 = 0x1;
    /// Data from the parent side of a zone cut.
    pub const PARENT_SIDE: u32 = 0x2;
    /// SOA kept for a negative answer.
    pub const SOA_NEG: u32 = 0x4;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RrsetKey {
    pub name: DomainName,
    pub rtype: RecordType,
    pub class: RecordClass,
    pub flags: u32,
}

impl RrsetKey {
    pub fn new(name: DomainName, rtype: RecordType, class: RecordClass, flags: u32) -> Self {
        Self {
            name,
            rtype,
            class,
            flags,
        }
    }

    pub fn mem_size(&self) -> usize {
        size_of::<Self>() + self.name.wire_len()
    }
}

/// Records of one RRset plus the metadata the caches track for it.
///
/// `ttl` and `rr_ttl` are relative while the set travels through a
/// resolution module and absolute (expiry second) once it is in the cache.
/// RRSIG records follow the data records in `rdata`.
#[derive(Debug, Clone)]
pub struct RrsetData {
    pub ttl: u64,
    pub rr_ttl: Vec<u64>,
    pub rdata: Arc<[Bytes]>,
    pub rrsig_count: usize,
    pub trust: RrsetTrust,
    pub security: SecurityStatus,
}

impl RrsetData {
    pub fn new(ttl: u64, rdata: Vec<Bytes>, rrsig_count: usize, trust: RrsetTrust) -> Self {
        let rr_ttl = vec![ttl; rdata.len()];
        Self {
            ttl,
            rr_ttl,
            rdata: rdata.into(),
            rrsig_count,
            trust,
            security: SecurityStatus::Unchecked,
        }
    }

    pub fn with_security(mut self, security: SecurityStatus) -> Self {
        self.security = security;
        self
    }

    /// Number of data records, excluding signatures.
    pub fn count(&self) -> usize {
        self.rdata.len().saturating_sub(self.rrsig_count)
    }

    /// Byte equality of the records and signatures; TTLs and metadata are
    /// not compared.
    pub fn rdata_equal(&self, other: &RrsetData) -> bool {
        if Arc::ptr_eq(&self.rdata, &other.rdata) {
            return true;
        }
        self.rrsig_count == other.rrsig_count
            && self.rdata.len() == other.rdata.len()
            && self.rdata.iter().zip(other.rdata.iter()).all(|(a, b)| a == b)
    }

    /// Converts relative TTLs to absolute expiry times.
    pub fn add_now(&mut self, now: u64) {
        self.ttl = self.ttl.saturating_add(now);
        for ttl in self.rr_ttl.iter_mut() {
            *ttl = ttl.saturating_add(now);
        }
    }

    /// Copy with TTLs relative to `now`; expired records report 0.
    pub fn relative_to(&self, now: u64) -> RrsetData {
        let mut copy = self.clone();
        copy.ttl = self.ttl.saturating_sub(now);
        for ttl in copy.rr_ttl.iter_mut() {
            *ttl = ttl.saturating_sub(now);
        }
        copy
    }

    pub fn mem_size(&self) -> usize {
        size_of::<Self>()
            + self.rr_ttl.len() * size_of::<u64>()
            + self
                .rdata
                .iter()
                .map(|rr| rr.len() + size_of::<Bytes>())
                .sum::<usize>()
    }
}

#[derive(Debug, Clone)]
pub struct PackedRrset {
    pub key: RrsetKey,
    pub data: RrsetData,
}

impl PackedRrset {
    pub fn new(key: RrsetKey, data: RrsetData) -> Self {
        Self { key, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(ttl: u64, records: &[&'static [u8]]) -> RrsetData {
        RrsetData::new(
            ttl,
            records.iter().map(|r| Bytes::from_static(r)).collect(),
            0,
            RrsetTrust::AnswerAa,
        )
    }

    #[test]
    fn test_rdata_equal_ignores_ttl_and_trust() {
        let a = data(300, &[b"\x01\x02\x03\x04"]);
        let mut b = data(60, &[b"\x01\x02\x03\x04"]);
        b.trust = RrsetTrust::Glue;
        assert!(a.rdata_equal(&b));
    }

    #[test]
    fn test_rdata_equal_detects_difference() {
        let a = data(300, &[b"\x01\x02\x03\x04"]);
        let b = data(300, &[b"\x01\x02\x03\x05"]);
        let c = data(300, &[b"\x01\x02\x03\x04", b"\x05\x06\x07\x08"]);
        assert!(!a.rdata_equal(&b));
        assert!(!a.rdata_equal(&c));
    }

    #[test]
    fn test_absolute_then_relative_ttls() {
        let mut d = data(300, &[b"a", b"b"]);
        d.add_now(1000);
        assert_eq!(d.ttl, 1300);
        assert_eq!(d.rr_ttl, vec![1300, 1300]);
        let rel = d.relative_to(1100);
        assert_eq!(rel.ttl, 200);
        assert_eq!(d.relative_to(2000).ttl, 0);
    }
}

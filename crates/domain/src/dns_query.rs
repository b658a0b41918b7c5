use super::{DomainName, RecordClass, RecordType};
use std::cmp::Ordering;
use std::fmt;

/// DNS header flag bits as they appear in the second 16-bit header word.
pub mod header {
    pub const QR: u16 = 0x8000;
    pub const AA: u16 = 0x0400;
    pub const TC: u16 = 0x0200;
    pub const RD: u16 = 0x0100;
    pub const RA: u16 = 0x0080;
    pub const AD: u16 = 0x0020;
    pub const CD: u16 = 0x0010;
    pub const RCODE_MASK: u16 = 0x000f;
}

/// Question section of a query: name, type and class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryInfo {
    pub qname: DomainName,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl QueryInfo {
    pub fn new(qname: DomainName, qtype: RecordType, qclass: RecordClass) -> Self {
        Self {
            qname,
            qtype,
            qclass,
        }
    }
}

impl fmt::Display for QueryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.qname, self.qtype, self.qclass)
    }
}

/// The header flags that change how a query is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFlags {
    pub rd: bool,
    pub cd: bool,
}

impl QueryFlags {
    pub fn recursive() -> Self {
        Self { rd: true, cd: false }
    }

    pub fn from_header(flags: u16) -> Self {
        Self {
            rd: flags & header::RD != 0,
            cd: flags & header::CD != 0,
        }
    }

    pub fn to_header(self) -> u16 {
        let mut flags = 0;
        if self.rd {
            flags |= header::RD;
        }
        if self.cd {
            flags |= header::CD;
        }
        flags
    }
}

/// Identity of one resolution effort.
///
/// Two requests with equal keys share a single mesh state. Ordering puts
/// the priming and validation-recursion bits first, then the header
/// flags, then the question, so related internal queries cluster together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub qinfo: QueryInfo,
    pub flags: QueryFlags,
    pub is_priming: bool,
    pub is_valrec: bool,
}

impl QueryKey {
    pub fn new(qinfo: QueryInfo, flags: QueryFlags, is_priming: bool, is_valrec: bool) -> Self {
        Self {
            qinfo,
            flags,
            is_priming,
            is_valrec,
        }
    }

    /// Key for a plain client query.
    pub fn client(qinfo: QueryInfo, flags: QueryFlags) -> Self {
        Self::new(qinfo, flags, false, false)
    }

    /// Key under which the answer is stored in the message cache.
    ///
    /// The answer does not depend on RD, the priming bit or the validation
    /// bit. CD only separates AAAA answers.
    pub fn message_key(&self) -> Self {
        let cd = self.flags.cd && self.qinfo.qtype == RecordType::AAAA;
        Self {
            qinfo: self.qinfo.clone(),
            flags: QueryFlags { rd: false, cd },
            is_priming: false,
            is_valrec: false,
        }
    }
}

impl Ord for QueryKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.is_priming
            .cmp(&other.is_priming)
            .then(self.is_valrec.cmp(&other.is_valrec))
            .then(self.flags.rd.cmp(&other.flags.rd))
            .then(self.flags.cd.cmp(&other.flags.cd))
            .then_with(|| self.qinfo.cmp(&other.qinfo))
    }
}

impl PartialOrd for QueryKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qinfo)?;
        if self.flags.rd {
            f.write_str(" RD")?;
        }
        if self.flags.cd {
            f.write_str(" CD")?;
        }
        if self.is_priming {
            f.write_str(" priming")?;
        }
        if self.is_valrec {
            f.write_str(" valrec")?;
        }
        Ok(())
    }
}

/// EDNS parameters of a client query, echoed back in the answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdnsData {
    pub present: bool,
    pub version: u8,
    pub udp_size: u16,
    pub dnssec_ok: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qinfo(name: &str, qtype: RecordType) -> QueryInfo {
        QueryInfo::new(DomainName::new(name).unwrap(), qtype, RecordClass::IN)
    }

    #[test]
    fn test_key_order_puts_priming_last() {
        let plain = QueryKey::client(qinfo("a.example", RecordType::A), QueryFlags::recursive());
        let priming = QueryKey::new(qinfo(".", RecordType::NS), QueryFlags::default(), true, false);
        assert!(plain < priming);
    }

    #[test]
    fn test_key_equality_is_case_insensitive() {
        let a = QueryKey::client(qinfo("WWW.example.com", RecordType::A), QueryFlags::recursive());
        let b = QueryKey::client(qinfo("www.example.com", RecordType::A), QueryFlags::recursive());
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_message_key_ignores_rd_and_internal_bits() {
        let client = QueryKey::client(qinfo("example.com", RecordType::A), QueryFlags::recursive());
        let internal = QueryKey::new(
            qinfo("example.com", RecordType::A),
            QueryFlags { rd: false, cd: true },
            false,
            true,
        );
        assert_eq!(client.message_key(), internal.message_key());
    }

    #[test]
    fn test_message_key_keeps_cd_for_aaaa() {
        let plain = QueryKey::client(qinfo("example.com", RecordType::AAAA), QueryFlags::recursive());
        let cd = QueryKey::client(
            qinfo("example.com", RecordType::AAAA),
            QueryFlags { rd: true, cd: true },
        );
        assert_ne!(plain.message_key(), cd.message_key());
    }

    #[test]
    fn test_flags_header_round_trip() {
        let flags = QueryFlags::from_header(header::RD | header::CD | header::QR);
        assert!(flags.rd && flags.cd);
        assert_eq!(flags.to_header(), header::RD | header::CD);
    }
}

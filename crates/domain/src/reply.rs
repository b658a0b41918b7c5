use super::dns_query::header;
use super::{PackedRrset, QueryInfo, SecurityStatus};
use std::sync::Arc;

/// Prefetch threshold for a reply TTL: nine tenths of it.
pub fn prefetch_ttl_for(ttl: u64) -> u64 {
    ttl * 9 / 10
}

/// A parsed reply, as produced by a resolution module.
///
/// RRsets are ordered answer section first, then authority, then
/// additional, with the section sizes in the `*_numrrsets` counters.
#[derive(Debug, Clone, Default)]
pub struct ReplyInfo {
    pub flags: u16,
    pub qdcount: u8,
    pub ttl: u64,
    pub prefetch_ttl: u64,
    pub security: SecurityStatus,
    pub an_numrrsets: usize,
    pub ns_numrrsets: usize,
    pub ar_numrrsets: usize,
    pub rrsets: Vec<PackedRrset>,
    /// Answer produced from local zone data for this server only; never
    /// goes into the resolver caches.
    pub authoritative_only: bool,
}

impl ReplyInfo {
    /// Builds a reply whose TTL is the smallest RRset TTL, or `0` when
    /// there are no RRsets.
    pub fn new(
        flags: u16,
        rrsets: Vec<PackedRrset>,
        an_numrrsets: usize,
        ns_numrrsets: usize,
        ar_numrrsets: usize,
    ) -> Self {
        let ttl = rrsets.iter().map(|r| r.data.ttl).min().unwrap_or(0);
        Self {
            flags,
            qdcount: 1,
            ttl,
            prefetch_ttl: prefetch_ttl_for(ttl),
            security: SecurityStatus::Unchecked,
            an_numrrsets,
            ns_numrrsets,
            ar_numrrsets,
            rrsets,
            authoritative_only: false,
        }
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & header::RCODE_MASK) as u8
    }

    pub fn answer_rrsets(&self) -> &[PackedRrset] {
        &self.rrsets[..self.an_numrrsets.min(self.rrsets.len())]
    }

    pub fn total_rrsets(&self) -> usize {
        self.an_numrrsets + self.ns_numrrsets + self.ar_numrrsets
    }

    pub fn all_rrsets_secure(&self) -> bool {
        self.rrsets
            .iter()
            .all(|r| r.data.security == SecurityStatus::Secure)
    }
}

/// Final result of a query state: the question plus the reply to give.
#[derive(Debug, Clone)]
pub struct DnsMessage {
    pub qinfo: QueryInfo,
    pub rep: Arc<ReplyInfo>,
}

impl DnsMessage {
    pub fn new(qinfo: QueryInfo, rep: ReplyInfo) -> Self {
        Self {
            qinfo,
            rep: Arc::new(rep),
        }
    }
}

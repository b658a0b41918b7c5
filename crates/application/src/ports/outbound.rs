use meshdns_domain::{DomainName, QueryInfo, QueryKey, ReplyInfo};
use std::net::SocketAddr;

/// A query a resolution module wants sent to an upstream server.
#[derive(Debug, Clone)]
pub struct OutboundQuery {
    pub qinfo: QueryInfo,
    /// Header flags to set on the outgoing query.
    pub flags: u16,
    /// Request DNSSEC records (EDNS DO bit).
    pub dnssec: bool,
    pub dest: SocketAddr,
    /// Zone the destination server is queried for, for the infra cache.
    pub zone: DomainName,
}

/// Opaque token the network layer hands back with the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutboundHandle(pub u64);

/// Links an in-flight upstream query to the query state that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEntry {
    pub key: QueryKey,
    pub handle: OutboundHandle,
}

/// Parsed upstream answer delivered by the network layer.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub from: SocketAddr,
    pub qinfo: QueryInfo,
    pub rep: ReplyInfo,
    pub rtt_ms: u32,
}

/// Result of an outbound query as seen by the mesh.
#[derive(Debug, Clone)]
pub enum NetEvent {
    Reply(UpstreamReply),
    Timeout,
    Closed,
    /// The reply failed the 0x20 query-name case check.
    CapsFail,
}

/// Sends upstream queries on behalf of query states.
pub trait OutboundSender: Send {
    /// Returns `None` when the query could not be sent at all; the mesh
    /// then treats it as an immediate timeout.
    fn send_query(&mut self, query: &OutboundQuery, state: &QueryKey) -> Option<OutboundHandle>;
}

use meshdns_domain::{
    DomainName, EdnsData, QueryFlags, QueryInfo, QueryKey, Rcode, RecordClass, RecordType,
    ReplyInfo, SecurityStatus,
};
use std::sync::Arc;

/// An incoming client query, already parsed by the network layer.
#[derive(Debug, Clone)]
pub struct ClientQuery {
    /// Question as the client spelled it.
    pub qinfo: QueryInfo,
    pub query_id: u16,
    /// Header flags of the query.
    pub flags: u16,
    pub edns: EdnsData,
}

impl ClientQuery {
    /// Mesh key: only RD and CD of the header take part.
    pub fn key(&self) -> QueryKey {
        QueryKey::client(self.qinfo.clone(), QueryFlags::from_header(self.flags))
    }
}

/// Everything the network layer needs to encode an answer to one client.
#[derive(Debug, Clone)]
pub struct ClientAnswer {
    pub query_id: u16,
    /// Header flags of the client's query.
    pub query_flags: u16,
    /// Query name as the client spelled it.
    pub qname: DomainName,
    pub qtype: RecordType,
    pub qclass: RecordClass,
    pub rcode: Rcode,
    /// `None` for error answers, which carry only the rcode.
    pub reply: Option<Arc<ReplyInfo>>,
    /// Set the AD bit.
    pub secure: bool,
    pub edns: EdnsData,
}

/// Connection handle for one waiting client.
pub trait ReplyChannel: Send {
    fn send_answer(&mut self, answer: ClientAnswer);

    /// Give up on the client without answering.
    fn drop_query(&mut self);
}

/// Result handed to a programmatic callback.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub rcode: Rcode,
    pub reply: Option<Arc<ReplyInfo>>,
    pub security: SecurityStatus,
    /// Why validation failed, for bogus results.
    pub reason: Option<String>,
}

pub type MeshCallback = Box<dyn FnOnce(CallbackOutcome) + Send>;

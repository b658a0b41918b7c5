#![allow(dead_code)]

use bytes::Bytes;
use meshdns_application::{
    CallbackOutcome, ClientAnswer, ClientQuery, ModuleEnv, ModuleEvent, ModuleQState,
    OutboundEntry, OutboundHandle, OutboundQuery, OutboundSender, ReplyChannel,
    ResolutionModule, UpstreamReply,
};
use meshdns_domain::{
    header, DnsMessage, DomainError, DomainName, EdnsData, PackedRrset, QueryInfo, QueryKey,
    RecordClass, RecordType, ReplyInfo, RrsetData, RrsetKey, RrsetTrust, SecurityStatus,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn name(s: &str) -> DomainName {
    DomainName::new(s).unwrap()
}

pub fn qinfo(s: &str, qtype: RecordType) -> QueryInfo {
    QueryInfo::new(name(s), qtype, RecordClass::IN)
}

pub fn client_query(s: &str, qtype: RecordType, id: u16) -> ClientQuery {
    ClientQuery {
        qinfo: qinfo(s, qtype),
        query_id: id,
        flags: header::RD,
        edns: EdnsData::default(),
    }
}

pub fn upstream() -> SocketAddr {
    "192.0.2.53:53".parse().unwrap()
}

/// A one-RRset answer for `qinfo` with relative TTL `ttl`.
pub fn answer_for(qinfo: &QueryInfo, ttl: u64, security: SecurityStatus) -> ReplyInfo {
    let data = RrsetData::new(
        ttl,
        vec![Bytes::from_static(&[192, 0, 2, 1])],
        0,
        RrsetTrust::AnswerAa,
    )
    .with_security(security);
    let rrset = PackedRrset::new(
        RrsetKey::new(qinfo.qname.clone(), qinfo.qtype, qinfo.qclass, 0),
        data,
    );
    let mut rep = ReplyInfo::new(header::QR | header::AA, vec![rrset], 1, 0, 0);
    rep.security = security;
    rep
}

/// What a client saw.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Answered(ClientAnswer),
    Dropped,
}

#[derive(Clone, Default)]
pub struct ClientLog {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl ClientLog {
    pub fn channel(&self) -> Box<dyn ReplyChannel> {
        Box::new(RecordingChannel {
            events: Arc::clone(&self.events),
        })
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }

    pub fn answers(&self) -> Vec<ClientAnswer> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Answered(a) => Some(a),
                ClientEvent::Dropped => None,
            })
            .collect()
    }

    pub fn dropped(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ClientEvent::Dropped))
            .count()
    }
}

struct RecordingChannel {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl ReplyChannel for RecordingChannel {
    fn send_answer(&mut self, answer: ClientAnswer) {
        self.events.lock().push(ClientEvent::Answered(answer));
    }

    fn drop_query(&mut self) {
        self.events.lock().push(ClientEvent::Dropped);
    }
}

/// Records outbound queries; fails every send when `failing` is set.
#[derive(Clone, Default)]
pub struct SentLog {
    sent: Arc<Mutex<Vec<(OutboundQuery, QueryKey)>>>,
    pub failing: bool,
}

impl SentLog {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sender(&self) -> Box<dyn OutboundSender> {
        Box::new(RecordingSender {
            sent: Arc::clone(&self.sent),
            failing: self.failing,
            next: 0,
        })
    }

    pub fn sent(&self) -> Vec<(OutboundQuery, QueryKey)> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

struct RecordingSender {
    sent: Arc<Mutex<Vec<(OutboundQuery, QueryKey)>>>,
    failing: bool,
    next: u64,
}

impl OutboundSender for RecordingSender {
    fn send_query(&mut self, query: &OutboundQuery, state: &QueryKey) -> Option<OutboundHandle> {
        if self.failing {
            return None;
        }
        self.sent.lock().push((query.clone(), state.clone()));
        self.next += 1;
        Some(OutboundHandle(self.next))
    }
}

#[derive(Clone, Default)]
pub struct CallbackLog {
    outcomes: Arc<Mutex<Vec<CallbackOutcome>>>,
}

impl CallbackLog {
    pub fn callback(&self) -> Box<dyn FnOnce(CallbackOutcome) + Send> {
        let outcomes = Arc::clone(&self.outcomes);
        Box::new(move |outcome| outcomes.lock().push(outcome))
    }

    pub fn outcomes(&self) -> Vec<CallbackOutcome> {
        self.outcomes.lock().clone()
    }
}

pub type OperateFn = Box<
    dyn FnMut(&mut ModuleQState, ModuleEvent, usize, Option<OutboundEntry>, &mut dyn ModuleEnv)
        + Send,
>;

/// Boxes a closure as a module body.
pub fn operate<F>(f: F) -> OperateFn
where
    F: FnMut(&mut ModuleQState, ModuleEvent, usize, Option<OutboundEntry>, &mut dyn ModuleEnv)
        + Send
        + 'static,
{
    Box::new(f)
}

/// Module driven by a closure. `inform_super` hands the sub-query's
/// result to the super-state.
pub struct FnModule {
    pub name: &'static str,
    pub operate: OperateFn,
    pub validates: bool,
    pub fail_init: bool,
    pub informed: Arc<AtomicUsize>,
    pub cleared: Arc<AtomicUsize>,
}

impl FnModule {
    pub fn new(name: &'static str, operate: OperateFn) -> Self {
        Self {
            name,
            operate,
            validates: false,
            fail_init: false,
            informed: Arc::new(AtomicUsize::new(0)),
            cleared: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn boxed(self) -> Box<dyn ResolutionModule> {
        Box::new(self)
    }
}

impl ResolutionModule for FnModule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn init(&mut self, _id: usize) -> Result<(), DomainError> {
        if self.fail_init {
            return Err(DomainError::NoModules);
        }
        Ok(())
    }

    fn operate(
        &mut self,
        qstate: &mut ModuleQState,
        event: ModuleEvent,
        id: usize,
        outbound: Option<OutboundEntry>,
        env: &mut dyn ModuleEnv,
    ) {
        (self.operate)(qstate, event, id, outbound, env);
    }

    fn inform_super(&mut self, qstate: &ModuleQState, _id: usize, super_state: &mut ModuleQState) {
        self.informed.fetch_add(1, Ordering::SeqCst);
        super_state.return_msg = qstate.return_msg.clone();
        super_state.return_rcode = qstate.return_rcode;
    }

    fn clear(&mut self, qstate: &mut ModuleQState, id: usize) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        qstate.clear_module_data(id);
    }

    fn validates(&self) -> bool {
        self.validates
    }
}

pub fn outbound_query(qinfo: &QueryInfo) -> OutboundQuery {
    OutboundQuery {
        qinfo: qinfo.clone(),
        flags: 0,
        dnssec: false,
        dest: upstream(),
        zone: name("example.com"),
    }
}

/// Sends one upstream query and finishes with whatever comes back:
/// the reply as the answer, SERVFAIL on failure.
pub fn upstream_operate() -> OperateFn {
    use meshdns_application::ModuleExtState;
    operate(|qstate, event, id, _outbound, env| match event {
        ModuleEvent::New | ModuleEvent::Pass => {
            let query = outbound_query(&qstate.qinfo);
            env.send_query(&query);
            qstate.ext_state[id] = ModuleExtState::WaitReply;
        }
        ModuleEvent::Reply => {
            if let Some(reply) = qstate.reply.take() {
                qstate.return_msg = Some(DnsMessage::new(reply.qinfo, reply.rep));
                qstate.ext_state[id] = ModuleExtState::Finished;
            } else {
                qstate.ext_state[id] = ModuleExtState::Error;
            }
        }
        _ => qstate.ext_state[id] = ModuleExtState::Error,
    })
}

pub fn upstream_reply(qinfo: &QueryInfo, rep: ReplyInfo) -> UpstreamReply {
    UpstreamReply {
        from: upstream(),
        qinfo: qinfo.clone(),
        rep,
        rtt_ms: 20,
    }
}

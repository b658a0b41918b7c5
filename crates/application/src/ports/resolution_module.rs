use super::outbound::{OutboundEntry, OutboundQuery, UpstreamReply};
use super::reply_cache::ReplyCache;
use meshdns_domain::{DnsMessage, DomainError, QueryFlags, QueryInfo, QueryKey, Rcode};
use std::any::Any;

/// Why a module's `operate` is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEvent {
    /// New query state, first activation.
    New,
    /// Passed on from the previous module.
    Pass,
    /// An upstream reply arrived; it is in `ModuleQState::reply`.
    Reply,
    /// The upstream query timed out, failed to send or its connection closed.
    NoReply,
    /// The upstream reply failed the query-name case check.
    CapsFail,
    /// The next module finished its work.
    ModDone,
    /// The next module failed.
    Error,
}

/// What a module reports back after `operate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleExtState {
    #[default]
    Initial,
    /// Waiting for an upstream reply.
    WaitReply,
    /// Hand control to the next module.
    WaitModule,
    /// Hand control to the next module after clearing its state.
    RestartNext,
    /// Waiting for sub-queries to finish.
    WaitSubquery,
    Error,
    Finished,
}

/// Per-query resolution state shared by all modules of the stack.
///
/// The mesh owns it; modules read the question and write the result and
/// their `ext_state` slot. Each module may keep private data in its
/// `minfo` slot, which is dropped together with the state.
pub struct ModuleQState {
    pub qinfo: QueryInfo,
    pub query_flags: QueryFlags,
    pub is_priming: bool,
    pub is_valrec: bool,
    /// Reply for the `Reply` event, cleared after the module ran.
    pub reply: Option<UpstreamReply>,
    /// Module that currently owns the state.
    pub curmod: usize,
    pub ext_state: Vec<ModuleExtState>,
    pub minfo: Vec<Option<Box<dyn Any + Send>>>,
    pub return_msg: Option<DnsMessage>,
    pub return_rcode: Rcode,
    /// Seconds a prefetch may keep a cached answer that is about to expire.
    pub prefetch_leeway: u64,
    /// Do not answer from the cache; set for prefetches.
    pub bypass_cache: bool,
    errinf: Vec<String>,
}

impl ModuleQState {
    pub fn new(key: &QueryKey, num_modules: usize) -> Self {
        Self {
            qinfo: key.qinfo.clone(),
            query_flags: key.flags,
            is_priming: key.is_priming,
            is_valrec: key.is_valrec,
            reply: None,
            curmod: 0,
            ext_state: vec![ModuleExtState::Initial; num_modules],
            minfo: (0..num_modules).map(|_| None).collect(),
            return_msg: None,
            return_rcode: Rcode::NoError,
            prefetch_leeway: 0,
            bypass_cache: false,
            errinf: Vec::new(),
        }
    }

    pub fn key(&self) -> QueryKey {
        QueryKey::new(
            self.qinfo.clone(),
            self.query_flags,
            self.is_priming,
            self.is_valrec,
        )
    }

    pub fn num_modules(&self) -> usize {
        self.ext_state.len()
    }

    /// Typed access to a module's private data.
    pub fn module_data<T: Any + Send>(&mut self, id: usize) -> Option<&mut T> {
        self.minfo
            .get_mut(id)?
            .as_mut()?
            .downcast_mut::<T>()
    }

    pub fn set_module_data<T: Any + Send>(&mut self, id: usize, data: T) {
        if let Some(slot) = self.minfo.get_mut(id) {
            *slot = Some(Box::new(data));
        }
    }

    pub fn clear_module_data(&mut self, id: usize) {
        if let Some(slot) = self.minfo.get_mut(id) {
            *slot = None;
        }
    }

    /// Records a reason for a failure, reported with bogus answers.
    pub fn errinf(&mut self, reason: impl Into<String>) {
        self.errinf.push(reason.into());
    }

    pub fn errinf_text(&self) -> Option<String> {
        if self.errinf.is_empty() {
            None
        } else {
            Some(self.errinf.join(" "))
        }
    }
}

/// Services the mesh offers a module while it runs.
pub trait ModuleEnv {
    /// Current time in seconds.
    fn now(&self) -> u64;

    /// True when a validating module is part of the stack.
    fn need_to_validate(&self) -> bool;

    /// Answer cache shared with the other workers, when one is attached.
    fn cache(&self) -> Option<&dyn ReplyCache>;

    /// Makes the running state depend on the given query.
    ///
    /// Returns the new sub-state when one had to be created so the module
    /// can prime it, `None` when an existing state was attached. Refused
    /// with `DomainError::DependencyCycle` when the edge would close a loop.
    fn attach_sub(
        &mut self,
        qinfo: &QueryInfo,
        flags: QueryFlags,
        is_priming: bool,
        is_valrec: bool,
    ) -> Result<Option<&mut ModuleQState>, DomainError>;

    /// True when depending on the given query would create a cycle.
    fn detect_cycle(
        &self,
        qinfo: &QueryInfo,
        flags: QueryFlags,
        is_priming: bool,
        is_valrec: bool,
    ) -> bool;

    /// Sends an upstream query for the running state.
    ///
    /// `None` means the query could not be sent; the mesh follows up with
    /// a `NoReply` event once the module waits for a reply.
    fn send_query(&mut self, query: &OutboundQuery) -> Option<OutboundEntry>;
}

/// One stage of the resolution pipeline (iterator, validator, ...).
pub trait ResolutionModule: Send {
    fn name(&self) -> &'static str;

    fn init(&mut self, _id: usize) -> Result<(), DomainError> {
        Ok(())
    }

    fn deinit(&mut self, _id: usize) {}

    fn operate(
        &mut self,
        qstate: &mut ModuleQState,
        event: ModuleEvent,
        id: usize,
        outbound: Option<OutboundEntry>,
        env: &mut dyn ModuleEnv,
    );

    /// A sub-query of `super_state` finished; `qstate` is the sub-query.
    fn inform_super(&mut self, qstate: &ModuleQState, id: usize, super_state: &mut ModuleQState);

    /// Releases module data of a state that is being deleted.
    fn clear(&mut self, qstate: &mut ModuleQState, id: usize) {
        qstate.clear_module_data(id);
    }

    fn get_mem(&self, _id: usize) -> usize {
        0
    }

    /// True for a DNSSEC validator.
    fn validates(&self) -> bool {
        false
    }
}

//! Bookkeeping shared by the run loop and the module environment: the
//! state table, the runnable set, the admission lists and the counters.

use super::lists::ReplyList;
use super::state::{KeySet, ListSelect, MeshState};
use super::stats::MeshStats;
use meshdns_application::{CallbackOutcome, ClientAnswer, OutboundSender, ReplyCache};
use meshdns_domain::{header, DomainError, MeshConfig, QueryKey, Rcode, SecurityStatus};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub(crate) struct MeshCore {
    pub(crate) all: BTreeMap<QueryKey, MeshState>,
    pub(crate) run: BTreeSet<QueryKey>,
    pub(crate) forever: ReplyList,
    pub(crate) jostle: ReplyList,

    /// Client replies and callbacks waiting.
    pub(crate) num_reply_addrs: usize,
    /// States with at least one reply or callback.
    pub(crate) num_reply_states: usize,
    /// States nobody waits for.
    pub(crate) num_detached_states: usize,

    pub(crate) max_reply_states: usize,
    pub(crate) max_forever_states: usize,
    pub(crate) max_reply_addrs: usize,
    pub(crate) jostle_max: Duration,
    pub(crate) max_activation: u32,
    pub(crate) max_subsub_depth: usize,
    pub(crate) ignore_cd: bool,
    pub(crate) need_to_validate: bool,
    pub(crate) num_modules: usize,

    pub(crate) stats: MeshStats,
    pub(crate) now_secs: u64,
    pub(crate) now: Instant,
    pub(crate) sender: Box<dyn OutboundSender>,
    pub(crate) cache: Option<Arc<dyn ReplyCache>>,
}

impl MeshCore {
    pub(crate) fn new(
        config: &MeshConfig,
        num_modules: usize,
        need_to_validate: bool,
        sender: Box<dyn OutboundSender>,
    ) -> Self {
        Self {
            all: BTreeMap::new(),
            run: BTreeSet::new(),
            forever: ReplyList::default(),
            jostle: ReplyList::default(),
            num_reply_addrs: 0,
            num_reply_states: 0,
            num_detached_states: 0,
            max_reply_states: config.num_queries_per_thread,
            max_forever_states: config.max_forever_states(),
            max_reply_addrs: config.max_reply_addrs(),
            jostle_max: config.jostle_timeout(),
            max_activation: config.max_activation,
            max_subsub_depth: config.max_subsub_depth,
            ignore_cd: config.ignore_cd_flag,
            need_to_validate,
            num_modules,
            stats: MeshStats::default(),
            now_secs: 0,
            now: Instant::now(),
            sender,
            cache: None,
        }
    }

    /// Creates a detached state for `key` unless one exists; true when created.
    pub(crate) fn create_if_absent(&mut self, key: &QueryKey) -> bool {
        if self.all.contains_key(key) {
            return false;
        }
        self.all
            .insert(key.clone(), MeshState::new(key, self.num_modules));
        self.num_detached_states += 1;
        true
    }

    /// Puts a state that just gained a purpose on the forever list while
    /// there is room, on the jostle list otherwise.
    pub(crate) fn add_to_list(&mut self, key: &QueryKey) {
        let (select, seq) = if self.forever.len() < self.max_forever_states {
            (ListSelect::Forever, self.forever.push_back(key.clone()))
        } else {
            (ListSelect::Jostle, self.jostle.push_back(key.clone()))
        };
        if let Some(state) = self.all.get_mut(key) {
            state.list_select = select;
            state.list_seq = seq;
        }
    }

    pub(crate) fn remove_from_list(&mut self, state: &mut MeshState) {
        match state.list_select {
            ListSelect::Forever => {
                self.forever.remove(state.list_seq);
            }
            ListSelect::Jostle => {
                self.jostle.remove(state.list_seq);
            }
            ListSelect::None => {}
        }
        state.list_select = ListSelect::None;
    }

    /// True when `running` waiting on `dep` would close a loop in the
    /// dependency graph. A walk deeper than the configured bound counts
    /// as a loop.
    pub(crate) fn detect_cycle(&self, running: &QueryKey, dep: &QueryKey) -> bool {
        if running == dep {
            return true;
        }
        if !self.all.contains_key(dep) {
            return false;
        }
        let mut visited = 0;
        let found = self.find_in_subsub(dep, running, &mut visited);
        if found && visited > self.max_subsub_depth {
            debug!(query = %running, dependency = %dep, "Dependency walk too deep, treated as cycle");
        }
        found
    }

    fn find_in_subsub(&self, from: &QueryKey, target: &QueryKey, visited: &mut usize) -> bool {
        *visited += 1;
        if *visited > self.max_subsub_depth + 1 {
            return true;
        }
        let Some(state) = self.all.get(from) else {
            return false;
        };
        state
            .sub_set
            .iter()
            .any(|sub| sub == target || self.find_in_subsub(sub, target, visited))
    }

    /// Makes `super_key` depend on `sub_key`, creating the sub-state if
    /// needed. `super_subs` is the sub-set of the super-state, which may be
    /// out of the table while its module runs. Returns true when the
    /// sub-state was created; new sub-states are runnable.
    pub(crate) fn attach_edge(
        &mut self,
        super_key: &QueryKey,
        super_subs: &mut KeySet,
        sub_key: &QueryKey,
    ) -> Result<bool, DomainError> {
        if self.detect_cycle(super_key, sub_key) {
            debug!(query = %super_key, dependency = %sub_key, "Attach failed, cycle detected");
            return Err(DomainError::DependencyCycle(format!(
                "{} -> {}",
                super_key, sub_key
            )));
        }
        let created = self.create_if_absent(sub_key);
        if created {
            self.run.insert(sub_key.clone());
        }
        let Some(sub) = self.all.get_mut(sub_key) else {
            return Err(DomainError::StateNotFound(sub_key.to_string()));
        };
        let was_detached = sub.is_detached();
        if sub.super_set.insert(super_key.clone()) {
            super_subs.insert(sub_key.clone());
            if was_detached {
                self.num_detached_states = self.num_detached_states.saturating_sub(1);
            }
        }
        Ok(created)
    }

    /// Answers every waiter of a finished state exactly once.
    pub(crate) fn query_done(&mut self, key: &QueryKey, state: &mut MeshState) {
        let rep = state.qstate.return_msg.as_ref().map(|m| Arc::clone(&m.rep));
        let return_rcode = state.qstate.return_rcode;
        let qinfo = &state.qstate.qinfo;

        for reply in state.reply_list.iter_mut() {
            let mut rcode = return_rcode;
            let checks_dnssec = reply.query_flags & header::CD == 0 || self.ignore_cd;
            if let Some(rep) = &rep {
                if self.need_to_validate && checks_dnssec && rep.security <= SecurityStatus::Bogus {
                    rcode = Rcode::ServFail;
                    self.stats.ans_bogus += 1;
                }
            }
            if rep.is_none() && rcode == Rcode::NoError {
                rcode = Rcode::ServFail;
            }
            let secure = rep
                .as_ref()
                .is_some_and(|r| r.security == SecurityStatus::Secure);
            let answer_rep = if rcode == Rcode::NoError { rep.clone() } else { None };
            let nodata = answer_rep.as_ref().is_some_and(|r| r.an_numrrsets == 0);

            reply.channel.send_answer(ClientAnswer {
                query_id: reply.query_id,
                query_flags: reply.query_flags,
                qname: reply.qname.clone(),
                qtype: qinfo.qtype,
                qclass: qinfo.qclass,
                rcode,
                reply: answer_rep,
                secure: secure && rcode == Rcode::NoError,
                edns: reply.edns,
            });
            self.num_reply_addrs = self.num_reply_addrs.saturating_sub(1);
            let waited = self.now.saturating_duration_since(reply.start);
            debug!(query = %key, ?waited, %rcode, "Query answered");
            self.stats.record_reply(waited, rcode, secure, nodata);
        }
        state.replies_sent = true;

        for cb in state.cb_list.iter_mut() {
            let Some(callback) = cb.callback.take() else {
                continue;
            };
            let mut rcode = return_rcode;
            let mut reason = None;
            if rep.is_none() && rcode == Rcode::NoError {
                rcode = Rcode::ServFail;
            }
            if let Some(rep) = rep.as_ref().filter(|_| rcode == Rcode::NoError) {
                if rep.security == SecurityStatus::Bogus {
                    reason = state.qstate.errinf_text();
                    if reason.is_none() {
                        rcode = Rcode::ServFail;
                    }
                }
            }
            let outcome = match &rep {
                Some(rep) if rcode == Rcode::NoError => CallbackOutcome {
                    rcode,
                    reply: Some(Arc::clone(rep)),
                    security: rep.security,
                    reason,
                },
                _ => CallbackOutcome {
                    rcode,
                    reply: None,
                    security: SecurityStatus::Unchecked,
                    reason: None,
                },
            };
            callback(outcome);
            self.num_reply_addrs = self.num_reply_addrs.saturating_sub(1);
        }
    }

    /// Gives up on waiters that were never answered.
    pub(crate) fn drop_waiters(&mut self, state: &mut MeshState) {
        if state.replies_sent {
            return;
        }
        for reply in state.reply_list.iter_mut() {
            reply.channel.drop_query();
            self.num_reply_addrs = self.num_reply_addrs.saturating_sub(1);
        }
        for cb in state.cb_list.iter_mut() {
            if let Some(callback) = cb.callback.take() {
                callback(CallbackOutcome {
                    rcode: Rcode::ServFail,
                    reply: None,
                    security: SecurityStatus::Unchecked,
                    reason: None,
                });
            }
            self.num_reply_addrs = self.num_reply_addrs.saturating_sub(1);
        }
    }

    /// Unlinks a state already taken out of the table from the graph, the
    /// lists and the counters.
    pub(crate) fn unlink(&mut self, key: &QueryKey, state: &mut MeshState) {
        for sub_key in state.sub_set.take().iter() {
            if let Some(sub) = self.all.get_mut(sub_key) {
                sub.super_set.remove(key);
                if sub.is_detached() {
                    self.num_detached_states += 1;
                }
            }
        }
        self.remove_from_list(state);
        if state.is_detached() {
            self.num_detached_states = self.num_detached_states.saturating_sub(1);
        }
        if state.has_waiters() {
            self.num_reply_states = self.num_reply_states.saturating_sub(1);
        }
        for super_key in state.super_set.iter() {
            if let Some(sup) = self.all.get_mut(super_key) {
                sup.sub_set.remove(key);
            }
        }
        self.run.remove(key);
    }

    pub(crate) fn stats(&self) -> MeshStats {
        MeshStats {
            num_states: self.all.len(),
            num_reply_states: self.num_reply_states,
            num_detached_states: self.num_detached_states,
            num_reply_addrs: self.num_reply_addrs,
            ..self.stats.clone()
        }
    }
}

use super::table::MeshCore;
use super::env::MeshEnv;
use super::state::{ListSelect, MeshCb, MeshReply, MeshState};
use super::stats::MeshStats;
use meshdns_application::{
    ClientQuery, MeshCallback, ModuleEvent, ModuleExtState, ModuleQState, NetEvent,
    OutboundEntry, OutboundSender, ReplyCache, ReplyChannel, ResolutionModule,
};
use meshdns_domain::{
    DomainError, EdnsData, MeshConfig, QueryFlags, QueryInfo, QueryKey, Rcode,
};
use std::mem::size_of;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// What happened to a query handed to the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A new state was created and run.
    Created,
    /// Joined an existing state for the same key.
    Attached,
    /// No room; the client was dropped.
    Dropped,
}

/// One worker's table of in-flight queries and their dependencies.
///
/// Not shared between threads: every worker owns its own mesh and drives
/// it from its event loop, passing in the current time with
/// [`MeshArea::set_now`].
pub struct MeshArea {
    modules: Vec<Box<dyn ResolutionModule>>,
    core: MeshCore,
}

impl MeshArea {
    /// Initialises the module stack; a module that fails to start fails
    /// the construction and the modules already started are shut down.
    pub fn new(
        mut modules: Vec<Box<dyn ResolutionModule>>,
        config: &MeshConfig,
        sender: Box<dyn OutboundSender>,
    ) -> Result<Self, DomainError> {
        if modules.is_empty() {
            return Err(DomainError::NoModules);
        }
        for id in 0..modules.len() {
            if let Err(e) = modules[id].init(id) {
                let module = modules[id].name().to_string();
                for (started, m) in modules.iter_mut().enumerate().take(id) {
                    m.deinit(started);
                }
                return Err(DomainError::ModuleInit {
                    module,
                    reason: e.to_string(),
                });
            }
        }

        let need_to_validate = modules.iter().any(|m| m.validates());
        let core = MeshCore::new(config, modules.len(), need_to_validate, sender);
        info!(
            modules = ?modules.iter().map(|m| m.name()).collect::<Vec<_>>(),
            max_reply_states = core.max_reply_states,
            max_forever_states = core.max_forever_states,
            jostle_ms = core.jostle_max.as_millis() as u64,
            need_to_validate,
            "Mesh created"
        );
        Ok(Self { modules, core })
    }

    /// Answer cache modules reach through their environment.
    pub fn set_cache(&mut self, cache: Arc<dyn ReplyCache>) {
        self.core.cache = Some(cache);
    }

    pub fn set_now(&mut self, secs: u64, now: Instant) {
        self.core.now_secs = secs;
        self.core.now = now;
    }

    pub fn now_secs(&self) -> u64 {
        self.core.now_secs
    }

    /// True when a module of the stack validates DNSSEC.
    pub fn need_to_validate(&self) -> bool {
        self.core.need_to_validate
    }

    /// The state for `key`, created detached and runnable when missing.
    /// The flag tells whether it was created.
    pub fn find_or_create(&mut self, key: &QueryKey) -> (&mut ModuleQState, bool) {
        let created = self.core.create_if_absent(key);
        if created {
            self.core.run.insert(key.clone());
        }
        let num_modules = self.core.num_modules;
        let state = self
            .core
            .all
            .entry(key.clone())
            .or_insert_with(|| MeshState::new(key, num_modules));
        (&mut state.qstate, created)
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.core.all.contains_key(key)
    }

    pub fn qstate(&self, key: &QueryKey) -> Option<&ModuleQState> {
        self.core.all.get(key).map(|s| &s.qstate)
    }

    /// Makes the state `super_key` wait on a sub-query. Returns true when
    /// the sub-state was created; it is runnable and starts with the next
    /// [`MeshArea::run_pending`].
    pub fn attach_sub(
        &mut self,
        super_key: &QueryKey,
        qinfo: &QueryInfo,
        flags: QueryFlags,
        is_priming: bool,
        is_valrec: bool,
    ) -> Result<bool, DomainError> {
        let sub_key = QueryKey::new(qinfo.clone(), flags, is_priming, is_valrec);
        let Some(mut state) = self.core.all.remove(super_key) else {
            return Err(DomainError::StateNotFound(super_key.to_string()));
        };
        let result = self
            .core
            .attach_edge(super_key, &mut state.sub_set, &sub_key);
        self.core.all.insert(super_key.clone(), state);
        result
    }

    /// A client query arrives.
    pub fn new_client(&mut self, query: ClientQuery, mut channel: Box<dyn ReplyChannel>) -> Admission {
        let key = query.key();
        let needs_list = self
            .core
            .all
            .get(&key)
            .map_or(true, |s| s.list_select == ListSelect::None);
        if needs_list {
            if !self.make_room() {
                debug!(query = %key, "Too many queries, dropping incoming query");
                self.core.stats.dropped += 1;
                channel.drop_query();
                return Admission::Dropped;
            }
        } else if self.core.num_reply_addrs > self.core.max_reply_addrs {
            debug!(query = %key, "Too many requests queued, dropping incoming query");
            self.core.stats.dropped += 1;
            channel.drop_query();
            return Admission::Dropped;
        }

        let created = self.core.create_if_absent(&key);
        let start = self.core.now;
        let Some(state) = self.core.all.get_mut(&key) else {
            return Admission::Dropped;
        };
        let was_detached = state.is_detached();
        let was_noreply = !state.has_waiters();
        state.add_reply(MeshReply {
            channel,
            query_id: query.query_id,
            query_flags: query.flags,
            edns: query.edns,
            qname: query.qinfo.qname,
            start,
        });
        let needs_list = state.list_select == ListSelect::None;
        self.note_new_waiter(was_detached, was_noreply);
        if needs_list {
            self.core.add_to_list(&key);
        }

        if created {
            self.run(&key, ModuleEvent::New, None);
            Admission::Created
        } else {
            Admission::Attached
        }
    }

    /// A query from inside the process; `callback` receives the result.
    /// Not subject to admission control.
    pub fn new_callback(
        &mut self,
        qinfo: QueryInfo,
        flags: u16,
        edns: EdnsData,
        query_id: u16,
        callback: MeshCallback,
    ) -> Admission {
        let key = QueryKey::client(qinfo, QueryFlags::from_header(flags));
        let created = self.core.create_if_absent(&key);
        let Some(state) = self.core.all.get_mut(&key) else {
            return Admission::Dropped;
        };
        let was_detached = state.is_detached();
        let was_noreply = !state.has_waiters();
        state.add_callback(MeshCb {
            callback: Some(callback),
            query_id,
            query_flags: flags,
            edns,
        });
        self.note_new_waiter(was_detached, was_noreply);

        if created {
            self.run(&key, ModuleEvent::New, None);
            Admission::Created
        } else {
            Admission::Attached
        }
    }

    /// Refreshes an answer that is about to expire. Nobody waits for the
    /// result; the modules store it in the cache.
    pub fn new_prefetch(&mut self, qinfo: QueryInfo, flags: QueryFlags, leeway: u64) -> Admission {
        let key = QueryKey::client(qinfo, flags);
        if let Some(state) = self.core.all.get_mut(&key) {
            state.qstate.bypass_cache = true;
            if state.qstate.prefetch_leeway < leeway {
                state.qstate.prefetch_leeway = leeway;
            }
            return Admission::Attached;
        }
        if !self.make_room() {
            debug!(query = %key, "Too many queries, dropped prefetch");
            self.core.stats.dropped += 1;
            return Admission::Dropped;
        }
        self.core.create_if_absent(&key);
        if let Some(state) = self.core.all.get_mut(&key) {
            state.qstate.bypass_cache = true;
            state.qstate.prefetch_leeway = leeway;
        }
        self.core.add_to_list(&key);
        trace!(query = %key, leeway, "Prefetch started");
        self.run(&key, ModuleEvent::New, None);
        Admission::Created
    }

    fn note_new_waiter(&mut self, was_detached: bool, was_noreply: bool) {
        if was_detached {
            self.core.num_detached_states = self.core.num_detached_states.saturating_sub(1);
        }
        if was_noreply {
            self.core.num_reply_states += 1;
        }
        self.core.num_reply_addrs += 1;
    }

    /// Frees a reply slot when all are taken by jostling out the oldest
    /// jostle-list state, provided it has waited longer than the jostle
    /// timeout. False when there is no room.
    fn make_room(&mut self) -> bool {
        if self.core.num_reply_states < self.core.max_reply_states {
            return true;
        }
        let Some(key) = self.core.jostle.first().cloned() else {
            return false;
        };
        let Some(state) = self.core.all.get(&key) else {
            return false;
        };
        if state.list_select != ListSelect::Jostle {
            return false;
        }
        let Some(start) = state.newest_reply_start() else {
            return false;
        };
        let age = self.core.now.saturating_duration_since(start);
        if age <= self.core.jostle_max {
            return false;
        }
        debug!(query = %key, ?age, "Query jostled out to make space for a new one");
        self.jostle_out(&key);
        true
    }

    fn jostle_out(&mut self, key: &QueryKey) {
        let Some(mut state) = self.core.all.remove(key) else {
            return;
        };
        state.qstate.return_msg = None;
        state.qstate.return_rcode = Rcode::ServFail;
        self.core.stats.jostled += 1;
        self.core.query_done(key, &mut state);
        self.walk_supers(&state);
        self.delete_removed(key, state);
    }

    /// An outbound query completed.
    pub fn report_reply(&mut self, entry: OutboundEntry, event: NetEvent) {
        let Some(state) = self.core.all.get_mut(&entry.key) else {
            debug!(query = %entry.key, "Outbound result for a query no longer in the mesh");
            return;
        };
        let event = match event {
            NetEvent::Reply(reply) => {
                state.qstate.reply = Some(reply);
                ModuleEvent::Reply
            }
            NetEvent::Timeout | NetEvent::Closed => ModuleEvent::NoReply,
            NetEvent::CapsFail => ModuleEvent::CapsFail,
        };
        let key = entry.key.clone();
        self.run(&key, event, Some(entry));
    }

    /// Runs `key` with `event`, then every state that became runnable,
    /// until nothing is left to do.
    pub fn run(&mut self, key: &QueryKey, event: ModuleEvent, outbound: Option<OutboundEntry>) {
        self.core.run.remove(key);
        self.run_state(key, event, outbound);
        self.run_pending();
    }

    /// Runs every runnable state.
    pub fn run_pending(&mut self) {
        while let Some(key) = self.core.run.pop_first() {
            let event = match self.core.all.get(&key) {
                Some(state) if state.num_activated == 0 => ModuleEvent::New,
                Some(_) => ModuleEvent::Pass,
                None => continue,
            };
            self.run_state(&key, event, None);
        }
        if tracing::enabled!(tracing::Level::TRACE) {
            self.log_list();
        }
    }

    fn run_state(&mut self, key: &QueryKey, mut event: ModuleEvent, mut outbound: Option<OutboundEntry>) {
        while let Some(next) = self.activate(key, event, outbound.take()) {
            event = next;
        }
    }

    /// One module activation. Returns the event for the next activation
    /// of the same state, `None` when the state blocked or is gone.
    fn activate(
        &mut self,
        key: &QueryKey,
        event: ModuleEvent,
        outbound: Option<OutboundEntry>,
    ) -> Option<ModuleEvent> {
        let mut state = self.core.all.remove(key)?;
        let curmod = state.qstate.curmod;
        let Some(module) = self.modules.get_mut(curmod) else {
            self.core.all.insert(key.clone(), state);
            return None;
        };
        let failed_sends = {
            let mut env = MeshEnv::new(&mut self.core, key, &mut state.sub_set);
            module.operate(&mut state.qstate, event, curmod, outbound, &mut env);
            env.failed_sends
        };
        let name = module.name();
        state.qstate.reply = None;
        let ext = state
            .qstate
            .ext_state
            .get(curmod)
            .copied()
            .unwrap_or(ModuleExtState::Error);
        trace!(query = %key, module = name, ?event, ?ext, "Module exit state");
        self.core.all.insert(key.clone(), state);

        let next = self.continue_state(key, ext);
        if next.is_none()
            && ext == ModuleExtState::WaitReply
            && failed_sends > 0
            && self.core.all.contains_key(key)
        {
            return Some(ModuleEvent::NoReply);
        }
        next
    }

    /// Moves control between modules after an activation.
    fn continue_state(&mut self, key: &QueryKey, mut ext: ModuleExtState) -> Option<ModuleEvent> {
        let num_modules = self.modules.len();
        let state = self.core.all.get_mut(key)?;
        state.num_activated += 1;
        if state.num_activated > self.core.max_activation {
            warn!(query = %key, activations = state.num_activated, "Looping module stopped");
            ext = ModuleExtState::Error;
        }

        match ext {
            ModuleExtState::WaitModule | ModuleExtState::RestartNext => {
                let next = state.qstate.curmod + 1;
                if next >= num_modules {
                    warn!(query = %key, "Cannot pass to next module, at last module");
                    ext = ModuleExtState::Error;
                } else {
                    state.qstate.curmod = next;
                    if ext == ModuleExtState::RestartNext {
                        if let Some(module) = self.modules.get_mut(next) {
                            module.clear(&mut state.qstate, next);
                        }
                        state.qstate.clear_module_data(next);
                    }
                    return Some(ModuleEvent::Pass);
                }
            }
            ModuleExtState::WaitSubquery if state.sub_set.is_empty() => {
                warn!(query = %key, "Module waits for sub-queries but has none");
                ext = ModuleExtState::Error;
            }
            _ => {}
        }

        if ext == ModuleExtState::Error && state.qstate.return_rcode == Rcode::NoError {
            state.qstate.return_rcode = Rcode::ServFail;
        }
        match ext {
            ModuleExtState::Error | ModuleExtState::Finished => {
                if state.qstate.curmod == 0 {
                    if ext == ModuleExtState::Error {
                        debug!(query = %key, rcode = %state.qstate.return_rcode, "Query failed");
                    }
                    self.finish(key);
                    return None;
                }
                state.qstate.curmod -= 1;
                Some(if ext == ModuleExtState::Error {
                    ModuleEvent::Error
                } else {
                    ModuleEvent::ModDone
                })
            }
            _ => None,
        }
    }

    /// Answers the waiters, wakes the super-states and deletes the state.
    fn finish(&mut self, key: &QueryKey) {
        let Some(mut state) = self.core.all.remove(key) else {
            return;
        };
        self.core.query_done(key, &mut state);
        self.walk_supers(&state);
        self.delete_removed(key, state);
    }

    fn walk_supers(&mut self, state: &MeshState) {
        let core = &mut self.core;
        for super_key in state.super_set.iter() {
            let Some(sup) = core.all.get_mut(super_key) else {
                continue;
            };
            core.run.insert(super_key.clone());
            let id = sup.qstate.curmod;
            if let Some(module) = self.modules.get_mut(id) {
                module.inform_super(&state.qstate, id, &mut sup.qstate);
            }
        }
    }

    fn delete_removed(&mut self, key: &QueryKey, mut state: MeshState) {
        self.core.unlink(key, &mut state);
        self.cleanup(&mut state);
    }

    fn cleanup(&mut self, state: &mut MeshState) {
        self.core.drop_waiters(state);
        for (id, module) in self.modules.iter_mut().enumerate() {
            module.clear(&mut state.qstate, id);
            state.qstate.clear_module_data(id);
            if let Some(ext) = state.qstate.ext_state.get_mut(id) {
                *ext = ModuleExtState::Finished;
            }
        }
    }

    /// Tears down every state: unanswered clients are dropped and pending
    /// callbacks fail.
    pub fn delete_all(&mut self) {
        self.core.stats.dropped += self.core.num_reply_addrs as u64;
        let all = std::mem::take(&mut self.core.all);
        for (_, mut state) in all {
            self.cleanup(&mut state);
        }
        self.core.run.clear();
        self.core.forever.clear();
        self.core.jostle.clear();
        self.core.num_reply_addrs = 0;
        self.core.num_reply_states = 0;
        self.core.num_detached_states = 0;
    }

    pub fn stats(&self) -> MeshStats {
        self.core.stats()
    }

    pub fn clear_stats(&mut self) {
        self.core.stats.clear();
    }

    pub fn log_stats(&self, label: &str) {
        let stats = self.stats();
        info!(
            label,
            states = stats.num_states,
            reply_states = stats.num_reply_states,
            detached = stats.num_detached_states,
            waiting_replies = stats.num_reply_addrs,
            replies_sent = stats.replies_sent,
            dropped = stats.dropped,
            jostled = stats.jostled,
            average_wait = ?stats.average_wait(),
            max_wait = ?stats.replies_max_wait,
            "Mesh statistics"
        );
    }

    pub fn log_list(&self) {
        for (num, (key, state)) in self.core.all.iter().enumerate() {
            debug!(num, query = %key.qinfo, flags = %state, "Mesh state");
        }
    }

    pub fn get_mem(&self) -> usize {
        let states: usize = self
            .core
            .all
            .iter()
            .map(|(k, s)| size_of::<QueryKey>() + k.qinfo.qname.as_str().len() + s.mem_size())
            .sum();
        let modules: usize = self
            .modules
            .iter()
            .enumerate()
            .map(|(id, m)| m.get_mem(id))
            .sum();
        size_of::<Self>() + states + modules
    }

    pub fn state_count(&self) -> usize {
        self.core.all.len()
    }

    pub fn reply_state_count(&self) -> usize {
        self.core.num_reply_states
    }

    pub fn detached_state_count(&self) -> usize {
        self.core.num_detached_states
    }

    pub fn reply_addr_count(&self) -> usize {
        self.core.num_reply_addrs
    }

    pub fn runnable_count(&self) -> usize {
        self.core.run.len()
    }

    pub fn forever_count(&self) -> usize {
        self.core.forever.len()
    }

    pub fn jostle_count(&self) -> usize {
        self.core.jostle.len()
    }
}

impl Drop for MeshArea {
    fn drop(&mut self) {
        self.delete_all();
        for (id, module) in self.modules.iter_mut().enumerate() {
            module.deinit(id);
        }
    }
}

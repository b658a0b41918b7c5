use super::table::MeshCore;
use super::state::KeySet;
use meshdns_application::{ModuleEnv, ModuleQState, OutboundEntry, OutboundQuery, ReplyCache};
use meshdns_domain::{DomainError, QueryFlags, QueryInfo, QueryKey};
use tracing::debug;

/// What a module sees of the mesh while it operates on one state.
///
/// The running state is out of the state table for the duration of the
/// call; its sub-set is borrowed separately so new edges land on it.
pub(crate) struct MeshEnv<'a> {
    core: &'a mut MeshCore,
    key: &'a QueryKey,
    sub_set: &'a mut KeySet,
    pub(crate) failed_sends: usize,
}

impl<'a> MeshEnv<'a> {
    pub(crate) fn new(core: &'a mut MeshCore, key: &'a QueryKey, sub_set: &'a mut KeySet) -> Self {
        Self {
            core,
            key,
            sub_set,
            failed_sends: 0,
        }
    }
}

impl ModuleEnv for MeshEnv<'_> {
    fn now(&self) -> u64 {
        self.core.now_secs
    }

    fn need_to_validate(&self) -> bool {
        self.core.need_to_validate
    }

    fn cache(&self) -> Option<&dyn ReplyCache> {
        self.core.cache.as_deref()
    }

    fn attach_sub(
        &mut self,
        qinfo: &QueryInfo,
        flags: QueryFlags,
        is_priming: bool,
        is_valrec: bool,
    ) -> Result<Option<&mut ModuleQState>, DomainError> {
        let sub_key = QueryKey::new(qinfo.clone(), flags, is_priming, is_valrec);
        let created = self.core.attach_edge(self.key, self.sub_set, &sub_key)?;
        if !created {
            return Ok(None);
        }
        Ok(self.core.all.get_mut(&sub_key).map(|sub| &mut sub.qstate))
    }

    fn detect_cycle(
        &self,
        qinfo: &QueryInfo,
        flags: QueryFlags,
        is_priming: bool,
        is_valrec: bool,
    ) -> bool {
        let dep = QueryKey::new(qinfo.clone(), flags, is_priming, is_valrec);
        self.core.detect_cycle(self.key, &dep)
    }

    fn send_query(&mut self, query: &OutboundQuery) -> Option<OutboundEntry> {
        match self.core.sender.send_query(query, self.key) {
            Some(handle) => Some(OutboundEntry {
                key: self.key.clone(),
                handle,
            }),
            None => {
                debug!(query = %self.key, dest = %query.dest, "Outbound query could not be sent");
                self.failed_sends += 1;
                None
            }
        }
    }
}

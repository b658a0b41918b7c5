use meshdns_application::{MeshCallback, ModuleQState, ReplyChannel};
use meshdns_domain::{DomainName, EdnsData, QueryKey};
use smallvec::SmallVec;
use std::fmt;
use std::time::Instant;

/// Sorted set of query keys; the edges of the dependency graph.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: SmallVec<[QueryKey; 4]>,
}

impl KeySet {
    /// Returns false when the key was already present.
    pub fn insert(&mut self, key: QueryKey) -> bool {
        match self.keys.binary_search(&key) {
            Ok(_) => false,
            Err(pos) => {
                self.keys.insert(pos, key);
                true
            }
        }
    }

    pub fn remove(&mut self, key: &QueryKey) -> bool {
        match self.keys.binary_search(key) {
            Ok(pos) => {
                self.keys.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn take(&mut self) -> KeySet {
        std::mem::take(self)
    }
}

/// A client waiting for the answer of a mesh state.
pub struct MeshReply {
    pub channel: Box<dyn ReplyChannel>,
    pub query_id: u16,
    pub query_flags: u16,
    pub edns: EdnsData,
    /// Query name in the client's spelling.
    pub qname: DomainName,
    pub start: Instant,
}

/// A programmatic waiter.
pub struct MeshCb {
    /// Taken when the callback runs.
    pub callback: Option<MeshCallback>,
    pub query_id: u16,
    pub query_flags: u16,
    pub edns: EdnsData,
}

/// Admission list a reply-bearing state sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSelect {
    #[default]
    None,
    Forever,
    Jostle,
}

/// One deduplicated resolution effort.
pub struct MeshState {
    pub qstate: ModuleQState,
    /// States waiting on this one.
    pub super_set: KeySet,
    /// States this one waits on.
    pub sub_set: KeySet,
    /// Newest first.
    pub reply_list: Vec<MeshReply>,
    pub cb_list: Vec<MeshCb>,
    pub list_select: ListSelect,
    /// Position on the forever or jostle list.
    pub list_seq: u64,
    pub replies_sent: bool,
    pub num_activated: u32,
}

impl MeshState {
    pub fn new(key: &QueryKey, num_modules: usize) -> Self {
        Self {
            qstate: ModuleQState::new(key, num_modules),
            super_set: KeySet::default(),
            sub_set: KeySet::default(),
            reply_list: Vec::new(),
            cb_list: Vec::new(),
            list_select: ListSelect::None,
            list_seq: 0,
            replies_sent: false,
            num_activated: 0,
        }
    }

    /// Someone outside the mesh waits for this state.
    pub fn has_waiters(&self) -> bool {
        !self.reply_list.is_empty() || !self.cb_list.is_empty()
    }

    /// Nobody waits for this state at all.
    pub fn is_detached(&self) -> bool {
        !self.has_waiters() && self.super_set.is_empty()
    }

    /// Start time of the most recently added client reply.
    pub fn newest_reply_start(&self) -> Option<Instant> {
        self.reply_list.first().map(|r| r.start)
    }

    pub(crate) fn add_reply(&mut self, reply: MeshReply) {
        self.reply_list.insert(0, reply);
    }

    pub(crate) fn add_callback(&mut self, cb: MeshCb) {
        self.cb_list.insert(0, cb);
    }

    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>()
            + (self.super_set.len() + self.sub_set.len()) * std::mem::size_of::<QueryKey>()
            + self.reply_list.len() * std::mem::size_of::<MeshReply>()
            + self.cb_list.len() * std::mem::size_of::<MeshCb>()
    }
}

impl fmt::Display for MeshState {
    /// Flags as in the mesh list dump: p priming, v validation recursion,
    /// d detached, c has children, then the module and waiter kinds.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = &self.qstate;
        write!(
            f,
            "{}{}{}{}{}{} mod{} {}{}",
            if q.is_priming { "p" } else { "" },
            if q.is_valrec { "v" } else { "" },
            if q.query_flags.rd { "RD" } else { "" },
            if q.query_flags.cd { "CD" } else { "" },
            if self.super_set.is_empty() { "d" } else { "" },
            if self.sub_set.is_empty() { "" } else { "c" },
            q.curmod,
            if self.reply_list.is_empty() { "" } else { "rep" },
            if self.cb_list.is_empty() { "" } else { "cb" },
        )
    }
}

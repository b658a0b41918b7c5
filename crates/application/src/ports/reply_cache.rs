use meshdns_domain::{QueryKey, ReplyInfo};

/// Answer cache shared by all workers, as seen by resolution modules.
pub trait ReplyCache: Send + Sync {
    /// Stores an answer and its RRsets; referrals store only the RRsets.
    /// Returns whether a cached answer was published.
    fn store_reply(
        &self,
        key: &QueryKey,
        reply: &ReplyInfo,
        leeway: u64,
        is_referral: bool,
        now: u64,
    ) -> bool;

    /// A cached answer with TTLs relative to `now`, or `None` when it is
    /// missing, expired or refers to RRsets that changed since.
    fn lookup_reply(&self, key: &QueryKey, now: u64) -> Option<ReplyInfo>;
}

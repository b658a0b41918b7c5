use meshdns_domain::Rcode;
use std::time::Duration;

/// Counters of one worker's mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeshStats {
    pub replies_sent: u64,
    pub replies_sum_wait: Duration,
    pub replies_max_wait: Duration,
    /// States forced out to make room.
    pub jostled: u64,
    /// Queries refused for lack of room, or pending when the mesh was torn down.
    pub dropped: u64,
    pub ans_secure: u64,
    pub ans_bogus: u64,
    /// NOERROR answers without answer records.
    pub ans_nodata: u64,
    pub ans_rcode: [u64; 16],

    pub num_states: usize,
    pub num_reply_states: usize,
    pub num_detached_states: usize,
    pub num_reply_addrs: usize,
}

impl MeshStats {
    pub(crate) fn record_reply(&mut self, waited: Duration, rcode: Rcode, secure: bool, nodata: bool) {
        self.replies_sent += 1;
        self.replies_sum_wait += waited;
        if waited > self.replies_max_wait {
            self.replies_max_wait = waited;
        }
        self.ans_rcode[usize::from(rcode.as_u8() & 0x0f)] += 1;
        if secure {
            self.ans_secure += 1;
        }
        if nodata {
            self.ans_nodata += 1;
        }
    }

    pub fn average_wait(&self) -> Option<Duration> {
        if self.replies_sent == 0 {
            return None;
        }
        let sent = u32::try_from(self.replies_sent).unwrap_or(u32::MAX);
        Some(self.replies_sum_wait / sent)
    }

    /// Clears the counters, keeping the gauges.
    pub fn clear(&mut self) {
        *self = Self {
            num_states: self.num_states,
            num_reply_states: self.num_reply_states,
            num_detached_states: self.num_detached_states,
            num_reply_addrs: self.num_reply_addrs,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_accounting() {
        let mut stats = MeshStats::default();
        assert!(stats.average_wait().is_none());
        stats.record_reply(Duration::from_millis(10), Rcode::NoError, true, false);
        stats.record_reply(Duration::from_millis(30), Rcode::ServFail, false, false);
        assert_eq!(stats.replies_sent, 2);
        assert_eq!(stats.average_wait(), Some(Duration::from_millis(20)));
        assert_eq!(stats.replies_max_wait, Duration::from_millis(30));
        assert_eq!(stats.ans_rcode[0], 1);
        assert_eq!(stats.ans_rcode[2], 1);
        assert_eq!(stats.ans_secure, 1);
    }

    #[test]
    fn test_clear_keeps_gauges() {
        let mut stats = MeshStats {
            replies_sent: 5,
            num_states: 3,
            ..MeshStats::default()
        };
        stats.clear();
        assert_eq!(stats.replies_sent, 0);
        assert_eq!(stats.num_states, 3);
    }
}

//! Per (server address, zone) knowledge: round-trip estimates, timeout
//! history, lameness and EDNS support.

use super::metrics::CacheMetrics;
use super::rtt::{RttInfo, RTT_MAX_TIMEOUT};
use super::slab::{SlabKey, SlabTable, SlabValue, ENTRY_OVERHEAD};
use meshdns_domain::{DomainName, InfraConfig, RecordType};
use std::mem::size_of;
use std::net::SocketAddr;
use tracing::{debug, trace};

/// Timeout at which a server counts as unusable; its backoff survives
/// expiry of the host entry.
pub const USEFUL_SERVER_TOP_TIMEOUT: i32 = 120_000;

/// Average label bytes assumed when sizing the table.
const ZONE_NAME_ESTIMATE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InfraKey {
    pub addr: SocketAddr,
    pub zone: DomainName,
}

impl InfraKey {
    pub fn new(addr: SocketAddr, zone: DomainName) -> Self {
        Self { addr, zone }
    }
}

impl SlabKey for InfraKey {
    fn mem_size(&self) -> usize {
        size_of::<Self>() + self.zone.as_str().len()
    }
}

#[derive(Debug, Clone)]
pub struct InfraData {
    /// Absolute expiry in seconds.
    ttl: u64,
    rtt: RttInfo,
    edns_version: i32,
    edns_lame_known: bool,
    /// Until this time only one probe at a time goes to the server.
    probedelay: u64,
    is_dnssec_lame: bool,
    rec_lame: bool,
    lame_type_a: bool,
    lame_other: bool,
    timeout_a: u8,
    timeout_aaaa: u8,
    timeout_other: u8,
}

impl InfraData {
    fn new(now: u64, host_ttl: u64) -> Self {
        Self {
            ttl: now + host_ttl,
            rtt: RttInfo::new(),
            edns_version: 0,
            edns_lame_known: false,
            probedelay: 0,
            is_dnssec_lame: false,
            rec_lame: false,
            lame_type_a: false,
            lame_other: false,
            timeout_a: 0,
            timeout_aaaa: 0,
            timeout_other: 0,
        }
    }

    fn is_expired(&self, now: u64) -> bool {
        self.ttl < now
    }

    fn timeout_counter(&mut self, qtype: RecordType) -> &mut u8 {
        match qtype {
            RecordType::A => &mut self.timeout_a,
            RecordType::AAAA => &mut self.timeout_aaaa,
            _ => &mut self.timeout_other,
        }
    }
}

impl SlabValue for InfraData {
    fn mem_size(&self) -> usize {
        size_of::<Self>()
    }
}

/// Result of [`InfraCache::lookup_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo {
    pub edns_version: i32,
    pub edns_lame_known: bool,
    pub timeout_ms: i32,
}

/// Result of [`InfraCache::get_lame_rtt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LameRtt {
    pub lame: bool,
    pub dnssec_lame: bool,
    pub rec_lame: bool,
    pub rtt_ms: i32,
}

/// Snapshot returned by [`InfraCache::get_host_rto`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRto {
    /// Seconds until the entry expires, `None` once it has.
    pub ttl_remaining: Option<u64>,
    pub rtt: RttInfo,
    /// Seconds left in the probe window, 0 when not probing.
    pub probe_delay: u64,
    pub timeout_a: u8,
    pub timeout_aaaa: u8,
    pub timeout_other: u8,
}

/// Outcome of one upstream exchange fed to [`InfraCache::rtt_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RttSample {
    /// Reply received after this many milliseconds.
    Reply(i32),
    /// No reply; `orig_rto` is the timeout the query was sent with.
    Timeout { orig_rto: i32 },
}

pub struct InfraCache {
    table: SlabTable<InfraKey, InfraData>,
    host_ttl: u64,
    probe_max_rto: i32,
    timeout_count_max: u8,
}

impl InfraCache {
    pub fn new(config: &InfraConfig) -> Self {
        let entry_size = size_of::<InfraKey>()
            + ZONE_NAME_ESTIMATE
            + size_of::<InfraData>()
            + ENTRY_OVERHEAD;
        Self {
            table: SlabTable::new("infra", config.slabs, config.numhosts * entry_size),
            host_ttl: config.host_ttl,
            probe_max_rto: i32::try_from(config.probe_max_rto_ms).unwrap_or(i32::MAX),
            timeout_count_max: config.timeout_count_max,
        }
    }

    /// Runs `f` on the entry under its write lock, creating it (or
    /// resetting it when expired) first.
    fn with_entry<R>(
        &self,
        addr: SocketAddr,
        zone: &DomainName,
        now: u64,
        f: impl FnOnce(&mut InfraData) -> R,
    ) -> R {
        let key = InfraKey::new(addr, zone.clone());
        let hash = SlabTable::<InfraKey, InfraData>::hash_key(&key);
        if let Some(mut guard) = self.table.lookup(hash, &key, true) {
            if let Some(data) = guard.value_mut() {
                if data.is_expired(now) {
                    *data = InfraData::new(now, self.host_ttl);
                }
                return f(data);
            }
        }
        let mut data = InfraData::new(now, self.host_ttl);
        let out = f(&mut data);
        self.table.insert(hash, key, data);
        out
    }

    /// EDNS knowledge and the timeout to use for the next query to
    /// `addr`, creating a fresh entry for unknown servers.
    pub fn lookup_or_create(&self, addr: SocketAddr, zone: &DomainName, now: u64) -> HostInfo {
        let key = InfraKey::new(addr, zone.clone());
        let hash = SlabTable::<InfraKey, InfraData>::hash_key(&key);
        let Some(mut guard) = self.table.lookup(hash, &key, true) else {
            self.table.metrics().record_miss();
            let data = InfraData::new(now, self.host_ttl);
            let info = HostInfo {
                edns_version: data.edns_version,
                edns_lame_known: data.edns_lame_known,
                timeout_ms: data.rtt.timeout(),
            };
            self.table.insert(hash, key, data);
            return info;
        };
        self.table.metrics().record_hit();
        let Some(data) = guard.value_mut() else {
            return HostInfo {
                edns_version: 0,
                edns_lame_known: false,
                timeout_ms: RttInfo::new().timeout(),
            };
        };

        if data.is_expired(now) {
            let old_rto = data.rtt.rto;
            let counters = (data.timeout_a, data.timeout_aaaa, data.timeout_other);
            *data = InfraData::new(now, self.host_ttl);
            if old_rto >= USEFUL_SERVER_TOP_TIMEOUT {
                data.rtt.rto = USEFUL_SERVER_TOP_TIMEOUT;
                (data.timeout_a, data.timeout_aaaa, data.timeout_other) = counters;
            }
        }

        let timeout_ms = data.rtt.timeout();
        if timeout_ms >= self.probe_max_rto && data.rtt.notimeout() * 4 <= timeout_ms {
            data.probedelay = now + ((timeout_ms as u64) + 1999) / 1000;
            trace!(server = %addr, zone = %zone, probedelay = data.probedelay, "Server in probe mode");
        }
        HostInfo {
            edns_version: data.edns_version,
            edns_lame_known: data.edns_lame_known,
            timeout_ms,
        }
    }

    /// Feeds one exchange into the estimator and returns the new timeout.
    pub fn rtt_update(
        &self,
        addr: SocketAddr,
        zone: &DomainName,
        qtype: RecordType,
        sample: RttSample,
        now: u64,
    ) -> i32 {
        let timeout_count_max = self.timeout_count_max;
        let rto = self.with_entry(addr, zone, now, |data| {
            match sample {
                RttSample::Timeout { orig_rto } => {
                    data.rtt.lost(orig_rto);
                    let counter = data.timeout_counter(qtype);
                    if *counter < timeout_count_max {
                        *counter += 1;
                    }
                }
                RttSample::Reply(ms) => {
                    if data.rtt.unclamped() >= USEFUL_SERVER_TOP_TIMEOUT {
                        data.rtt = RttInfo::new();
                    }
                    data.rtt.update(ms);
                    data.probedelay = 0;
                    *data.timeout_counter(qtype) = 0;
                }
            }
            data.rtt.rto
        });
        if rto >= RTT_MAX_TIMEOUT {
            debug!(server = %addr, zone = %zone, rto, "Server timeout at ceiling");
        }
        rto.max(1)
    }

    /// Marks the server lame for the zone; without a DNSSEC or recursion
    /// flag the lameness applies to A or to all other types.
    pub fn set_lame(
        &self,
        addr: SocketAddr,
        zone: &DomainName,
        qtype: RecordType,
        dnssec_lame: bool,
        rec_lame: bool,
        now: u64,
    ) {
        self.with_entry(addr, zone, now, |data| {
            if dnssec_lame {
                data.is_dnssec_lame = true;
            }
            if rec_lame {
                data.rec_lame = true;
            }
            if !dnssec_lame && !rec_lame {
                if qtype == RecordType::A {
                    data.lame_type_a = true;
                } else {
                    data.lame_other = true;
                }
            }
        });
        debug!(server = %addr, zone = %zone, %qtype, dnssec_lame, rec_lame, "Server marked lame");
    }

    /// Records the EDNS version the server speaks, -1 for none. A server
    /// known to speak EDNS is not downgraded by a later failure.
    pub fn edns_update(&self, addr: SocketAddr, zone: &DomainName, edns_version: i32, now: u64) {
        self.with_entry(addr, zone, now, |data| {
            if !(edns_version == -1 && data.edns_version != -1 && data.edns_lame_known) {
                data.edns_version = edns_version;
                data.edns_lame_known = true;
            }
        });
    }

    /// TCP got an answer through: pull a maxed-out timeout just below the
    /// ceiling so the server is tried again.
    pub fn update_tcp_works(&self, addr: SocketAddr, zone: &DomainName) {
        let key = InfraKey::new(addr, zone.clone());
        let hash = SlabTable::<InfraKey, InfraData>::hash_key(&key);
        let Some(mut guard) = self.table.lookup(hash, &key, true) else {
            return;
        };
        if let Some(data) = guard.value_mut() {
            if data.rtt.rto >= RTT_MAX_TIMEOUT {
                data.rtt.rto = RTT_MAX_TIMEOUT - 1000;
            }
        }
    }

    /// Lameness and effective round trip for server selection, `None` when
    /// nothing useful is known.
    pub fn get_lame_rtt(
        &self,
        addr: SocketAddr,
        zone: &DomainName,
        qtype: RecordType,
        now: u64,
    ) -> Option<LameRtt> {
        let key = InfraKey::new(addr, zone.clone());
        let hash = SlabTable::<InfraKey, InfraData>::hash_key(&key);
        let Some(guard) = self.table.lookup(hash, &key, false) else {
            self.table.metrics().record_miss();
            return None;
        };
        self.table.metrics().record_hit();
        let data = guard.value();

        let mut rtt_ms = data.rtt.unclamped();
        if data.rtt.rto >= self.probe_max_rto
            && now < data.probedelay
            && data.rtt.notimeout() * 4 <= data.rtt.rto
        {
            let timeouts = match qtype {
                RecordType::A => data.timeout_a,
                RecordType::AAAA => data.timeout_aaaa,
                _ => data.timeout_other,
            };
            rtt_ms = if timeouts >= self.timeout_count_max {
                USEFUL_SERVER_TOP_TIMEOUT
            } else {
                USEFUL_SERVER_TOP_TIMEOUT - 1000
            };
        }

        if now > data.ttl {
            // Expired: only a server that was unusable keeps its backoff.
            if data.rtt.rto >= USEFUL_SERVER_TOP_TIMEOUT {
                return Some(LameRtt {
                    rtt_ms: USEFUL_SERVER_TOP_TIMEOUT - 1000,
                    ..LameRtt::default()
                });
            }
            return None;
        }

        let mut lame = LameRtt {
            rtt_ms,
            ..LameRtt::default()
        };
        if data.lame_type_a && qtype == RecordType::A {
            lame.lame = true;
        } else if data.lame_other && qtype != RecordType::A {
            lame.lame = true;
        } else if data.is_dnssec_lame {
            lame.dnssec_lame = true;
        } else if data.rec_lame {
            lame.rec_lame = true;
        }
        Some(lame)
    }

    pub fn get_host_rto(&self, addr: SocketAddr, zone: &DomainName, now: u64) -> Option<HostRto> {
        let key = InfraKey::new(addr, zone.clone());
        let hash = SlabTable::<InfraKey, InfraData>::hash_key(&key);
        let guard = self.table.lookup(hash, &key, false)?;
        let data = guard.value();
        Some(HostRto {
            ttl_remaining: (!data.is_expired(now)).then(|| data.ttl - now),
            rtt: data.rtt,
            probe_delay: data.probedelay.saturating_sub(now),
            timeout_a: data.timeout_a,
            timeout_aaaa: data.timeout_aaaa,
            timeout_other: data.timeout_other,
        })
    }

    pub fn metrics(&self) -> &CacheMetrics {
        self.table.metrics()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn mem_used(&self) -> usize {
        self.table.mem_used()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::cache::rtt::UNKNOWN_SERVER_NICENESS;

    const NOW: u64 = 50_000;

    fn cache() -> InfraCache {
        InfraCache::new(&InfraConfig::default())
    }

    fn server() -> SocketAddr {
        "192.0.2.53:53".parse().unwrap()
    }

    fn zone() -> DomainName {
        DomainName::new("example.com").unwrap()
    }

    /// Times out A queries until the timeout stops growing.
    fn back_off_fully(cache: &InfraCache) -> i32 {
        let mut rto = cache.lookup_or_create(server(), &zone(), NOW).timeout_ms;
        for _ in 0..32 {
            rto = cache.rtt_update(
                server(),
                &zone(),
                RecordType::A,
                RttSample::Timeout { orig_rto: rto },
                NOW,
            );
        }
        rto
    }

    #[test]
    fn test_unknown_server_gets_default_timeout() {
        let cache = cache();
        let info = cache.lookup_or_create(server(), &zone(), NOW);
        assert_eq!(info.timeout_ms, UNKNOWN_SERVER_NICENESS);
        assert_eq!(info.edns_version, 0);
        assert!(!info.edns_lame_known);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_backoff_reaches_ceiling() {
        let cache = cache();
        assert_eq!(back_off_fully(&cache), RTT_MAX_TIMEOUT);
    }

    #[test]
    fn test_single_reply_recovers_from_ceiling() {
        let cache = cache();
        back_off_fully(&cache);
        let rto = cache.rtt_update(server(), &zone(), RecordType::A, RttSample::Reply(50), NOW);
        assert!(rto < RTT_MAX_TIMEOUT);
        let host = cache.get_host_rto(server(), &zone(), NOW).unwrap();
        assert_eq!(host.timeout_a, 0);
        assert_eq!(host.probe_delay, 0);
    }

    #[test]
    fn test_timeout_counters_are_capped_per_type() {
        let cache = cache();
        back_off_fully(&cache);
        cache.rtt_update(
            server(),
            &zone(),
            RecordType::AAAA,
            RttSample::Timeout { orig_rto: 1 },
            NOW,
        );
        let host = cache.get_host_rto(server(), &zone(), NOW).unwrap();
        assert_eq!(host.timeout_a, 3);
        assert_eq!(host.timeout_aaaa, 1);
        assert_eq!(host.timeout_other, 0);
    }

    #[test]
    fn test_probe_window_inflates_selection_rtt() {
        let cache = cache();
        let mut rto = cache.lookup_or_create(server(), &zone(), NOW).timeout_ms;
        for _ in 0..5 {
            rto = cache.rtt_update(
                server(),
                &zone(),
                RecordType::A,
                RttSample::Timeout { orig_rto: rto },
                NOW,
            );
        }
        assert!(rto >= 12_000);
        cache.lookup_or_create(server(), &zone(), NOW);

        let a = cache.get_lame_rtt(server(), &zone(), RecordType::A, NOW).unwrap();
        assert_eq!(a.rtt_ms, USEFUL_SERVER_TOP_TIMEOUT);
        let aaaa = cache.get_lame_rtt(server(), &zone(), RecordType::AAAA, NOW).unwrap();
        assert_eq!(aaaa.rtt_ms, USEFUL_SERVER_TOP_TIMEOUT - 1000);
    }

    #[test]
    fn test_lameness_is_per_type() {
        let cache = cache();
        cache.set_lame(server(), &zone(), RecordType::A, false, false, NOW);
        assert!(cache.get_lame_rtt(server(), &zone(), RecordType::A, NOW).unwrap().lame);
        let mx = cache.get_lame_rtt(server(), &zone(), RecordType::MX, NOW).unwrap();
        assert!(!mx.lame);
        assert!(!mx.dnssec_lame);

        cache.set_lame(server(), &zone(), RecordType::MX, true, false, NOW);
        let mx = cache.get_lame_rtt(server(), &zone(), RecordType::MX, NOW).unwrap();
        assert!(mx.dnssec_lame);
    }

    #[test]
    fn test_edns_failure_does_not_downgrade_known_server() {
        let cache = cache();
        cache.edns_update(server(), &zone(), 0, NOW);
        cache.edns_update(server(), &zone(), -1, NOW);
        let info = cache.lookup_or_create(server(), &zone(), NOW);
        assert_eq!(info.edns_version, 0);
        assert!(info.edns_lame_known);
    }

    #[test]
    fn test_edns_none_recorded_for_unknown_server() {
        let cache = cache();
        cache.edns_update(server(), &zone(), -1, NOW);
        let info = cache.lookup_or_create(server(), &zone(), NOW);
        assert_eq!(info.edns_version, -1);
        assert!(info.edns_lame_known);
    }

    #[test]
    fn test_expired_entry_is_reset() {
        let cache = cache();
        cache.set_lame(server(), &zone(), RecordType::A, false, false, NOW);
        let later = NOW + 901;
        assert!(cache.get_lame_rtt(server(), &zone(), RecordType::A, later).is_none());
        let info = cache.lookup_or_create(server(), &zone(), later);
        assert_eq!(info.timeout_ms, UNKNOWN_SERVER_NICENESS);
        assert!(!cache.get_lame_rtt(server(), &zone(), RecordType::A, later).unwrap().lame);
    }

    #[test]
    fn test_unusable_server_keeps_backoff_across_expiry() {
        let cache = cache();
        back_off_fully(&cache);
        let later = NOW + 901;
        let lame = cache.get_lame_rtt(server(), &zone(), RecordType::A, later).unwrap();
        assert_eq!(lame.rtt_ms, USEFUL_SERVER_TOP_TIMEOUT - 1000);
        let info = cache.lookup_or_create(server(), &zone(), later);
        assert_eq!(info.timeout_ms, USEFUL_SERVER_TOP_TIMEOUT);
        assert_eq!(cache.get_host_rto(server(), &zone(), later).unwrap().timeout_a, 3);
    }

    #[test]
    fn test_tcp_works_pulls_below_ceiling() {
        let cache = cache();
        back_off_fully(&cache);
        cache.update_tcp_works(server(), &zone());
        let host = cache.get_host_rto(server(), &zone(), NOW).unwrap();
        assert_eq!(host.rtt.rto, RTT_MAX_TIMEOUT - 1000);
    }

    #[test]
    fn test_tcp_works_ignores_unknown_server() {
        let cache = cache();
        cache.update_tcp_works(server(), &zone());
        assert!(cache.is_empty());
        assert!(cache.get_host_rto(server(), &zone(), NOW).is_none());
    }
}

mod helpers;

use helpers::*;
use meshdns_domain::{
    InfraConfig, PackedRrset, RecordClass, RecordType, RrsetData, RrsetKey, RrsetTrust,
    SecurityStatus,
};
use meshdns_infrastructure::dns::cache::{InfraCache, RrsetCache, RttSample};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;
const ROUNDS: usize = 200;

fn rrset(owner: &str, ttl: u64, octet: u8) -> PackedRrset {
    PackedRrset::new(
        RrsetKey::new(name(owner), RecordType::A, RecordClass::IN, 0),
        RrsetData::new(
            ttl,
            vec![bytes::Bytes::from(vec![192, 0, 2, octet])],
            0,
            RrsetTrust::AnswerAa,
        ),
    )
}

#[test]
fn test_concurrent_rrset_updates_stay_consistent() {
    let cache = Arc::new(RrsetCache::with_capacity(4, 1 << 20));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut locked_reads = 0usize;
                for i in 0..ROUNDS {
                    let now = 1_000;
                    let own = format!("host{}-{}.example", t, i % 10);
                    let (_, own_ref) = cache.update(rrset(&own, now + 300, t as u8), now);
                    let (_, shared_ref) =
                        cache.update(rrset("shared.example", now + 300, (i % 4) as u8), now);
                    if let Some(locked) = cache.array_lock(&[shared_ref.clone(), own_ref.clone()], now) {
                        assert!(locked.get(&own_ref).is_some());
                        assert_eq!(locked.get(&shared_ref).map(|d| d.count()), Some(1));
                        locked.unlock_and_touch(&cache);
                        locked_reads += 1;
                    }
                }
                locked_reads
            })
        })
        .collect();

    let reads: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(reads > 0);
    assert_eq!(cache.len(), THREADS * 10 + 1);
    assert!(cache.lookup(&name("shared.example"), RecordType::A, RecordClass::IN, 0, 1_000, false).is_some());
}

fn contested(octet: u8, trust: RrsetTrust, security: SecurityStatus) -> PackedRrset {
    PackedRrset::new(
        RrsetKey::new(name("contested.example"), RecordType::A, RecordClass::IN, 0),
        RrsetData::new(1_300, vec![bytes::Bytes::from(vec![198, 51, 100, octet])], 0, trust)
            .with_security(security),
    )
}

#[test]
fn test_concurrent_updates_never_downgrade_secure_rrset() {
    let cache = Arc::new(RrsetCache::with_capacity(4, 1 << 20));
    cache.update(contested(0, RrsetTrust::Glue, SecurityStatus::Unchecked), 1_000);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..ROUNDS {
                    let candidate = if (t + i) % 2 == 0 {
                        contested(1, RrsetTrust::AnswerAa, SecurityStatus::Secure)
                    } else {
                        contested(2 + (i % 200) as u8, RrsetTrust::Glue, SecurityStatus::Unchecked)
                    };
                    cache.update(candidate, 1_000);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let handle = cache
        .lookup(&name("contested.example"), RecordType::A, RecordClass::IN, 0, 1_000, false)
        .unwrap();
    assert_eq!(handle.data().security, SecurityStatus::Secure);
    assert_eq!(handle.data().trust, RrsetTrust::AnswerAa);
    assert_eq!(&handle.data().rdata[0][..], &[198, 51, 100, 1]);
}

#[test]
fn test_concurrent_rtt_updates_share_one_entry() {
    let infra = Arc::new(InfraCache::new(&InfraConfig::default()));
    let barrier = Arc::new(Barrier::new(THREADS));
    let zone = name("example.com");

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let infra = Arc::clone(&infra);
            let barrier = Arc::clone(&barrier);
            let zone = zone.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let rto = infra.rtt_update(upstream(), &zone, RecordType::A, RttSample::Reply(40), 1_000);
                    assert!(rto > 0);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(infra.len(), 1);
    let host = infra.get_host_rto(upstream(), &zone, 1_000).unwrap();
    assert!(host.rtt.srtt > 0);
    assert_eq!(host.timeout_a, 0);
}

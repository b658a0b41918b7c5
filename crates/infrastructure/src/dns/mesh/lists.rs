use meshdns_domain::QueryKey;
use std::collections::BTreeMap;

/// FIFO of reply-bearing states with O(log n) removal from the middle.
#[derive(Debug, Default)]
pub struct ReplyList {
    entries: BTreeMap<u64, QueryKey>,
    next_seq: u64,
}

impl ReplyList {
    /// Appends and returns the position to remove the key with later.
    pub fn push_back(&mut self, key: QueryKey) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(seq, key);
        seq
    }

    pub fn remove(&mut self, seq: u64) -> Option<QueryKey> {
        self.entries.remove(&seq)
    }

    pub fn first(&self) -> Option<&QueryKey> {
        self.entries.values().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryKey> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdns_domain::{DomainName, QueryFlags, QueryInfo, RecordClass, RecordType};

    fn key(name: &str) -> QueryKey {
        QueryKey::client(
            QueryInfo::new(DomainName::new(name).unwrap(), RecordType::A, RecordClass::IN),
            QueryFlags::recursive(),
        )
    }

    #[test]
    fn test_fifo_order_survives_middle_removal() {
        let mut list = ReplyList::default();
        let a = list.push_back(key("a.example"));
        let b = list.push_back(key("b.example"));
        list.push_back(key("c.example"));
        assert_eq!(list.first(), Some(&key("a.example")));
        assert_eq!(list.remove(b), Some(key("b.example")));
        list.remove(a);
        assert_eq!(list.first(), Some(&key("c.example")));
        assert_eq!(list.len(), 1);
    }
}

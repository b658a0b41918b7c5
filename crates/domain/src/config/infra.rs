use serde::{Deserialize, Serialize};

/// Server infrastructure cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfraConfig {
    /// Seconds a host entry stays fresh (default: 900)
    #[serde(default = "default_host_ttl")]
    pub host_ttl: u64,

    /// Number of shards, a power of two
    #[serde(default = "default_slabs")]
    pub slabs: usize,

    /// Number of (server, zone) entries to keep
    #[serde(default = "default_numhosts")]
    pub numhosts: usize,

    /// Timeout above which only one probe query at a time is sent to a
    /// server (default: 12000 ms)
    #[serde(default = "default_probe_max_rto")]
    pub probe_max_rto_ms: u32,

    /// Cap of the per-type consecutive timeout counters
    #[serde(default = "default_timeout_count_max")]
    pub timeout_count_max: u8,
}

impl Default for InfraConfig {
    fn default() -> Self {
        Self {
            host_ttl: default_host_ttl(),
            slabs: default_slabs(),
            numhosts: default_numhosts(),
            probe_max_rto_ms: default_probe_max_rto(),
            timeout_count_max: default_timeout_count_max(),
        }
    }
}

fn default_host_ttl() -> u64 {
    900
}

fn default_slabs() -> usize {
    4
}

fn default_numhosts() -> usize {
    10_000
}

fn default_probe_max_rto() -> u32 {
    12_000
}

fn default_timeout_count_max() -> u8 {
    3
}

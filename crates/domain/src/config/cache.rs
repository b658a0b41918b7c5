use serde::{Deserialize, Serialize};

/// Message and RRset cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Memory budget of the message cache in bytes (default: 4 MiB)
    #[serde(default = "default_cache_size")]
    pub msg_cache_size: usize,

    /// Number of independently locked message cache shards, a power of two
    #[serde(default = "default_slabs")]
    pub msg_cache_slabs: usize,

    /// Memory budget of the RRset cache in bytes (default: 4 MiB)
    #[serde(default = "default_cache_size")]
    pub rrset_cache_size: usize,

    /// Number of independently locked RRset cache shards, a power of two
    #[serde(default = "default_slabs")]
    pub rrset_cache_slabs: usize,

    /// Refresh popular entries in the background once 90% of their TTL
    /// has passed
    #[serde(default)]
    pub prefetch: bool,

    /// Seconds added to the remaining TTL when a prefetch is started
    #[serde(default = "default_prefetch_expiry_add")]
    pub prefetch_expiry_add: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            msg_cache_size: default_cache_size(),
            msg_cache_slabs: default_slabs(),
            rrset_cache_size: default_cache_size(),
            rrset_cache_slabs: default_slabs(),
            prefetch: false,
            prefetch_expiry_add: default_prefetch_expiry_add(),
        }
    }
}

fn default_cache_size() -> usize {
    4 * 1024 * 1024
}

fn default_slabs() -> usize {
    4
}

fn default_prefetch_expiry_add() -> u64 {
    60
}

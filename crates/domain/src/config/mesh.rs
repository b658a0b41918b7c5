use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-worker query mesh limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeshConfig {
    /// Maximum number of query states with waiting clients (default: 1024)
    #[serde(default = "default_num_queries_per_thread")]
    pub num_queries_per_thread: usize,

    /// Age in milliseconds after which a jostle-list query may be evicted
    /// to make room for a new one (default: 200)
    #[serde(default = "default_jostle_timeout_ms")]
    pub jostle_timeout_ms: u64,

    /// Module activations after which a query state is failed
    #[serde(default = "default_max_activation")]
    pub max_activation: u32,

    /// Depth limit of the dependency walk done before attaching a
    /// sub-query; deeper graphs are refused as cycles
    #[serde(default = "default_max_subsub_depth")]
    pub max_subsub_depth: usize,

    /// Client replies allowed per reply-bearing state on average
    #[serde(default = "default_reply_addr_factor")]
    pub reply_addr_factor: usize,

    /// Answer bogus data with SERVFAIL even when the client set CD
    #[serde(default)]
    pub ignore_cd_flag: bool,
}

impl MeshConfig {
    /// Size of the forever list: half of the reply-bearing states.
    pub fn max_forever_states(&self) -> usize {
        (self.num_queries_per_thread + 1) / 2
    }

    pub fn jostle_timeout(&self) -> Duration {
        Duration::from_millis(self.jostle_timeout_ms)
    }

    pub fn max_reply_addrs(&self) -> usize {
        self.num_queries_per_thread
            .saturating_mul(self.reply_addr_factor)
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            num_queries_per_thread: default_num_queries_per_thread(),
            jostle_timeout_ms: default_jostle_timeout_ms(),
            max_activation: default_max_activation(),
            max_subsub_depth: default_max_subsub_depth(),
            reply_addr_factor: default_reply_addr_factor(),
            ignore_cd_flag: false,
        }
    }
}

fn default_num_queries_per_thread() -> usize {
    1024
}

fn default_jostle_timeout_ms() -> u64 {
    200
}

fn default_max_activation() -> u32 {
    3000
}

fn default_max_subsub_depth() -> usize {
    1024
}

fn default_reply_addr_factor() -> usize {
    16
}

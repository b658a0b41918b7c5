//! Configuration module for meshdns
//!
//! - `root`: top-level configuration, file loading and validation
//! - `cache`: message and RRset cache sizing, prefetch
//! - `infra`: server infrastructure cache policy
//! - `mesh`: per-worker query mesh limits
//! - `logging`: logging settings
//! - `errors`: configuration errors

pub mod cache;
pub mod errors;
pub mod infra;
pub mod logging;
pub mod mesh;
pub mod root;

pub use cache::CacheConfig;
pub use errors::ConfigError;
pub use infra::InfraConfig;
pub use logging::LoggingConfig;
pub use mesh::MeshConfig;
pub use root::Config;

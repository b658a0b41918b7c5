//! meshdns domain layer
pub mod config;
pub mod dns_name;
pub mod dns_query;
pub mod dns_record;
pub mod errors;
pub mod reply;
pub mod rrset;
pub mod security;

pub use config::{CacheConfig, Config, ConfigError, InfraConfig, LoggingConfig, MeshConfig};
pub use dns_name::DomainName;
pub use dns_query::{header, EdnsData, QueryFlags, QueryInfo, QueryKey};
pub use dns_record::{RecordClass, RecordType};
pub use errors::DomainError;
pub use reply::{prefetch_ttl_for, DnsMessage, ReplyInfo};
pub use rrset::{rrset_flags, PackedRrset, RrsetData, RrsetKey};
pub use security::{Rcode, RrsetTrust, SecurityStatus};

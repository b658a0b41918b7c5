pub mod cache;
pub mod mesh;
pub mod worker;

pub use cache::{
    CacheMetrics, InfraCache, MessageCache, RrsetCache, SharedCaches, UpdateOutcome,
};
pub use mesh::{Admission, MeshArea, MeshStats};
pub use worker::{QueryOutcome, Worker};

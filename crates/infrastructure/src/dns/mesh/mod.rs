//! The query mesh: per-worker deduplication of in-flight queries, their
//! dependency graph and the fan-out of results to everyone waiting.

mod area;
mod env;
pub mod lists;
pub mod state;
pub mod stats;
mod table;

pub use area::{Admission, MeshArea};
pub use state::{KeySet, ListSelect, MeshState};
pub use stats::MeshStats;

//! Shared resolver caches, the per-worker query mesh and the worker front
//! end that ties them together.

pub mod dns;
pub mod logging;

pub use dns::cache::SharedCaches;
pub use dns::mesh::{Admission, MeshArea};
pub use dns::worker::{QueryOutcome, Worker};
pub use logging::init_logging;

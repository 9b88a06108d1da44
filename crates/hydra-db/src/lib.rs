//! Schema-mapped data access for the render farm: row types, dirty-tracking
//! handles, the shared status alphabet, and per-entity queries.

pub mod config;
pub mod dirty;
pub mod models;
pub mod pool;
pub mod queries;
pub mod schema;
pub mod status;

pub use config::DbConfig;
pub use dirty::Dirty;
pub use models::{Capability, JobMode, RenderJob, RenderNode, RenderTask};
pub use schema::Schema;
pub use status::HydraStatus;

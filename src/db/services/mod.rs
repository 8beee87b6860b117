//! Data access for the rotation control plane. Query logic lives here; callers get
//! domain models back. Public items are re-exported under `crate::db::services::`.

pub mod job_service;
pub mod machine_directory;
pub mod pool_service;

pub use job_service::*;
pub use machine_directory::*;
pub use pool_service::*;

//! The traffic-rotation engine: which machine serves a pool, and moving DNS to it.

pub mod engine;
pub mod error;
pub mod membership;
pub mod pool;

pub use engine::{RotationEngine, RotationOutcome};
pub use error::RotationError;
pub use pool::{PoolRef, PoolSnapshot, PoolTarget};

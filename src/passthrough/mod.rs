//! Per-machine layer-4 routing: SNI map for TLS, one forward for plain HTTP.

pub mod generator;
pub mod render;

pub use generator::{HttpRule, PassthroughConfig, PassthroughGenerator};
pub use render::{render_nginx, PassthroughSettings};

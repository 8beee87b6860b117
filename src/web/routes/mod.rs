pub mod passthrough_routes;
pub mod pool_routes;

pub mod config;
pub mod deployment_dispatcher;
pub mod rotation_scheduler;

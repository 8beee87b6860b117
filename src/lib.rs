pub mod db;
pub mod dns;
pub mod passthrough;
pub mod rotation;
pub mod server;
pub mod services;
pub mod version;
pub mod web;

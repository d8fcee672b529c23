pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod resolver;
pub mod server;
pub mod store;

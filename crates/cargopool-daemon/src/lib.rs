//! cargopool-daemon - HTTP intake daemon
//!
//! Wires the `cargopool-core` engine to the outside world: a TOML
//! configuration file, a SQLite database shared with the product's CRUD
//! surface, an HTTP email provider, and an axum HTTP listener.
//!
//! # Modules
//!
//! - [`config`]: TOML daemon configuration
//! - [`store`]: SQLite pool directory, pledge store, and pricing source
//! - [`notify`]: fire-and-forget email notification adapter
//! - [`http`]: axum routes and error mapping

pub mod config;
pub mod http;
pub mod notify;
pub mod store;

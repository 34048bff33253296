//! # OCPP Router
//!
//! OCPP-J routing engine of a Central System: terminates charging station
//! WebSockets (OCPP 1.6 and 2.0.1), correlates calls per station and
//! forwards traffic between stations and backend modules over a message bus.
//!
//! ## Architecture
//!
//! - **domain**: identifiers, OCPP versions and error codes, bus envelope,
//!   error taxonomy and the port traits
//! - **shared**: OCPP-J frame codec, retry, shutdown coordination
//! - **application**: protocol router, circuit breaker, module handlers
//! - **infrastructure**: cache, message bus, repository and HTTP adapters
//! - **interfaces**: the station-facing WebSocket gateway
//! - **server**: process assembly

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod server;
pub mod shared;

pub use config::{default_config_path, AppConfig};
pub use server::{init_tracing, ServerHandle};

//! WebSocket gateway
//!
//! - `ocpp_server`: station-facing axum server, one per configured endpoint
//! - `auth`: Basic-Auth check at upgrade
//! - `negotiator`: OCPP subprotocol selection
//! - `session`: live sockets, the router's network hook
//! - `keepalive`: ping / pong dead-peer detection

pub mod auth;
pub mod keepalive;
pub mod negotiator;
pub mod ocpp_server;
pub mod session;

pub use auth::{AuthError, StationAuthenticator};
pub use negotiator::ProtocolNegotiator;
pub use ocpp_server::OcppServer;
pub use session::{SessionRegistry, SharedSessionRegistry};

//! Domain layer
//!
//! Types and port traits shared by the router, the gateway and the
//! infrastructure adapters. Nothing in here performs I/O.

pub mod error;
pub mod identifier;
pub mod message;
pub mod ocpp;
pub mod ports;
pub mod station;

pub use error::{
    BusError, CacheError, NetworkError, OcppError, RepositoryError, RetryMessageError,
    WebhookError,
};
pub use identifier::StationIdentifier;
pub use message::{
    BusMessage, BusPayload, CallErrorPayload, MessageConfirmation, MessageContext,
    MessageOrigin, MessageState,
};
pub use ocpp::{ErrorCode, EventGroup, OcppVersion};
pub use station::{AttributeStatus, ConnectionRecord, Station, VariableAttribute};

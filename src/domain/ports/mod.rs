//! Ports: the interfaces the routing core consumes and exposes
//!
//! Concrete adapters live in `infrastructure` (cache, bus, repositories,
//! HTTP clients) and `interfaces::ws` (the network hook).

pub mod bus;
pub mod cache;
pub mod network;
pub mod repository;
pub mod sender;
pub mod webhook;

pub use bus::{MessageHandler, MessageReceiver, MessageSender, SubscriptionFilter};
pub use cache::Cache;
pub use network::NetworkConnection;
pub use repository::{DeviceModelRepository, StationRepository};
pub use sender::{OcppSender, OutboundCall};
pub use webhook::{CallbackNotifier, WebhookDispatcher};

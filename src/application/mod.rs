pub mod circuit_breaker;
pub mod modules;
pub mod router;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Reconnect, ReconnectError,
};
pub use modules::{
    send_call_with_retry, ActionHandler, HandlerContext, HandlerRegistry, ModuleDispatcher,
    ProvisioningModule,
};
pub use router::{MessageRouter, PayloadKind, RouterConfig, RouterPorts, SchemaValidator};

pub mod ocpp_frame;
pub mod retry;
pub mod shutdown;

pub use ocpp_frame::{strip_nulls, MessageTypeId, OcppFrame, OcppFrameError};
pub use retry::{retry_with_backoff, RetryConfig};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};

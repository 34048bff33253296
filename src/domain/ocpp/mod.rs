//! OCPP protocol vocabulary shared by every layer

pub mod actions;
pub mod error_code;
pub mod version;

pub use actions::EventGroup;
pub use error_code::ErrorCode;
pub use version::OcppVersion;

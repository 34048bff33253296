//! Network hook: writes frames to a station's live socket

use async_trait::async_trait;

use crate::domain::error::NetworkError;
use crate::domain::identifier::StationIdentifier;

#[async_trait]
pub trait NetworkConnection: Send + Sync {
    async fn send_message(
        &self,
        identifier: &StationIdentifier,
        message: String,
    ) -> Result<(), NetworkError>;
}

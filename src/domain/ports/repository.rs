//! Persistence ports consumed by the router and the gateway

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::error::RepositoryError;
use crate::domain::identifier::StationIdentifier;
use crate::domain::ocpp::OcppVersion;
use crate::domain::station::{Station, VariableAttribute};

#[async_trait]
pub trait StationRepository: Send + Sync {
    async fn read_station(
        &self,
        identifier: &StationIdentifier,
    ) -> Result<Option<Station>, RepositoryError>;

    /// Mark the station online/offline together with its negotiated protocol
    /// (`None` when offline). Creates the record if it does not exist.
    async fn set_station_online(
        &self,
        identifier: &StationIdentifier,
        online: bool,
        protocol: Option<OcppVersion>,
    ) -> Result<(), RepositoryError>;

    async fn update_timestamp(
        &self,
        identifier: &StationIdentifier,
        timestamp: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait DeviceModelRepository: Send + Sync {
    /// All stored values of `component`/`variable`, newest first.
    async fn read_variable_attributes(
        &self,
        identifier: &StationIdentifier,
        component: &str,
        variable: &str,
    ) -> Result<Vec<VariableAttribute>, RepositoryError>;
}

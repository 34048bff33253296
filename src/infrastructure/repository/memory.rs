//! In-memory station and device-model repositories
//!
//! Seeded from the `[[stations]]` config section. Enough for a single-node
//! deployment and for tests; a database-backed implementation plugs in
//! behind the same ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::domain::ports::{DeviceModelRepository, StationRepository};
use crate::domain::station::{BASIC_AUTH_PASSWORD, SECURITY_CTRLR};
use crate::domain::{
    AttributeStatus, OcppVersion, RepositoryError, Station, StationIdentifier, VariableAttribute,
};

type VariableKey = (StationIdentifier, String, String);

#[derive(Default)]
pub struct InMemoryStationRepository {
    stations: DashMap<StationIdentifier, Station>,
    variables: DashMap<VariableKey, Vec<VariableAttribute>>,
}

impl InMemoryStationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_station(&self, station: Station) {
        self.stations.insert(station.identifier.clone(), station);
    }

    /// Append a value to a variable's history.
    pub fn push_variable_attribute(&self, identifier: &StationIdentifier, attribute: VariableAttribute) {
        let key = (
            identifier.clone(),
            attribute.component.clone(),
            attribute.variable.clone(),
        );
        self.variables.entry(key).or_default().push(attribute);
    }

    /// Register a station together with its accepted Basic-Auth password hash.
    pub fn seed_station(&self, identifier: StationIdentifier, password_hash: Option<String>) {
        if let Some(hash) = password_hash {
            self.push_variable_attribute(
                &identifier,
                VariableAttribute {
                    component: SECURITY_CTRLR.to_string(),
                    variable: BASIC_AUTH_PASSWORD.to_string(),
                    value: Some(hash),
                    status: AttributeStatus::Accepted,
                    updated_at: Utc::now(),
                },
            );
        }
        self.insert_station(Station::new(identifier));
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }
}

#[async_trait]
impl StationRepository for InMemoryStationRepository {
    async fn read_station(
        &self,
        identifier: &StationIdentifier,
    ) -> Result<Option<Station>, RepositoryError> {
        Ok(self.stations.get(identifier).map(|s| s.clone()))
    }

    async fn set_station_online(
        &self,
        identifier: &StationIdentifier,
        online: bool,
        protocol: Option<OcppVersion>,
    ) -> Result<(), RepositoryError> {
        let mut station = self
            .stations
            .entry(identifier.clone())
            .or_insert_with(|| Station::new(identifier.clone()));
        station.is_online = online;
        station.protocol = protocol;
        debug!(station_id = %identifier, online, ?protocol, "Station online state updated");
        Ok(())
    }

    async fn update_timestamp(
        &self,
        identifier: &StationIdentifier,
        timestamp: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        match self.stations.get_mut(identifier) {
            Some(mut station) => {
                station.last_seen = Some(timestamp);
                Ok(())
            }
            None => Err(RepositoryError::Storage(format!(
                "station {identifier} not found"
            ))),
        }
    }
}

#[async_trait]
impl DeviceModelRepository for InMemoryStationRepository {
    async fn read_variable_attributes(
        &self,
        identifier: &StationIdentifier,
        component: &str,
        variable: &str,
    ) -> Result<Vec<VariableAttribute>, RepositoryError> {
        let key = (identifier.clone(), component.to_string(), variable.to_string());
        let mut attributes = self
            .variables
            .get(&key)
            .map(|v| v.clone())
            .unwrap_or_default();
        attributes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(attributes)
    }
}

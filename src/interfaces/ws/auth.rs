//! Basic authentication at WebSocket upgrade
//!
//! Security profiles 1 and 2 require `Authorization: Basic <base64>` with
//! the station identifier as username. The password is checked against the
//! newest non-rejected `SecurityCtrlr.BasicAuthPassword` bcrypt hash.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::ports::{DeviceModelRepository, StationRepository};
use crate::domain::station::{BASIC_AUTH_PASSWORD, SECURITY_CTRLR};
use crate::domain::{AttributeStatus, RepositoryError, StationIdentifier};
use crate::infrastructure::crypto::verify_password_async;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingCredentials,

    #[error("Malformed Basic Authorization header")]
    MalformedHeader,

    #[error("Username {username} does not match station {station_id}")]
    UsernameMismatch {
        username: String,
        station_id: String,
    },

    #[error("Station {0} is not registered")]
    UnknownStation(StationIdentifier),

    #[error("No usable password stored for {0}")]
    NoPassword(StationIdentifier),

    #[error("Invalid password")]
    InvalidPassword,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Decode a `Basic <base64(username:password)>` header value.
pub fn parse_basic_auth(header: &str) -> Result<BasicCredentials, AuthError> {
    let encoded = header
        .strip_prefix("Basic ")
        .or_else(|| header.strip_prefix("basic "))
        .ok_or(AuthError::MalformedHeader)?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::MalformedHeader)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MalformedHeader)?;
    // passwords may contain ':'
    let (username, password) = decoded.split_once(':').ok_or(AuthError::MalformedHeader)?;
    Ok(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

pub struct StationAuthenticator {
    stations: Arc<dyn StationRepository>,
    device_model: Arc<dyn DeviceModelRepository>,
}

impl StationAuthenticator {
    pub fn new(
        stations: Arc<dyn StationRepository>,
        device_model: Arc<dyn DeviceModelRepository>,
    ) -> Self {
        Self {
            stations,
            device_model,
        }
    }

    pub async fn authenticate(
        &self,
        identifier: &StationIdentifier,
        security_profile: u8,
        allow_unknown_stations: bool,
        authorization: Option<&str>,
    ) -> Result<(), AuthError> {
        if !allow_unknown_stations && self.stations.read_station(identifier).await?.is_none() {
            return Err(AuthError::UnknownStation(identifier.clone()));
        }

        if security_profile == 0 {
            debug!(station_id = %identifier, "Security profile 0, no credentials required");
            return Ok(());
        }

        let credentials = parse_basic_auth(authorization.ok_or(AuthError::MissingCredentials)?)?;
        if credentials.username != identifier.station_id {
            return Err(AuthError::UsernameMismatch {
                username: credentials.username,
                station_id: identifier.station_id.clone(),
            });
        }

        let hash = self
            .device_model
            .read_variable_attributes(identifier, SECURITY_CTRLR, BASIC_AUTH_PASSWORD)
            .await?
            .into_iter()
            .find(|attr| attr.status != AttributeStatus::Rejected)
            .and_then(|attr| attr.value)
            .ok_or_else(|| AuthError::NoPassword(identifier.clone()))?;

        match verify_password_async(credentials.password, hash).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AuthError::InvalidPassword),
            Err(e) => {
                warn!(station_id = %identifier, error = %e, "Stored password hash is unusable");
                Err(AuthError::InvalidPassword)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VariableAttribute;
    use crate::infrastructure::crypto::password::hash_password_with_cost;
    use crate::infrastructure::repository::InMemoryStationRepository;
    use chrono::{Duration, Utc};

    fn header(user: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
    }

    fn station() -> StationIdentifier {
        StationIdentifier::new(1, "CS-001")
    }

    fn authenticator(repo: Arc<InMemoryStationRepository>) -> StationAuthenticator {
        StationAuthenticator::new(repo.clone(), repo)
    }

    fn seeded(password: &str) -> Arc<InMemoryStationRepository> {
        let repo = Arc::new(InMemoryStationRepository::new());
        repo.seed_station(station(), Some(hash_password_with_cost(password, 4).unwrap()));
        repo
    }

    #[test]
    fn parses_basic_header() {
        let creds = parse_basic_auth(&header("CS-001", "pa:ss")).unwrap();
        assert_eq!(creds.username, "CS-001");
        assert_eq!(creds.password, "pa:ss");
        assert!(matches!(parse_basic_auth("Bearer abc"), Err(AuthError::MalformedHeader)));
        assert!(matches!(parse_basic_auth("Basic !!!"), Err(AuthError::MalformedHeader)));
    }

    #[tokio::test]
    async fn accepts_matching_credentials() {
        let auth = authenticator(seeded("secret-1234"));
        auth.authenticate(&station(), 1, false, Some(&header("CS-001", "secret-1234")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_wrong_password_and_username() {
        let auth = authenticator(seeded("secret-1234"));
        let err = auth
            .authenticate(&station(), 1, false, Some(&header("CS-001", "guess")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidPassword));

        let err = auth
            .authenticate(&station(), 2, false, Some(&header("CS-002", "secret-1234")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UsernameMismatch { .. }));

        let err = auth.authenticate(&station(), 1, false, None).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingCredentials));
    }

    #[tokio::test]
    async fn rejected_passwords_are_skipped() {
        let repo = seeded("old-password");
        repo.push_variable_attribute(
            &station(),
            VariableAttribute {
                component: SECURITY_CTRLR.into(),
                variable: BASIC_AUTH_PASSWORD.into(),
                value: Some(hash_password_with_cost("new-password", 4).unwrap()),
                status: AttributeStatus::Rejected,
                updated_at: Utc::now() + Duration::seconds(10),
            },
        );
        let auth = authenticator(repo);

        auth.authenticate(&station(), 1, false, Some(&header("CS-001", "old-password")))
            .await
            .unwrap();
        assert!(auth
            .authenticate(&station(), 1, false, Some(&header("CS-001", "new-password")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn unknown_stations_follow_policy() {
        let auth = authenticator(Arc::new(InMemoryStationRepository::new()));
        let err = auth.authenticate(&station(), 0, false, None).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownStation(_)));
        auth.authenticate(&station(), 0, true, None).await.unwrap();
    }
}

//! Station identifier, the routing key for every cache entry, bus
//! subscription and socket.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Composite `(tenant, station)` key.
///
/// Rendered as `"{tenant_id}:{station_id}"` when used as a cache key or
/// namespace. The tenant is always numeric, so parsing splits on the first
/// `:` and the station part may contain further colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationIdentifier {
    pub tenant_id: i32,
    pub station_id: String,
}

impl StationIdentifier {
    pub fn new(tenant_id: i32, station_id: impl Into<String>) -> Self {
        Self {
            tenant_id,
            station_id: station_id.into(),
        }
    }

    /// Parse the `"{tenant_id}:{station_id}"` form.
    pub fn parse(s: &str) -> Option<Self> {
        let (tenant, station) = s.split_once(':')?;
        let tenant_id = tenant.parse().ok()?;
        if station.is_empty() {
            return None;
        }
        Some(Self::new(tenant_id, station))
    }
}

impl fmt::Display for StationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.station_id)
    }
}

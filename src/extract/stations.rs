//! Nearby-station lookup
//!
//! Queries the station API with the record's coordinates and stores the
//! nearest stations, each with its first train line, as a `stations` list.

use crate::extract::pipeline::{Hook, HookError};
use crate::record::ListingRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct StationInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    lines_info: Vec<LineInfo>,
}

#[derive(Debug, Deserialize)]
struct LineInfo {
    #[serde(default)]
    name: Option<String>,
}

/// Fills `stations` from the station API
pub struct StationLookup {
    client: reqwest::Client,
    endpoint: String,
    max_stations: usize,
}

impl StationLookup {
    pub fn new(client: reqwest::Client, endpoint: String, max_stations: usize) -> Self {
        Self {
            client,
            endpoint,
            max_stations,
        }
    }
}

#[async_trait]
impl Hook for StationLookup {
    fn name(&self) -> &str {
        "stations"
    }

    async fn apply(&self, record: &mut ListingRecord, _html: &str) -> Result<(), HookError> {
        let Some((lat, lng)) = record.coordinates() else {
            debug!("No coordinates for station lookup");
            return Ok(());
        };

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("lng", lng.to_string()), ("lat", lat.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HookError::msg(format!(
                "station API returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let stations: Vec<StationInfo> = response.json().await?;
        let stations: Vec<_> = stations
            .into_iter()
            .filter_map(|station| {
                let line = station.lines_info.into_iter().next()?.name?;
                let name = station.name.filter(|n| !n.is_empty())?;
                Some(json!({ "station_name": name, "train_line_name": line }))
            })
            .take(self.max_stations)
            .collect();

        debug!("Found {} stations", stations.len());
        if !stations.is_empty() {
            record.set("stations", stations);
        }
        Ok(())
    }
}

//! District reference data
//!
//! Listings are tagged with the district, prefecture and city nearest to
//! their coordinates. The reference data is loaded once at start from a JSON
//! file and shared read-only between pipelines.
//!
//! ```json
//! {
//!   "prefectures": { "13": "東京都" },
//!   "cities": { "13101": "千代田区" },
//!   "districts": [
//!     { "name": "丸の内", "prefecture_id": 13, "city_id": 13101, "lat": 35.68, "lng": 139.76 }
//!   ]
//! }
//! ```

use crate::{ChintaiError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A district centroid
#[derive(Debug, Clone, Deserialize)]
pub struct District {
    pub name: String,
    #[serde(default)]
    pub prefecture_id: Option<i64>,
    #[serde(default)]
    pub city_id: Option<i64>,
    pub lat: f64,
    pub lng: f64,
}

/// Names resolved for a coordinate
#[derive(Debug, Clone, PartialEq)]
pub struct DistrictMatch {
    pub district: String,
    pub prefecture: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReferenceFile {
    #[serde(default)]
    prefectures: HashMap<i64, String>,
    #[serde(default)]
    cities: HashMap<i64, String>,
    #[serde(default)]
    districts: Vec<District>,
}

/// Read-only nearest-district index
#[derive(Debug, Default)]
pub struct DistrictIndex {
    prefectures: HashMap<i64, String>,
    cities: HashMap<i64, String>,
    districts: Vec<District>,
}

impl DistrictIndex {
    pub fn new(
        prefectures: HashMap<i64, String>,
        cities: HashMap<i64, String>,
        districts: Vec<District>,
    ) -> Self {
        Self {
            prefectures,
            cities,
            districts,
        }
    }

    /// Loads reference data from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: ReferenceFile = serde_json::from_str(content)?;
        if file.districts.is_empty() {
            return Err(ChintaiError::Reference(
                "reference data contains no districts".to_string(),
            ));
        }
        Ok(Self::new(file.prefectures, file.cities, file.districts))
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }

    /// Finds the district closest to the given point
    pub fn nearest(&self, lat: f64, lng: f64) -> Option<DistrictMatch> {
        let district = self.districts.iter().min_by(|a, b| {
            haversine_km(lat, lng, a.lat, a.lng).total_cmp(&haversine_km(lat, lng, b.lat, b.lng))
        })?;

        Some(DistrictMatch {
            district: district.name.clone(),
            prefecture: district
                .prefecture_id
                .and_then(|id| self.prefectures.get(&id).cloned()),
            city: district.city_id.and_then(|id| self.cities.get(&id).cloned()),
        })
    }
}

/// Great-circle distance between two points in kilometres
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

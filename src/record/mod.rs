//! Listing records
//!
//! A `ListingRecord` is the structured output of extracting one listing page.
//! It is a flat JSON object keyed by field name, with the listing URL stored
//! under `link` as its natural key.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Temporary key holding the cleaned page content while hooks run
pub const RAW_CONTENT_KEY: &str = "_html";

/// Key marking a record as a failed extraction
pub const ERROR_KEY: &str = "error";

/// Fields a record must carry before it can be persisted
pub const REQUIRED_FIELDS: &[&str] = &[
    "link",
    "room_type",
    "map_lat",
    "map_lng",
    "image_url_3",
    "image_category_1",
    "image_category_2",
    "station_name_1",
    "floors",
    "floor_no",
];

/// Why a record was refused by the persistence gate
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    MissingFields(Vec<String>),
    InvalidCoordinates { lat: Option<f64>, lng: Option<f64> },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingFields(fields) => write!(f, "missing fields: {}", fields.join(", ")),
            Self::InvalidCoordinates { lat, lng } => {
                write!(f, "invalid coordinates: lat={:?} lng={:?}", lat, lng)
            }
        }
    }
}

/// One extracted listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingRecord {
    fields: Map<String, Value>,
}

impl ListingRecord {
    /// Creates a record holding only its natural key
    pub fn new(link: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("link".to_string(), Value::String(link.to_string()));
        Self { fields }
    }

    /// The listing URL, if set
    pub fn link(&self) -> Option<&str> {
        self.get_str("link")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Reads a number, accepting numeric strings as well
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when the extraction marked this record as failed
    pub fn is_error(&self) -> bool {
        self.fields.contains_key(ERROR_KEY)
    }

    /// Required fields that are absent or null
    pub fn missing_required(&self) -> Vec<String> {
        REQUIRED_FIELDS
            .iter()
            .filter(|field| matches!(self.fields.get(**field), None | Some(Value::Null)))
            .map(|field| field.to_string())
            .collect()
    }

    /// Latitude and longitude, if both are present and numeric
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.get_f64("map_lat")?, self.get_f64("map_lng")?))
    }

    /// Applies the persistence gate
    ///
    /// A record is persistable when every required field is present and both
    /// coordinates are positive numbers.
    pub fn check_persistable(&self) -> Result<(), RejectReason> {
        let missing = self.missing_required();
        if !missing.is_empty() {
            return Err(RejectReason::MissingFields(missing));
        }

        let lat = self.get_f64("map_lat");
        let lng = self.get_f64("map_lng");
        match (lat, lng) {
            (Some(la), Some(ln)) if la > 0.0 && ln > 0.0 => Ok(()),
            _ => Err(RejectReason::InvalidCoordinates { lat, lng }),
        }
    }

    /// Replaces the nested `images` and `stations` lists with numbered fields
    ///
    /// `images` entries are `{url, category}` objects and become
    /// `image_url_N` / `image_category_N`; `stations` entries are
    /// `{station_name, train_line_name}` objects and become
    /// `station_name_N` / `train_line_name_N`. Numbering starts at 1.
    pub fn flatten_collections(&mut self) {
        if let Some(Value::Array(images)) = self.fields.remove("images") {
            for (i, image) in images.iter().enumerate() {
                let n = i + 1;
                if let Some(url) = image.get("url") {
                    self.fields.insert(format!("image_url_{}", n), url.clone());
                }
                if let Some(category) = image.get("category") {
                    self.fields
                        .insert(format!("image_category_{}", n), category.clone());
                }
            }
        }

        if let Some(Value::Array(stations)) = self.fields.remove("stations") {
            for (i, station) in stations.iter().enumerate() {
                let n = i + 1;
                if let Some(name) = station.get("station_name") {
                    self.fields.insert(format!("station_name_{}", n), name.clone());
                }
                if let Some(line) = station.get("train_line_name") {
                    self.fields
                        .insert(format!("train_line_name_{}", n), line.clone());
                }
            }
        }
    }

    /// Removes every field whose value is null
    pub fn drop_nulls(&mut self) {
        self.fields.retain(|_, value| !value.is_null());
    }
}

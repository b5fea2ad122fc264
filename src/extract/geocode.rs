//! Address geocoding
//!
//! Geocoders are blocking collaborators (typically browser automation), so
//! they never run on the async executor. Calls go through a `BlockingLane`,
//! a single-permit lane over `spawn_blocking` that serializes them to keep
//! at most one geocoder session alive at a time.

use crate::extract::pipeline::{Hook, HookError};
use crate::record::ListingRecord;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Resolves a free-text address to `(latitude, longitude)`
///
/// Implementations may block. `None` means the address could not be found.
pub trait Geocoder: Send + Sync + 'static {
    fn locate(&self, address: &str) -> Option<(f64, f64)>;
}

/// Serializes blocking calls onto one worker at a time
#[derive(Debug)]
pub struct BlockingLane {
    permits: Arc<Semaphore>,
}

impl Default for BlockingLane {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockingLane {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Runs a blocking closure once the lane is free
    ///
    /// `timeout` starts when the lane is granted, so time spent queued
    /// behind other callers does not count against it. On timeout the lane
    /// stays occupied until the closure returns.
    pub async fn run<F, T>(&self, timeout: Duration, f: F) -> Result<T, HookError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| HookError::msg("blocking lane closed"))?;

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => {
                joined.map_err(|e| HookError::msg(format!("blocking task failed: {}", e)))
            }
            Err(_) => Err(HookError::Timeout(timeout)),
        }
    }
}

/// Fills `map_lat` / `map_lng` from the record's `address`
pub struct GeocodeHook {
    geocoder: Arc<dyn Geocoder>,
    lane: Arc<BlockingLane>,
    timeout: Duration,
    attempts: u32,
}

impl GeocodeHook {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        lane: Arc<BlockingLane>,
        timeout: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            geocoder,
            lane,
            timeout,
            attempts: attempts.max(1),
        }
    }
}

#[async_trait]
impl Hook for GeocodeHook {
    fn name(&self) -> &str {
        "geocode"
    }

    async fn apply(&self, record: &mut ListingRecord, _html: &str) -> Result<(), HookError> {
        let Some(address) = record.get_str("address").map(str::to_string) else {
            debug!("No address to geocode");
            return Ok(());
        };

        for attempt in 1..=self.attempts {
            let geocoder = Arc::clone(&self.geocoder);
            let query = address.clone();
            let call = self.lane.run(self.timeout, move || geocoder.locate(&query));

            match call.await {
                Ok(Some((lat, lng))) => {
                    debug!("Geocoded {} to ({}, {})", address, lat, lng);
                    record.set("map_lat", lat);
                    record.set("map_lng", lng);
                    return Ok(());
                }
                Ok(None) => {
                    return Err(HookError::msg(format!("no coordinates for '{}'", address)));
                }
                Err(HookError::Timeout(_)) => {
                    warn!(
                        "Geocoding '{}' timed out (attempt {}/{})",
                        address, attempt, self.attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(HookError::Timeout(self.timeout))
    }
}

//! Per-site pipeline assembly
//!
//! Compiles a site's extraction rules once and returns a factory that builds
//! a fresh `Pipeline` for every page. Hooks are registered in a fixed order,
//! since later hooks read fields set by earlier ones (pricing before
//! deposit/key, coordinates before district and stations).

use crate::config::{Config, GeocodingConfig, SiteConfig};
use crate::extract::geocode::{BlockingLane, GeocodeHook, Geocoder};
use crate::extract::hooks::{
    AmenityKeywords, Coordinates, DefaultFields, DepositKey, DistrictLookup, FieldRule,
    FieldRules, ImageCollector, ImageRule, Pricing, StripSections,
};
use crate::extract::pipeline::{HookError, Pipeline, PipelineFactory};
use crate::extract::stations::StationLookup;
use crate::extract::text::compile_pattern;
use crate::reference::DistrictIndex;
use crate::{ConfigError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Station API access shared by every pipeline
#[derive(Clone)]
pub struct StationService {
    pub client: reqwest::Client,
    pub endpoint: String,
    pub max_stations: usize,
}

/// Collaborators injected into every site pipeline
#[derive(Clone, Default)]
pub struct ExtractionServices {
    pub districts: Option<Arc<DistrictIndex>>,
    pub stations: Option<StationService>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
    pub geocoding: GeocodingConfig,
    pub lane: Arc<BlockingLane>,
}

impl ExtractionServices {
    /// Builds the shared services described by the configuration
    ///
    /// Reference data is loaded here, once, and shared read-only afterwards.
    pub fn from_config(config: &Config) -> Result<Self> {
        let districts = match &config.reference {
            Some(reference) => {
                let index = DistrictIndex::load(Path::new(&reference.districts_path))?;
                info!("Loaded {} districts", index.len());
                Some(Arc::new(index))
            }
            None => None,
        };

        let stations = match &config.stations {
            Some(stations) => Some(StationService {
                client: reqwest::Client::builder()
                    .user_agent(config.crawler.user_agent.as_str())
                    .timeout(Duration::from_secs(stations.timeout_secs))
                    .build()?,
                endpoint: stations.endpoint.clone(),
                max_stations: stations.max_stations,
            }),
            None => None,
        };

        Ok(Self {
            districts,
            stations,
            geocoder: None,
            geocoding: config.geocoding.clone(),
            lane: Arc::new(BlockingLane::new()),
        })
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }
}

fn invalid_pattern(e: HookError) -> ConfigError {
    ConfigError::InvalidPattern(e.to_string())
}

/// Builds the pipeline factory for one site
pub fn pipeline_factory(
    site: &SiteConfig,
    services: &ExtractionServices,
) -> std::result::Result<PipelineFactory, ConfigError> {
    let strip = StripSections::compile(&site.strip_patterns).map_err(invalid_pattern)?;

    let fields = site
        .fields
        .iter()
        .map(|rule| -> std::result::Result<FieldRule, HookError> {
            Ok(FieldRule {
                name: rule.name.clone(),
                regex: compile_pattern(&rule.pattern)?,
                kind: rule.kind,
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(invalid_pattern)?;
    let fields = Arc::new(fields);

    let images = site
        .images
        .iter()
        .map(ImageRule::compile)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(invalid_pattern)?;
    let images = Arc::new(images);

    let amenities = match &site.amenities {
        Some(amenities) => Some((
            compile_pattern(&amenities.pattern)
                .map_err(|e| ConfigError::InvalidPattern(e.to_string()))?,
            Arc::new(amenities.keywords.clone()),
        )),
        None => None,
    };

    let defaults = DefaultFields::convert(&site.default_fields).map_err(invalid_pattern)?;
    let max_images = site.max_images;
    let geocoder = if site.geocode {
        services.geocoder.clone()
    } else {
        None
    };
    let geocoding = services.geocoding.clone();
    let lane = Arc::clone(&services.lane);
    let districts = services.districts.clone();
    let stations = services.stations.clone();

    let factory = move || {
        let mut builder = Pipeline::builder();

        if !strip.is_empty() {
            builder = builder.pre(StripSections::new(Arc::clone(&strip)));
        }
        if !images.is_empty() {
            builder = builder.post_sync(ImageCollector::new(Arc::clone(&images), max_images));
        }
        builder = builder.post_sync(FieldRules::new(Arc::clone(&fields)));
        if let Some((section, keywords)) = &amenities {
            builder = builder.post_sync(AmenityKeywords::new(section.clone(), Arc::clone(keywords)));
        }
        if !defaults.is_empty() {
            builder = builder.post_sync(DefaultFields::new(Arc::clone(&defaults)));
        }
        builder = builder.post_sync(Coordinates);
        if let Some(geocoder) = &geocoder {
            builder = builder.post(GeocodeHook::new(
                Arc::clone(geocoder),
                Arc::clone(&lane),
                Duration::from_secs(geocoding.timeout_secs),
                geocoding.attempts,
            ));
        }
        builder = builder.post_sync(Pricing).post_sync(DepositKey);
        if let Some(index) = &districts {
            builder = builder.post_sync(DistrictLookup::new(Arc::clone(index)));
        }
        if let Some(service) = &stations {
            builder = builder.post(StationLookup::new(
                service.client.clone(),
                service.endpoint.clone(),
                service.max_stations,
            ));
        }

        builder.build()
    };

    Ok(Arc::new(factory))
}

//! Extraction module
//!
//! Turns the raw content of a listing page into a `ListingRecord` through an
//! ordered pipeline of hooks:
//! - `pipeline`: hook traits, the pipeline itself and its builder
//! - `hooks`: configuration-driven field, image, pricing and district hooks
//! - `geocode` / `stations`: hooks backed by external collaborators
//! - `site`: assembles a site's pipeline factory from its configuration

pub mod geocode;
pub mod hooks;
pub mod pipeline;
pub mod site;
pub mod stations;
pub mod text;

pub use geocode::{BlockingLane, GeocodeHook, Geocoder};
pub use pipeline::{
    Extraction, FnHook, Hook, HookError, HookWarning, Pipeline, PipelineBuilder,
    PipelineFactory, PreHook, SyncHook,
};
pub use site::{pipeline_factory, ExtractionServices, StationService};

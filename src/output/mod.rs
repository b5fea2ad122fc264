//! Output module for run summaries and collection maintenance
//!
//! This module handles:
//! - Printing per-site run summaries
//! - Listing statistics across collections
//! - JSON backups and cleaning of collections

mod backup;
pub mod stats;
mod summary;

pub use backup::{backup_collection, clean_collection, CleanReport};
pub use stats::{load_statistics, print_statistics, CollectionStatistics, Statistics};
pub use summary::{print_site_report, SiteReport};

//! Registries that drive the scrapers, both stored in MongoDB next to the
//! articles:
//!
//! - [`topics`]: search queries for the DuckDuckGo and Google News scrapers
//! - [`sources`]: RSS/Atom feeds for the website scraper

pub mod sources;
pub mod topics;

use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};

/// Read a BSON date field as UTC.
pub(crate) fn get_datetime(d: &Document, key: &str) -> Option<DateTime<Utc>> {
    match d.get(key) {
        Some(Bson::DateTime(dt)) => DateTime::from_timestamp_millis(dt.timestamp_millis()),
        Some(Bson::String(s)) => crate::normalize::standardize_date(s),
        _ => None,
    }
}

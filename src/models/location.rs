use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::models::error::ValidationError;
use crate::models::position::Position;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What a publisher sends on every position change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
}

impl PositionReport {
    pub fn new(lat: f64, lng: f64, accuracy: f64) -> Self {
        Self { lat, lng, accuracy }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValidationError::Latitude(self.lat));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(ValidationError::Longitude(self.lng));
        }
        if !self.accuracy.is_finite() || self.accuracy < 0.0 {
            return Err(ValidationError::Accuracy(self.accuracy));
        }
        Ok(())
    }
}

/// Latest known position of one publisher, exactly as served by `/get_locations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    pub timestamp: String,
    /// The publisher id this record belongs to.
    #[serde(default)]
    pub driver: String,
}

impl LocationRecord {
    pub fn stamped(publisher_id: &str, report: PositionReport, at: DateTime<Local>) -> Self {
        Self {
            lat: report.lat,
            lng: report.lng,
            accuracy: report.accuracy,
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            driver: publisher_id.to_string(),
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.lat, self.lng)
    }

    pub fn report(&self) -> PositionReport {
        PositionReport::new(self.lat, self.lng, self.accuracy)
    }
}

/// Full registry contents at one read instant, ordered by publisher id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(pub BTreeMap<String, LocationRecord>);

impl Snapshot {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, publisher_id: &str) -> Option<&LocationRecord> {
        self.0.get(publisher_id)
    }

    pub fn contains(&self, publisher_id: &str) -> bool {
        self.0.contains_key(publisher_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LocationRecord)> {
        self.0.iter().map(|(id, record)| (id.as_str(), record))
    }
}

impl FromIterator<(String, LocationRecord)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (String, LocationRecord)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// `"lat, lng"` at five decimal places, roughly metre precision.
    pub fn display(&self) -> String {
        format!("{:.5}, {:.5}", self.lat, self.lng)
    }
}

/// Accuracy radius as shown to users, e.g. `±8m`.
pub fn accuracy_label(accuracy: f64) -> String {
    format!("±{}m", accuracy.round() as i64)
}

use reqwest::StatusCode;
use thiserror::Error;

/// A location write rejected at the registry boundary. The registry is left untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("publisher id must not be empty")]
    EmptyPublisherId,

    #[error("latitude must be a finite number in [-90, 90], got {0}")]
    Latitude(f64),

    #[error("longitude must be a finite number in [-180, 180], got {0}")]
    Longitude(f64),

    #[error("accuracy must be a finite non-negative number, got {0}")]
    Accuracy(f64),
}

/// Network or protocol failure talking to the registry server.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("server responded with {status}: {message}")]
    Status { status: StatusCode, message: String },
}

/// Failure reported by a device position source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("User denied Geolocation")]
    PermissionDenied,

    #[error("Position unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout expired")]
    Timeout,
}

/// Why a poll produced no snapshot.
///
/// Viewers render both variants identically; the split exists for logging.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("no publisher has reported yet")]
    EmptyResult,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PollError {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            PollError::EmptyResult => "poll_empty",
            PollError::Transport(TransportError::Network(_)) => "poll_network",
            PollError::Transport(TransportError::Status { .. }) => "poll_status",
        }
    }
}

#[derive(Error, Debug)]
pub enum LoginError {
    /// Display is the server's message, verbatim.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("Connection error. Please try again.")]
    Transport(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} must be a number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("unable to read drivers file {path}: {source}")]
    DriversFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("drivers file {path} is not a JSON object of username to password: {source}")]
    DriversFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

pub mod error;
pub mod location;
pub mod position;

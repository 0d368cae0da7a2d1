pub mod expiry;
pub mod routes;

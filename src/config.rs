use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::error::ConfigError;

/// Built-in driver accounts used when no `DRIVERS_FILE` is given.
pub fn default_drivers() -> HashMap<String, String> {
    [("driver1", "pass123"), ("driver2", "pass456"), ("admin", "admin123")]
        .into_iter()
        .map(|(user, pass)| (user.to_string(), pass.to_string()))
        .collect()
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_maxage: Duration,
    pub drivers: HashMap<String, String>,
    /// `None` keeps records until overwritten.
    pub location_ttl: Option<Duration>,
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            jwt_secret: "SECRET".to_string(),
            jwt_maxage: Duration::from_secs(720 * 60),
            drivers: default_drivers(),
            location_ttl: None,
            static_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let drivers = match env::var("DRIVERS_FILE") {
            Ok(path) => load_drivers(&path)?,
            Err(_) => defaults.drivers,
        };

        let location_ttl = parse_var::<u64>("LOCATION_TTL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT")?.unwrap_or(defaults.port),
            jwt_secret: env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            jwt_maxage: parse_var::<u64>("JWT_MAXAGE_MINUTES")?
                .map(|minutes| Duration::from_secs(minutes * 60))
                .unwrap_or(defaults.jwt_maxage),
            drivers,
            location_ttl,
            static_dir: env::var("STATIC_DIR").ok().map(PathBuf::from),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings shared by the `driver` and `viewer` binaries.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub server_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".to_string(),
            username: None,
            password: None,
            poll_interval: Duration::from_millis(3000),
            request_timeout: Duration::from_millis(10_000),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            server_url: env::var("SERVER_URL").unwrap_or(defaults.server_url),
            username: env::var("DRIVER_USERNAME").ok(),
            password: env::var("DRIVER_PASSWORD").ok(),
            poll_interval: parse_var("POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            request_timeout: parse_var("REQUEST_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
        })
    }

    pub fn credentials(&self) -> Result<(&str, &str), ConfigError> {
        let username = self.username.as_deref().ok_or(ConfigError::Missing("DRIVER_USERNAME"))?;
        let password = self.password.as_deref().ok_or(ConfigError::Missing("DRIVER_PASSWORD"))?;
        Ok((username, password))
    }
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => parse_value(name, &value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_value<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: value.to_string(),
    })
}

pub fn load_drivers(path: &str) -> Result<HashMap<String, String>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::DriversFile {
        path: path.to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ConfigError::DriversFormat {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_stock_deployment() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_address(), "0.0.0.0:5000");
        assert!(cfg.location_ttl.is_none());
        assert_eq!(cfg.drivers.get("driver1").map(String::as_str), Some("pass123"));
        assert_eq!(AgentConfig::default().poll_interval, Duration::from_millis(3000));
    }

    #[test]
    fn parse_value_reports_variable_name() {
        let err = parse_value::<u16>("PORT", "abc").unwrap_err();
        assert_eq!(err.to_string(), "PORT must be a number, got \"abc\"");
        assert_eq!(parse_value::<u64>("LOCATION_TTL_SECS", " 30 ").unwrap(), 30);
    }

    #[test]
    fn loads_drivers_file() {
        let path = std::env::temp_dir()
            .join(format!("bus_tracker_drivers_{}.json", std::process::id()));
        std::fs::write(&path, r#"{"bus-1":"secret"}"#).unwrap();
        let drivers = load_drivers(path.to_str().unwrap()).unwrap();
        assert_eq!(drivers.get("bus-1").map(String::as_str), Some("secret"));

        std::fs::write(&path, "[1,2,3]").unwrap();
        assert!(matches!(
            load_drivers(path.to_str().unwrap()),
            Err(ConfigError::DriversFormat { .. })
        ));
        std::fs::remove_file(&path).ok();

        assert!(matches!(
            load_drivers("/definitely/not/here.json"),
            Err(ConfigError::DriversFile { .. })
        ));
    }

    #[test]
    fn agent_credentials_are_required() {
        let cfg = AgentConfig::default();
        assert!(matches!(cfg.credentials(), Err(ConfigError::Missing("DRIVER_USERNAME"))));
    }
}

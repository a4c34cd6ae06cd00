use std::str::FromStr;

use chrono_tz::Tz;
use serde::Deserialize;

use crate::business_day::BusinessDayClock;

/// Typed configuration, loaded once at startup and passed by reference.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// IANA timezone the business day is anchored in
    pub timezone: String,
    /// Local hour at which a new business day begins (0-23)
    pub cutover_hour: u32,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let cutover_hour = std::env::var("CUTOVER_HOUR")
            .unwrap_or_else(|_| "6".to_string())
            .parse::<u32>()
            .map_err(|e| config::ConfigError::Message(format!("invalid CUTOVER_HOUR: {}", e)))?;
        let max_connections = std::env::var("MAX_DB_CONNECTIONS")
            .unwrap_or_else(|_| "20".to_string())
            .parse::<u32>()
            .map_err(|e| {
                config::ConfigError::Message(format!("invalid MAX_DB_CONNECTIONS: {}", e))
            })?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/eggchain".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            timezone: std::env::var("BUSINESS_TIMEZONE")
                .unwrap_or_else(|_| "Asia/Tashkent".to_string()),
            cutover_hour,
            max_connections,
        })
    }

    /// Build the business-day clock from the configured timezone and cutover
    pub fn clock(&self) -> Result<BusinessDayClock, config::ConfigError> {
        let tz = Tz::from_str(&self.timezone)
            .map_err(|_| config::ConfigError::Message(format!("unknown timezone: {}", self.timezone)))?;
        BusinessDayClock::new(tz, self.cutover_hour)
            .map_err(|e| config::ConfigError::Message(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            database_url: "postgresql://localhost/eggchain".to_string(),
            bind_address: "0.0.0.0:8080".to_string(),
            timezone: "Asia/Tashkent".to_string(),
            cutover_hour: 6,
            max_connections: 20,
        }
    }

    #[test]
    fn clock_builds_from_valid_timezone() {
        assert!(base_config().clock().is_ok());
    }

    #[test]
    fn clock_rejects_unknown_timezone() {
        let mut config = base_config();
        config.timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.clock().is_err());
    }
}

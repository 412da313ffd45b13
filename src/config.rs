use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::server::hub::{HubConfig, DEFAULT_CONTROL_CAPACITY, DEFAULT_OUTBOUND_CAPACITY};
use crate::server::relay::{RelayConfig, DEFAULT_CHUNK_DELAY, DEFAULT_CHUNK_SIZE};

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Runtime settings for the server.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: String,
    pub data_dir: PathBuf,
    pub jwt_secret: String,
    pub ai_api_url: String,
    pub ai_api_key: String,
    pub control_capacity: usize,
    pub outbound_capacity: usize,
    pub chunk_size: usize,
    pub chunk_delay: Duration,
    /// `None` disables keep-alive pings.
    pub ping_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            data_dir: PathBuf::from("./data"),
            jwt_secret: String::new(),
            ai_api_url: String::new(),
            ai_api_key: String::new(),
            control_capacity: DEFAULT_CONTROL_CAPACITY,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: DEFAULT_CHUNK_DELAY,
            ping_interval: Some(DEFAULT_PING_INTERVAL),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.control_capacity == 0 {
            return Err(ConfigError::Zero("control capacity"));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::Zero("outbound capacity"));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Zero("chunk size"));
        }
        if self.ping_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Zero("ping interval"));
        }
        Ok(())
    }

    pub fn hub(&self) -> HubConfig {
        HubConfig {
            control_capacity: self.control_capacity,
            outbound_capacity: self.outbound_capacity,
        }
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            chunk_size: self.chunk_size,
            chunk_delay: self.chunk_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            jwt_secret: "s".into(),
            ..Config::default()
        }
    }

    #[test]
    fn defaults_need_only_a_secret() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::EmptySecret)
        ));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let cfg = Config {
            chunk_size: 0,
            ..valid()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Zero("chunk size"))));

        let cfg = Config {
            outbound_capacity: 0,
            ..valid()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            ping_interval: Some(Duration::ZERO),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }
}

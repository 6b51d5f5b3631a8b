use crate::error::ConfigError;
use crate::packet::MIN_PACKET_LEN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_BUFFER_SIZE: usize = 1500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Upper bound of a single wait on the socket, and so of the delay
    /// between a shutdown request and the listener exiting.
    pub poll_interval: Duration,
    pub buffer_size: usize,
    /// Maximum number of undelivered events. `None` leaves the channel
    /// unbounded.
    pub backlog: Option<usize>,
    /// Emit `None` events for decoded packets that are not hop notifications.
    pub report_ignored: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            backlog: None,
            report_ignored: false,
        }
    }
}

impl ListenerConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let conf: Self = serde_json::from_str(s)?;
        conf.validate()?;
        Ok(conf)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval == Duration::from_secs(0) {
            return Err(ConfigError::Invalid(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.buffer_size < MIN_PACKET_LEN {
            return Err(ConfigError::Invalid(format!(
                "buffer_size must be at least {} bytes, got {}",
                MIN_PACKET_LEN, self.buffer_size
            )));
        }
        if self.backlog == Some(0) {
            return Err(ConfigError::Invalid(
                "backlog must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ListenerConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let conf = ListenerConfig::from_json_str(r#"{"backlog": 64, "report_ignored": true}"#)
            .unwrap();
        assert_eq!(
            conf,
            ListenerConfig {
                backlog: Some(64),
                report_ignored: true,
                ..ListenerConfig::default()
            }
        );
    }

    #[test]
    fn json_consistency() {
        let conf = ListenerConfig {
            poll_interval: Duration::from_millis(250),
            buffer_size: 4096,
            backlog: Some(1024),
            report_ignored: false,
        };
        let encoded = serde_json::to_string(&conf).unwrap();
        assert_eq!(ListenerConfig::from_json_str(&encoded).unwrap(), conf);
    }

    #[test]
    fn invalid_values() {
        let bad = [
            ListenerConfig {
                poll_interval: Duration::from_secs(0),
                ..ListenerConfig::default()
            },
            ListenerConfig {
                buffer_size: MIN_PACKET_LEN - 1,
                ..ListenerConfig::default()
            },
            ListenerConfig {
                backlog: Some(0),
                ..ListenerConfig::default()
            },
        ];
        for conf in bad.iter() {
            assert!(matches!(conf.validate(), Err(ConfigError::Invalid(_))));
        }
        assert!(matches!(
            ListenerConfig::from_json_str("{"),
            Err(ConfigError::Json(_))
        ));
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::AudioError;

/// Tunables shared by every line opened through a `DirectAudio` instance.
///
/// Deserializable from JSON so hosts can ship defaults alongside the binary;
/// missing fields fall back to `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfiguration {
    /// Buffer duration used when a caller requests a zero-sized buffer
    /// (default: 500 ms).
    pub default_buffer_millis: u32,

    /// Hardware period requested from hosts that let the client choose it
    /// (default: 10 ms).
    pub period_millis: u32,

    /// Extra capture ring space, in hardware periods, reserved so the
    /// overwrite-on-overrun writer cannot reach a read in flight (default: 1).
    pub capture_slack_periods: u32,

    /// Upper bound on a single blocking capture read, in milliseconds.
    /// `None` waits until enough data arrives or the line drains.
    pub read_wait_timeout_millis: Option<u64>,
}

impl LineConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_buffer_millis == 0 {
            return Err("default buffer duration must be positive".into());
        }
        if !(1..=1000).contains(&self.period_millis) {
            return Err(format!("unsupported period: {} ms", self.period_millis));
        }
        if self.capture_slack_periods == 0 {
            return Err("capture slack must cover at least one period".into());
        }
        if self.read_wait_timeout_millis == Some(0) {
            return Err("read wait timeout must be positive when set".into());
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, AudioError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AudioError::ConfigurationFailed(e.to_string()))?;
        config.validate().map_err(AudioError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn read_wait_timeout(&self) -> Option<Duration> {
        self.read_wait_timeout_millis.map(Duration::from_millis)
    }
}

impl Default for LineConfiguration {
    fn default() -> Self {
        Self {
            default_buffer_millis: 500,
            period_millis: 10,
            capture_slack_periods: 1,
            read_wait_timeout_millis: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(LineConfiguration::default().validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = LineConfiguration::from_json(r#"{ "period_millis": 20 }"#).unwrap();
        assert_eq!(config.period_millis, 20);
        assert_eq!(config.default_buffer_millis, 500);
        assert_eq!(config.read_wait_timeout(), None);
    }

    #[test]
    fn read_timeout_parses() {
        let config =
            LineConfiguration::from_json(r#"{ "read_wait_timeout_millis": 250 }"#).unwrap();
        assert_eq!(config.read_wait_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn rejects_zero_slack() {
        let err = LineConfiguration::from_json(r#"{ "capture_slack_periods": 0 }"#).unwrap_err();
        assert!(matches!(err, AudioError::ConfigurationFailed(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(LineConfiguration::from_json("{ period_millis: ").is_err());
    }
}

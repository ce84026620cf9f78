use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Well-known TCP port shared by signaling and bulk transfer.
pub const DEFAULT_PORT: u16 = 50007;

/// Call, transfer and playback settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub port: u16,
    #[serde(alias = "handshakeTimeoutMs")]
    pub handshake_timeout_ms: u64,
    #[serde(alias = "transferTimeoutMs")]
    pub transfer_timeout_ms: u64,
    #[serde(alias = "settleDelayMs")]
    pub settle_delay_ms: u64,
    #[serde(alias = "playbackDurationSecs")]
    pub playback_duration_secs: f64,
    #[serde(alias = "captureDurationSecs")]
    pub capture_duration_secs: f64,
    #[serde(alias = "gridWidth")]
    pub grid_width: u16,
    #[serde(alias = "audioSampleRate")]
    pub audio_sample_rate: u32,
    #[serde(alias = "maxPayloadBytes")]
    pub max_payload_bytes: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            handshake_timeout_ms: 10_000,
            transfer_timeout_ms: 30_000,
            settle_delay_ms: 2_000,
            playback_duration_secs: 5.0,
            capture_duration_secs: 5.0,
            grid_width: 120,
            audio_sample_rate: 44_100,
            max_payload_bytes: 256 * 1024 * 1024,
        }
    }
}

impl CallConfig {
    /// Defaults overridden by `ASCIICHAT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Applies overrides from any key lookup (the environment in practice).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        override_field(&lookup, "ASCIICHAT_PORT", &mut self.port)?;
        override_field(&lookup, "ASCIICHAT_HANDSHAKE_TIMEOUT_MS", &mut self.handshake_timeout_ms)?;
        override_field(&lookup, "ASCIICHAT_TRANSFER_TIMEOUT_MS", &mut self.transfer_timeout_ms)?;
        override_field(&lookup, "ASCIICHAT_SETTLE_DELAY_MS", &mut self.settle_delay_ms)?;
        override_field(&lookup, "ASCIICHAT_PLAYBACK_SECS", &mut self.playback_duration_secs)?;
        override_field(&lookup, "ASCIICHAT_CAPTURE_SECS", &mut self.capture_duration_secs)?;
        override_field(&lookup, "ASCIICHAT_GRID_WIDTH", &mut self.grid_width)?;
        override_field(&lookup, "ASCIICHAT_SAMPLE_RATE", &mut self.audio_sample_rate)?;
        override_field(&lookup, "ASCIICHAT_MAX_PAYLOAD_BYTES", &mut self.max_payload_bytes)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::Invalid { reason: reason.to_owned() });
        if self.port == 0 {
            return invalid("port must be non-zero");
        }
        if self.handshake_timeout_ms == 0 || self.transfer_timeout_ms == 0 {
            return invalid("timeouts must be non-zero");
        }
        if !(self.playback_duration_secs.is_finite() && self.playback_duration_secs > 0.0) {
            return invalid("playback duration must be positive");
        }
        if !(self.capture_duration_secs.is_finite() && self.capture_duration_secs > 0.0) {
            return invalid("capture duration must be positive");
        }
        if self.grid_width == 0 {
            return invalid("grid width must be non-zero");
        }
        if self.audio_sample_rate == 0 {
            return invalid("audio sample rate must be non-zero");
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn playback_duration(&self) -> Duration {
        Duration::from_secs_f64(self.playback_duration_secs)
    }

    pub fn capture_duration(&self) -> Duration {
        Duration::from_secs_f64(self.capture_duration_secs)
    }
}

fn override_field<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    field: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(var) {
        *field = value.trim().parse().map_err(|_| ConfigError::BadEnv {
            var: var.to_owned(),
            value: value.clone(),
        })?;
    }
    Ok(())
}

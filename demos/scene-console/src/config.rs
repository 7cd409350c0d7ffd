//! Console configuration, read from an optional JSON file.

use std::{path::Path, time::Duration};

use anyhow::Context;
use livescene_core::SurfaceSize;
use livescene_sandbox::SandboxLimits;
use livescene_session::DEFAULT_FRAME_INTERVAL;
use livescene_transport::ChannelConfig;
use serde::{Deserialize, Serialize};

/// Console settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub channel: ChannelConfig,
    pub sandbox: SandboxLimits,
    /// Size of the headless render container.
    pub surface: SurfaceSize,
    pub frame_interval_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            sandbox: SandboxLimits::default(),
            surface: SurfaceSize::new(800, 600),
            frame_interval_ms: u64::try_from(DEFAULT_FRAME_INTERVAL.as_millis()).unwrap_or(16),
        }
    }
}

impl ConsoleConfig {
    /// Load from `path`, or use the defaults when no path is given.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// Frame interval for the scheduler.
    #[must_use]
    pub const fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: ConsoleConfig = serde_json::from_str(
            r#"{"channel": {"ws_url": "ws://scene.local/ws"}, "surface": {"width": 320, "height": 240}}"#,
        )
        .unwrap();
        assert_eq!(config.channel.ws_url, "ws://scene.local/ws");
        assert_eq!(
            config.channel.http_base_url,
            ChannelConfig::default().http_base_url
        );
        assert_eq!(config.surface, SurfaceSize::new(320, 240));
        assert_eq!(config.frame_interval(), Duration::from_millis(16));
        assert_eq!(config.sandbox, SandboxLimits::default());
    }

    #[test]
    fn test_no_path_is_default() {
        assert_eq!(ConsoleConfig::load(None).unwrap(), ConsoleConfig::default());
    }
}

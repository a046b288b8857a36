//! Poller configuration, loadable from TOML.

use serde::Deserialize;
use tcl_cloud::CloudConfig;

/// Environment variable that overrides the configured password.
pub const PASSWORD_ENV: &str = "TCL_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Account login (usually an e-mail address).
    pub username: String,
    /// Clear-text password. May be left out when `TCL_PASSWORD` is set.
    #[serde(default)]
    pub password: Option<String>,
    /// Device ids to poll. Empty polls every listed device.
    #[serde(default)]
    pub devices: Vec<String>,
    /// Seconds between polls of one device.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Endpoint overrides. Defaults are the production EU endpoints.
    #[serde(default)]
    pub cloud: CloudConfig,
}

fn default_poll_interval() -> u64 {
    180
}

impl PollerConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Password from the environment, falling back to the file.
    pub fn resolve_password(&self) -> anyhow::Result<String> {
        self.password_with(std::env::var(PASSWORD_ENV).ok())
    }

    fn password_with(&self, from_env: Option<String>) -> anyhow::Result<String> {
        from_env
            .filter(|p| !p.is_empty())
            .or_else(|| self.password.clone())
            .ok_or_else(|| anyhow::anyhow!("no password configured (set `password` or {PASSWORD_ENV})"))
    }

    /// Whether `device_id` is selected for polling.
    pub fn selects(&self, device_id: &str) -> bool {
        self.devices.is_empty() || self.devices.iter().any(|d| d == device_id)
    }
}

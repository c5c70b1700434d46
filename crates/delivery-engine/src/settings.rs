use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Credentials and cadence the engine runs with. Replaced wholesale when the
/// operator sets a new token.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub api_token: String,
    pub poll_interval: Duration,
    pub log_command_executions: bool,
}

impl Settings {
    pub fn has_token(&self) -> bool {
        !self.api_token.is_empty()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            log_command_executions: true,
        }
    }
}

/// Durable storage for settings changed at runtime.
pub trait SettingsStore: Send + Sync {
    fn persist(&self, settings: &Settings) -> anyhow::Result<()>;
}

pub fn poll_interval_from_secs(secs: f64) -> anyhow::Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("poll interval must be a positive number of seconds, got {secs}");
    }
    Ok(Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_plugin_defaults() {
        let settings = Settings::default();
        assert!(!settings.has_token());
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert!(settings.log_command_executions);
    }

    #[test]
    fn poll_interval_rejects_non_positive_values() {
        assert!(poll_interval_from_secs(0.0).is_err());
        assert!(poll_interval_from_secs(-1.0).is_err());
        assert!(poll_interval_from_secs(f64::NAN).is_err());
        assert_eq!(
            poll_interval_from_secs(2.5).expect("interval"),
            Duration::from_millis(2500)
        );
    }
}

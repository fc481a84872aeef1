//! Application-level configuration loading: session timing and launch limits.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::DurationMilliSeconds;
use tracing::{info, warn};

use crate::state::timing::{GRACE_PERIOD, MAX_POLL_INTERVAL, clamp_poll_interval};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "MOHOOT_HOST_CONFIG_PATH";

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1_500);
const DEFAULT_LEADERBOARD_AUTO_ADVANCE: Duration = Duration::from_secs(5);
const DEFAULT_NOTIFICATION_LIFETIME: Duration = Duration::from_secs(3);
const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SUSPENSE_WINDOW: usize = 3;
const DEFAULT_PIN_ATTEMPTS: usize = 5;

/// Timers driving a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    /// Delay between the start write and the opening of the answer window.
    pub grace_period: Duration,
    /// Expiry polling interval, never above [`MAX_POLL_INTERVAL`].
    pub poll_interval: Duration,
    /// Wait after the last answer before the window is shortened.
    pub settle_delay: Duration,
    /// Leaderboard countdown before the next question starts on its own.
    pub leaderboard_auto_advance: Duration,
    /// On-screen lifetime of a "player answered" notification.
    pub notification_lifetime: Duration,
    /// Upper bound on a transition write; `None` waits forever.
    pub transition_timeout: Option<Duration>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            grace_period: GRACE_PERIOD,
            poll_interval: MAX_POLL_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
            leaderboard_auto_advance: DEFAULT_LEADERBOARD_AUTO_ADVANCE,
            notification_lifetime: DEFAULT_NOTIFICATION_LIFETIME,
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub timing: TimingConfig,
    /// Ranks 1 to 3 are hidden while fewer than this many questions remain.
    pub suspense_window: usize,
    /// PIN draws attempted before a launch gives up.
    pub pin_attempts: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timing: TimingConfig::default(),
            suspense_window: DEFAULT_SUSPENSE_WINDOW,
            pin_attempts: DEFAULT_PIN_ATTEMPTS,
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        poll_interval_ms = config.timing.poll_interval.as_millis() as u64,
                        settle_delay_ms = config.timing.settle_delay.as_millis() as u64,
                        "loaded session configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document; absent keys keep their default.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    grace_period_ms: Duration,
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    poll_interval_ms: Duration,
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    settle_delay_ms: Duration,
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    leaderboard_auto_advance_ms: Duration,
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    notification_lifetime_ms: Duration,
    /// `0` disables the transition timeout.
    #[serde(with = "serde_with::As::<DurationMilliSeconds<u64>>")]
    transition_timeout_ms: Duration,
    suspense_window: usize,
    pin_attempts: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        let defaults = AppConfig::default();
        Self {
            grace_period_ms: defaults.timing.grace_period,
            poll_interval_ms: defaults.timing.poll_interval,
            settle_delay_ms: defaults.timing.settle_delay,
            leaderboard_auto_advance_ms: defaults.timing.leaderboard_auto_advance,
            notification_lifetime_ms: defaults.timing.notification_lifetime,
            transition_timeout_ms: defaults.timing.transition_timeout.unwrap_or_default(),
            suspense_window: defaults.suspense_window,
            pin_attempts: defaults.pin_attempts,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        if value.poll_interval_ms > MAX_POLL_INTERVAL {
            warn!(
                requested_ms = value.poll_interval_ms.as_millis() as u64,
                "poll interval above the expiry bound; clamping"
            );
        }
        Self {
            timing: TimingConfig {
                grace_period: value.grace_period_ms,
                poll_interval: clamp_poll_interval(value.poll_interval_ms),
                settle_delay: value.settle_delay_ms,
                leaderboard_auto_advance: value.leaderboard_auto_advance_ms,
                notification_lifetime: value.notification_lifetime_ms,
                transition_timeout: Some(value.transition_timeout_ms)
                    .filter(|limit| !limit.is_zero()),
            },
            suspense_window: value.suspense_window,
            pin_attempts: value.pin_attempts.max(1),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(AppConfig::from_json("{}").unwrap(), AppConfig::default());
    }

    #[test]
    fn durations_are_read_as_milliseconds() {
        let config =
            AppConfig::from_json(r#"{"settleDelayMs": 800, "pollIntervalMs": 50, "pinAttempts": 2}"#)
                .unwrap();
        assert_eq!(config.timing.settle_delay, Duration::from_millis(800));
        assert_eq!(config.timing.poll_interval, Duration::from_millis(50));
        assert_eq!(config.pin_attempts, 2);
        assert_eq!(config.timing.grace_period, GRACE_PERIOD);
    }

    #[test]
    fn poll_interval_is_clamped() {
        let config = AppConfig::from_json(r#"{"pollIntervalMs": 1000}"#).unwrap();
        assert_eq!(config.timing.poll_interval, MAX_POLL_INTERVAL);
    }

    #[test]
    fn zero_transition_timeout_disables_it() {
        let config = AppConfig::from_json(r#"{"transitionTimeoutMs": 0}"#).unwrap();
        assert_eq!(config.timing.transition_timeout, None);
    }
}

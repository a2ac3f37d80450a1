//! Client configuration

use crate::{ClientError, Result};
use std::time::Duration;

/// Default seconds between completion polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of completion polls
pub const DEFAULT_TIMES_TO_POLL: u32 = 20;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Home directory of the account, e.g. `/user`
    pub home_directory: String,
    /// Delay between status checks while waiting for a completion job
    pub poll_interval: Duration,
    /// Number of status checks before giving up
    pub times_to_poll: u32,
    /// Overall limit on waiting for a completion job
    pub wait_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home_directory: "/".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            times_to_poll: DEFAULT_TIMES_TO_POLL,
            wait_timeout: None,
        }
    }
}

impl Config {
    /// Create a new config rooted at the given home directory
    pub fn new(home_directory: impl Into<String>) -> Self {
        Self {
            home_directory: home_directory.into(),
            ..Default::default()
        }
    }

    /// Build a config from `MANTA_USER` and the optional polling overrides
    /// `MANTA_MULTIPART_POLL_INTERVAL_SECS` / `MANTA_MULTIPART_TIMES_TO_POLL`
    pub fn from_env() -> Result<Self> {
        let user = std::env::var("MANTA_USER")
            .map_err(|_| ClientError::Configuration("MANTA_USER is not set".to_string()))?;
        let mut config = Self::new(format!("/{}", user.trim_matches('/')));

        if let Ok(secs) = std::env::var("MANTA_MULTIPART_POLL_INTERVAL_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                ClientError::Configuration(format!("invalid MANTA_MULTIPART_POLL_INTERVAL_SECS: {}", secs))
            })?;
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(times) = std::env::var("MANTA_MULTIPART_TIMES_TO_POLL") {
            config.times_to_poll = times.parse().map_err(|_| {
                ClientError::Configuration(format!("invalid MANTA_MULTIPART_TIMES_TO_POLL: {}", times))
            })?;
        }

        Ok(config)
    }

    /// Set the polling interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the number of polls
    pub fn with_times_to_poll(mut self, times: u32) -> Self {
        self.times_to_poll = times;
        self
    }

    /// Set an overall wait timeout
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Home directory without a trailing separator
    pub fn home(&self) -> &str {
        self.home_directory.trim_end_matches('/')
    }
}

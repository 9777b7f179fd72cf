use std::time::Duration;

/// Per-view settings, read from `REPLYTREE_*` environment variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewConfig {
    /// Upper bound on each store call made while committing.
    pub commit_timeout: Duration,
    pub throttle_enabled: bool,
    pub submit_limit: usize,
    pub submit_window: Duration,
    pub event_capacity: usize,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(15),
            throttle_enabled: true,
            submit_limit: 10,
            submit_window: Duration::from_secs(60),
            event_capacity: 64,
        }
    }
}

impl ViewConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: Duration) -> Duration { std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default) }
        fn flag_env(name: &str, default: bool) -> bool {
            match std::env::var(name).map(|v| v.trim().to_ascii_lowercase()) {
                Ok(v) if v == "0" || v == "false" || v == "off" => false,
                Ok(v) if v == "1" || v == "true" || v == "on" => true,
                _ => default,
            }
        }
        let d = Self::default();
        Self {
            commit_timeout: dur_env("REPLYTREE_COMMIT_TIMEOUT_SECS", d.commit_timeout),
            throttle_enabled: flag_env("REPLYTREE_THROTTLE", d.throttle_enabled),
            submit_limit: usize_env("REPLYTREE_SUBMIT_LIMIT", d.submit_limit),
            submit_window: dur_env("REPLYTREE_SUBMIT_WINDOW_SECS", d.submit_window),
            // broadcast::channel panics on zero
            event_capacity: usize_env("REPLYTREE_EVENT_CAPACITY", d.event_capacity).max(1),
        }
    }
}

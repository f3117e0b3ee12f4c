//! Environment configuration.

use std::env;
use std::time::Duration;

use exec_api::url::DEFAULT_BASE_URL;
use exec_api::ExecApiConfig;
use exec_session::controller::DEFAULT_RUN_TIMEOUT;
use exec_session::SessionConfig;

pub const BASE_URL_ENV_VAR: &str = "CODE_RUNNER_BASE_URL";
pub const LIVE_URL_ENV_VAR: &str = "CODE_RUNNER_LIVE_URL";
pub const PREFER_LIVE_ENV_VAR: &str = "CODE_RUNNER_PREFER_LIVE";
pub const RUN_TIMEOUT_ENV_VAR: &str = "CODE_RUNNER_RUN_TIMEOUT_SEC";
pub const REQUEST_TIMEOUT_ENV_VAR: &str = "CODE_RUNNER_REQUEST_TIMEOUT_SEC";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub base_url: String,
    pub live_url: Option<String>,
    pub prefer_live: bool,
    /// `None` disables the run watchdog.
    pub run_timeout: Option<Duration>,
    pub request_timeout: Option<Duration>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            live_url: None,
            prefer_live: true,
            run_timeout: Some(DEFAULT_RUN_TIMEOUT),
            request_timeout: None,
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_string_opt(BASE_URL_ENV_VAR).unwrap_or(defaults.base_url),
            live_url: env_string_opt(LIVE_URL_ENV_VAR),
            prefer_live: !env_flag_off(PREFER_LIVE_ENV_VAR),
            run_timeout: match env_seconds_opt(RUN_TIMEOUT_ENV_VAR) {
                Some(0) => None,
                Some(seconds) => Some(Duration::from_secs(seconds)),
                None => defaults.run_timeout,
            },
            request_timeout: env_seconds_opt(REQUEST_TIMEOUT_ENV_VAR)
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn exec_api_config(&self) -> ExecApiConfig {
        let mut config = ExecApiConfig::new(&self.base_url);
        if let Some(live_url) = &self.live_url {
            config = config.with_live_url(live_url);
        }
        if let Some(timeout) = self.request_timeout {
            config = config.with_timeout(timeout);
        }
        config
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_prefer_live(self.prefer_live)
            .with_run_timeout(self.run_timeout)
    }
}

fn env_flag_off(key: &str) -> bool {
    env::var(key).map(|value| value.trim() == "0").unwrap_or(false)
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        }
    })
}

fn env_seconds_opt(key: &str) -> Option<u64> {
    let value = env_string_opt(key)?;
    match value.parse::<u64>() {
        Ok(seconds) => Some(seconds),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring non-numeric seconds value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    #[test]
    fn unset_environment_uses_defaults() {
        let _lock = env_lock();
        let _g1 = set_env_guard(BASE_URL_ENV_VAR, None);
        let _g2 = set_env_guard(LIVE_URL_ENV_VAR, None);
        let _g3 = set_env_guard(PREFER_LIVE_ENV_VAR, None);
        let _g4 = set_env_guard(RUN_TIMEOUT_ENV_VAR, None);
        let _g5 = set_env_guard(REQUEST_TIMEOUT_ENV_VAR, None);

        let config = EnvConfig::from_env();
        assert_eq!(config, EnvConfig::default());
        assert_eq!(
            config.exec_api_config().live_endpoint(),
            "ws://localhost:8000/ws/execute"
        );
    }

    #[test]
    fn variables_override_defaults() {
        let _lock = env_lock();
        let _g1 = set_env_guard(BASE_URL_ENV_VAR, Some("https://runner.example.com/api/"));
        let _g2 = set_env_guard(LIVE_URL_ENV_VAR, Some("  "));
        let _g3 = set_env_guard(PREFER_LIVE_ENV_VAR, Some("0"));
        let _g4 = set_env_guard(RUN_TIMEOUT_ENV_VAR, Some("0"));
        let _g5 = set_env_guard(REQUEST_TIMEOUT_ENV_VAR, Some("15"));

        let config = EnvConfig::from_env();
        assert!(!config.prefer_live);
        assert_eq!(config.live_url, None);
        assert_eq!(config.run_timeout, None);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(15)));

        let api = config.exec_api_config();
        assert_eq!(api.run_endpoint(), "https://runner.example.com/api/run-code");
        assert_eq!(api.live_endpoint(), "wss://runner.example.com/ws/execute");

        let session = config.session_config();
        assert!(!session.prefer_live);
        assert_eq!(session.run_timeout, None);
    }

    #[test]
    fn malformed_timeout_keeps_default() {
        let _lock = env_lock();
        let _g1 = set_env_guard(RUN_TIMEOUT_ENV_VAR, Some("soon"));
        let _g2 = set_env_guard(PREFER_LIVE_ENV_VAR, Some("yes"));

        let config = EnvConfig::from_env();
        assert_eq!(config.run_timeout, Some(DEFAULT_RUN_TIMEOUT));
        assert!(config.prefer_live);
    }
}

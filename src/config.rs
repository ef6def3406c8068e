use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_IDLE_SECS: u64 = 120;

pub const BASE_URL_VAR: &str = "CONVOCHAT_API_URL";
pub const IDLE_SECS_VAR: &str = "CONVOCHAT_STREAM_IDLE_SECS";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    /// `None` waits on the stream forever.
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_SECS)),
        }
    }
}

impl ClientConfig {
    /// Reads the configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(BASE_URL_VAR).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let idle_secs = match lookup(IDLE_SECS_VAR) {
            Some(raw) => raw.trim().parse::<u64>().context(format!(
                "Failed to parse {} as a number of seconds: '{}'",
                IDLE_SECS_VAR, raw
            ))?,
            None => DEFAULT_IDLE_SECS,
        };
        log::debug!("Using chat backend at {}", base_url);
        Self::new(&base_url, idle_secs)
    }

    /// `idle_secs == 0` disables the stream idle timeout.
    pub fn new(base_url: &str, idle_secs: u64) -> Result<Self> {
        reqwest::Url::parse(base_url).context(format!("Invalid base URL '{}'", base_url))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            stream_idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn reads_overrides_and_zero_disables_timeout() {
        let config = ClientConfig::from_lookup(lookup(&[
            (BASE_URL_VAR, "https://chat.example.com/"),
            (IDLE_SECS_VAR, "0"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://chat.example.com");
        assert_eq!(config.stream_idle_timeout, None);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ClientConfig::from_lookup(lookup(&[(IDLE_SECS_VAR, "soon")])).is_err());
        assert!(ClientConfig::new("not a url", 10).is_err());
    }
}

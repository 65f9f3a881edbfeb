//! Connection and polling configuration.
//!
//! This module provides:
//! - [`LokiConfig`] — Everything needed to talk to one Loki deployment
//! - [`Credentials`] — Basic-auth credentials, redacted in debug output
//! - [`TlsVerification`] — Certificate verification mode
//! - [`TailPolicy`] — Backoff used while waiting for new lines of a running build

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{LokiError, Result};

/// Basic-auth credentials for the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name (Grafana Cloud: the numeric Loki user id).
    pub username: String,
    /// Password or API token.
    pub password: String,
}

impl Credentials {
    /// Creates new credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// TLS certificate verification mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsVerification {
    /// Verify certificates and host names.
    #[default]
    Enabled,
    /// Accept any certificate and skip host name verification.
    ///
    /// Only for private deployments with self-signed certificates.
    Disabled,
}

impl TlsVerification {
    /// Maps a "disable verification" flag onto a mode.
    #[must_use]
    pub const fn from_disable_flag(disable: bool) -> Self {
        if disable {
            Self::Disabled
        } else {
            Self::Enabled
        }
    }

    /// Returns true when certificates are verified.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// Sleep-and-retry policy for tailing a running execution.
///
/// The delay grows exponentially while the backend keeps returning nothing
/// new, and the iterator gives up once the consecutive idle time exceeds
/// `max_idle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailPolicy {
    /// Delay before the first re-poll.
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
    /// Upper bound of a single delay.
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
    /// Multiplier applied after every empty poll.
    pub backoff_multiplier: f64,
    /// Consecutive idle time after which tailing stops.
    #[serde(with = "duration_millis")]
    pub max_idle: Duration,
}

impl Default for TailPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            max_idle: Duration::from_secs(5 * 60),
        }
    }
}

impl TailPolicy {
    /// Delay before the given (1-based) empty poll.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(attempt.saturating_sub(1).min(64) as i32);
        let delay_millis = (self.initial_backoff.as_millis() as f64 * factor)
            .min(self.max_backoff.as_millis() as f64) as u64;
        Duration::from_millis(delay_millis).min(self.max_backoff)
    }

    /// Check if another poll is allowed after `idle` time without new lines.
    #[must_use]
    pub fn should_poll(&self, idle: Duration) -> bool {
        idle < self.max_idle
    }

    /// Sets the initial backoff.
    #[must_use]
    pub const fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Sets the maximum backoff.
    #[must_use]
    pub const fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Sets the maximum idle time.
    #[must_use]
    pub const fn with_max_idle(mut self, idle: Duration) -> Self {
        self.max_idle = idle;
        self
    }
}

/// Configuration of one Loki backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LokiConfig {
    /// Base URL, e.g. `https://logs-prod-eu-west-0.grafana.net`.
    pub url: String,
    /// Certificate verification mode.
    pub tls: TlsVerification,
    /// Optional basic-auth credentials.
    pub credentials: Option<Credentials>,
    /// Optional `X-Scope-OrgID` tenant.
    pub tenant_id: Option<String>,
    /// `service_name` label the build logs were shipped with.
    pub service_name: String,
    /// Optional `service_namespace` label.
    pub service_namespace: Option<String>,
    /// Maximum number of entries requested per query.
    pub page_limit: usize,
    /// Timeout of one HTTP request.
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// Polling policy for running executions.
    pub tail: TailPolicy,
}

impl Default for LokiConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            tls: TlsVerification::Enabled,
            credentials: None,
            tenant_id: None,
            service_name: "jenkins".to_string(),
            service_namespace: None,
            page_limit: 1000,
            request_timeout: Duration::from_secs(30),
            tail: TailPolicy::default(),
        }
    }
}

impl LokiConfig {
    /// Creates a config for the given base URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Builds a config from environment-style variables.
    ///
    /// Recognized keys: `LOKI_URL`, `LOKI_USERNAME`, `LOKI_PASSWORD`,
    /// `LOKI_TENANT_ID`, `LOKI_DISABLE_TLS_VERIFICATION`, `LOKI_SERVICE_NAME`,
    /// `LOKI_SERVICE_NAMESPACE`.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = Self::new(non_blank("LOKI_URL").unwrap_or_default());
        if let Some(username) = non_blank("LOKI_USERNAME") {
            config.credentials = Some(Credentials::new(
                username,
                lookup("LOKI_PASSWORD").unwrap_or_default(),
            ));
        }
        config.tenant_id = non_blank("LOKI_TENANT_ID");
        config.tls = TlsVerification::from_disable_flag(
            non_blank("LOKI_DISABLE_TLS_VERIFICATION")
                .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes")),
        );
        if let Some(service_name) = non_blank("LOKI_SERVICE_NAME") {
            config.service_name = service_name;
        }
        config.service_namespace = non_blank("LOKI_SERVICE_NAMESPACE");
        config
    }

    /// Builds a config from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Sets the TLS verification mode.
    #[must_use]
    pub const fn with_tls(mut self, tls: TlsVerification) -> Self {
        self.tls = tls;
        self
    }

    /// Sets basic-auth credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the tenant id.
    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the service name label.
    #[must_use]
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Sets the service namespace label.
    #[must_use]
    pub fn with_service_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.service_namespace = Some(namespace.into());
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit;
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the tailing policy.
    #[must_use]
    pub fn with_tail_policy(mut self, tail: TailPolicy) -> Self {
        self.tail = tail;
        self
    }

    /// Checks the configuration and returns the parsed base URL.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::Configuration`] for a blank or unparsable URL, an
    /// empty service name, a zero page limit or a zero backoff.
    pub fn validate(&self) -> Result<Url> {
        let raw = self.url.trim();
        if raw.is_empty() {
            return Err(LokiError::Configuration(
                "Loki url cannot be blank".to_string(),
            ));
        }
        let url = Url::parse(raw)
            .map_err(|e| LokiError::Configuration(format!("invalid Loki url `{raw}`: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LokiError::Configuration(format!(
                "unsupported Loki url scheme `{}`",
                url.scheme()
            )));
        }
        if self.service_name.trim().is_empty() {
            return Err(LokiError::Configuration(
                "service name cannot be blank".to_string(),
            ));
        }
        if self.page_limit == 0 {
            return Err(LokiError::Configuration(
                "page limit must be positive".to_string(),
            ));
        }
        if self.tail.initial_backoff.is_zero() || self.tail.max_backoff.is_zero() {
            return Err(LokiError::Configuration(
                "tail backoff must be positive".to_string(),
            ));
        }
        Ok(url)
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_case::test_case;

    #[test]
    fn config_defaults() {
        let config = LokiConfig::default();
        assert!(config.url.is_empty());
        assert_eq!(config.tls, TlsVerification::Enabled);
        assert_eq!(config.service_name, "jenkins");
        assert_eq!(config.page_limit, 1000);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::new("12345", "glc_super_secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("12345"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("glc_super_secret"));
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    #[test_case("not a url" ; "unparsable")]
    #[test_case("ftp://loki:3100" ; "unsupported scheme")]
    fn invalid_urls_are_rejected(url: &str) {
        let err = LokiConfig::new(url).validate().unwrap_err();
        assert!(err.is_configuration(), "{err}");
    }

    #[test_case("http://localhost:3100" ; "plain http")]
    #[test_case("https://logs-prod-eu-west-0.grafana.net" ; "grafana cloud")]
    #[test_case("http://loki.internal:3100/prefix" ; "path prefix")]
    fn valid_urls_are_accepted(url: &str) {
        assert!(LokiConfig::new(url).validate().is_ok());
    }

    #[test]
    fn zero_page_limit_is_rejected() {
        let config = LokiConfig::new("http://localhost:3100").with_page_limit(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_backoff_is_rejected() {
        let config = LokiConfig::new("http://localhost:3100")
            .with_tail_policy(TailPolicy::default().with_initial_backoff(Duration::ZERO));
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_lookup_reads_all_keys() {
        let vars: HashMap<&str, &str> = [
            ("LOKI_URL", "https://loki.example.com"),
            ("LOKI_USERNAME", "user"),
            ("LOKI_PASSWORD", "pass"),
            ("LOKI_TENANT_ID", "team-a"),
            ("LOKI_DISABLE_TLS_VERIFICATION", "true"),
            ("LOKI_SERVICE_NAME", "ci"),
            ("LOKI_SERVICE_NAMESPACE", "prod"),
        ]
        .into_iter()
        .collect();

        let config = LokiConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.url, "https://loki.example.com");
        assert_eq!(config.credentials, Some(Credentials::new("user", "pass")));
        assert_eq!(config.tenant_id.as_deref(), Some("team-a"));
        assert_eq!(config.tls, TlsVerification::Disabled);
        assert_eq!(config.service_name, "ci");
        assert_eq!(config.service_namespace.as_deref(), Some("prod"));
    }

    #[test]
    fn from_lookup_defaults_when_unset() {
        let config = LokiConfig::from_lookup(|_| None);
        assert!(config.credentials.is_none());
        assert!(config.tenant_id.is_none());
        assert_eq!(config.tls, TlsVerification::Enabled);
        assert_eq!(config.service_name, "jenkins");
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{"url":"http://localhost:3100","tls":"disabled","tail":{"max_idle":1000}}"#;
        let config: LokiConfig = serde_json::from_str(json).map_err(|e| e.to_string()).unwrap();
        assert_eq!(config.tls, TlsVerification::Disabled);
        assert_eq!(config.page_limit, 1000);
        assert_eq!(config.tail.max_idle, Duration::from_secs(1));
        assert_eq!(config.tail.initial_backoff, Duration::from_millis(500));
    }

    // =========================================================================
    // TailPolicy
    // =========================================================================

    #[test]
    fn tail_delay_grows_and_caps() {
        let policy = TailPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_idle: Duration::from_secs(60),
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_millis(1000));
    }

    #[test]
    fn tail_should_poll_until_max_idle() {
        let policy = TailPolicy::default().with_max_idle(Duration::from_secs(10));
        assert!(policy.should_poll(Duration::from_secs(9)));
        assert!(!policy.should_poll(Duration::from_secs(10)));
    }

    #[test]
    fn tls_from_disable_flag() {
        assert_eq!(TlsVerification::from_disable_flag(true), TlsVerification::Disabled);
        assert!(TlsVerification::from_disable_flag(false).is_enabled());
    }
}

//! Pooled HTTP connection to one Loki deployment.

use std::error::Error as _;

use parking_lot::RwLock;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::HeaderValue;
use reqwest::Method;
use tracing::{debug, warn};
use url::Url;

use crate::config::{Credentials, LokiConfig};
use crate::error::{LokiError, Result};

/// Header carrying the tenant on multi-tenant deployments.
pub const TENANT_HEADER: &str = "X-Scope-OrgID";

/// Immutable connection parameters plus the shared, pooled HTTP client.
///
/// Safe to share between threads: every call clones the inner client handle,
/// which shares one connection pool. [`ConnectionProfile::close`] drops the
/// pool; requests issued afterwards fail with [`LokiError::Closed`].
pub struct ConnectionProfile {
    base_url: Url,
    credentials: Option<Credentials>,
    tenant_id: Option<String>,
    client: RwLock<Option<Client>>,
}

impl ConnectionProfile {
    /// Validates the config and builds the HTTP client.
    ///
    /// The configuration is checked before any network resource is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::Configuration`] for an invalid config or when the
    /// TLS backend cannot be initialized.
    pub fn new(config: &LokiConfig) -> Result<Self> {
        let base_url = config.validate()?;

        let mut builder = Client::builder().timeout(config.request_timeout);
        if !config.tls.is_enabled() {
            warn!(url = %base_url, "TLS certificate and host name verification disabled");
            // rustls skips host name checks together with certificate checks
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| LokiError::Configuration(format!("failed to build HTTP client: {e}")))?;

        debug!(url = %base_url, tenant = ?config.tenant_id, "created Loki connection");

        Ok(Self {
            base_url,
            credentials: config.credentials.clone(),
            tenant_id: config.tenant_id.clone(),
            client: RwLock::new(Some(client)),
        })
    }

    /// Base URL of the backend.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Tenant sent with every request, if any.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Returns true once [`ConnectionProfile::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.read().is_none()
    }

    /// Resolves an API path (e.g. `loki/api/v1/query_range`) against the base URL.
    ///
    /// A path prefix on the base URL is kept.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::Configuration`] if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .map_err(|e| LokiError::Configuration(format!("invalid endpoint `{path}`: {e}")))
    }

    /// Headers added to every request: preemptive basic auth and tenant.
    ///
    /// Authentication is sent up front because Grafana Cloud Logs does not
    /// answer with a `WWW-Authenticate` challenge.
    fn default_headers(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let mut request = request;
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }
        if let Some(tenant) = &self.tenant_id {
            let value = HeaderValue::from_str(tenant)
                .map_err(|e| LokiError::Configuration(format!("invalid tenant id: {e}")))?;
            request = request.header(TENANT_HEADER, value);
        }
        Ok(request)
    }

    /// Issues one request and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::Closed`] after [`ConnectionProfile::close`], and
    /// [`LokiError::BackendUnreachable`] on transport failures.
    pub fn execute(&self, method: Method, url: Url) -> Result<Response> {
        let client = self.client.read().clone().ok_or(LokiError::Closed)?;
        let description = describe(&method, &url);
        let request = self.default_headers(client.request(method, url))?;
        request.send().map_err(|e| LokiError::BackendUnreachable {
            request: description,
            message: transport_message(&e),
        })
    }

    /// Closes the connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::Closed`] if the profile was already closed.
    pub fn close(&self) -> Result<()> {
        let client = self.client.write().take().ok_or(LokiError::Closed)?;
        drop(client);
        debug!(url = %self.base_url, "closed Loki connection pool");
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("base_url", &self.base_url.as_str())
            .field("credentials", &self.credentials)
            .field("tenant_id", &self.tenant_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Human readable request description used in errors and diagnostics.
#[must_use]
pub fn describe(method: &Method, url: &Url) -> String {
    format!("{method} {url}")
}

fn transport_message(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

//! Loki HTTP query client.
//!
//! This module provides:
//! - [`LokiClient`] — [`LogQuery`] implementation over the Loki HTTP API
//! - Decoding of `query_range` stream responses into ordered [`LogEntry`] batches
//! - The `format_query` based connectivity check

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use crate::config::LokiConfig;
use crate::connection::{describe, ConnectionProfile};
use crate::error::{LokiError, Result};
use crate::logql::LogQl;
use crate::telemetry::{attributes, SpanGuard, Tracer};
use crate::traits::{LogQuery, QueryBatch};
use crate::types::{from_nanos, to_nanos, LogEntry, QueryScope, TimeWindow, Validation};

/// Range query endpoint.
pub const QUERY_RANGE_PATH: &str = "loki/api/v1/query_range";

/// Query formatting endpoint, used as health check.
///
/// `/ready` and `/loki/api/v1/status/buildinfo` answer 404 on Grafana Cloud.
pub const FORMAT_QUERY_PATH: &str = "loki/api/v1/format_query";

/// Query sent to [`FORMAT_QUERY_PATH`] by the connectivity check.
pub const CHECK_QUERY: &str = "{foo=\"bar\"}";

/// Client issuing label-scoped range queries against Loki.
pub struct LokiClient {
    connection: Arc<ConnectionProfile>,
    service_name: String,
    service_namespace: Option<String>,
    tracer: Arc<dyn Tracer>,
}

impl LokiClient {
    /// Creates a client sharing `connection`.
    #[must_use]
    pub fn new(connection: Arc<ConnectionProfile>, config: &LokiConfig, tracer: Arc<dyn Tracer>) -> Self {
        Self {
            connection,
            service_name: config.service_name.clone(),
            service_namespace: config.service_namespace.clone(),
            tracer,
        }
    }

    /// The shared connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<ConnectionProfile> {
        &self.connection
    }

    /// LogQL query selecting the lines of `scope`.
    #[must_use]
    pub fn logql(&self, scope: &QueryScope) -> LogQl {
        LogQl::for_scope(scope, &self.service_name, self.service_namespace.as_deref())
    }

    /// Full `query_range` URL for one window.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::Configuration`] if the endpoint URL is invalid.
    pub fn query_range_url(&self, query: &LogQl, window: TimeWindow, limit: usize) -> Result<Url> {
        let mut url = self.connection.endpoint(QUERY_RANGE_PATH)?;
        url.query_pairs_mut()
            .append_pair("query", &query.to_string())
            .append_pair("start", &to_nanos(window.start).to_string())
            .append_pair("end", &to_nanos(window.end).to_string())
            .append_pair("limit", &limit.to_string())
            .append_pair("direction", "forward");
        Ok(url)
    }

    fn fetch(&self, query: &LogQl, window: TimeWindow, limit: usize) -> Result<QueryBatch> {
        let url = self.query_range_url(query, window, limit)?;
        let request = describe(&Method::GET, &url);
        debug!(%request, "querying Loki");

        let response = self.connection.execute(Method::GET, url)?;
        let status = response.status();
        let body = response.bytes().map_err(|e| LokiError::BackendUnreachable {
            request: request.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(LokiError::BackendQueryFailed {
                request,
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let decoded = decode_streams(&body)?;
        Ok(normalize(decoded, window, limit))
    }
}

impl LogQuery for LokiClient {
    fn query_range(
        &self,
        scope: &QueryScope,
        window: TimeWindow,
        limit: usize,
    ) -> Result<QueryBatch> {
        let query = self.logql(scope);
        let mut span = SpanGuard::start(
            self.tracer.as_ref(),
            "LokiClient.queryRange",
            vec![
                (attributes::QUERY, query.to_string().into()),
                (attributes::WINDOW_START, to_nanos(window.start).into()),
                (attributes::WINDOW_END, to_nanos(window.end).into()),
            ],
        );
        let result = self.fetch(&query, window, limit);
        if let Ok(batch) = &result {
            span.set_attribute(attributes::ENTRIES, batch.entries.len());
        }
        span.observe(result)
    }

    fn check(&self) -> Validation {
        let mut url = match self.connection.endpoint(FORMAT_QUERY_PATH) {
            Ok(url) => url,
            Err(e) => return Validation::error(format!("Failure to access Loki: {e}")),
        };
        url.query_pairs_mut().append_pair("query", CHECK_QUERY);
        let request = describe(&Method::GET, &url);

        match self.connection.execute(Method::GET, url) {
            Ok(response) if response.status() == StatusCode::OK => {
                Validation::ok("Loki connection successful")
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().unwrap_or_else(|e| e.to_string());
                Validation::error(format!(
                    "Failure to access Loki ({request}): HTTP {}: {body}",
                    status.as_u16()
                ))
            }
            Err(LokiError::BackendUnreachable { message, .. }) => {
                Validation::error(format!("Failure to access Loki ({request}): {message}"))
            }
            Err(e) => Validation::error(format!("Failure to access Loki ({request}): {e}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    data: QueryData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    #[serde(default)]
    result: Vec<StreamResult>,
}

#[derive(Debug, Deserialize)]
struct StreamResult {
    #[serde(default)]
    stream: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// Entries of a decoded response, in response order.
#[derive(Debug, Default)]
struct DecodedStreams {
    entries: Vec<LogEntry>,
}

/// Decodes a `query_range` response body of result type `streams`.
fn decode_streams(body: &[u8]) -> Result<DecodedStreams> {
    let response: QueryResponse =
        serde_json::from_slice(body).map_err(|e| LokiError::Decode(e.to_string()))?;
    if response.status != "success" {
        return Err(LokiError::Decode(format!(
            "query status `{}`",
            response.status
        )));
    }
    if response.data.result_type != "streams" {
        return Err(LokiError::Decode(format!(
            "expected result type `streams`, got `{}`",
            response.data.result_type
        )));
    }

    let mut decoded = DecodedStreams::default();
    let mut sequence = 0_u64;
    for stream in response.data.result {
        for value in stream.values {
            let entry = decode_value(&stream.stream, &value, sequence)?;
            decoded.entries.push(entry);
            sequence += 1;
        }
    }
    Ok(decoded)
}

/// Decodes one `[ "<ns>", "<line>", {metadata}? ]` tuple.
fn decode_value(
    labels: &BTreeMap<String, String>,
    value: &[serde_json::Value],
    sequence: u64,
) -> Result<LogEntry> {
    let nanos = value
        .first()
        .and_then(serde_json::Value::as_str)
        .and_then(|raw| raw.parse::<i64>().ok())
        .ok_or_else(|| LokiError::Decode(format!("invalid entry timestamp in {value:?}")))?;
    let line = value
        .get(1)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| LokiError::Decode(format!("invalid entry line in {value:?}")))?;

    let mut entry = LogEntry::new(from_nanos(nanos), sequence, line);
    entry.labels = labels.clone();
    if let Some(metadata) = value.get(2).and_then(serde_json::Value::as_object) {
        for (key, v) in metadata {
            let v = v.as_str().map_or_else(|| v.to_string(), str::to_string);
            entry.labels.insert(key.clone(), v);
        }
    }
    Ok(entry)
}

/// Orders a decoded response and works out whether the page was truncated.
///
/// Loki applies `limit` across all streams of a forward query, so a full page
/// resumes at its newest timestamp.
fn normalize(decoded: DecodedStreams, window: TimeWindow, limit: usize) -> QueryBatch {
    let returned = decoded.entries.len();
    let newest = decoded.entries.iter().map(|e| e.timestamp).max();

    let mut entries: Vec<LogEntry> = decoded
        .entries
        .into_iter()
        .filter(|entry| {
            let inside = window.contains(entry.timestamp);
            if !inside {
                trace!(
                    timestamp = %entry.timestamp,
                    "dropping entry outside of the requested window"
                );
            }
            inside
        })
        .collect();
    entries.sort_by_key(LogEntry::order_key);

    match newest {
        Some(newest) if returned >= limit => {
            QueryBatch::truncated(entries, newest.max(window.start).min(window.end))
        }
        _ => QueryBatch::complete(entries),
    }
}

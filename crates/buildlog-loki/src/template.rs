//! Visualization URL bindings.
//!
//! Bindings are typed up to [`TemplateBindings::to_map`], the one place where
//! they become the loosely typed map handed to the host's [`UrlTemplate`].

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{LokiError, Result};

/// Binding keys agreed with the host templating facility.
pub mod keys {
    /// Trace id of the run.
    pub const TRACE_ID: &str = "traceId";
    /// Span id of the run or step.
    pub const SPAN_ID: &str = "spanId";
    /// Start of the displayed time range.
    pub const START_TIME: &str = "startTime";
    /// End of the displayed time range.
    pub const END_TIME: &str = "endTime";
    /// Display name of the log backend.
    pub const BACKEND_NAME: &str = "backendName";
    /// 24x24 icon of the log backend.
    pub const BACKEND_ICON_URL: &str = "backend24x24IconUrl";
}

/// Values computed per retrieval call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBindings {
    /// Trace id of the run.
    pub trace_id: String,
    /// Span id of the run or step.
    pub span_id: String,
    /// Start of the time range.
    pub start_time: DateTime<Utc>,
    /// End of the time range; "now" for running executions.
    pub end_time: DateTime<Utc>,
}

/// Process-wide values supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendBindings {
    /// Display name of the backend (e.g. "Loki").
    pub backend_name: String,
    /// Icon URL shown next to the log view.
    pub backend_icon_url: String,
    /// Additional host bindings (dashboard base URL, data source ids, ...).
    pub extra: HashMap<String, String>,
}

impl BackendBindings {
    /// Creates bindings without extras.
    #[must_use]
    pub fn new(backend_name: impl Into<String>, backend_icon_url: impl Into<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            backend_icon_url: backend_icon_url.into(),
            extra: HashMap::new(),
        }
    }

    /// Adds an extra binding.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Complete binding set for one visualization URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateBindings {
    /// Per call values.
    pub local: LocalBindings,
    /// Host values.
    pub backend: BackendBindings,
}

impl TemplateBindings {
    /// Merges host and local values; local and backend keys win over extras.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = self.backend.extra.clone();
        let typed = [
            (keys::TRACE_ID, self.local.trace_id.clone()),
            (keys::SPAN_ID, self.local.span_id.clone()),
            (keys::START_TIME, format_time(self.local.start_time)),
            (keys::END_TIME, format_time(self.local.end_time)),
            (keys::BACKEND_NAME, self.backend.backend_name.clone()),
            (keys::BACKEND_ICON_URL, self.backend.backend_icon_url.clone()),
        ];
        for (key, value) in typed {
            map.insert(key.to_string(), value);
        }
        map
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Supplies the host's bindings.
pub trait TemplateBindingsProvider: Send + Sync {
    /// Current host bindings.
    fn bindings(&self) -> BackendBindings;
}

impl TemplateBindingsProvider for BackendBindings {
    fn bindings(&self) -> BackendBindings {
        self.clone()
    }
}

/// Renders a URL from a binding map.
pub trait UrlTemplate: Send + Sync {
    /// Renders the template.
    ///
    /// # Errors
    ///
    /// Returns [`LokiError::Template`] when the template cannot be rendered.
    fn render(&self, bindings: &HashMap<String, String>) -> Result<String>;
}

/// `${key}` substitution template.
///
/// Every placeholder must be bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderTemplate {
    source: String,
}

impl PlaceholderTemplate {
    /// Creates a template.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Template text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl UrlTemplate for PlaceholderTemplate {
    fn render(&self, bindings: &HashMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();
        while let Some(open) = rest.find("${") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after.find('}').ok_or_else(|| {
                LokiError::Template(format!("unterminated placeholder in `{}`", self.source))
            })?;
            let key = &after[..close];
            let value = bindings
                .get(key)
                .ok_or_else(|| LokiError::Template(format!("unknown binding `{key}`")))?;
            out.push_str(value);
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::from_nanos;

    fn bindings() -> TemplateBindings {
        TemplateBindings {
            local: LocalBindings {
                trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".to_string(),
                span_id: "00f067aa0ba902b7".to_string(),
                start_time: from_nanos(1_700_000_000_123_456_789),
                end_time: from_nanos(1_700_000_060_000_000_000),
            },
            backend: BackendBindings::new("Loki", "/plugin/loki.svg")
                .with_extra("grafanaUrl", "https://grafana.example.com")
                .with_extra(keys::TRACE_ID, "shadowed"),
        }
    }

    #[test]
    fn map_contains_typed_keys_and_extras() {
        let map = bindings().to_map();
        assert_eq!(map[keys::TRACE_ID], "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(map[keys::SPAN_ID], "00f067aa0ba902b7");
        assert_eq!(map[keys::START_TIME], "2023-11-14T22:13:20.123Z");
        assert_eq!(map[keys::END_TIME], "2023-11-14T22:14:20.000Z");
        assert_eq!(map[keys::BACKEND_NAME], "Loki");
        assert_eq!(map[keys::BACKEND_ICON_URL], "/plugin/loki.svg");
        assert_eq!(map["grafanaUrl"], "https://grafana.example.com");
    }

    #[test]
    fn placeholder_template_substitutes() {
        let template = PlaceholderTemplate::new(
            "${grafanaUrl}/explore?trace=${traceId}&from=${startTime}&to=${endTime}",
        );
        let url = template.render(&bindings().to_map()).unwrap();
        assert_eq!(
            url,
            "https://grafana.example.com/explore?trace=4bf92f3577b34da6a3ce929d0e0e4736\
             &from=2023-11-14T22:13:20.123Z&to=2023-11-14T22:14:20.000Z"
        );
    }

    #[test]
    fn template_without_placeholders_is_verbatim() {
        let template = PlaceholderTemplate::new("https://grafana.example.com/$notaplaceholder");
        assert_eq!(
            template.render(&HashMap::new()).unwrap(),
            "https://grafana.example.com/$notaplaceholder"
        );
    }

    #[test]
    fn unknown_binding_fails() {
        let err = PlaceholderTemplate::new("${nope}")
            .render(&bindings().to_map())
            .unwrap_err();
        assert!(matches!(err, LokiError::Template(ref m) if m.contains("nope")));
    }

    #[test]
    fn unterminated_placeholder_fails() {
        let err = PlaceholderTemplate::new("https://x/${traceId")
            .render(&bindings().to_map())
            .unwrap_err();
        assert!(matches!(err, LokiError::Template(_)));
    }

    #[test]
    fn backend_bindings_provide_themselves() {
        let provider: &dyn TemplateBindingsProvider = &BackendBindings::new("Loki", "icon");
        assert_eq!(provider.bindings().backend_name, "Loki");
    }
}

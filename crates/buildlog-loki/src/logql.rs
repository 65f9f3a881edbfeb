//! LogQL query construction for build logs.
//!
//! Build log lines are shipped with the `service_name` / `service_namespace`
//! resource labels as stream labels, and the pipeline identity as
//! structured-metadata / parsed labels, so a query is a stream selector
//! followed by label filters.

use std::fmt;

use crate::types::QueryScope;

/// Label holding the pipeline full name.
pub const LABEL_PIPELINE_ID: &str = "ci_pipeline_id";
/// Label holding the run number.
pub const LABEL_RUN_NUMBER: &str = "ci_pipeline_run_number";
/// Label holding the step (flow node) id.
pub const LABEL_STEP_ID: &str = "jenkins_step_id";
/// Label holding the trace id.
pub const LABEL_TRACE_ID: &str = "trace_id";

/// A LogQL log query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQl {
    selector: Vec<(String, String)>,
    filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Filter {
    Str(String, String),
    Number(String, u64),
}

impl LogQl {
    /// Starts a query on streams of the given service.
    #[must_use]
    pub fn service(service_name: &str, service_namespace: Option<&str>) -> Self {
        let mut selector = vec![("service_name".to_string(), service_name.to_string())];
        if let Some(namespace) = service_namespace {
            selector.push(("service_namespace".to_string(), namespace.to_string()));
        }
        Self {
            selector,
            filters: Vec::new(),
        }
    }

    /// Builds the query selecting the lines of `scope`.
    #[must_use]
    pub fn for_scope(
        scope: &QueryScope,
        service_name: &str,
        service_namespace: Option<&str>,
    ) -> Self {
        let mut query = Self::service(service_name, service_namespace)
            .label_eq(LABEL_PIPELINE_ID, &scope.pipeline_id)
            .label_number(LABEL_RUN_NUMBER, scope.run_number);
        if let Some(step_id) = &scope.step_id {
            query = query.label_eq(LABEL_STEP_ID, step_id);
        }
        if !scope.trace_id.trim().is_empty() {
            query = query.label_eq(LABEL_TRACE_ID, &scope.trace_id);
        }
        query
    }

    /// Adds a `| label="value"` filter.
    #[must_use]
    pub fn label_eq(mut self, label: &str, value: &str) -> Self {
        self.filters
            .push(Filter::Str(label.to_string(), value.to_string()));
        self
    }

    /// Adds a `| label=value` numeric filter.
    #[must_use]
    pub fn label_number(mut self, label: &str, value: u64) -> Self {
        self.filters.push(Filter::Number(label.to_string(), value));
        self
    }
}

impl fmt::Display for LogQl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (label, value)) in self.selector.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{label}=\"{}\"", escape(value))?;
        }
        f.write_str("}")?;
        for filter in &self.filters {
            match filter {
                Filter::Str(label, value) => write!(f, " | {label}=\"{}\"", escape(value))?,
                Filter::Number(label, value) => write!(f, " | {label}={value}")?,
            }
        }
        Ok(())
    }
}

/// Escapes a value for use inside a double-quoted LogQL string.
#[must_use]
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use test_case::test_case;

    #[test_case("my-job", "my-job" ; "plain")]
    #[test_case("folder/my job", "folder/my job" ; "slash and space")]
    #[test_case(r#"say "hi""#, r#"say \"hi\""# ; "double quotes")]
    #[test_case(r"C:\build", r"C:\\build" ; "backslash")]
    #[test_case("a\nb", r"a\nb" ; "newline")]
    fn escapes_values(input: &str, expected: &str) {
        assert_eq!(escape(input), expected);
    }

    #[test]
    fn run_query() {
        let scope = QueryScope::run("folder/my-job", 42, "4bf92f3577b34da6a3ce929d0e0e4736", Utc::now());
        let query = LogQl::for_scope(&scope, "jenkins", None);
        assert_eq!(
            query.to_string(),
            "{service_name=\"jenkins\"} | ci_pipeline_id=\"folder/my-job\" \
             | ci_pipeline_run_number=42 | trace_id=\"4bf92f3577b34da6a3ce929d0e0e4736\""
        );
    }

    #[test]
    fn step_query_with_namespace() {
        let scope = QueryScope::run("job", 3, "abc", Utc::now()).with_step("17");
        let query = LogQl::for_scope(&scope, "jenkins", Some("ci"));
        assert_eq!(
            query.to_string(),
            "{service_name=\"jenkins\", service_namespace=\"ci\"} | ci_pipeline_id=\"job\" \
             | ci_pipeline_run_number=3 | jenkins_step_id=\"17\" | trace_id=\"abc\""
        );
    }

    #[test]
    fn blank_trace_id_is_not_filtered() {
        let scope = QueryScope::run("job", 1, " ", Utc::now());
        let query = LogQl::for_scope(&scope, "jenkins", None).to_string();
        assert!(!query.contains(LABEL_TRACE_ID));
    }

    #[test]
    fn injection_attempt_stays_quoted() {
        let scope = QueryScope::run("x\"} or {a=\"b", 1, "t", Utc::now());
        let query = LogQl::for_scope(&scope, "jenkins", None).to_string();
        assert!(query.contains(r#"ci_pipeline_id="x\"} or {a=\"b""#));
    }
}

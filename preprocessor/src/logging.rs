//! Structured JSON logging.
//!
//! `tracing_subscriber::fmt()` wired up with an `EnvFilter`, once, from
//! `main`. This service needs a fixed downstream-consumed schema (`time`,
//! `level`, `msg`, `service`, `version`, plus caller attributes and
//! auto-injected trace fields), which the stock `fmt().json()` layer
//! doesn't produce field-for-field. `Logger::init` is called exactly once
//! from `main` and returns a `Logger` handle passed into the components
//! that need to derive child spans, rather than a global singleton reached
//! for ad hoc; nothing here needs a lazily-initialized global beyond what
//! `tracing`'s dispatch mechanism itself requires.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Identity fields stamped onto every log line.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub service: String,
    pub version: String,
}

/// Explicit logger handle. Holds only the identity fields needed to stamp
/// every line; the dispatch plumbing lives in the process-global `tracing`
/// subscriber that `init` installs once.
#[derive(Debug, Clone)]
pub struct Logger {
    identity: ServiceIdentity,
}

impl Logger {
    /// Install the global `tracing` subscriber and return a `Logger` handle
    /// carrying the identity fields the schema requires. `env_filter`
    /// follows `EnvFilter`'s `RUST_LOG`-style syntax (e.g. "info",
    /// "preprocessor=debug,sqlx=warn").
    pub fn init(identity: ServiceIdentity, env_filter: &str) -> Self {
        let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = tracing_subscriber::fmt()
            .event_format(SchemaFormatter { identity: identity.clone() })
            .with_env_filter(filter)
            .try_init();

        Logger { identity }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Derive a child span carrying request/trace/operation ids. Entering
    /// the returned span (typically via `.instrument(...)` on the async
    /// call it wraps) causes `span_id` and, when set, `trace_id` to be
    /// auto-injected into every log line emitted within its scope.
    pub fn child(&self, ctx: &OperationContext) -> tracing::Span {
        tracing::info_span!(
            "operation",
            request_id = ctx.request_id.as_deref().unwrap_or(""),
            trace_id = ctx.trace_id.as_deref().unwrap_or(""),
            operation = ctx.operation.as_deref().unwrap_or(""),
        )
    }
}

/// Context propagated through a call chain. Built at the edge (CLI entry,
/// worker iteration) and threaded through function parameters — never
/// recovered from thread-local or global state.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub operation: Option<String>,
}

impl OperationContext {
    pub fn for_operation(operation: impl Into<String>) -> Self {
        Self {
            request_id: None,
            trace_id: None,
            operation: Some(operation.into()),
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace_id = Some(id.into());
        self
    }
}

/// Custom `tracing_subscriber` event formatter producing the line-delimited
/// JSON schema the log-aggregation pipeline expects. A tagged `Visit`
/// implementation replaces the dynamic `fmt::Debug` field dump the stock
/// JSON layer performs, so schema extraction downstream is total rather
/// than best-effort string parsing.
struct SchemaFormatter {
    identity: ServiceIdentity,
}

impl<S, N> FormatEvent<S, N> for SchemaFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = JsonFieldVisitor::default();
        event.record(&mut visitor);

        let level = match *event.metadata().level() {
            Level::ERROR => "error",
            Level::WARN => "warn",
            Level::INFO => "info",
            Level::DEBUG => "debug",
            Level::TRACE => "trace",
        };

        write!(
            writer,
            "{{\"time\":\"{}\",\"level\":\"{}\",\"msg\":{},\"service\":\"{}\",\"version\":\"{}\"",
            chrono::Utc::now().to_rfc3339(),
            level,
            escape_json_string(&visitor.message),
            escape_json_string(&self.identity.service),
            escape_json_string(&self.identity.version),
        )?;

        // Auto-inject span_id/trace_id when a span is active in the context,
        // without re-walking the whole scope: only the current leaf span's
        // id is meaningful as "the" active trace context.
        if let Some(span) = ctx.lookup_current() {
            write!(writer, ",\"span_id\":\"{}\"", span.id().into_u64())?;

            if let Some(fields) = span.extensions().get::<FormattedFields<N>>() {
                if let Some(trace_id) = extract_span_field(&fields.fields, "trace_id") {
                    if !trace_id.is_empty() {
                        write!(writer, ",\"trace_id\":{}", escape_json_string(&trace_id))?;
                    }
                }
            }
        }

        for (k, v) in &visitor.extra {
            write!(writer, ",\"{}\":{}", k, v)?;
        }

        writeln!(writer, "}}")
    }
}

#[derive(Default)]
struct JsonFieldVisitor {
    message: String,
    extra: Vec<(String, String)>,
}

impl Visit for JsonFieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.extra.push((field.name().to_string(), escape_json_string(value)));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.extra.push((field.name().to_string(), escape_json_string(&rendered)));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.extra.push((field.name().to_string(), value.to_string()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.extra.push((field.name().to_string(), value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.extra.push((field.name().to_string(), value.to_string()));
    }
}

/// Pulls a single `key=value` token out of a span's pre-formatted field
/// text (quoted or bare). `tracing_subscriber`'s default field formatter
/// renders string values as `key="value"`; this avoids re-parsing the
/// whole line into a map just to read one field back out.
fn extract_span_field(fields: &str, key: &str) -> Option<String> {
    let needle = format!("{key}=");
    let start = fields.find(&needle)? + needle.len();
    let rest = &fields[start..];
    if let Some(rest) = rest.strip_prefix('"') {
        let end = rest.find('"')?;
        Some(rest[..end].to_string())
    } else {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        Some(rest[..end].to_string())
    }
}

fn escape_json_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    out.push('"');
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_control_characters() {
        let escaped = escape_json_string("line1\nline2\t\"quoted\"");
        assert!(escaped.contains("\\n"));
        assert!(escaped.contains("\\t"));
        assert!(escaped.contains("\\\""));
    }

    #[test]
    fn extracts_quoted_and_bare_span_fields() {
        let fields = r#"request_id="r1" trace_id="t-abc" operation=fetch_feed"#;
        assert_eq!(extract_span_field(fields, "trace_id").as_deref(), Some("t-abc"));
        assert_eq!(extract_span_field(fields, "operation").as_deref(), Some("fetch_feed"));
        assert_eq!(extract_span_field(fields, "missing"), None);
    }

    #[test]
    fn operation_context_builder() {
        let ctx = OperationContext::for_operation("fetch_feed")
            .with_request_id("r1")
            .with_trace_id("t1");
        assert_eq!(ctx.operation.as_deref(), Some("fetch_feed"));
        assert_eq!(ctx.request_id.as_deref(), Some("r1"));
        assert_eq!(ctx.trace_id.as_deref(), Some("t1"));
    }
}

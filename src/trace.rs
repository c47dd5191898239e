//! Correlation fields derived from an OpenTelemetry span context.

use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::Context;

pub const TRACE_ID_KEY: &str = "trace_id";
pub const SPAN_ID_KEY: &str = "span_id";
pub const TRACE_FLAGS_KEY: &str = "trace_flags";

/// Either no fields, or exactly `trace_id`, `span_id` and `trace_flags`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceFields {
    fields: Option<[(&'static str, String); 3]>,
}

impl TraceFields {
    pub fn empty() -> Self {
        TraceFields { fields: None }
    }

    pub fn from_parts(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        trace_flags: impl Into<String>,
    ) -> Self {
        TraceFields {
            fields: Some([
                (TRACE_ID_KEY, trace_id.into()),
                (SPAN_ID_KEY, span_id.into()),
                (TRACE_FLAGS_KEY, trace_flags.into()),
            ]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_none()
    }

    pub fn len(&self) -> usize {
        if self.fields.is_some() {
            3
        } else {
            0
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .flat_map(|fields| fields.iter())
            .map(|(k, v)| (*k, v.as_str()))
    }
}

/// Fields for the span active in `cx`, or none when it carries no valid span.
pub fn enrich(cx: &Context) -> TraceFields {
    enrich_span_context(cx.span().span_context())
}

/// Fields for the span active in the current OpenTelemetry context.
pub fn enrich_current() -> TraceFields {
    enrich(&Context::current())
}

pub fn enrich_span_context(span_context: &SpanContext) -> TraceFields {
    if !span_context.is_valid() {
        return TraceFields::empty();
    }
    TraceFields::from_parts(
        span_context.trace_id().to_string(),
        span_context.span_id().to_string(),
        format!("{:02x}", span_context.trace_flags().to_u8()),
    )
}

//! W3C trace context over Kafka headers
//!
//! Adapts a record's header list to the OpenTelemetry propagation API so the
//! globally installed propagator can write `traceparent`/`tracestate` on
//! publish and read them back on consume.

use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::{global, Context};

use crate::message::{header_str, MessageHeader};

/// Read/write view of a header list
pub struct HeaderCarrier<'a> {
    headers: &'a mut Vec<MessageHeader>,
}

impl<'a> HeaderCarrier<'a> {
    pub fn new(headers: &'a mut Vec<MessageHeader>) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderCarrier<'_> {
    /// Replaces an existing header of the same name rather than appending
    fn set(&mut self, key: &str, value: String) {
        match self.headers.iter_mut().find(|h| h.key == key) {
            Some(header) => header.value = value.into_bytes(),
            None => self.headers.push(MessageHeader::new(key, value)),
        }
    }
}

impl Extractor for HeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        header_str(self.headers.as_slice(), key)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.iter().map(|h| h.key.as_str()).collect()
    }
}

/// Read-only view used on the consume path
pub struct HeaderExtractor<'a>(pub &'a [MessageHeader]);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        header_str(self.0, key)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.iter().map(|h| h.key.as_str()).collect()
    }
}

/// Write `cx` into `headers` with the global propagator
pub fn inject_context(cx: &Context, headers: &mut Vec<MessageHeader>) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(cx, &mut HeaderCarrier::new(headers))
    });
}

/// Read the upstream context from `headers` with the global propagator
///
/// Missing or malformed trace headers yield a context with no remote parent.
pub fn extract_context(headers: &[MessageHeader]) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&HeaderExtractor(headers)))
}

//! Server-side evaluation of [`StreamFilter`]s before a value is
//! buffered and fanned out.
//!
//! A filter only has semantic meaning when the underlying payload is
//! JSON; property values that encode some other way (raw bytes, a
//! custom binary format) always pass `changed`/`nonEmpty`/`threshold`
//! filters, since there's no generic way to interpret them. `rate-limit`
//! needs no payload interpretation and applies uniformly.

use std::time::{Duration, Instant};

use trebuchet_wire::{Base64Bytes, StreamFilter};

/// Per-stream state a filter needs across evaluations (the previous
/// value for `changed`, the last emit time for `rate-limit`).
pub struct FilterState {
    filter: StreamFilter,
    last_value: Option<serde_json::Value>,
    last_emit: Option<Instant>,
}

impl FilterState {
    /// Start tracking `filter` for a stream with no prior history.
    pub fn new(filter: StreamFilter) -> Self {
        Self {
            filter,
            last_value: None,
            last_emit: None,
        }
    }

    /// Decide whether `data` should be buffered and delivered, updating
    /// this filter's history as a side effect.
    pub fn should_emit(&mut self, data: &Base64Bytes) -> bool {
        let decision = match &self.filter {
            StreamFilter::All => true,
            StreamFilter::Predefined { name, params } => match name.as_str() {
                "changed" => self.evaluate_changed(data),
                "nonEmpty" => Self::evaluate_non_empty(data),
                "threshold" => Self::evaluate_threshold(data, params),
                "rate-limit" => self.evaluate_rate_limit(params),
                _ => true,
            },
        };
        if decision {
            self.last_emit = Some(Instant::now());
        }
        decision
    }

    fn parsed(data: &Base64Bytes) -> Option<serde_json::Value> {
        serde_json::from_slice(data.as_slice()).ok()
    }

    fn evaluate_changed(&mut self, data: &Base64Bytes) -> bool {
        let current = Self::parsed(data);
        let changed = current != self.last_value;
        self.last_value = current;
        changed
    }

    fn evaluate_non_empty(data: &Base64Bytes) -> bool {
        match Self::parsed(data) {
            Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(serde_json::Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
            None => true,
        }
    }

    fn evaluate_threshold(data: &Base64Bytes, params: &serde_json::Value) -> bool {
        let Some(value) = Self::parsed(data).and_then(|v| v.as_f64()) else {
            return true;
        };
        let Some(threshold) = params.get("value").and_then(|v| v.as_f64()) else {
            return true;
        };
        match params.get("operator").and_then(|v| v.as_str()).unwrap_or("gte") {
            "gt" => value > threshold,
            "gte" => value >= threshold,
            "lt" => value < threshold,
            "lte" => value <= threshold,
            _ => true,
        }
    }

    fn evaluate_rate_limit(&self, params: &serde_json::Value) -> bool {
        let interval_ms = params.get("intervalMs").and_then(|v| v.as_u64()).unwrap_or(0);
        match self.last_emit {
            None => true,
            Some(last) => last.elapsed() >= Duration::from_millis(interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(value: serde_json::Value) -> Base64Bytes {
        Base64Bytes::new(serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn changed_suppresses_repeats_of_the_same_value() {
        let mut state = FilterState::new(StreamFilter::Predefined {
            name: "changed".into(),
            params: json!({}),
        });
        assert!(state.should_emit(&bytes(json!(1))));
        assert!(!state.should_emit(&bytes(json!(1))));
        assert!(state.should_emit(&bytes(json!(2))));
    }

    #[test]
    fn non_empty_rejects_null_and_empty_collections() {
        let mut state = FilterState::new(StreamFilter::Predefined {
            name: "nonEmpty".into(),
            params: json!({}),
        });
        assert!(!state.should_emit(&bytes(json!(null))));
        assert!(!state.should_emit(&bytes(json!([]))));
        assert!(state.should_emit(&bytes(json!([1]))));
    }

    #[test]
    fn threshold_compares_against_configured_operator() {
        let mut state = FilterState::new(StreamFilter::Predefined {
            name: "threshold".into(),
            params: json!({"value": 10.0, "operator": "gt"}),
        });
        assert!(!state.should_emit(&bytes(json!(10))));
        assert!(state.should_emit(&bytes(json!(11))));
    }

    #[test]
    fn unrecognized_predefined_name_behaves_as_all() {
        let mut state = FilterState::new(StreamFilter::Predefined {
            name: "made-up".into(),
            params: json!({}),
        });
        assert!(state.should_emit(&bytes(json!(1))));
        assert!(state.should_emit(&bytes(json!(1))));
    }
}

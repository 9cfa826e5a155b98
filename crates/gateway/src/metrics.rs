//! Prometheus counters for the gateway pipeline, mirroring the teacher's
//! `ServiceMetrics` pattern: one registry, cloned behind an `Arc`, handed
//! to every middleware stage that needs to record something.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Counters and gauges the gateway updates as requests flow through it.
pub struct GatewayMetrics {
    registry: Registry,
    /// Total invocations that reached the handler successfully.
    pub invocations_total: IntCounter,
    /// Invocations rejected by a middleware stage, by reason.
    pub invocations_errors: IntCounterVec,
    /// Streams currently open through this gateway.
    pub streams_active: IntGauge,
    /// Stream data frames forwarded since startup.
    pub streams_sent: IntCounter,
}

impl GatewayMetrics {
    /// Build a fresh metrics set registered against its own [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let invocations_total = IntCounter::new(
            "trebuchet_gateway_invocations_total",
            "Invocations that passed every middleware stage",
        )
        .expect("static metric descriptor is valid");

        let invocations_errors = IntCounterVec::new(
            Opts::new(
                "trebuchet_gateway_invocations_errors",
                "Invocations rejected by a middleware stage",
            ),
            &["reason"],
        )
        .expect("static metric descriptor is valid");

        let streams_active = IntGauge::new(
            "trebuchet_gateway_streams_active",
            "Streaming invocations currently open",
        )
        .expect("static metric descriptor is valid");

        let streams_sent = IntCounter::new(
            "trebuchet_gateway_streams_sent_total",
            "Stream data frames forwarded to clients",
        )
        .expect("static metric descriptor is valid");

        registry
            .register(Box::new(invocations_total.clone()))
            .expect("metric registration does not collide");
        registry
            .register(Box::new(invocations_errors.clone()))
            .expect("metric registration does not collide");
        registry
            .register(Box::new(streams_active.clone()))
            .expect("metric registration does not collide");
        registry
            .register(Box::new(streams_sent.clone()))
            .expect("metric registration does not collide");

        Self {
            registry,
            invocations_total,
            invocations_errors,
            streams_active,
            streams_sent,
        }
    }

    /// Record a rejection with its cause (`"validation"`, `"rate_limit"`,
    /// `"authentication"`, `"authorization"`).
    pub fn record_rejection(&self, reason: &str) {
        self.invocations_errors.with_label_values(&[reason]).inc();
    }

    /// Render every registered metric in the Prometheus text exposition
    /// format.
    pub fn render(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .expect("text encoding of gathered metrics cannot fail");
        String::from_utf8(buffer).expect("prometheus text output is always utf-8")
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

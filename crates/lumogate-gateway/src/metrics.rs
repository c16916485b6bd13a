use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

/// Process-wide Prometheus collectors, registered once at startup and
/// cloned (cheaply — each metric type wraps an `Arc` internally) into
/// every handler that needs to touch one.
#[derive(Clone)]
pub struct GatewayMetrics {
    pub requests_total: IntCounter,
    pub streaming_requests_total: IntCounter,
    pub queue_depth: IntGauge,
    pub upstream_errors_total: IntCounter,
    pub tool_calls_detected_total: IntCounter,
    pub request_duration_seconds: Histogram,
}

impl GatewayMetrics {
    pub fn new(registry: &Registry) -> Self {
        let requests_total =
            IntCounter::with_opts(Opts::new("lumogate_requests_total", "Total chat/responses requests handled"))
                .expect("valid metric opts");
        let streaming_requests_total = IntCounter::with_opts(Opts::new(
            "lumogate_streaming_requests_total",
            "Total requests served via SSE streaming",
        ))
        .expect("valid metric opts");
        let queue_depth =
            IntGauge::with_opts(Opts::new("lumogate_queue_depth", "Requests currently queued for upstream"))
                .expect("valid metric opts");
        let upstream_errors_total = IntCounter::with_opts(Opts::new(
            "lumogate_upstream_errors_total",
            "Upstream transport or protocol errors observed",
        ))
        .expect("valid metric opts");
        let tool_calls_detected_total = IntCounter::with_opts(Opts::new(
            "lumogate_tool_calls_detected_total",
            "Tool calls recovered by the streaming tool detector",
        ))
        .expect("valid metric opts");
        let request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "lumogate_request_duration_seconds",
            "End-to-end request handling latency",
        ))
        .expect("valid metric opts");

        for collector in [
            Box::new(requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(streaming_requests_total.clone()),
            Box::new(queue_depth.clone()),
            Box::new(upstream_errors_total.clone()),
            Box::new(tool_calls_detected_total.clone()),
        ] {
            registry.register(collector).expect("metric names are unique");
        }
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("metric names are unique");

        Self {
            requests_total,
            streaming_requests_total,
            queue_depth,
            upstream_errors_total,
            tool_calls_detected_total,
            request_duration_seconds,
        }
    }
}

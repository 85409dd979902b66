use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub order_transitions_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub payment_events_total: IntCounterVec,
    pub fanout_emits_total: IntCounterVec,
    pub connected_clients: IntGauge,
    pub store_conflicts_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let order_transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order status changes by target status"),
            &["status"],
        )
        .expect("valid order_transitions_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Courier assignments by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of nearest-courier assignment in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let payment_events_total = IntCounterVec::new(
            Opts::new("payment_events_total", "Payment confirmations by source and outcome"),
            &["source", "outcome"],
        )
        .expect("valid payment_events_total metric");

        let fanout_emits_total = IntCounterVec::new(
            Opts::new("fanout_emits_total", "Real-time emits by outcome"),
            &["outcome"],
        )
        .expect("valid fanout_emits_total metric");

        let connected_clients =
            IntGauge::new("connected_clients", "Live real-time connections")
                .expect("valid connected_clients metric");

        let store_conflicts_total = IntCounter::new(
            "store_conflicts_total",
            "Optimistic concurrency conflicts that exhausted retries",
        )
        .expect("valid store_conflicts_total metric");

        registry
            .register(Box::new(order_transitions_total.clone()))
            .expect("register order_transitions_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(payment_events_total.clone()))
            .expect("register payment_events_total");
        registry
            .register(Box::new(fanout_emits_total.clone()))
            .expect("register fanout_emits_total");
        registry
            .register(Box::new(connected_clients.clone()))
            .expect("register connected_clients");
        registry
            .register(Box::new(store_conflicts_total.clone()))
            .expect("register store_conflicts_total");

        Self {
            registry,
            order_transitions_total,
            assignments_total,
            assignment_latency_seconds,
            payment_events_total,
            fanout_emits_total,
            connected_clients,
            store_conflicts_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

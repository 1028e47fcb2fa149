use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_attempts_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub loads_pending: IntGauge,
    pub drivers_on_shift: IntGauge,
    pub load_transitions_total: IntCounterVec,
    pub reassignments_needed_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_attempts_total = IntCounterVec::new(
            Opts::new("dispatch_attempts_total", "Dispatch attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_attempts_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of a dispatch attempt in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let loads_pending = IntGauge::new("loads_pending", "Loads waiting for an eligible driver")
            .expect("valid loads_pending metric");

        let drivers_on_shift = IntGauge::new("drivers_on_shift", "Drivers currently on shift")
            .expect("valid drivers_on_shift metric");

        let load_transitions_total = IntCounterVec::new(
            Opts::new("load_transitions_total", "Load state transitions by target status"),
            &["status"],
        )
        .expect("valid load_transitions_total metric");

        let reassignments_needed_total = IntCounter::new(
            "reassignments_needed_total",
            "Loads left without an on-shift driver",
        )
        .expect("valid reassignments_needed_total metric");

        registry
            .register(Box::new(dispatch_attempts_total.clone()))
            .expect("register dispatch_attempts_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(loads_pending.clone()))
            .expect("register loads_pending");
        registry
            .register(Box::new(drivers_on_shift.clone()))
            .expect("register drivers_on_shift");
        registry
            .register(Box::new(load_transitions_total.clone()))
            .expect("register load_transitions_total");
        registry
            .register(Box::new(reassignments_needed_total.clone()))
            .expect("register reassignments_needed_total");

        Self {
            registry,
            dispatch_attempts_total,
            dispatch_latency_seconds,
            loads_pending,
            drivers_on_shift,
            load_transitions_total,
            reassignments_needed_total,
        }
    }

    pub fn record_dispatch(&self, outcome: &str, elapsed_secs: f64) {
        self.dispatch_attempts_total
            .with_label_values(&[outcome])
            .inc();
        self.dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(elapsed_secs);
    }

    pub fn record_transition(&self, status: &str) {
        self.load_transitions_total
            .with_label_values(&[status])
            .inc();
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

use prometheus::{
    CounterVec, Encoder, HistogramVec, IntCounter, IntGauge, IntGaugeVec, Registry, TextEncoder,
    histogram_opts, opts,
};
use std::collections::HashMap;
use std::time::Duration;

use crate::model::DomainStatus;

/// Prometheus metrics registry and collectors for the control plane
pub struct CentralMetrics {
    registry: Registry,

    // RPC gateway metrics
    rpc_requests: CounterVec,
    rpc_duration: HistogramVec,
    rpc_in_flight: IntGauge,

    // Central service metrics
    serial_conflicts: IntCounter,

    // Propagation metrics
    propagation_attempts: CounterVec,
    propagation_results: CounterVec,
    propagation_queue_depth: IntGauge,

    // Zone inventory
    zones: IntGaugeVec,
}

impl CentralMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let rpc_requests = CounterVec::new(
            opts!(
                "zonecentral_rpc_requests_total",
                "Total number of central RPC calls by method and outcome"
            ),
            &["method", "outcome"],
        )?;

        let rpc_duration = HistogramVec::new(
            histogram_opts!(
                "zonecentral_rpc_duration_seconds",
                "Central RPC call duration in seconds as seen by the client"
            ),
            &["method"],
        )?;

        let rpc_in_flight = IntGauge::with_opts(opts!(
            "zonecentral_rpc_in_flight",
            "Requests currently being handled by the RPC server"
        ))?;

        let serial_conflicts = IntCounter::with_opts(opts!(
            "zonecentral_serial_conflicts_total",
            "Optimistic serial update collisions retried by the central service"
        ))?;

        let propagation_attempts = CounterVec::new(
            opts!(
                "zonecentral_propagation_attempts_total",
                "Name server update attempts by target and outcome"
            ),
            &["target", "outcome"],
        )?;

        let propagation_results = CounterVec::new(
            opts!(
                "zonecentral_propagation_results_total",
                "Concluded propagation rounds by resulting domain status"
            ),
            &["status"],
        )?;

        let propagation_queue_depth = IntGauge::with_opts(opts!(
            "zonecentral_propagation_queue_depth",
            "Propagation requests waiting for the pool manager"
        ))?;

        let zones = IntGaugeVec::new(
            opts!("zonecentral_zones", "Number of zones by status"),
            &["status"],
        )?;

        registry.register(Box::new(rpc_requests.clone()))?;
        registry.register(Box::new(rpc_duration.clone()))?;
        registry.register(Box::new(rpc_in_flight.clone()))?;
        registry.register(Box::new(serial_conflicts.clone()))?;
        registry.register(Box::new(propagation_attempts.clone()))?;
        registry.register(Box::new(propagation_results.clone()))?;
        registry.register(Box::new(propagation_queue_depth.clone()))?;
        registry.register(Box::new(zones.clone()))?;

        Ok(Self {
            registry,
            rpc_requests,
            rpc_duration,
            rpc_in_flight,
            serial_conflicts,
            propagation_attempts,
            propagation_results,
            propagation_queue_depth,
            zones,
        })
    }

    /// Record a completed client call
    pub fn record_rpc(&self, method: &str, outcome: &str, duration: Duration) {
        self.rpc_requests
            .with_label_values(&[method, outcome])
            .inc();
        self.rpc_duration
            .with_label_values(&[method])
            .observe(duration.as_secs_f64());
    }

    pub fn rpc_started(&self) {
        self.rpc_in_flight.inc();
    }

    pub fn rpc_finished(&self) {
        self.rpc_in_flight.dec();
    }

    pub fn record_serial_conflict(&self) {
        self.serial_conflicts.inc();
    }

    pub fn record_propagation_attempt(&self, target: &str, outcome: &str) {
        self.propagation_attempts
            .with_label_values(&[target, outcome])
            .inc();
    }

    pub fn record_propagation_result(&self, status: DomainStatus) {
        self.propagation_results
            .with_label_values(&[status.to_string().as_str()])
            .inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.propagation_queue_depth.set(depth as i64);
    }

    /// Refresh the zone inventory gauges
    pub fn update_zone_counts(&self, counts: &HashMap<DomainStatus, usize>) {
        for status in [DomainStatus::Pending, DomainStatus::Active, DomainStatus::Error] {
            let count = counts.get(&status).copied().unwrap_or(0);
            self.zones
                .with_label_values(&[status.to_string().as_str()])
                .set(count as i64);
        }
    }

    pub fn serial_conflicts(&self) -> u64 {
        self.serial_conflicts.get()
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = CentralMetrics::new().unwrap();
        metrics.record_rpc("create_domain", "ok", Duration::from_millis(3));
        metrics.record_propagation_attempt("ns1", "ack");
        metrics.update_zone_counts(&HashMap::from([(DomainStatus::Active, 2)]));

        let text = metrics.export().unwrap();
        assert!(text.contains("zonecentral_rpc_requests_total"));
        assert!(text.contains("method=\"create_domain\""));
        assert!(text.contains("zonecentral_zones{status=\"ACTIVE\"} 2"));
    }
}

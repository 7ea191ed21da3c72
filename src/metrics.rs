use std::time::Instant;

use prometheus::{histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry};

use crate::{Error, ServiceDescriptor};

#[derive(Clone)]
pub struct Metrics {
    pub probes: IntCounter,
    pub failures: IntCounterVec,
    pub probe_duration: HistogramVec,
    pub replication_gap: IntGaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let probe_duration = HistogramVec::new(
            histogram_opts!(
                "kuberlogic_watcher_probe_duration_seconds",
                "The duration of replication probes in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &[],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "kuberlogic_watcher_probe_failures_total",
                "probe failures per service"
            ),
            &["service", "error"],
        )
        .unwrap();
        let probes =
            IntCounter::new("kuberlogic_watcher_probes_total", "replication probes").unwrap();
        let replication_gap = IntGaugeVec::new(
            opts!(
                "kuberlogic_watcher_replication_gap",
                "probe records written on the master and not yet seen on a replica"
            ),
            &["service", "replica"],
        )
        .unwrap();

        Metrics {
            probes,
            failures,
            probe_duration,
            replication_gap,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.probe_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.probes.clone()))?;
        registry.register(Box::new(self.replication_gap.clone()))?;
        Ok(self)
    }

    pub fn probe_failure(&self, service: &ServiceDescriptor, e: &Error) {
        self.failures
            .with_label_values(&[service.to_string().as_ref(), e.metric_label().as_ref()])
            .inc()
    }

    pub fn replication_gap(&self, service: &ServiceDescriptor, replica: &str, gap: i64) {
        self.replication_gap
            .with_label_values(&[service.to_string().as_ref(), replica])
            .set(gap)
    }

    /// Stop exporting the gap of a replica that is gone or could not be read
    pub fn forget_replica(&self, service: &str, replica: &str) {
        // Absent series are fine
        let _ = self.replication_gap.remove_label_values(&[service, replica]);
    }

    pub fn count_and_measure(&self) -> ProbeMeasurer {
        self.probes.inc();
        ProbeMeasurer {
            start: Instant::now(),
            metric: self.probe_duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ProbeMeasurer {
    start: Instant,
    metric: HistogramVec,
}

impl Drop for ProbeMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[]).observe(duration);
    }
}

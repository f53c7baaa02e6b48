//! # Prometheus Metrics
//!
//! Workflow counters and latencies for one CLI run. There is no scrape
//! endpoint: a run is short-lived, so `--print-metrics` dumps the registry
//! in text exposition format when the command finishes.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use nftflow_orchestrator::workflow::{BatchReport, WorkflowError};
use nftflow_orchestrator::{OperationKind, WorkflowResult};

#[derive(Clone)]
pub struct WorkflowMetrics {
    registry: Registry,
    /// Finished workflows by operation and outcome (`applied` or the
    /// failing stage).
    pub workflows_total: IntCounterVec,
    /// Wall time from build to confirmation, successful workflows only.
    pub workflow_duration_seconds: HistogramVec,
    /// Batches by outcome (`settled`, `partial`, `aborted`).
    pub batches_total: IntCounterVec,
    pub batch_size: Histogram,
}

impl WorkflowMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("nftflow".into()), None)?;

        let workflows_total = IntCounterVec::new(
            Opts::new("workflows_total", "Finished workflows by operation and outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(workflows_total.clone()))?;

        let workflow_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "workflow_duration_seconds",
                "Time from build to confirmed settlement in seconds",
            )
            .buckets(vec![
                1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0,
            ]),
            &["operation"],
        )?;
        registry.register(Box::new(workflow_duration_seconds.clone()))?;

        let batches_total = IntCounterVec::new(
            Opts::new("batches_total", "Finished batches by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(batches_total.clone()))?;

        let batch_size = Histogram::with_opts(
            HistogramOpts::new("batch_size", "Requests per batch")
                .buckets(vec![1.0, 2.0, 3.0, 5.0, 10.0, 20.0, 50.0]),
        )?;
        registry.register(Box::new(batch_size.clone()))?;

        Ok(Self {
            registry,
            workflows_total,
            workflow_duration_seconds,
            batches_total,
            batch_size,
        })
    }

    pub fn record(&self, kind: OperationKind, result: &WorkflowResult) {
        let operation = kind.to_string();
        match result {
            Ok(receipt) => {
                self.workflows_total
                    .with_label_values(&[&operation, "applied"])
                    .inc();
                let seconds = receipt.duration().num_milliseconds().max(0) as f64 / 1000.0;
                self.workflow_duration_seconds
                    .with_label_values(&[&operation])
                    .observe(seconds);
            }
            Err(err) => self.record_failure(kind, err),
        }
    }

    pub fn record_failure(&self, kind: OperationKind, err: &WorkflowError) {
        let outcome = format!("failed_{}", err.stage());
        self.workflows_total
            .with_label_values(&[&kind.to_string(), &outcome])
            .inc();
    }

    /// Record a batch and every entry in it. Entries that were never
    /// submitted are only counted in the batch outcome.
    pub fn record_batch(&self, kinds: &[OperationKind], report: &BatchReport) {
        self.batch_size.observe(report.len() as f64);
        for (kind, entry) in kinds.iter().zip(&report.entries) {
            if let Some(receipt) = entry.receipt() {
                self.record(*kind, &Ok(receipt.clone()));
            } else if let Some(err) = entry.error() {
                self.record_failure(*kind, err);
            }
        }
        let outcome = if report.all_settled() {
            "settled"
        } else if report.aborted_at.is_some() {
            "aborted"
        } else {
            "partial"
        };
        self.batches_total.with_label_values(&[outcome]).inc();
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nftflow_orchestrator::workflow::{BatchEntry, Stage};
    use std::collections::BTreeMap;

    #[test]
    fn failures_are_labelled_by_stage() {
        let metrics = WorkflowMetrics::new().unwrap();
        metrics.record(
            OperationKind::Mint,
            &Err(WorkflowError::Cancelled {
                stage: Stage::Proof,
            }),
        );
        let text = metrics.encode().unwrap();
        assert!(text.contains("nftflow_workflows_total"));
        assert!(text.contains("outcome=\"failed_proof\""));
        assert!(text.contains("operation=\"mint\""));
    }

    #[test]
    fn aborted_batch_is_counted() {
        let metrics = WorkflowMetrics::new().unwrap();
        let report = BatchReport {
            base_nonces: BTreeMap::new(),
            entries: vec![
                BatchEntry::Failed(WorkflowError::Cancelled {
                    stage: Stage::Submit,
                }),
                BatchEntry::NotSubmitted,
            ],
            aborted_at: Some(0),
        };
        metrics.record_batch(&[OperationKind::Sell, OperationKind::Sell], &report);

        let text = metrics.encode().unwrap();
        assert!(text.contains("nftflow_batches_total{outcome=\"aborted\"} 1"));
        assert!(text.contains("nftflow_batch_size_count 1"));
    }
}

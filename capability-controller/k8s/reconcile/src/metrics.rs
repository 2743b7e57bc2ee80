use crate::{Applied, Error};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::Registry,
};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    reconciles: Family<ResultLabels, Counter>,
    operations: Family<OperationLabels, Counter>,
    duration: Family<CapabilityLabels, Histogram>,
}

/// Counts the operations of a single capability.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Recorder<'m> {
    metrics: &'m ReconcileMetrics,
    capability: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    capability: &'static str,
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OperationLabels {
    capability: &'static str,
    operation: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CapabilityLabels {
    capability: &'static str,
}

// === impl ReconcileMetrics ===

impl ReconcileMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reconciles = Family::<ResultLabels, Counter>::default();
        reg.register(
            "reconciles",
            "Count of reconciliation passes by result",
            reconciles.clone(),
        );

        let operations = Family::<OperationLabels, Counter>::default();
        reg.register(
            "operations",
            "Count of writes to derived resources and watched resources",
            operations.clone(),
        );

        let duration = Family::<CapabilityLabels, Histogram>::new_with_constructor(|| {
            // Passes are bounded by the reconcile timeout, which defaults to 30s.
            Histogram::new([0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0])
        });
        reg.register(
            "reconcile_duration_seconds",
            "Time taken by reconciliation passes",
            duration.clone(),
        );

        Self {
            reconciles,
            operations,
            duration,
        }
    }

    pub(crate) fn reconciled(
        &self,
        capability: &'static str,
        result: Result<(), &Error>,
        elapsed: Duration,
    ) {
        let result = match result {
            Ok(()) => "success",
            Err(error) => error.kind(),
        };
        self.reconciles
            .get_or_create(&ResultLabels { capability, result })
            .inc();
        self.duration
            .get_or_create(&CapabilityLabels { capability })
            .observe(elapsed.as_secs_f64());
    }

    pub(crate) fn applied(&self, capability: &'static str, applied: Applied) {
        let operation = match applied {
            Applied::Created => "create",
            Applied::Updated => "update",
            Applied::Unchanged => return,
        };
        self.operation(capability, operation);
    }

    pub(crate) fn recorder(&self, capability: &'static str) -> Recorder<'_> {
        Recorder {
            metrics: self,
            capability,
        }
    }

    pub(crate) fn operation(&self, capability: &'static str, operation: &'static str) {
        self.operations
            .get_or_create(&OperationLabels {
                capability,
                operation,
            })
            .inc();
    }
}

// === impl Recorder ===

impl Recorder<'_> {
    pub(crate) fn operation(&self, operation: &'static str) {
        self.metrics.operation(self.capability, operation);
    }
}

//! Optional process-wide sink for per-unit and per-request operations.

use std::sync::{Arc, OnceLock};

use crate::cache::Direction;
use crate::layout::model::UnitIndex;

/// One sub-request against a member device.
#[derive(Clone, Copy, Debug)]
pub struct UnitOp {
    pub unit: UnitIndex,
    pub op: Direction,
    pub bytes: u64,
    pub latency_seconds: f64,
    pub error: bool,
}

/// One application request, from admission to completion.
#[derive(Clone, Copy, Debug)]
pub struct ArrayOp {
    pub op: Direction,
    pub bytes: u64,
    pub latency_seconds: f64,
    pub error: bool,
}

pub trait MetricsSink: Send + Sync + 'static {
    fn record_unit_op(&self, op: UnitOp);
    fn record_array_op(&self, op: ArrayOp);
}

static METRICS_SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

/// `install_metrics_sink` sets the sink once per process; later calls return `false`.
pub fn install_metrics_sink(sink: Arc<dyn MetricsSink>) -> bool {
    METRICS_SINK.set(sink).is_ok()
}

pub fn is_enabled() -> bool {
    METRICS_SINK.get().is_some()
}

pub fn record_unit_op(op: UnitOp) {
    if let Some(sink) = METRICS_SINK.get() {
        sink.record_unit_op(op);
    }
}

pub fn record_array_op(op: ArrayOp) {
    if let Some(sink) = METRICS_SINK.get() {
        sink.record_array_op(op);
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct TestSink {
        unit_ops: Mutex<Vec<UnitOp>>,
        array_ops: Mutex<Vec<ArrayOp>>,
    }

    impl MetricsSink for TestSink {
        fn record_unit_op(&self, op: UnitOp) {
            self.unit_ops.lock().push(op);
        }

        fn record_array_op(&self, op: ArrayOp) {
            self.array_ops.lock().push(op);
        }
    }

    #[test]
    fn metrics_sink_records_ops_when_enabled() {
        let sink = Arc::new(TestSink::default());

        assert!(install_metrics_sink(sink.clone()));
        assert!(is_enabled());
        assert!(!install_metrics_sink(Arc::new(TestSink::default())));

        record_unit_op(UnitOp {
            unit: 3,
            op: Direction::Write,
            bytes: 2048,
            latency_seconds: 0.15,
            error: false,
        });
        record_array_op(ArrayOp {
            op: Direction::Read,
            bytes: 512,
            latency_seconds: 0.05,
            error: true,
        });

        // Other tests in this binary may record through the same global sink.
        let unit_ops = sink.unit_ops.lock();
        assert!(unit_ops.iter().any(|o| o.unit == 3 && o.bytes == 2048 && !o.error));
        let array_ops = sink.array_ops.lock();
        assert!(array_ops.iter().any(|o| o.bytes == 512 && o.error));
    }
}

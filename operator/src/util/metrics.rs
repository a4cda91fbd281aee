#![cfg(feature = "metrics")]

use prometheus::{HistogramVec, IntCounterVec, opts, register_histogram_vec, register_int_counter_vec};

/// Per-reconciler Prometheus instrumentation. One instance is built per
/// controller (`project`, `control-plane`, `cluster`) and threaded through
/// `ContextData`.
pub struct ControllerMetrics {
    /// Total reconcile invocations, labelled by resource name/namespace.
    pub reconcile_counter: IntCounterVec,
    /// Time spent in the read phase (`determine_action`), labelled by the
    /// action decided.
    pub read_histogram: HistogramVec,
    /// Time spent in the write phase (executing the decided action).
    pub write_histogram: HistogramVec,
    /// Count of each action taken, labelled by action name.
    pub action_counter: IntCounterVec,
}

impl ControllerMetrics {
    pub fn new(subsystem: &str) -> Self {
        let reconcile_counter = register_int_counter_vec!(
            opts!(
                format!("argus_{subsystem}_reconcile_total"),
                "Total number of reconciliations"
            )
            .namespace("argus"),
            &["name", "namespace"]
        )
        .expect("register reconcile_counter");

        let read_histogram = register_histogram_vec!(
            format!("argus_{subsystem}_read_seconds"),
            "Time spent determining the action to take",
            &["name", "namespace", "action"]
        )
        .expect("register read_histogram");

        let write_histogram = register_histogram_vec!(
            format!("argus_{subsystem}_write_seconds"),
            "Time spent executing the decided action",
            &["name", "namespace", "action"]
        )
        .expect("register write_histogram");

        let action_counter = register_int_counter_vec!(
            opts!(
                format!("argus_{subsystem}_action_total"),
                "Total number of actions taken, by kind"
            )
            .namespace("argus"),
            &["name", "namespace", "action"]
        )
        .expect("register action_counter");

        Self {
            reconcile_counter,
            read_histogram,
            write_histogram,
            action_counter,
        }
    }
}

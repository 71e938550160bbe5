//! Prometheus metrics for the invoice reminder service.

use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

/// Reminder attempts by outcome (sent, skipped, failed).
pub static REMINDERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "invoice_reminders_total",
            "Scheduled reminder evaluations by outcome"
        ),
        &["outcome"]
    )
    .expect("Failed to register REMINDERS_TOTAL")
});

pub static CYCLE_RESETS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "invoice_cycle_resets_total",
            "Clients returned to pending at the start of a billing cycle"
        ),
        &["trigger"]
    )
    .expect("Failed to register CYCLE_RESETS_TOTAL")
});

pub static PAYMENT_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "invoice_payment_transitions_total",
            "Payment state transitions by direction"
        ),
        &["transition"]
    )
    .expect("Failed to register PAYMENT_TRANSITIONS_TOTAL")
});

pub static JOBS_FIRED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("invoice_scheduler_jobs_fired_total", "Scheduler job firings"),
        &["job_type"]
    )
    .expect("Failed to register JOBS_FIRED_TOTAL")
});

/// Error counter for alerting
pub static JOB_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "invoice_scheduler_job_errors_total",
            "Scheduler job failures by job type and error kind"
        ),
        &["job_type", "error_kind"]
    )
    .expect("Failed to register JOB_ERRORS_TOTAL")
});

pub fn record_reminder(outcome: &str) {
    REMINDERS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_cycle_reset(trigger: &str) {
    CYCLE_RESETS_TOTAL.with_label_values(&[trigger]).inc();
}

pub fn record_payment_transition(transition: &str) {
    PAYMENT_TRANSITIONS_TOTAL
        .with_label_values(&[transition])
        .inc();
}

pub fn record_job_fired(job_type: &str) {
    JOBS_FIRED_TOTAL.with_label_values(&[job_type]).inc();
}

pub fn record_job_error(job_type: &str, error_kind: &str) {
    JOB_ERRORS_TOTAL
        .with_label_values(&[job_type, error_kind])
        .inc();
}

/// Touch every metric so `/metrics` lists them before the first event.
pub fn init_metrics() {
    Lazy::force(&REMINDERS_TOTAL);
    Lazy::force(&CYCLE_RESETS_TOTAL);
    Lazy::force(&PAYMENT_TRANSITIONS_TOTAL);
    Lazy::force(&JOBS_FIRED_TOTAL);
    Lazy::force(&JOB_ERRORS_TOTAL);
}

/// Get all metrics as a Prometheus-formatted string
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_counters_appear_in_output() {
        init_metrics();
        record_reminder("sent");
        record_job_error("reminder", "dispatch_failure");

        let output = get_metrics();
        assert!(output.contains("invoice_reminders_total"));
        assert!(output.contains("invoice_scheduler_job_errors_total"));
    }
}

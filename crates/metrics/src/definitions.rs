//! Metric name and label definitions.

/// Per-recipient delivery and run lifecycle metrics
pub mod mailer {
    /// Delivery attempts, labelled by `outcome` (success / failed)
    pub const SENDS_TOTAL: &str = "herald_mailer_sends_total";
    /// Transport call duration in seconds
    pub const SEND_DURATION_SECONDS: &str = "herald_mailer_send_duration_seconds";
    /// Rate-limit responses received from the transport
    pub const RATE_LIMITED_TOTAL: &str = "herald_mailer_rate_limited_total";
    /// Send loops started
    pub const RUNS_STARTED_TOTAL: &str = "herald_mailer_runs_started_total";
    /// Send loops finished, labelled by `outcome` (completed / stopped / failed)
    pub const RUNS_FINISHED_TOTAL: &str = "herald_mailer_runs_finished_total";
    /// Send loops currently running
    pub const RUNNING: &str = "herald_mailer_running";
    /// Recipients added to existing mailers
    pub const RECIPIENTS_ADDED_TOTAL: &str = "herald_mailer_recipients_added_total";
}

/// Pool registry metrics
pub mod pool {
    /// Mailers currently registered
    pub const MAILERS: &str = "herald_pool_mailers";
    /// Mailers created through the pool
    pub const CREATED_TOTAL: &str = "herald_pool_created_total";
    /// Mailers rebuilt from storage
    pub const RESTORED_TOTAL: &str = "herald_pool_restored_total";
    /// Mailers destroyed or deleted
    pub const REMOVED_TOTAL: &str = "herald_pool_removed_total";
}

/// Common label keys
pub mod labels {
    pub const OUTCOME: &str = "outcome";
    pub const METHOD: &str = "method";
}

/// Histogram bucket definitions
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Transport call duration buckets (in seconds)
    /// Covers 10ms to 1 minute
    pub static SEND_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0,
        ]
    });
}

//! Metrics and tracing instrumentation.
//!
//! With the `metrics` feature, [`METRICS`] registers OpenTelemetry instruments
//! exported through Prometheus. With the `tracing` feature,
//! [`tracing_helpers`] creates the spans entered around statements,
//! transactions and units of work.

#[cfg(feature = "metrics")]
pub use self::otel::{BerthMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use opentelemetry_prometheus::PrometheusExporter;
    use std::time::Duration;

    pub static METRICS: Lazy<BerthMetrics> = Lazy::new(BerthMetrics::init);

    pub struct BerthMetrics {
        pub exporter: Option<PrometheusExporter>,
        pub queries_total: Counter<u64>,
        pub query_errors_total: Counter<u64>,
        pub query_duration: Histogram<f64>,
        pub connection_wait_duration: Histogram<f64>,
        pub unit_of_work_retries: Counter<u64>,
        pub units_of_work: Counter<u64>,
    }

    impl BerthMetrics {
        pub fn init() -> Self {
            let exporter = match opentelemetry_prometheus::exporter().build() {
                Ok(exporter) => Some(exporter),
                Err(e) => {
                    log::warn!("prometheus exporter unavailable: {e}");
                    None
                }
            };
            let meter = global::meter("berth");

            let queries_total = meter
                .u64_counter("berth_queries_total")
                .with_description("Total statements executed")
                .build();

            let query_errors_total = meter
                .u64_counter("berth_query_errors_total")
                .with_description("Statements that returned an error")
                .build();

            let query_duration = meter
                .f64_histogram("berth_query_duration_seconds")
                .with_description("Duration of statements")
                .build();

            let connection_wait_duration = meter
                .f64_histogram("berth_connection_wait_seconds")
                .with_description("Time spent establishing connections")
                .build();

            let unit_of_work_retries = meter
                .u64_counter("berth_unit_of_work_retries_total")
                .with_description("Units of work retried after a serialization conflict")
                .build();

            let units_of_work = meter
                .u64_counter("berth_unit_of_work_total")
                .with_description("Finished units of work by outcome")
                .build();

            Self {
                exporter,
                queries_total,
                query_errors_total,
                query_duration,
                connection_wait_duration,
                unit_of_work_retries,
                units_of_work,
            }
        }

        pub fn record_query(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_connection_wait(&self, elapsed: Duration) {
            self.connection_wait_duration
                .record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_retry(&self) {
            self.unit_of_work_retries.add(1, &[]);
        }

        /// `outcome` is one of `committed`, `rolled_back`, `simulated`.
        pub fn record_unit_of_work(&self, outcome: &'static str) {
            self.units_of_work
                .add(1, &[KeyValue::new("outcome", outcome)]);
        }
    }
}

/// Span constructors for the `tracing` feature.
#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{debug_span, info_span, Span};

    pub fn execute_query_span(sql: &str) -> Span {
        debug_span!("berth.query", sql = %sql)
    }

    pub fn begin_transaction_span() -> Span {
        debug_span!("berth.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        debug_span!("berth.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        debug_span!("berth.transaction.rollback")
    }

    pub fn acquire_connection_span() -> Span {
        debug_span!("berth.connection.acquire")
    }

    pub fn unit_of_work_span(uid: i64, attempt: u32, simulate: bool) -> Span {
        info_span!("berth.unit_of_work", uid, attempt, simulate)
    }
}

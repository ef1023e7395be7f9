//! Prometheus metrics exporter

use crate::config::MetricsConfig;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tracing::info;

/// Install the recorder and serve `/metrics` on the configured address
pub fn init_metrics(config: &MetricsConfig) -> Result<(), BuildError> {
    let listen: SocketAddr = config
        .listen
        .parse()
        .map_err(|e| BuildError::FailedToCreateHTTPListener(format!("{}: {}", config.listen, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(listen)
        .set_buckets_for_metric(
            Matcher::Full("dialer_job_duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )?
        .install()?;

    describe();
    info!("Metrics exporter listening on {}", listen);
    Ok(())
}

fn describe() {
    describe_counter!(
        "dialer_control_total",
        "Campaign control commands accepted"
    );
    describe_counter!("dialer_dials_total", "Agent legs placed");
    describe_counter!(
        "dialer_dials_failed_total",
        "Leg placements rejected by the provider"
    );
    describe_counter!(
        "dialer_webhooks_total",
        "Provider webhooks received"
    );
    describe_counter!("dialer_jobs_total", "Background jobs executed");
    describe_histogram!(
        "dialer_job_duration_seconds",
        "Background job duration in seconds"
    );
    describe_counter!(
        "billing_charges_total",
        "Billing charges requested"
    );
}

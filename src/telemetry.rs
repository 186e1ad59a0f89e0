use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::config::ObservabilityConfig;

/// Initialize structured logging. `RUST_LOG` takes precedence over the
/// configured level. Safe to call more than once; later calls are no-ops.
pub fn init_telemetry(observability: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&observability.log_level))?;

    let initialized = if observability.json_logs {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .try_init()
    };

    if initialized.is_ok() {
        tracing::info!(
            log_level = %observability.log_level,
            json = observability.json_logs,
            "petition-flow telemetry initialized"
        );
    }
    Ok(())
}

/// Generate a correlation ID for linking the logs of one request
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one engine operation
pub fn create_transition_span(
    operation: &str,
    petition_id: Option<i64>,
    actor_id: i64,
    correlation_id: &str,
) -> tracing::Span {
    tracing::info_span!(
        "petition_transition",
        operation = operation,
        petition.id = petition_id,
        actor.id = actor_id,
        correlation.id = correlation_id,
    )
}

pub fn shutdown_telemetry() {
    tracing::info!("petition-flow telemetry shutdown complete");
}

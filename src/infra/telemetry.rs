use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
/// Logs go to stderr; stdout carries rendered output and worker responses.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "mdtools_render_total",
            Unit::Count,
            "Total number of pipeline executions."
        );
        describe_counter!(
            "mdtools_render_failed_total",
            Unit::Count,
            "Total number of pipeline executions that produced an error fragment."
        );
        describe_histogram!(
            "mdtools_render_ms",
            Unit::Milliseconds,
            "Pipeline execution latency in milliseconds."
        );
        describe_counter!(
            "mdtools_render_stale_discarded_total",
            Unit::Count,
            "Total number of completed renders dropped because a newer result was applied."
        );
        describe_counter!(
            "mdtools_diagram_rendered_total",
            Unit::Count,
            "Total number of diagram containers rendered to SVG."
        );
        describe_counter!(
            "mdtools_diagram_failed_total",
            Unit::Count,
            "Total number of diagram containers left as source after an engine error."
        );
        describe_histogram!(
            "mdtools_diagram_activation_ms",
            Unit::Milliseconds,
            "Diagram activation pass latency in milliseconds."
        );
    });
}

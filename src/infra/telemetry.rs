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

pub const METRIC_DEMO_VIEWS: &str = "vetrina_demo_views_total";
pub const METRIC_DEMO_UPLOADS: &str = "vetrina_demo_uploads_total";
pub const METRIC_DEMO_UPLOAD_FAILURES: &str = "vetrina_demo_upload_failures_total";
pub const METRIC_PASSWORD_THROTTLED: &str = "vetrina_demo_password_throttled_total";
pub const METRIC_DEMO_EXTRACT_MS: &str = "vetrina_demo_extract_ms";

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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
            METRIC_DEMO_VIEWS,
            Unit::Count,
            "Total number of demo index documents served."
        );
        describe_counter!(
            METRIC_DEMO_UPLOADS,
            Unit::Count,
            "Total number of demo archives installed."
        );
        describe_counter!(
            METRIC_DEMO_UPLOAD_FAILURES,
            Unit::Count,
            "Total number of demo archives rejected or failed during extraction."
        );
        describe_counter!(
            METRIC_PASSWORD_THROTTLED,
            Unit::Count,
            "Total number of demo password attempts refused by the rate limiter."
        );
        describe_histogram!(
            METRIC_DEMO_EXTRACT_MS,
            Unit::Milliseconds,
            "Demo archive extraction latency in milliseconds."
        );
    });
}

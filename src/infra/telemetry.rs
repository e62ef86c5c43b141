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
            "prerender_cache_hit_total",
            Unit::Count,
            "Snapshot lookups answered with a fresh entry."
        );
        describe_counter!(
            "prerender_cache_miss_total",
            Unit::Count,
            "Snapshot lookups that found nothing stored."
        );
        describe_counter!(
            "prerender_cache_stale_total",
            Unit::Count,
            "Snapshot lookups that found an entry older than the TTL."
        );
        describe_counter!(
            "prerender_render_claimed_total",
            Unit::Count,
            "Renders claimed by moving a key into the rendering state."
        );
        describe_counter!(
            "prerender_render_deduplicated_total",
            Unit::Count,
            "Render requests dropped because the key was already rendering."
        );
        describe_counter!(
            "prerender_render_failed_total",
            Unit::Count,
            "Renders that ended in the failed state."
        );
        describe_histogram!(
            "prerender_render_ms",
            Unit::Milliseconds,
            "Render engine latency in milliseconds."
        );
        describe_counter!(
            "prerender_registry_reconciled_total",
            Unit::Count,
            "Interrupted renders reset to idle during startup."
        );
    });
}

//! Metric name constants.

use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config;

pub const SESSIONS_LAUNCHED: &str = "groupwarden.sessions.launched"; // Counter.
pub const SESSION_RESULT_FAILURES: &str = "groupwarden.sessions.result_failures"; // Counter.

pub const COMMENTS_STORED: &str = "groupwarden.comments.stored"; // Counter.
pub const COMMENTS_SKIPPED: &str = "groupwarden.comments.skipped"; // Counter.
pub const TOXICITY_FALLBACKS: &str = "groupwarden.toxicity.fallbacks"; // Counter.
pub const TOXICITY_RATE_LIMITED: &str = "groupwarden.toxicity.rate_limited"; // Counter.

pub const VIOLATIONS_WARNED: &str = "groupwarden.violations.warned"; // Counter.
pub const VIOLATIONS_BANNED: &str = "groupwarden.violations.banned"; // Counter.

pub const DOMAIN_FAILURES: &str = "groupwarden.domain.failures"; // Counter.

/// Must be ran exactly once on startup. This will declare all of the instruments for `metrics`.
pub fn setup(config: Option<&config::MetricConfig>) -> anyhow::Result<()> {
    describe_counter!(SESSIONS_LAUNCHED, "Scrape sessions spawned.");
    describe_counter!(
        SESSION_RESULT_FAILURES,
        "Scrape sessions whose result could not be reconciled."
    );

    describe_counter!(COMMENTS_STORED, "Scraped comments persisted.");
    describe_counter!(
        COMMENTS_SKIPPED,
        "Scraped comments skipped as invalid, duplicate or empty."
    );
    describe_counter!(
        TOXICITY_FALLBACKS,
        "Comments stored with a zero score because scoring failed."
    );
    describe_counter!(
        TOXICITY_RATE_LIMITED,
        "Rate-limited toxicity requests that were retried."
    );

    describe_counter!(VIOLATIONS_WARNED, "Warnings issued.");
    describe_counter!(VIOLATIONS_BANNED, "Bans issued.");

    describe_counter!(DOMAIN_FAILURES, "Moderation domains that failed during a cycle.");

    if let Some(config) = config {
        match config {
            config::MetricConfig::PrometheusListener(listener) => {
                PrometheusBuilder::new()
                    .with_http_listener(listener.address)
                    .install()
                    .context("failed to install metrics exporter")?;
            }
        }
    }

    Ok(())
}

//! Configuration types.

use std::time::Duration;

use crate::flow::status::FlowStatus;

/// Core engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Spam score at or above which a response goes straight to `spam_detected`.
    pub spam_threshold: u8,
    /// Bound on a single oracle call.
    pub oracle_timeout: Duration,
    /// Oracle attempts before routing to manual review.
    pub oracle_max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spam_threshold: 70,
            oracle_timeout: Duration::from_secs(30),
            oracle_max_retries: 3,
        }
    }
}

impl EngineConfig {
    /// Read overrides from `SCHEDFORM_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            spam_threshold: env_parse("SCHEDFORM_SPAM_THRESHOLD", defaults.spam_threshold),
            oracle_timeout: Duration::from_secs(env_parse(
                "SCHEDFORM_ORACLE_TIMEOUT_SECS",
                defaults.oracle_timeout.as_secs(),
            )),
            oracle_max_retries: env_parse(
                "SCHEDFORM_ORACLE_MAX_RETRIES",
                defaults.oracle_max_retries,
            ),
        }
    }
}

/// Abandonment reaper configuration.
///
/// There is deliberately no single global timeout: each status idles at its
/// own pace (a respondent mid-form moves in minutes, one weighing curated
/// times may take a day).
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Sweep cadence as a cron expression (seconds-precision, `cron` crate).
    pub schedule: String,
    pub form_started_mins: i64,
    pub form_completed_mins: i64,
    pub qualifying_mins: i64,
    pub qualified_mins: i64,
    pub scheduling_options_mins: i64,
    pub booking_pending_mins: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            schedule: "0 */5 * * * *".to_string(), // every 5 minutes
            form_started_mins: 30,
            form_completed_mins: 45,
            qualifying_mins: 15,
            qualified_mins: 60,
            scheduling_options_mins: 24 * 60,
            booking_pending_mins: 2 * 60,
        }
    }
}

impl ReaperConfig {
    /// Read overrides from `SCHEDFORM_REAPER_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            schedule: std::env::var("SCHEDFORM_REAPER_CRON")
                .unwrap_or(defaults.schedule),
            form_started_mins: env_parse(
                "SCHEDFORM_REAPER_FORM_STARTED_MINS",
                defaults.form_started_mins,
            ),
            form_completed_mins: env_parse(
                "SCHEDFORM_REAPER_FORM_COMPLETED_MINS",
                defaults.form_completed_mins,
            ),
            qualifying_mins: env_parse(
                "SCHEDFORM_REAPER_QUALIFYING_MINS",
                defaults.qualifying_mins,
            ),
            qualified_mins: env_parse(
                "SCHEDFORM_REAPER_QUALIFIED_MINS",
                defaults.qualified_mins,
            ),
            scheduling_options_mins: env_parse(
                "SCHEDFORM_REAPER_SCHEDULING_OPTIONS_MINS",
                defaults.scheduling_options_mins,
            ),
            booking_pending_mins: env_parse(
                "SCHEDFORM_REAPER_BOOKING_PENDING_MINS",
                defaults.booking_pending_mins,
            ),
        }
    }

    /// Inactivity threshold for a status; None for terminal statuses.
    pub fn threshold_minutes(&self, status: FlowStatus) -> Option<i64> {
        match status {
            FlowStatus::FormStarted => Some(self.form_started_mins),
            FlowStatus::FormCompleted => Some(self.form_completed_mins),
            FlowStatus::Qualifying => Some(self.qualifying_mins),
            FlowStatus::Qualified => Some(self.qualified_mins),
            FlowStatus::SchedulingOptions => Some(self.scheduling_options_mins),
            FlowStatus::BookingPending => Some(self.booking_pending_mins),
            _ => None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_cover_every_active_status() {
        let config = ReaperConfig::default();
        for status in FlowStatus::active_statuses() {
            assert!(
                config.threshold_minutes(*status).is_some(),
                "{status} needs a threshold"
            );
        }
        assert!(config.threshold_minutes(FlowStatus::Abandoned).is_none());
    }

    #[test]
    fn scheduling_options_waits_longest() {
        let config = ReaperConfig::default();
        assert!(config.scheduling_options_mins > config.form_started_mins);
        assert!(config.scheduling_options_mins > config.booking_pending_mins);
    }
}

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::time::date_to_record_name;

/// Last-known upstream counter state for one title. Overwritten in place on
/// every sampler tick, never deleted. The next delta is always computed
/// against this value, so it must advance even when the delta was 0 to avoid
/// re-counting minutes.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct PointerRecord {
    pub cumulative_minutes: i64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub sampled_at: DateTime<Utc>,
}

/// One polling observation with a positive delta against the previous
/// cumulative value. Immutable once written; the reconstructor is the only
/// consumer. Both calendar dates are derived from the instant at write time
/// so readers never need timezone rules.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct SampleRecord {
    pub title: Arc<str>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub instant: DateTime<Utc>,
    pub delta_minutes: i64,
    pub eastern_date: NaiveDate,
    pub utc_date: NaiveDate,
}

impl SampleRecord {
    /// Identity of the sample. Appending the same (title, instant) twice is
    /// a no-op.
    pub fn record_id(&self) -> String {
        format!("{}#{}", self.title, self.instant.timestamp())
    }
}

/// One reconstructed sitting: contiguous 30-minute blocks merged under the
/// gap rule. Keyed by (title, UTC processing day, sequence index). Start and
/// end are stored both as UTC instants and as Eastern-offset instants;
/// `local_date` is the Eastern date of the start, which can differ from
/// `utc_day` for evening sessions.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct PeriodRecord {
    pub title: Arc<str>,
    pub utc_day: NaiveDate,
    pub seq: u32,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub end: DateTime<Utc>,
    pub start_eastern: DateTime<FixedOffset>,
    pub end_eastern: DateTime<FixedOffset>,
    pub duration_minutes: i64,
    pub local_date: NaiveDate,
}

impl PeriodRecord {
    pub fn record_id(&self) -> String {
        format!(
            "{}#{}#{}",
            self.title,
            date_to_record_name(self.utc_day),
            self.seq
        )
    }
}

//! Minute-aligned evaluation windows.

use chrono::{DateTime, TimeDelta, Utc};

use streamscale_core::truncate_to_minute;

/// `minutes` bucket timestamps counting back from the minute before `now`.
///
/// The minute containing `now` is still filling up, so the first entry is
/// the last complete one. Most recent first.
pub fn minute_window(now: DateTime<Utc>, minutes: u32) -> Vec<DateTime<Utc>> {
    let current = truncate_to_minute(now);
    (1..=i64::from(minutes))
        .map(|i| current - TimeDelta::minutes(i))
        .collect()
}

/// The split and merge windows for one cycle, built from the same `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingWindows {
    pub now: DateTime<Utc>,
    pub split: Vec<DateTime<Utc>>,
    pub merge: Vec<DateTime<Utc>>,
}

impl ScalingWindows {
    pub fn build(now: DateTime<Utc>, split_minutes: u32, merge_minutes: u32) -> Self {
        Self {
            now,
            split: minute_window(now, split_minutes),
            merge: minute_window(now, merge_minutes),
        }
    }
}

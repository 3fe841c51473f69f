//! # Frequency Classifier
//!
//! Buckets a channel into an ingestion cadence by subscriber count. Pure and
//! total: a channel without statistics, or with a hidden subscriber count,
//! lands in the lowest tier.

use crate::error::{Result, SyncError};
use bridge_traits::source::ChannelStatistics;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ingestion cadence, ordered from least to most frequent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FrequencyBucket {
    Monthly,
    Weekly,
    Daily,
}

impl FrequencyBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrequencyBucket::Monthly => "monthly",
            FrequencyBucket::Weekly => "weekly",
            FrequencyBucket::Daily => "daily",
        }
    }
}

impl FromStr for FrequencyBucket {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "monthly" => Ok(FrequencyBucket::Monthly),
            "weekly" => Ok(FrequencyBucket::Weekly),
            "daily" => Ok(FrequencyBucket::Daily),
            other => Err(SyncError::Validation(format!(
                "Unknown frequency bucket: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for FrequencyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum subscriber counts per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyThresholds {
    pub daily_min_subscribers: u64,
    pub weekly_min_subscribers: u64,
}

impl Default for FrequencyThresholds {
    fn default() -> Self {
        Self {
            daily_min_subscribers: 100_000,
            weekly_min_subscribers: 1_000,
        }
    }
}

impl FrequencyThresholds {
    pub fn validate(&self) -> Result<()> {
        if self.daily_min_subscribers <= self.weekly_min_subscribers {
            return Err(SyncError::Validation(format!(
                "Daily threshold ({}) must be above the weekly threshold ({})",
                self.daily_min_subscribers, self.weekly_min_subscribers
            )));
        }
        Ok(())
    }
}

pub fn classify(
    statistics: Option<&ChannelStatistics>,
    thresholds: &FrequencyThresholds,
) -> FrequencyBucket {
    match statistics.and_then(|s| s.subscriber_count) {
        Some(n) if n >= thresholds.daily_min_subscribers => FrequencyBucket::Daily,
        Some(n) if n >= thresholds.weekly_min_subscribers => FrequencyBucket::Weekly,
        _ => FrequencyBucket::Monthly,
    }
}

/// Whether a bucket is part of this cycle's active set.
pub fn is_due(bucket: FrequencyBucket, active: &[FrequencyBucket]) -> bool {
    active.contains(&bucket)
}

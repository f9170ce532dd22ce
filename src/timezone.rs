//! Capture-time normalization into the reference timezone.
//!
//! The offset is the reference zone's offset *now*, not at the segment's
//! instant. Folder names and multipart keys of existing archives depend on
//! this, so it must stay that way.

use chrono::{DateTime, Offset, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};

use crate::error::SnapError;

pub const DEFAULT_REFERENCE_ZONE: &str = "America/Detroit";

const DST_CORRECTION_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetSnapshot {
    pub utc_offset_secs: i64,
    pub observing_dst: bool,
}

impl OffsetSnapshot {
    pub fn capture(zone: Tz) -> Self {
        Self::at(zone, Utc::now())
    }

    pub fn at(zone: Tz, now: DateTime<Utc>) -> Self {
        let offset = zone.offset_from_utc_datetime(&now.naive_utc());
        Self {
            utc_offset_secs: i64::from(offset.fix().local_minus_utc()),
            observing_dst: offset.dst_offset().num_seconds() != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeNormalizer {
    snapshot: OffsetSnapshot,
}

impl TimeNormalizer {
    pub fn new(snapshot: OffsetSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn for_zone(name: &str) -> Result<Self, SnapError> {
        let zone: Tz = name
            .parse()
            .map_err(|_| SnapError::InvalidTimezone(name.to_string()))?;
        Ok(Self::new(OffsetSnapshot::capture(zone)))
    }

    pub fn snapshot(&self) -> OffsetSnapshot {
        self.snapshot
    }

    pub fn normalize(&self, utc_epoch_secs: i64) -> i64 {
        // Feed timestamps are untrusted; clamp instead of overflowing.
        let shifted = utc_epoch_secs.saturating_add(self.snapshot.utc_offset_secs);
        if self.snapshot.observing_dst {
            shifted
        } else {
            shifted.saturating_add(DST_CORRECTION_SECS)
        }
    }
}

/// Formats a normalized timestamp as a naive wall-clock string.
pub fn format_local(local_epoch_secs: i64, pattern: &str) -> String {
    DateTime::from_timestamp(local_epoch_secs, 0)
        .unwrap_or_default()
        .format(pattern)
        .to_string()
}

pub fn date_folder(local_epoch_secs: i64) -> String {
    format_local(local_epoch_secs, "%Y-%m-%d")
}

pub fn file_stamp(local_epoch_secs: i64) -> String {
    format_local(local_epoch_secs, "%Y-%m-%d_%H-%M-%S")
}

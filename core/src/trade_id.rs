//! Time-ordered trade identifiers.
//!
//! A [`TradeId`] wraps a UUID laid out as version 7: the 48 most significant
//! bits carry the Unix timestamp in milliseconds, followed by the version
//! nibble, 74 random bits and the RFC 4122 variant. Byte-wise ordering of two
//! ids therefore matches the chronological order of the instants they were
//! generated at, which is what lets the trade views cluster on `trade_id` and
//! answer date-range queries with a plain key-range scan.
//!
//! For range queries every instant maps to an inclusive pair of bounds,
//! [`TradeId::lower_bound`] and [`TradeId::upper_bound`]: the smallest and
//! largest ids that can be generated at that millisecond.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::{Builder, Uuid};

/// Largest timestamp representable in the 48-bit millisecond field.
const MAX_UNIX_MILLIS: i64 = (1 << 48) - 1;

/// Random bits following the timestamp: `rand_a` (12) + `rand_b` (62).
const RANDOM_BYTES: usize = 10;

/// A unique, time-ordered trade identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeId(Uuid);

impl TradeId {
    /// Generate a new id stamped with the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::at(Utc::now())
    }

    /// Generate a new id stamped with `instant`.
    ///
    /// Instants outside the representable range (before the Unix epoch or
    /// past year 10889) are clamped to the nearest representable millisecond.
    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        let random: [u8; RANDOM_BYTES] = rand::random();
        Self::from_parts(unix_millis(instant), &random)
    }

    /// Smallest id that can be generated at `instant`.
    #[must_use]
    pub fn lower_bound(instant: DateTime<Utc>) -> Self {
        Self::from_parts(unix_millis(instant), &[0x00; RANDOM_BYTES])
    }

    /// Largest id that can be generated at `instant`.
    #[must_use]
    pub fn upper_bound(instant: DateTime<Utc>) -> Self {
        Self::from_parts(unix_millis(instant), &[0xFF; RANDOM_BYTES])
    }

    /// Inclusive id bounds covering the half-open interval `[start, end)`.
    ///
    /// The end is excluded by stepping back one millisecond, the resolution
    /// of the timestamp field. Returns `None` when the interval is empty.
    #[must_use]
    pub fn range_bounds(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<(Self, Self)> {
        if end <= start {
            return None;
        }
        let last = end
            .checked_sub_signed(Duration::milliseconds(1))
            .unwrap_or(start);
        Some((Self::lower_bound(start), Self::upper_bound(last)))
    }

    fn from_parts(millis: u64, random: &[u8; RANDOM_BYTES]) -> Self {
        // The builder masks in the version and variant bits.
        Self(Builder::from_unix_timestamp_millis(millis, random).into_uuid())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Milliseconds since the Unix epoch encoded in the id.
    #[must_use]
    pub fn unix_millis(&self) -> u64 {
        let bytes = self.0.as_bytes();
        bytes[..6]
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }

    /// The instant the id was generated at, to millisecond precision.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        // 48-bit millis always fit an i64 and chrono's supported range.
        Utc.timestamp_millis_opt(self.unix_millis() as i64)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

fn unix_millis(instant: DateTime<Utc>) -> u64 {
    instant.timestamp_millis().clamp(0, MAX_UNIX_MILLIS) as u64
}

impl From<Uuid> for TradeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<TradeId> for Uuid {
    fn from(id: TradeId) -> Self {
        id.0
    }
}

impl FromStr for TradeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn test_ids_carry_version_and_timestamp() {
        let t = instant(1_700_000_000_123);
        let id = TradeId::at(t);

        assert_eq!(id.as_uuid().get_version_num(), 7);
        assert_eq!(id.unix_millis(), 1_700_000_000_123);
        assert_eq!(id.timestamp(), t);
    }

    #[test]
    fn test_ids_sort_by_instant() {
        let earlier = TradeId::at(instant(1_000));
        let later = TradeId::at(instant(1_001));
        assert!(earlier < later);
    }

    #[test]
    fn test_same_instant_ids_are_distinct() {
        let t = instant(1_650_000_000_000);
        let ids: std::collections::HashSet<_> = (0..1_000).map(|_| TradeId::at(t)).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn test_bounds_enclose_instant() {
        let t = instant(1_650_000_000_000);
        let lower = TradeId::lower_bound(t);
        let upper = TradeId::upper_bound(t);

        for _ in 0..100 {
            let id = TradeId::at(t);
            assert!(lower <= id && id <= upper);
        }
        assert!(TradeId::at(instant(1_649_999_999_999)) < lower);
        assert!(TradeId::at(instant(1_650_000_000_001)) > upper);
    }

    #[test]
    fn test_range_bounds_exclude_end() {
        let start = instant(10_000);
        let end = instant(20_000);
        let (lower, upper) = TradeId::range_bounds(start, end).unwrap();

        assert_eq!(lower, TradeId::lower_bound(start));
        assert_eq!(upper, TradeId::upper_bound(instant(19_999)));
        assert!(TradeId::at(end) > upper);
        assert!(TradeId::range_bounds(end, start).is_none());
        assert!(TradeId::range_bounds(start, start).is_none());
    }

    #[test]
    fn test_pre_epoch_instant_clamps() {
        let id = TradeId::lower_bound(instant(-5_000));
        assert_eq!(id.unix_millis(), 0);
    }

    #[test]
    fn test_range_bounds_at_earliest_instant() {
        let start = DateTime::<Utc>::MIN_UTC;
        let end = start + Duration::microseconds(10);
        let (lower, upper) = TradeId::range_bounds(start, end).unwrap();
        assert_eq!(lower.unix_millis(), 0);
        assert!(lower <= upper);
    }

    #[test]
    fn test_parse_and_display() {
        let id = TradeId::now();
        let parsed: TradeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}

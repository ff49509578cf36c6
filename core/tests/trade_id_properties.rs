//! Property tests for trade identifier ordering and range bounds

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use trade_views_core::TradeId;

/// Instants between 1970 and roughly 2100, in milliseconds
fn arb_millis() -> impl Strategy<Value = i64> {
    0i64..4_102_444_800_000i64
}

fn instant(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).unwrap()
}

proptest! {
    #[test]
    fn prop_ids_follow_instant_order(a in arb_millis(), b in arb_millis()) {
        prop_assume!(a != b);
        let (t1, t2) = if a < b { (a, b) } else { (b, a) };

        prop_assert!(TradeId::at(instant(t1)) < TradeId::at(instant(t2)));
    }

    #[test]
    fn prop_bounds_contain_only_own_instant(t in arb_millis(), other in arb_millis()) {
        let lower = TradeId::lower_bound(instant(t));
        let upper = TradeId::upper_bound(instant(t));
        let id = TradeId::at(instant(t));

        prop_assert!(lower <= id && id <= upper);

        let foreign = TradeId::at(instant(other));
        if other != t {
            prop_assert!(foreign < lower || foreign > upper);
        }
    }

    #[test]
    fn prop_timestamp_round_trips(t in arb_millis()) {
        prop_assert_eq!(TradeId::at(instant(t)).timestamp(), instant(t));
    }

    #[test]
    fn prop_range_bounds_cover_half_open_interval(
        start in arb_millis(),
        len in 1i64..86_400_000i64,
    ) {
        let (lower, upper) = TradeId::range_bounds(instant(start), instant(start + len)).unwrap();

        let first = TradeId::at(instant(start));
        let last = TradeId::at(instant(start + len - 1));
        let past_end = TradeId::at(instant(start + len));

        prop_assert!(lower <= first && first <= upper);
        prop_assert!(lower <= last && last <= upper);
        prop_assert!(past_end > upper);
    }
}

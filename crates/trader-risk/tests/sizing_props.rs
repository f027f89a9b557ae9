//! 사이징 속성 테스트.

use proptest::prelude::*;
use rust_decimal::Decimal;
use trader_core::{DecimalExt, Direction};
use trader_risk::{position_size, protective_levels};

fn decimal(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

proptest! {
    #[test]
    fn size_never_exceeds_risk_budget(
        equity in 1i64..100_000_000,
        risk_bp in 1i64..1_000,
        stop in 1i64..10_000_000,
        precision in 0u32..8,
    ) {
        let equity = decimal(equity);
        let risk_pct = Decimal::new(risk_bp, 2);
        let stop = decimal(stop);

        let size = position_size(equity, risk_pct, stop, precision);
        prop_assert!(size >= Decimal::ZERO);
        prop_assert!(size * stop <= equity.pct_of(risk_pct));
        prop_assert!(size.scale() <= precision);
    }

    #[test]
    fn size_is_deterministic(
        equity in 1i64..100_000_000,
        stop in 1i64..10_000_000,
    ) {
        let a = position_size(decimal(equity), Decimal::ONE, decimal(stop), 4);
        let b = position_size(decimal(equity), Decimal::ONE, decimal(stop), 4);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn protective_levels_bracket_entry(
        entry in 100i64..10_000_000,
        stop in 1i64..100,
        tp in 1i64..100,
    ) {
        let entry = decimal(entry);
        let (stop, tp) = (decimal(stop), decimal(tp));

        let (long_stop, long_tp) = protective_levels(Direction::Long, entry, stop, tp);
        prop_assert!(long_stop < entry && entry < long_tp);

        let (short_stop, short_tp) = protective_levels(Direction::Short, entry, stop, tp);
        prop_assert!(short_tp < entry && entry < short_stop);
    }
}

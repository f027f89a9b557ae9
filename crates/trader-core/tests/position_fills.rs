//! 포지션 체결 누적 속성 테스트
//!
//! 임의의 체결 시퀀스에 대해 순수량과 손익 회계가 일관적인지 검증합니다.

use proptest::prelude::*;
use rust_decimal::Decimal;
use trader_core::{BrokerAccountId, Position, Side, UserId};

fn fill_strategy() -> impl Strategy<Value = (bool, u32, u32)> {
    (any::<bool>(), 1u32..50, 50u32..150)
}

proptest! {
    #[test]
    fn net_size_is_signed_sum_of_fills(fills in prop::collection::vec(fill_strategy(), 1..30)) {
        let (first_buy, first_size, first_price) = fills[0];
        let side = if first_buy { Side::Buy } else { Side::Sell };
        let mut position = Position::open(
            UserId(7),
            BrokerAccountId::new(),
            "X",
            side,
            Decimal::from(first_size),
            Decimal::from(first_price),
        );
        let mut expected = side.signed(Decimal::from(first_size));

        for (buy, size, price) in fills.iter().skip(1) {
            if !position.is_open() {
                break;
            }
            let side = if *buy { Side::Buy } else { Side::Sell };
            position.apply_fill(side, Decimal::from(*size), Decimal::from(*price));
            expected += side.signed(Decimal::from(*size));
        }

        if position.is_open() {
            prop_assert_eq!(position.net_size, expected);
            prop_assert!(position.entry_price > Decimal::ZERO);
        } else {
            prop_assert!(position.net_size.is_zero());
            prop_assert!(position.closed_at.is_some());
            prop_assert_eq!(position.unrealized_pnl, Decimal::ZERO);
        }
    }

    #[test]
    fn round_trip_at_same_price_realizes_nothing(size in 1u32..1000, price in 1u32..10_000) {
        let mut position = Position::open(
            UserId(1),
            BrokerAccountId::new(),
            "X",
            Side::Buy,
            Decimal::from(size),
            Decimal::from(price),
        );
        let realized = position.apply_fill(Side::Sell, Decimal::from(size), Decimal::from(price));
        prop_assert_eq!(realized, Decimal::ZERO);
        prop_assert!(!position.is_open());
    }
}

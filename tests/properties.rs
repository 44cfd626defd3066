use candlecore::engine::{Ledger, LedgerConfig, Order, OrderSide, OrderStatus, OrderType};
use proptest::prelude::*;

const SYMBOL: &str = "BTC/USD";

#[derive(Debug, Clone)]
enum Op {
    Mark(f64),
    Buy(f64),
    /// `true` sells the whole position, `false` half of it.
    Sell(bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1.0f64..1_000.0).prop_map(Op::Mark),
        (0.01f64..5.0).prop_map(Op::Buy),
        any::<bool>().prop_map(Op::Sell),
    ]
}

fn market(side: OrderSide, quantity: f64) -> Order {
    Order::from((SYMBOL, OrderType::Market(0.0), quantity, side))
}

fn apply(ledger: &Ledger, op: &Op) {
    match op {
        Op::Mark(price) => ledger.update_market_price(SYMBOL, *price),
        Op::Buy(quantity) => {
            let _ = ledger.place_order(&mut market(OrderSide::Buy, *quantity));
        }
        Op::Sell(all) => {
            let Some(position) = ledger.position(SYMBOL) else {
                return;
            };
            let quantity = if *all || position.quantity() <= 0.01 {
                position.quantity()
            } else {
                position.quantity() / 2.0
            };
            let _ = ledger.place_order(&mut market(OrderSide::Sell, quantity));
        }
    }
}

/// Cash the ledger must hold given its trades and open position.
fn expected_balance(ledger: &Ledger) -> f64 {
    let taker = ledger.config().taker_fee;
    let realized: f64 = ledger
        .trades()
        .iter()
        .map(|t| t.net_pnl - t.entry_price * t.quantity * taker)
        .sum();
    let open = ledger.position(SYMBOL).map_or(0.0, |p| p.cost() * (1.0 + taker));
    ledger.initial_balance() + realized - open
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn balance_is_conserved(start in 1.0f64..1_000.0, ops in prop::collection::vec(op(), 1..60)) {
        let ledger = Ledger::new(LedgerConfig::default()).unwrap();
        ledger.update_market_price(SYMBOL, start);

        for op in &ops {
            let before = ledger.balance();
            apply(&ledger, op);
            if let Op::Mark(_) = op {
                prop_assert_eq!(before, ledger.balance());
            }

            let expected = expected_balance(&ledger);
            prop_assert!((ledger.balance() - expected).abs() < 1e-6 * expected.abs().max(1.0));
            prop_assert!(ledger.balance() >= 0.0);

            let account = ledger.account();
            prop_assert!((account.equity - account.balance - account.unrealized_pnl()).abs() < 1e-9);
        }
    }

    #[test]
    fn rejected_orders_leave_state_unchanged(
        ops in prop::collection::vec(op(), 0..30),
        oversize in 1.5f64..100.0,
    ) {
        let ledger = Ledger::new(LedgerConfig::default()).unwrap();
        ledger.update_market_price(SYMBOL, 100.0);
        for op in &ops {
            apply(&ledger, op);
        }

        let before = ledger.snapshot();
        let mark = ledger.mark_price(SYMBOL).unwrap();
        let mut buy = market(OrderSide::Buy, ledger.balance() / mark * oversize);
        prop_assert!(ledger.place_order(&mut buy).is_err());
        prop_assert_eq!(buy.status(), OrderStatus::Rejected);

        let held = ledger.position(SYMBOL).map_or(0.0, |p| p.quantity());
        let mut sell = market(OrderSide::Sell, held + 1.0);
        prop_assert!(ledger.place_order(&mut sell).is_err());

        let after = ledger.snapshot();
        prop_assert_eq!(before.balance, after.balance);
        prop_assert_eq!(before.fees_paid, after.fees_paid);
        prop_assert_eq!(before.positions, after.positions);
        prop_assert_eq!(before.trades, after.trades);
    }

    #[test]
    fn entry_price_is_volume_weighted(
        p1 in 1.0f64..500.0,
        q1 in 0.01f64..5.0,
        p2 in 1.0f64..500.0,
        q2 in 0.01f64..5.0,
    ) {
        let config = LedgerConfig { slippage_bps: 0.0, ..Default::default() };
        let ledger = Ledger::new(config).unwrap();

        ledger.update_market_price(SYMBOL, p1);
        ledger.place_order(&mut market(OrderSide::Buy, q1)).unwrap();
        ledger.update_market_price(SYMBOL, p2);
        ledger.place_order(&mut market(OrderSide::Buy, q2)).unwrap();

        let position = ledger.position(SYMBOL).unwrap();
        let expected = (p1 * q1 + p2 * q2) / (q1 + q2);
        prop_assert!((position.entry_price() - expected).abs() < 1e-6);
        prop_assert!((position.quantity() - (q1 + q2)).abs() < 1e-9);
    }

    #[test]
    fn closing_within_epsilon_removes_position(
        quantity in 0.01f64..5.0,
        residual in 0.0f64..0.0001,
    ) {
        let ledger = Ledger::new(LedgerConfig::default()).unwrap();
        ledger.update_market_price(SYMBOL, 100.0);
        ledger.place_order(&mut market(OrderSide::Buy, quantity)).unwrap();
        ledger.place_order(&mut market(OrderSide::Sell, quantity - residual)).unwrap();

        prop_assert!(ledger.position(SYMBOL).is_none());
        prop_assert!(ledger.account().positions.is_empty());
        prop_assert_eq!(ledger.trades().len(), 1);
    }
}

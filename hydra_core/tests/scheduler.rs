// hydra_core/tests/scheduler.rs
//
// End-to-end coverage of the tick state machine, order matching and
// portfolio aggregation working together through the public `Hydra`
// surface, rather than one module in isolation.

use std::rc::Rc;

use hydra_core::asset::Asset;
use hydra_core::exchange::Exchange;
use hydra_core::order::OrderState;
use hydra_core::order::OrderExecutionType;
use hydra_core::portfolio::OrderTargetType;
use hydra_core::strategy::Strategy;
use hydra_core::tracer::PortfolioTracerType;
use hydra_core::{Hydra, HydraConfig, HydraError, HydraResult};

fn two_column_asset(id: &str, broker: &str, timestamps: &[i64], open: &[f64], close: &[f64]) -> Rc<Asset> {
    let mut a = Asset::new(id, "EX1", broker, 0);
    a.load_headers(&["OPEN".to_string(), "CLOSE".to_string()]).unwrap();
    let mut values = Vec::with_capacity(open.len() + close.len());
    values.extend_from_slice(open);
    values.extend_from_slice(close);
    a.load_data(&values, timestamps, timestamps.len(), 2, false).unwrap();
    Rc::new(a)
}

fn single_asset_exchange() -> Exchange {
    let mut ex = Exchange::new("EX1");
    ex.register_asset(two_column_asset("AAA", "BR1", &[0, 1, 2], &[10.0, 11.0, 12.0], &[10.5, 11.5, 12.5])).unwrap();
    ex
}

struct BuyOnFirstTick {
    asset_id: &'static str,
    units: f64,
    exec: OrderExecutionType,
}

impl Strategy for BuyOnFirstTick {
    fn on_open(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        if ctx.current_tick() == Some(0) {
            ctx.place_market_order("master", self.asset_id, self.units, "s1", self.exec, -1)?;
        }
        Ok(())
    }

    fn on_close(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }
}

#[test]
fn eager_market_order_fills_same_tick_at_that_ticks_open() {
    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(single_asset_exchange()).unwrap();
    hydra
        .register_strategy("s1", Box::new(BuyOnFirstTick { asset_id: "AAA", units: 10.0, exec: OrderExecutionType::Eager }))
        .unwrap();
    hydra.build().unwrap();
    hydra.run(0, 0).unwrap();

    assert_eq!(hydra.current_tick(), Some(2));

    let position = hydra.get_position("master", "AAA").unwrap().unwrap();
    assert_eq!(position.units, 10.0);
    assert_eq!(position.average_price, 10.0);

    assert_eq!(hydra.cash("master").unwrap(), 100_000.0 - 10.0 * 10.0);
    assert!((hydra.unrealized_pl("master").unwrap() - 10.0 * (12.5 - 10.0)).abs() < 1e-9);
    assert!((hydra.nlv("master").unwrap() - (100_000.0 - 100.0 + 25.0)).abs() < 1e-9);

    let trades = hydra.trade_history("master").unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].fill_price, 10.0);
    assert_eq!(trades[0].fill_tick, 0);

    let orders = hydra.order_history();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].order_state, OrderState::Filled);
    assert_eq!(orders[0].fill_time, Some(0));
}

struct SellLazyOnClose {
    asset_id: &'static str,
    fire_at: i64,
    units: f64,
}

impl Strategy for SellLazyOnClose {
    fn on_open(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }

    fn on_close(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        if ctx.current_tick() == Some(self.fire_at) {
            ctx.place_market_order("master", self.asset_id, self.units, "s1", OrderExecutionType::Lazy, -1)?;
        }
        Ok(())
    }
}

#[test]
fn lazy_order_submitted_on_close_fills_the_following_ticks_open_not_this_ticks() {
    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(single_asset_exchange()).unwrap();
    hydra
        .register_strategy("s1", Box::new(SellLazyOnClose { asset_id: "AAA", fire_at: 0, units: 5.0 }))
        .unwrap();
    hydra.build().unwrap();
    hydra.run(0, 0).unwrap();

    let trades = hydra.trade_history("master").unwrap();
    assert_eq!(trades.len(), 1);
    // Submitted during tick 0's on_close, after the EAGER match cycle
    // for tick 0 already ran — the earliest it can fill is tick 1's OPEN.
    assert_eq!(trades[0].fill_tick, 1);
    assert_eq!(trades[0].fill_price, 11.0);
}

struct PlaceZeroTtlLazyOrder {
    asset_id: &'static str,
    fire_at: i64,
}

impl Strategy for PlaceZeroTtlLazyOrder {
    fn on_open(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }

    fn on_close(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        if ctx.current_tick() == Some(self.fire_at) {
            ctx.place_market_order("master", self.asset_id, 1.0, "s1", OrderExecutionType::Lazy, 0)?;
        }
        Ok(())
    }
}

#[test]
fn zero_ttl_order_expires_when_its_only_match_attempt_finds_a_parked_asset() {
    let mut ex = Exchange::new("EX1");
    ex.register_asset(two_column_asset("AAA", "BR1", &[0, 1, 2], &[10.0, 11.0, 12.0], &[10.5, 11.5, 12.5])).unwrap();
    // BBB has no row at tick 1, so it is parked exactly when the LAZY
    // order submitted at tick 0 would otherwise match.
    ex.register_asset(two_column_asset("BBB", "BR1", &[0, 2], &[20.0, 22.0], &[20.5, 22.5])).unwrap();

    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(ex).unwrap();
    hydra
        .register_strategy("s1", Box::new(PlaceZeroTtlLazyOrder { asset_id: "BBB", fire_at: 0 }))
        .unwrap();
    hydra.build().unwrap();
    hydra.run(0, 0).unwrap();

    let orders = hydra.order_history();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].order_state, OrderState::Expired);
    assert_eq!(orders[0].fill_time, None);
    assert!(hydra.get_position("master", "BBB").unwrap().is_none());
}

struct CountOpens {
    opens: usize,
}

impl Strategy for CountOpens {
    fn on_open(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        self.opens += 1;
        Ok(())
    }

    fn on_close(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }
}

#[test]
fn goto_datetime_advances_the_clock_without_invoking_strategy_callbacks() {
    let mut ex = Exchange::new("EX1");
    ex.register_asset(two_column_asset("AAA", "BR1", &[0, 1, 2, 3], &[10.0, 11.0, 12.0, 13.0], &[10.5, 11.5, 12.5, 13.5]))
        .unwrap();

    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(ex).unwrap();
    hydra.register_strategy("s1", Box::new(CountOpens { opens: 0 })).unwrap();
    hydra.build().unwrap();

    hydra.goto_datetime(2).unwrap();
    assert_eq!(hydra.current_tick(), Some(2));

    hydra.run(0, 0).unwrap();
    assert_eq!(hydra.current_tick(), Some(3));
}

struct TradeOnlyAtChild {
    asset_id: &'static str,
}

impl Strategy for TradeOnlyAtChild {
    fn build(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        ctx.create_sub_portfolio("master", "child", 100_000.0)?;
        Ok(())
    }

    fn on_open(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        if ctx.current_tick() == Some(0) {
            ctx.place_market_order("child", self.asset_id, 10.0, "s1", OrderExecutionType::Eager, -1)?;
        }
        Ok(())
    }

    fn on_close(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }
}

#[test]
fn master_nlv_rolls_up_a_sub_portfolios_nlv_exactly_when_master_carries_no_own_position() {
    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(single_asset_exchange()).unwrap();
    hydra.register_strategy("s1", Box::new(TradeOnlyAtChild { asset_id: "AAA" })).unwrap();
    hydra.build().unwrap();

    // `build()` on Hydra wires exchanges/brokers; the strategy's own
    // `build` hook (which creates the sub-portfolio) only runs once
    // `run`/`goto_datetime` steps the clock the first time, so drive
    // one full run here rather than calling a separate hook.
    hydra.run(0, 0).unwrap();

    assert_eq!(hydra.cash("master").unwrap(), hydra.cash("child").unwrap());
    assert!((hydra.nlv("master").unwrap() - hydra.nlv("child").unwrap()).abs() < 1e-9);

    let master_position = hydra.get_position("master", "AAA").unwrap().unwrap();
    let child_position = hydra.get_position("child", "AAA").unwrap().unwrap();
    assert_eq!(master_position.units, child_position.units);
    assert_eq!(master_position.average_price, child_position.average_price);
}

struct TracedBuyOnFirstTick {
    asset_id: &'static str,
}

impl Strategy for TracedBuyOnFirstTick {
    fn build(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        ctx.enable_tracer("master", PortfolioTracerType::Value)
    }

    fn on_open(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        if ctx.current_tick() == Some(0) {
            ctx.place_market_order("master", self.asset_id, 10.0, "s1", OrderExecutionType::Eager, -1)?;
        }
        Ok(())
    }

    fn on_close(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }
}

#[test]
fn replay_reproduces_an_identical_nlv_history() {
    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(single_asset_exchange()).unwrap();
    hydra.register_strategy("s1", Box::new(TracedBuyOnFirstTick { asset_id: "AAA" })).unwrap();
    hydra.build().unwrap();
    hydra.run(0, 0).unwrap();

    let first_run: Vec<f64> = hydra.portfolio("master").unwrap().tracers.value.as_ref().unwrap().nlv_history().to_vec();
    assert_eq!(first_run.len(), 3);

    hydra.replay().unwrap();

    let second_run: Vec<f64> = hydra.portfolio("master").unwrap().tracers.value.as_ref().unwrap().nlv_history().to_vec();
    assert_eq!(first_run, second_run);
}

struct TargetSizer {
    asset_id: &'static str,
}

impl Strategy for TargetSizer {
    fn on_open(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        if ctx.current_tick() == Some(0) {
            // 50% of a 100,000 portfolio at the first tick's CLOSE of
            // 10.5 is ~4761.9 units; epsilon is tight enough that this
            // always submits a nonzero order from a flat start.
            ctx.order_target_size("master", self.asset_id, 0.5, "s1", 1e-6, OrderTargetType::Pct, OrderExecutionType::Eager, -1)?;
        }
        Ok(())
    }

    fn on_close(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }
}

#[test]
fn order_target_size_pct_sizes_against_nlv_at_submission_time() {
    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(single_asset_exchange()).unwrap();
    hydra.register_strategy("s1", Box::new(TargetSizer { asset_id: "AAA" })).unwrap();
    hydra.build().unwrap();
    hydra.run(0, 0).unwrap();

    let position = hydra.get_position("master", "AAA").unwrap().unwrap();
    // Desired units are computed from NLV at submission (tick 0, before
    // any fill): 100_000 * 0.5 / close(0) = 50_000 / 10.5.
    let expected_units = 0.5 * 100_000.0 / 10.5;
    assert!((position.units - expected_units).abs() < 1e-6);
}

#[test]
fn build_is_idempotent_and_a_second_call_does_not_duplicate_the_merged_clock() {
    let mut hydra = Hydra::new(HydraConfig::new(0, 1_000.0).unwrap());
    hydra.register_exchange(single_asset_exchange()).unwrap();
    hydra.build().unwrap();
    hydra.build().unwrap();
    // Three ticks total; a duplicated merged clock would make `run`
    // iterate six times and still over-count fills, so checking the
    // exchange's own index is the most direct signal here.
    assert_eq!(hydra.exchange("EX1").unwrap().get_datetime_index_view(), &[0, 1, 2]);
}

#[test]
fn order_ids_are_monotonic_across_submissions() {
    struct TwoOrders;
    impl Strategy for TwoOrders {
        fn on_open(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
            if ctx.current_tick() == Some(0) {
                let first = ctx.place_market_order("master", "AAA", 1.0, "s1", OrderExecutionType::Lazy, -1)?;
                let second = ctx.place_market_order("master", "AAA", 1.0, "s1", OrderExecutionType::Lazy, -1)?;
                assert!(second > first);
            }
            Ok(())
        }

        fn on_close(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
            Ok(())
        }
    }

    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(single_asset_exchange()).unwrap();
    hydra.register_strategy("s1", Box::new(TwoOrders)).unwrap();
    hydra.build().unwrap();
    hydra.run(0, 0).unwrap();

    let orders = hydra.order_history();
    assert_eq!(orders.len(), 2);
    assert!(orders[0].order_id < orders[1].order_id);
}

struct ZeroUnitOrder;

impl Strategy for ZeroUnitOrder {
    fn on_open(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        if ctx.current_tick() == Some(0) {
            let result = ctx.place_market_order("master", "AAA", 0.0, "s1", OrderExecutionType::Eager, -1);
            assert!(matches!(result, Err(HydraError::Data { .. })));
        }
        Ok(())
    }

    fn on_close(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }
}

#[test]
fn zero_unit_market_order_is_rejected_as_data_error() {
    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(single_asset_exchange()).unwrap();
    hydra.register_strategy("s1", Box::new(ZeroUnitOrder)).unwrap();
    hydra.build().unwrap();
    hydra.run(0, 0).unwrap();

    assert!(hydra.order_history().is_empty());
}

struct CloseNonexistentPosition;

impl Strategy for CloseNonexistentPosition {
    fn on_open(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        if ctx.current_tick() == Some(0) {
            let order_ids = ctx.close_position("master", Some("AAA"), "s1", OrderExecutionType::Eager, -1)?;
            assert!(order_ids.is_empty());
        }
        Ok(())
    }

    fn on_close(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }
}

#[test]
fn close_position_with_no_open_position_is_a_noop() {
    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(single_asset_exchange()).unwrap();
    hydra.register_strategy("s1", Box::new(CloseNonexistentPosition)).unwrap();
    hydra.build().unwrap();
    hydra.run(0, 0).unwrap();

    assert!(hydra.order_history().is_empty());
}

struct MeanReversionOnChild {
    asset_id: &'static str,
    has_position: bool,
}

impl Strategy for MeanReversionOnChild {
    fn build(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        ctx.create_sub_portfolio("master", "test_portfolio1", 100_000.0)?;
        ctx.enable_tracer("master", PortfolioTracerType::Value)?;
        ctx.enable_tracer("test_portfolio1", PortfolioTracerType::Value)?;
        Ok(())
    }

    fn on_open(&mut self, _ctx: &mut Hydra) -> HydraResult<()> {
        Ok(())
    }

    fn on_close(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        let close = ctx.asset(self.asset_id)?.get("CLOSE", 0)?;
        if !self.has_position && close <= 97.0 {
            ctx.place_market_order("test_portfolio1", self.asset_id, 100.0, "s1", OrderExecutionType::Lazy, -1)?;
            self.has_position = true;
        } else if self.has_position && close >= 101.5 {
            ctx.close_position("test_portfolio1", Some(self.asset_id), "s1", OrderExecutionType::Lazy, -1)?;
            self.has_position = false;
        }
        Ok(())
    }
}

#[test]
fn mean_reversion_on_a_sub_portfolio_keeps_master_and_child_cash_and_nlv_in_lockstep() {
    // Buy 100 units when CLOSE drops to 97 or below, close out again
    // once CLOSE recovers to 101.5 or above — all trading happens on
    // the child, so master must track it exactly tick for tick. A
    // trailing tick is included so the LAZY close order submitted on
    // the second-to-last tick has a following OPEN to fill against.
    let timestamps = [0, 1, 2, 3, 4, 5, 6];
    let close = [100.0, 100.0, 97.0, 99.0, 100.0, 101.5, 102.0];

    let mut ex = Exchange::new("EX1");
    ex.register_asset(two_column_asset("asset_id2", "BR1", &timestamps, &close, &close)).unwrap();

    let mut hydra = Hydra::new(HydraConfig::new(0, 100_000.0).unwrap());
    hydra.register_exchange(ex).unwrap();
    hydra
        .register_strategy("s1", Box::new(MeanReversionOnChild { asset_id: "asset_id2", has_position: false }))
        .unwrap();
    hydra.build().unwrap();
    hydra.run(0, 0).unwrap();

    let master = hydra.portfolio("master").unwrap();
    let child = hydra.portfolio("test_portfolio1").unwrap();
    let master_cash = master.tracers.value.as_ref().unwrap().cash_history();
    let child_cash = child.tracers.value.as_ref().unwrap().cash_history();
    let master_nlv = master.tracers.value.as_ref().unwrap().nlv_history();
    let child_nlv = child.tracers.value.as_ref().unwrap().nlv_history();

    assert_eq!(master_cash.len(), 7);
    for i in 0..master_cash.len() {
        assert!((master_cash[i] - child_cash[i]).abs() < 1e-9);
        assert!((master_nlv[i] - child_nlv[i]).abs() < 1e-9);
    }

    // Closed out again by tick 5, so master carries no residual position.
    assert!(hydra.get_position("master", "asset_id2").unwrap().is_none());
}

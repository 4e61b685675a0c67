// hydra_core/src/hydra.rs

//! The top-level scheduler. Owns every Exchange, Broker and the
//! portfolio tree, drives the five-step tick state machine, and is
//! the single context object strategies are handed at their two
//! suspension points.
//!
//! Grounded on `Farukon_2_0::backtest::Backtest::run_backtest`'s event
//! loop shape (poll for the next event, dispatch by kind, advance),
//! collapsed from an `mpsc`-channel dispatch loop into direct method
//! calls: `Hydra` is single-threaded and has exactly one consumer per
//! event, so there is nothing a channel would buy.

use indexmap::IndexMap;
use itertools::Itertools;

use crate::asset::Asset;
use crate::broker::Broker;
use crate::error::{HydraError, HydraResult};
use crate::exchange::Exchange;
use crate::ids::{AssetId, BrokerId, ExchangeId, IdCounter, PortfolioId, StrategyId};
use crate::order::{Order, OrderExecutionType, OrderRecord, OrderState, OrderType, Trade};
use crate::portfolio::{OrderTargetType, Portfolio, PortfolioTree};
use crate::position::Position;
use crate::settings::HydraConfig;
use crate::strategy::{RegisteredStrategy, Strategy};
use crate::tracer::{PortfolioTracerType, TracerEvent};

/// Where `Hydra` is within one tick. Order submission is only legal
/// from `OnOpen`/`OnClose` — i.e. from inside a strategy callback
/// (spec.md §4.6/§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    OnOpen,
    OnClose,
}

/// A `(order_id, fill_price)` pair staged for promotion, tagged with
/// the broker it belongs to so the match cycle doesn't need to search.
struct StagedOrder {
    broker_id: BrokerId,
    order_id: u64,
}

pub struct Hydra {
    config: HydraConfig,
    exchanges: IndexMap<ExchangeId, Exchange>,
    brokers: IndexMap<BrokerId, Broker>,
    asset_routes: IndexMap<AssetId, (ExchangeId, BrokerId)>,
    portfolios: PortfolioTree,
    strategies: Vec<RegisteredStrategy>,
    order_ids: IdCounter,
    trade_ids: IdCounter,
    merged_clock: Vec<i64>,
    tick_cursor: usize,
    current_tick: Option<i64>,
    built: bool,
    phase: Phase,
    staged_eager: Vec<StagedOrder>,
    staged_lazy: Vec<StagedOrder>,
}

fn resolve_close(exchanges: &IndexMap<ExchangeId, Exchange>, asset_routes: &IndexMap<AssetId, (ExchangeId, BrokerId)>, asset_id: &str) -> Option<f64> {
    let (exchange_id, _) = asset_routes.get(asset_id)?;
    exchanges.get(exchange_id)?.asset(asset_id).ok()?.get("CLOSE", 0).ok()
}

fn resolve_open_fill_price(exchanges: &IndexMap<ExchangeId, Exchange>, order: &Order) -> Option<f64> {
    exchanges.get(&order.exchange_id)?.get_asset_feature(&order.asset_id, "OPEN", 0).ok().flatten()
}

/// Free function (rather than a `&self` method) so a log line can be
/// emitted while another field of `Hydra` is already mutably
/// borrowed.
fn log_line(configured_level: u8, level: u8, message: impl std::fmt::Display) {
    if configured_level >= level {
        println!("[hydra] {message}");
    }
}

impl Hydra {
    pub fn new(config: HydraConfig) -> Self {
        Self {
            portfolios: PortfolioTree::new(config.starting_cash),
            config,
            exchanges: IndexMap::new(),
            brokers: IndexMap::new(),
            asset_routes: IndexMap::new(),
            strategies: Vec::new(),
            order_ids: IdCounter::new(),
            trade_ids: IdCounter::new(),
            merged_clock: Vec::new(),
            tick_cursor: 0,
            current_tick: None,
            built: false,
            phase: Phase::Idle,
            staged_eager: Vec::new(),
            staged_lazy: Vec::new(),
        }
    }

    // ---- Registration -------------------------------------------------

    pub fn register_exchange(&mut self, exchange: Exchange) -> HydraResult<()> {
        if self.built {
            return Err(HydraError::state("cannot register an exchange after build()"));
        }
        if self.exchanges.contains_key(exchange.exchange_id()) {
            return Err(HydraError::configuration(format!("exchange '{}' already registered", exchange.exchange_id())));
        }
        self.exchanges.insert(exchange.exchange_id().to_string(), exchange);
        Ok(())
    }

    pub fn register_strategy(&mut self, strategy_id: impl Into<StrategyId>, strategy: Box<dyn Strategy>) -> HydraResult<()> {
        let strategy_id = strategy_id.into();
        if self.strategies.iter().any(|s| s.strategy_id == strategy_id) {
            return Err(HydraError::configuration(format!("strategy id '{strategy_id}' already registered")));
        }
        self.strategies.push(RegisteredStrategy { strategy_id, strategy });
        Ok(())
    }

    /// Computes `asset_routes`, the merged clock, and freezes every
    /// Exchange. Idempotent (Open Question decision: a second call
    /// with unchanged state is a no-op) — mirrors the teacher's
    /// unguarded `Hal.build()`, which tests call exactly once but
    /// never treat a repeat call as an error. Every registered
    /// strategy's `build` hook runs exactly once, on the first call
    /// only — running it again on a redundant rebuild would, for
    /// example, try to create an already-existing sub-portfolio.
    pub fn build(&mut self) -> HydraResult<()> {
        let first_build = !self.built;

        for exchange in self.exchanges.values_mut() {
            exchange.build()?;
        }

        self.asset_routes.clear();
        for exchange in self.exchanges.values() {
            for asset in exchange.assets() {
                if self.asset_routes.contains_key(asset.asset_id()) {
                    return Err(HydraError::configuration(format!("asset '{}' is registered on more than one exchange", asset.asset_id())));
                }
                self.asset_routes.insert(asset.asset_id().to_string(), (exchange.exchange_id().to_string(), asset.broker_id().to_string()));
                self.brokers.entry(asset.broker_id().to_string()).or_insert_with(|| Broker::new(asset.broker_id().to_string()));
            }
        }

        self.merged_clock = self
            .exchanges
            .values()
            .flat_map(|e| e.get_datetime_index_view().iter().copied())
            .sorted_unstable()
            .dedup()
            .collect();

        self.built = true;

        if first_build {
            let mut strategies = std::mem::take(&mut self.strategies);
            for s in strategies.iter_mut() {
                s.strategy.build(self)?;
            }
            self.strategies = strategies;

            // Captured after strategy `build` hooks run, since
            // `create_sub_portfolio` calls made there still need to
            // land in the epoch `reset` rewinds to.
            self.portfolios.capture_cash_epoch();
        }
        Ok(())
    }

    fn require_built(&self) -> HydraResult<()> {
        if !self.built {
            return Err(HydraError::state("hydra.build() must run before this operation"));
        }
        Ok(())
    }

    // ---- Scheduler ------------------------------------------------

    fn merged_brokers_sorted(&self) -> Vec<BrokerId> {
        let mut ids: Vec<BrokerId> = self.brokers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Promotes every staged order for this tick, grouped by broker in
    /// lexicographic broker-id order (spec.md §5), then runs a match
    /// cycle. When `sweep_all` is set, every registered broker gets a
    /// cycle regardless of whether it has a newly staged order this
    /// call — a broker can be sitting on standing `OPEN` orders whose
    /// asset was parked on a prior attempt, and those need to be
    /// retried once the asset starts ticking again (spec.md §5, `§8`
    /// boundary 9), not only when something new happens to be staged.
    /// `forward_pass` runs with `sweep_all = true` since it is the one
    /// point per tick every broker is guaranteed to be visited; the
    /// EAGER phase after `on_open` only sweeps brokers with a fresh
    /// submission, since standing orders already got their one
    /// per-tick attempt (and TTL decrement) during `forward_pass`.
    fn run_match_phase(&mut self, staged: Vec<StagedOrder>, sweep_all: bool) -> HydraResult<()> {
        let tick = self.current_tick.ok_or_else(|| HydraError::internal_invariant("match phase run with no current tick"))?;

        let mut by_broker: IndexMap<BrokerId, Vec<u64>> = IndexMap::new();
        for item in staged {
            by_broker.entry(item.broker_id).or_default().push(item.order_id);
        }

        let broker_ids: Vec<BrokerId> = if sweep_all {
            self.merged_brokers_sorted()
        } else {
            let mut ids: Vec<BrokerId> = by_broker.keys().cloned().collect();
            ids.sort();
            ids
        };

        for broker_id in broker_ids {
            let order_ids = by_broker.get(&broker_id).cloned().unwrap_or_default();
            let broker = self.brokers.get_mut(&broker_id).ok_or_else(|| HydraError::lookup("broker", &broker_id))?;
            for order_id in &order_ids {
                broker.promote(*order_id)?;
            }

            let exchanges = &self.exchanges;
            let filled = broker.run_match_cycle(tick, &|order: &Order| resolve_open_fill_price(exchanges, order));

            for (order_id, price) in filled {
                let order = broker.order(order_id)?.clone();
                let trade_id = self.trade_ids.next();
                broker.finalize_trade(order_id, trade_id)?;
                let trade = Trade {
                    trade_id,
                    strategy_id: order.strategy_id.clone(),
                    units: order.units,
                    fill_price: price,
                    fill_tick: tick,
                    exchange_id: order.exchange_id.clone(),
                    broker_id: order.broker_id.clone(),
                };
                self.portfolios.apply_fill(&order.portfolio_id, &order.asset_id, order.units, price, tick, trade)?;
                log_line(self.config.logging_level, 1, format!("FILL order={order_id} asset={} units={} price={price} tick={tick}", order.asset_id, order.units));
            }
        }
        Ok(())
    }

    fn forward_pass(&mut self, tick: i64) -> HydraResult<()> {
        for exchange in self.exchanges.values_mut() {
            exchange.sync(tick);
        }
        self.current_tick = Some(tick);
        log_line(self.config.logging_level, 2, format!("forward_pass tick={tick}"));

        let lazy = std::mem::take(&mut self.staged_lazy);
        self.run_match_phase(lazy, true)?;
        Ok(())
    }

    fn backward_pass(&mut self) -> HydraResult<()> {
        let exchanges = &self.exchanges;
        let asset_routes = &self.asset_routes;
        let price_of = |id: &str| resolve_close(exchanges, asset_routes, id);
        self.portfolios.backward_pass(&price_of)?;
        self.tick_cursor += 1;
        Ok(())
    }

    /// Runs one full tick of the five-step state machine. Returns
    /// `false` once the merged clock is exhausted. When
    /// `invoke_strategies` is false (used by `goto_datetime`), steps 2
    /// and 4 are skipped — ticks advance and fills/tracers still run,
    /// but no strategy callback fires.
    fn step(&mut self, invoke_strategies: bool) -> HydraResult<bool> {
        if self.tick_cursor >= self.merged_clock.len() {
            return Ok(false);
        }
        let tick = self.merged_clock[self.tick_cursor];

        self.forward_pass(tick)?;

        if invoke_strategies {
            self.phase = Phase::OnOpen;
            let mut strategies = std::mem::take(&mut self.strategies);
            for s in strategies.iter_mut() {
                s.strategy.on_open(self)?;
            }
            self.strategies = strategies;
        }

        let eager = std::mem::take(&mut self.staged_eager);
        self.run_match_phase(eager, false)?;

        if invoke_strategies {
            self.phase = Phase::OnClose;
            let mut strategies = std::mem::take(&mut self.strategies);
            for s in strategies.iter_mut() {
                s.strategy.on_close(self)?;
            }
            self.strategies = strategies;
        }
        self.phase = Phase::Idle;

        self.backward_pass()?;
        Ok(true)
    }

    /// Loops the tick state machine until the merged clock is
    /// exhausted, `to_epoch` is reached (`to_epoch > 0`), or `steps`
    /// ticks have run (`steps > 0`) — whichever condition is hit
    /// first.
    pub fn run(&mut self, to_epoch: i64, steps: u64) -> HydraResult<()> {
        self.require_built()?;
        let mut ran = 0u64;
        loop {
            if to_epoch > 0 {
                if let Some(t) = self.current_tick {
                    if t >= to_epoch {
                        break;
                    }
                }
            }
            if steps > 0 && ran >= steps {
                break;
            }
            if !self.step(true)? {
                break;
            }
            ran += 1;
        }
        Ok(())
    }

    /// Fast-forwards without invoking strategies until `t >= epoch`.
    /// Fills, tracer history and order history are still recorded.
    pub fn goto_datetime(&mut self, epoch: i64) -> HydraResult<()> {
        self.require_built()?;
        loop {
            if let Some(t) = self.current_tick {
                if t >= epoch {
                    break;
                }
            }
            if !self.step(false)? {
                break;
            }
        }
        Ok(())
    }

    /// Rewinds `t` to the beginning, flushes open positions/orders, and
    /// restores every portfolio's cash to the epoch captured by
    /// `build()` (after strategy `build` hooks ran). Without this,
    /// `replay()` would re-run the clock on top of already-spent cash
    /// instead of the original starting balance. Registered strategies
    /// are retained (Open Question decision: `reset` never reaches
    /// inside a `Box<dyn Strategy>`, so any state a strategy closes
    /// over is its author's responsibility).
    pub fn reset(&mut self, clear_history: bool, clear_strategies: bool) -> HydraResult<()> {
        for exchange in self.exchanges.values_mut() {
            exchange.reset_cursor();
        }
        self.tick_cursor = 0;
        self.current_tick = None;
        self.phase = Phase::Idle;
        self.staged_eager.clear();
        self.staged_lazy.clear();

        self.portfolios.reset_positions();
        self.portfolios.restore_cash_epoch();
        if clear_history {
            self.portfolios.clear_tracer_history();
            self.portfolios.clear_position_history();
            self.brokers = self.brokers.keys().map(|id| (id.clone(), Broker::new(id.clone()))).collect();
            self.order_ids = IdCounter::new();
            self.trade_ids = IdCounter::new();
        }
        if clear_strategies {
            self.strategies.clear();
        }
        Ok(())
    }

    /// `reset(clear_history=true)` followed by `run()` with the same
    /// registered strategies. Determinism requirement (spec.md §4.7):
    /// two successive replays must produce identical NLV history for
    /// every portfolio.
    pub fn replay(&mut self) -> HydraResult<()> {
        self.reset(true, false)?;
        self.run(0, 0)
    }

    // ---- Portfolio / order operations ------------------------------

    fn require_order_phase(&self) -> HydraResult<()> {
        match self.phase {
            Phase::OnOpen | Phase::OnClose => Ok(()),
            Phase::Idle => Err(HydraError::state("orders can only be submitted from inside on_open/on_close")),
        }
    }

    pub fn place_market_order(
        &mut self,
        portfolio_id: &str,
        asset_id: &str,
        units: f64,
        strategy_id: impl Into<StrategyId>,
        exec: OrderExecutionType,
        ttl: i64,
    ) -> HydraResult<u64> {
        self.require_order_phase()?;
        if units == 0.0 {
            return Err(HydraError::data("order units must be nonzero"));
        }
        self.portfolios.get(portfolio_id)?;
        let (exchange_id, broker_id) = self.asset_routes.get(asset_id).ok_or_else(|| HydraError::lookup("asset", asset_id))?.clone();
        let tick = self.current_tick.unwrap_or(0);

        let order_id = self.order_ids.next();
        let order = Order {
            order_id,
            asset_id: asset_id.to_string(),
            exchange_id,
            broker_id: broker_id.clone(),
            portfolio_id: portfolio_id.to_string(),
            strategy_id: strategy_id.into(),
            units,
            order_type: OrderType::Market,
            execution_type: exec,
            state: OrderState::Pending,
            submitted_tick: tick,
            ttl,
            fill_price: None,
            fill_tick: None,
            trade_id: None,
        };

        self.brokers.get_mut(&broker_id).ok_or_else(|| HydraError::lookup("broker", &broker_id))?.stage_order(order)?;
        self.portfolios.record_event(portfolio_id, TracerEvent::OrderPlaced { order_id, asset_id: asset_id.to_string(), units, tick })?;

        let staged = StagedOrder { broker_id, order_id };
        if self.phase == Phase::OnOpen && exec == OrderExecutionType::Eager {
            self.staged_eager.push(staged);
        } else {
            self.staged_lazy.push(staged);
        }
        Ok(order_id)
    }

    /// Closes the named position (or every open position when `None`)
    /// by submitting opposing market orders sized to current units.
    pub fn close_position(&mut self, portfolio_id: &str, asset_id: Option<&str>, strategy_id: impl Into<StrategyId> + Clone, exec: OrderExecutionType, ttl: i64) -> HydraResult<Vec<u64>> {
        let targets: Vec<(AssetId, f64)> = match asset_id {
            Some(id) => match self.portfolios.get_position(portfolio_id, id)? {
                Some(p) => vec![(id.to_string(), p.units)],
                None => Vec::new(),
            },
            None => self
                .portfolios
                .get(portfolio_id)?
                .positions
                .values()
                .map(|p| (p.asset_id.clone(), p.units))
                .collect(),
        };

        let mut order_ids = Vec::new();
        for (asset, units) in targets {
            order_ids.push(self.place_market_order(portfolio_id, &asset, -units, strategy_id.clone(), exec, ttl)?);
        }
        Ok(order_ids)
    }

    fn current_close(&self, asset_id: &str) -> Option<f64> {
        resolve_close(&self.exchanges, &self.asset_routes, asset_id)
    }

    pub fn order_target_size(
        &mut self,
        portfolio_id: &str,
        asset_id: &str,
        target: f64,
        strategy_id: impl Into<StrategyId>,
        epsilon: f64,
        target_type: OrderTargetType,
        exec: OrderExecutionType,
        ttl: i64,
    ) -> HydraResult<Option<u64>> {
        let current_units = self.portfolios.get_position(portfolio_id, asset_id)?.map(|p| p.units).unwrap_or(0.0);
        let price = self.current_close(asset_id);

        let (desired_units, scale) = match target_type {
            OrderTargetType::Units => (target, target.abs()),
            OrderTargetType::Dollars => {
                let price = price.ok_or_else(|| HydraError::out_of_range(format!("no known price for '{asset_id}'")))?;
                (target / price, 1.0)
            }
            OrderTargetType::Pct => {
                let price = price.ok_or_else(|| HydraError::out_of_range(format!("no known price for '{asset_id}'")))?;
                let nlv = self.portfolios.nlv(portfolio_id, &|id: &str| self.current_close(id))?;
                (target * nlv / price, nlv)
            }
        };

        let diff = desired_units - current_units;
        let scale = if scale == 0.0 { 1.0 } else { scale };
        if (diff / scale).abs() <= epsilon {
            return Ok(None);
        }
        Ok(Some(self.place_market_order(portfolio_id, asset_id, diff, strategy_id, exec, ttl)?))
    }

    /// For each `(asset, target)` pair, submits the difference order;
    /// for every asset currently held at `portfolio_id` but absent
    /// from `allocations`, submits a closing order. All resulting
    /// orders land on the current tick.
    pub fn order_target_allocations(
        &mut self,
        portfolio_id: &str,
        allocations: &IndexMap<AssetId, f64>,
        strategy_id: impl Into<StrategyId> + Clone,
        epsilon: f64,
        target_type: OrderTargetType,
        exec: OrderExecutionType,
        ttl: i64,
    ) -> HydraResult<Vec<u64>> {
        let mut order_ids = Vec::new();
        for (asset_id, target) in allocations {
            if let Some(id) = self.order_target_size(portfolio_id, asset_id, *target, strategy_id.clone(), epsilon, target_type, exec, ttl)? {
                order_ids.push(id);
            }
        }

        let held: Vec<AssetId> = self
            .portfolios
            .get(portfolio_id)?
            .positions
            .keys()
            .filter(|id| !allocations.contains_key(*id))
            .cloned()
            .collect();
        for asset_id in held {
            order_ids.extend(self.close_position(portfolio_id, Some(&asset_id), strategy_id.clone(), exec, ttl)?);
        }
        Ok(order_ids)
    }

    pub fn create_sub_portfolio(&mut self, parent_id: &str, child_id: impl Into<PortfolioId>, cash: f64) -> HydraResult<PortfolioId> {
        self.portfolios.create_sub_portfolio(parent_id, child_id, cash)
    }

    pub fn portfolio(&self, portfolio_id: &str) -> HydraResult<&Portfolio> {
        self.portfolios.get(portfolio_id)
    }

    pub fn get_position(&self, portfolio_id: &str, asset_id: &str) -> HydraResult<Option<&Position>> {
        self.portfolios.get_position(portfolio_id, asset_id)
    }

    pub fn find_portfolio(&self, portfolio_id: &str) -> Option<&Portfolio> {
        self.portfolios.find_portfolio(portfolio_id)
    }

    pub fn cash(&self, portfolio_id: &str) -> HydraResult<f64> {
        self.portfolios.cash(portfolio_id)
    }

    pub fn nlv(&self, portfolio_id: &str) -> HydraResult<f64> {
        self.portfolios.nlv(portfolio_id, &|id: &str| self.current_close(id))
    }

    pub fn unrealized_pl(&self, portfolio_id: &str) -> HydraResult<f64> {
        self.portfolios.unrealized_pl(portfolio_id, &|id: &str| self.current_close(id))
    }

    pub fn enable_tracer(&mut self, portfolio_id: &str, kind: PortfolioTracerType) -> HydraResult<()> {
        self.portfolios.enable_tracer(portfolio_id, kind)
    }

    pub fn trade_history(&self, portfolio_id: &str) -> HydraResult<Vec<Trade>> {
        self.portfolios.trade_history(portfolio_id)
    }

    pub fn position_history(&self, portfolio_id: &str) -> HydraResult<Vec<Position>> {
        self.portfolios.position_history(portfolio_id)
    }

    pub fn order_history(&self) -> Vec<OrderRecord> {
        self.brokers.values().flat_map(|b| b.order_history()).collect()
    }

    pub fn current_tick(&self) -> Option<i64> {
        self.current_tick
    }

    pub fn asset(&self, asset_id: &str) -> HydraResult<&std::rc::Rc<Asset>> {
        let (exchange_id, _) = self.asset_routes.get(asset_id).ok_or_else(|| HydraError::lookup("asset", asset_id))?;
        self.exchanges.get(exchange_id).ok_or_else(|| HydraError::lookup("exchange", exchange_id))?.asset(asset_id)
    }

    pub fn exchange(&self, exchange_id: &str) -> HydraResult<&Exchange> {
        self.exchanges.get(exchange_id).ok_or_else(|| HydraError::lookup("exchange", exchange_id))
    }
}

// hydra_core/src/order.rs

//! The transient order record and its lifecycle enumerations.
//! Collapses the teacher's three-stage `SignalEvent`/`OrderEvent`/
//! `FillEvent` channel messages into a single `Order` that carries its
//! own state machine, since `Hydra` drives the engine synchronously on
//! one thread and has no need for a channel between stages.

use crate::ids::{AssetId, BrokerId, ExchangeId, PortfolioId, StrategyId};

/// EAGER matches on the same tick (inside `hydra.on_open`); LAZY
/// matches one tick later (inside the next `forward_pass`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderExecutionType {
    Eager = 0,
    Lazy = 1,
}

/// Reserved variants (`Limit`, `Stop`) are accepted by the type system
/// but rejected at submission time — spec.md §3 lists them as future
/// work, not yet matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderState {
    Pending,
    Open,
    Filled,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: u64,
    pub asset_id: AssetId,
    pub exchange_id: ExchangeId,
    pub broker_id: BrokerId,
    pub portfolio_id: PortfolioId,
    pub strategy_id: StrategyId,
    pub units: f64,
    pub order_type: OrderType,
    pub execution_type: OrderExecutionType,
    pub state: OrderState,
    /// Tick at which the order was submitted (entered `PENDING`).
    pub submitted_tick: i64,
    /// `-1` = unbounded. Measured in ticks since `OPEN`.
    pub ttl: i64,
    pub fill_price: Option<f64>,
    pub fill_tick: Option<i64>,
    pub trade_id: Option<u64>,
}

impl Order {
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, OrderState::Filled | OrderState::Cancelled | OrderState::Expired)
    }
}

/// One completed fill record, kept alongside a `Position`.
#[derive(Debug, Clone)]
pub struct Trade {
    pub trade_id: u64,
    pub strategy_id: StrategyId,
    pub units: f64,
    pub fill_price: f64,
    pub fill_tick: i64,
    pub exchange_id: ExchangeId,
    pub broker_id: BrokerId,
}

/// A flattened record used for `Hydra::order_history`/`trade_history`
/// queries (spec.md §6 Outputs).
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub fill_time: Option<i64>,
    pub asset_id: AssetId,
    pub portfolio_id: PortfolioId,
    pub units: f64,
    pub strategy_id: StrategyId,
    pub order_type: OrderType,
    pub order_state: OrderState,
    pub average_price: Option<f64>,
    pub order_id: u64,
    pub trade_id: Option<u64>,
    pub exchange_id: ExchangeId,
    pub broker_id: BrokerId,
}

impl From<&Order> for OrderRecord {
    fn from(o: &Order) -> Self {
        OrderRecord {
            fill_time: o.fill_tick,
            asset_id: o.asset_id.clone(),
            portfolio_id: o.portfolio_id.clone(),
            units: o.units,
            strategy_id: o.strategy_id.clone(),
            order_type: o.order_type,
            order_state: o.state,
            average_price: o.fill_price,
            order_id: o.order_id,
            trade_id: o.trade_id,
            exchange_id: o.exchange_id.clone(),
            broker_id: o.broker_id.clone(),
        }
    }
}

// hydra_core/src/broker.rs

//! Cash-free order matching and the order-lifecycle state machine.
//! Generalizes `farukon_core::execution::ExecutionHandler` (one
//! synchronous `execute_order` call per fill) into a persistent
//! per-broker order book with EAGER/LAZY match timing and TTL expiry,
//! per spec.md §4.3.

use std::collections::VecDeque;

use indexmap::IndexMap;

use crate::error::{HydraError, HydraResult};
use crate::ids::BrokerId;
use crate::order::{Order, OrderRecord, OrderState};

pub struct Broker {
    broker_id: BrokerId,
    orders: IndexMap<u64, Order>,
    /// Order ids currently `OPEN`, in FIFO submission order — spec.md
    /// §5: "within a broker, orders are matched in FIFO submission
    /// order."
    open_queue: VecDeque<u64>,
}

impl Broker {
    pub fn new(broker_id: impl Into<BrokerId>) -> Self {
        Self {
            broker_id: broker_id.into(),
            orders: IndexMap::new(),
            open_queue: VecDeque::new(),
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    /// Records a freshly-submitted order (state `PENDING`). It only
    /// becomes visible to a match cycle once `promote` is called.
    pub fn stage_order(&mut self, order: Order) -> HydraResult<()> {
        if self.orders.contains_key(&order.order_id) {
            return Err(HydraError::configuration(format!("order id {} already staged", order.order_id)));
        }
        self.orders.insert(order.order_id, order);
        Ok(())
    }

    /// `PENDING` -> `OPEN`, enqueued at the back of the FIFO.
    pub fn promote(&mut self, order_id: u64) -> HydraResult<()> {
        let order = self.orders.get_mut(&order_id).ok_or_else(|| HydraError::lookup("order", &order_id.to_string()))?;
        if order.state != OrderState::Pending {
            return Err(HydraError::state(format!("order {order_id} is not PENDING")));
        }
        order.state = OrderState::Open;
        self.open_queue.push_back(order_id);
        Ok(())
    }

    pub fn cancel(&mut self, order_id: u64) -> HydraResult<()> {
        let order = self.orders.get_mut(&order_id).ok_or_else(|| HydraError::lookup("order", &order_id.to_string()))?;
        if order.is_terminal() {
            return Err(HydraError::state(format!("order {order_id} is already terminal")));
        }
        order.state = OrderState::Cancelled;
        self.open_queue.retain(|id| *id != order_id);
        Ok(())
    }

    /// Records the minted trade id on a just-filled order.
    pub fn finalize_trade(&mut self, order_id: u64, trade_id: u64) -> HydraResult<()> {
        let order = self.orders.get_mut(&order_id).ok_or_else(|| HydraError::lookup("order", &order_id.to_string()))?;
        order.trade_id = Some(trade_id);
        Ok(())
    }

    pub fn order(&self, order_id: u64) -> HydraResult<&Order> {
        self.orders.get(&order_id).ok_or_else(|| HydraError::lookup("order", &order_id.to_string()))
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn order_history(&self) -> Vec<OrderRecord> {
        self.orders.values().map(OrderRecord::from).collect()
    }

    /// Runs one match attempt over every currently `OPEN` order, in
    /// FIFO order. `price_of` resolves a MARKET order's fill price
    /// (the fill tick's OPEN), returning `None` when the asset is
    /// parked at `tick`. Filled orders are removed from the queue and
    /// returned as `(order_id, fill_price)` pairs for the caller to
    /// turn into trades and apply to the originating portfolio. Orders
    /// that miss this cycle either wait for the next one or expire
    /// when their TTL has been exhausted.
    pub fn run_match_cycle(&mut self, tick: i64, price_of: &dyn Fn(&Order) -> Option<f64>) -> Vec<(u64, f64)> {
        let pending: Vec<u64> = self.open_queue.drain(..).collect();
        let mut filled = Vec::new();
        let mut still_open = VecDeque::new();

        for order_id in pending {
            let order = self.orders.get_mut(&order_id).expect("queued order id must exist");
            match price_of(order) {
                Some(price) => {
                    order.state = OrderState::Filled;
                    order.fill_price = Some(price);
                    order.fill_tick = Some(tick);
                    filled.push((order_id, price));
                }
                None => {
                    if order.ttl == 0 {
                        order.state = OrderState::Expired;
                    } else {
                        if order.ttl > 0 {
                            order.ttl -= 1;
                        }
                        still_open.push_back(order_id);
                    }
                }
            }
        }

        self.open_queue = still_open;
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: u64, ttl: i64) -> Order {
        Order {
            order_id: id,
            asset_id: "a".to_string(),
            exchange_id: "ex".to_string(),
            broker_id: "br".to_string(),
            portfolio_id: "master".to_string(),
            strategy_id: "s".to_string(),
            units: 10.0,
            order_type: crate::order::OrderType::Market,
            execution_type: crate::order::OrderExecutionType::Eager,
            state: OrderState::Pending,
            submitted_tick: 0,
            ttl,
            fill_price: None,
            fill_tick: None,
            trade_id: None,
        }
    }

    #[test]
    fn staged_order_only_matches_after_promote() {
        let mut broker = Broker::new("br");
        broker.stage_order(order(1, -1)).unwrap();
        let filled = broker.run_match_cycle(0, &|_| Some(100.0));
        assert!(filled.is_empty());
        broker.promote(1).unwrap();
        let filled = broker.run_match_cycle(0, &|_| Some(100.0));
        assert_eq!(filled, vec![(1, 100.0)]);
        assert_eq!(broker.order(1).unwrap().state, OrderState::Filled);
    }

    #[test]
    fn fifo_order_is_preserved_across_match_cycles() {
        let mut broker = Broker::new("br");
        broker.stage_order(order(1, -1)).unwrap();
        broker.stage_order(order(2, -1)).unwrap();
        broker.promote(1).unwrap();
        broker.promote(2).unwrap();
        let filled = broker.run_match_cycle(5, &|_| Some(50.0));
        assert_eq!(filled, vec![(1, 50.0), (2, 50.0)]);
    }

    #[test]
    fn zero_ttl_expires_on_first_miss() {
        let mut broker = Broker::new("br");
        broker.stage_order(order(1, 0)).unwrap();
        broker.promote(1).unwrap();
        let filled = broker.run_match_cycle(0, &|_| None);
        assert!(filled.is_empty());
        assert_eq!(broker.order(1).unwrap().state, OrderState::Expired);
    }

    #[test]
    fn unbounded_ttl_never_expires() {
        let mut broker = Broker::new("br");
        broker.stage_order(order(1, -1)).unwrap();
        broker.promote(1).unwrap();
        for _ in 0..10 {
            broker.run_match_cycle(0, &|_| None);
        }
        assert_eq!(broker.order(1).unwrap().state, OrderState::Open);
    }

    #[test]
    fn cancel_removes_a_pending_match_and_is_idempotent_failure() {
        let mut broker = Broker::new("br");
        broker.stage_order(order(1, -1)).unwrap();
        broker.promote(1).unwrap();
        broker.cancel(1).unwrap();
        let filled = broker.run_match_cycle(0, &|_| Some(10.0));
        assert!(filled.is_empty());
        assert!(broker.cancel(1).is_err());
    }
}

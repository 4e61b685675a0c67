// hydra_core/src/portfolio.rs

//! The portfolio tree: cash, positions and upward aggregation.
//!
//! Generalizes `farukon_core::portfolio::PortfolioHandler` (one flat
//! portfolio per strategy) into a tree of nodes, stored in a single
//! arena (`PortfolioTree`) rather than as `Rc<RefCell<_>>` nodes with
//! owning child pointers — spec.md's design note calls for the parent
//! link to be "lookup-only, never owner", which an arena gives for
//! free since every node is addressed by its `PortfolioId` key.

use indexmap::IndexMap;

use crate::error::{HydraError, HydraResult};
use crate::ids::{AssetId, PortfolioId, MASTER_PORTFOLIO_ID};
use crate::order::Trade;
use crate::position::Position;
use crate::tracer::{PortfolioTracerType, TracerEvent, TracerSet};

/// Scale used by `order_target_size` to turn a desired target into
/// order units (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OrderTargetType {
    Units = 0,
    Dollars = 1,
    Pct = 2,
}

/// A single node in the portfolio tree.
#[derive(Debug)]
pub struct Portfolio {
    pub id: PortfolioId,
    pub parent_id: Option<PortfolioId>,
    pub children_ids: Vec<PortfolioId>,
    /// Cash held directly at this node (i.e. not inside a child).
    /// `cash()` on `PortfolioTree` adds this to the recursive sum of
    /// children's cash, matching spec.md's invariant 2.
    pub own_cash: f64,
    /// Consolidated positions: the size-weighted sum of every fill
    /// this node or any descendant has booked on that asset, kept
    /// current by incremental deltas rather than full recomputation
    /// (spec.md design note).
    pub positions: IndexMap<AssetId, Position>,
    /// Positions that have closed, kept for `trade_history`/
    /// `position_history` queries after being dropped from `positions`
    /// (spec.md §4.4: "its trade list is preserved in history").
    pub closed_positions: Vec<Position>,
    pub tracers: TracerSet,
}

impl Portfolio {
    fn new(id: PortfolioId, parent_id: Option<PortfolioId>, cash: f64) -> Self {
        Self {
            id,
            parent_id,
            children_ids: Vec::new(),
            own_cash: cash,
            positions: IndexMap::new(),
            closed_positions: Vec::new(),
            tracers: TracerSet::default(),
        }
    }
}

pub struct PortfolioTree {
    nodes: IndexMap<PortfolioId, Portfolio>,
    /// Every node's `own_cash` as of the last `capture_cash_epoch`
    /// call, restored verbatim by `restore_cash_epoch`. Empty until the
    /// first epoch is captured.
    cash_epoch: IndexMap<PortfolioId, f64>,
}

impl PortfolioTree {
    pub fn new(starting_cash: f64) -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert(MASTER_PORTFOLIO_ID.to_string(), Portfolio::new(MASTER_PORTFOLIO_ID.to_string(), None, starting_cash));
        Self { nodes, cash_epoch: IndexMap::new() }
    }

    /// Records every node's `own_cash` as the epoch `reset` rewinds to.
    /// Called once by `Hydra::build()`, after strategy `build` hooks
    /// have run (the point at which every `create_sub_portfolio` call
    /// has already happened and the tree shape is final).
    pub fn capture_cash_epoch(&mut self) {
        self.cash_epoch = self.nodes.iter().map(|(id, node)| (id.clone(), node.own_cash)).collect();
    }

    /// Restores every node's `own_cash` to the captured epoch. A no-op
    /// before the first epoch is captured.
    pub fn restore_cash_epoch(&mut self) {
        for (id, cash) in &self.cash_epoch {
            if let Some(node) = self.nodes.get_mut(id) {
                node.own_cash = *cash;
            }
        }
    }

    pub fn get(&self, id: &str) -> HydraResult<&Portfolio> {
        self.nodes.get(id).ok_or_else(|| HydraError::lookup("portfolio", id))
    }

    fn get_mut(&mut self, id: &str) -> HydraResult<&mut Portfolio> {
        self.nodes.get_mut(id).ok_or_else(|| HydraError::lookup("portfolio", id))
    }

    /// Any node can resolve any other node by id — portfolio ids are
    /// unique tree-wide (spec.md §3), so this is a plain arena lookup
    /// regardless of which node the search is framed as starting from.
    pub fn find_portfolio(&self, id: &str) -> Option<&Portfolio> {
        self.nodes.get(id)
    }

    /// Debits the parent's cash by `cash`, creates the child with that
    /// cash. Fails if `child_id` already exists anywhere in the tree.
    pub fn create_sub_portfolio(&mut self, parent_id: &str, child_id: impl Into<PortfolioId>, cash: f64) -> HydraResult<PortfolioId> {
        let child_id = child_id.into();
        if self.nodes.contains_key(&child_id) {
            return Err(HydraError::configuration(format!("portfolio '{child_id}' already exists")));
        }
        {
            let parent = self.get_mut(parent_id)?;
            parent.own_cash -= cash;
        }
        self.nodes.insert(child_id.clone(), Portfolio::new(child_id.clone(), Some(parent_id.to_string()), cash));
        self.get_mut(parent_id)?.children_ids.push(child_id.clone());
        Ok(child_id)
    }

    pub fn enable_tracer(&mut self, portfolio_id: &str, kind: PortfolioTracerType) -> HydraResult<()> {
        self.get_mut(portfolio_id)?.tracers.enable(kind);
        Ok(())
    }

    pub fn get_position(&self, portfolio_id: &str, asset_id: &str) -> HydraResult<Option<&Position>> {
        Ok(self.get(portfolio_id)?.positions.get(asset_id))
    }

    pub fn record_event(&mut self, portfolio_id: &str, event: TracerEvent) -> HydraResult<()> {
        self.get_mut(portfolio_id)?.tracers.record_event(event);
        Ok(())
    }

    /// Every trade this node has ever booked, open and closed alike.
    pub fn trade_history(&self, portfolio_id: &str) -> HydraResult<Vec<Trade>> {
        let node = self.get(portfolio_id)?;
        let mut trades: Vec<Trade> = node.closed_positions.iter().flat_map(|p| p.trades.iter().cloned()).collect();
        trades.extend(node.positions.values().flat_map(|p| p.trades.iter().cloned()));
        trades.sort_by_key(|t| t.trade_id);
        Ok(trades)
    }

    /// Every position this node has ever held, open and closed alike.
    pub fn position_history(&self, portfolio_id: &str) -> HydraResult<Vec<Position>> {
        let node = self.get(portfolio_id)?;
        let mut positions: Vec<Position> = node.closed_positions.clone();
        positions.extend(node.positions.values().cloned());
        Ok(positions)
    }

    /// Recursive cash: this node's own cash plus every descendant's.
    pub fn cash(&self, portfolio_id: &str) -> HydraResult<f64> {
        let node = self.get(portfolio_id)?;
        let mut total = node.own_cash;
        for child in &node.children_ids {
            total += self.cash(child)?;
        }
        Ok(total)
    }

    /// `nlv(P) = cash(P) + sum(position.units * current_price) + sum(realized_pl)`.
    /// `price_of` should resolve the asset's current mark (falling
    /// back to the prior tick when parked, per spec.md §4.4); an asset
    /// with no known price yet contributes zero mark and zero P/L.
    pub fn nlv(&self, portfolio_id: &str, price_of: &dyn Fn(&str) -> Option<f64>) -> HydraResult<f64> {
        let node = self.get(portfolio_id)?;
        let mut total = self.cash(portfolio_id)?;
        for position in node.positions.values() {
            total += position.realized_pl;
            if let Some(price) = price_of(&position.asset_id) {
                total += position.units * price;
            }
        }
        Ok(total)
    }

    pub fn unrealized_pl(&self, portfolio_id: &str, price_of: &dyn Fn(&str) -> Option<f64>) -> HydraResult<f64> {
        let node = self.get(portfolio_id)?;
        let mut total = 0.0;
        for position in node.positions.values() {
            if let Some(price) = price_of(&position.asset_id) {
                total += position.unrealized_pl(price);
            }
        }
        Ok(total)
    }

    /// Chain from `portfolio_id` up to (and including) the root.
    fn ancestor_chain(&self, portfolio_id: &str) -> HydraResult<Vec<PortfolioId>> {
        let mut chain = vec![portfolio_id.to_string()];
        let mut current = self.get(portfolio_id)?;
        while let Some(parent_id) = &current.parent_id {
            chain.push(parent_id.clone());
            current = self.get(parent_id)?;
        }
        Ok(chain)
    }

    /// Applies one fill to the originating portfolio and propagates
    /// the same fill tranche up the ancestor chain, per spec.md §4.4:
    /// cash moves only at the originating node; every node on the
    /// chain applies the identical size-weighted update to its own
    /// consolidated position for the asset.
    pub fn apply_fill(&mut self, portfolio_id: &str, asset_id: &str, units: f64, price: f64, tick: i64, trade: Trade) -> HydraResult<()> {
        if units == 0.0 {
            return Err(HydraError::data("fill units must be nonzero"));
        }
        let chain = self.ancestor_chain(portfolio_id)?;

        {
            let origin = self.get_mut(portfolio_id)?;
            origin.own_cash -= units * price;
        }

        for node_id in chain.iter() {
            let node = self.get_mut(node_id)?;
            let closed = match node.positions.get_mut(asset_id) {
                Some(position) => position.apply_fill(units, price, tick, trade.clone()),
                None => {
                    node.positions.insert(asset_id.to_string(), Position::open(asset_id.to_string(), units, price, tick, trade.clone()));
                    false
                }
            };
            if closed {
                if let Some(position) = node.positions.shift_remove(asset_id) {
                    node.closed_positions.push(position);
                }
                node.tracers.record_event(TracerEvent::PositionClosed { asset_id: asset_id.to_string(), tick });
            }
            node.tracers.record_event(TracerEvent::OrderFilled {
                order_id: trade.trade_id,
                asset_id: asset_id.to_string(),
                units,
                price,
                tick,
            });
        }
        Ok(())
    }

    /// Re-evaluates cash/nlv for every node and appends a `VALUE`
    /// tracer entry where enabled. Also verifies invariant 1
    /// (`nlv(N) == sum of children's nlv`), raising `InternalInvariant`
    /// if it is violated.
    pub fn backward_pass(&mut self, price_of: &dyn Fn(&str) -> Option<f64>) -> HydraResult<()> {
        let ids: Vec<PortfolioId> = self.nodes.keys().cloned().collect();
        for id in &ids {
            self.verify_children_sum(id, price_of)?;
        }
        for id in &ids {
            let cash = self.cash(id)?;
            let nlv = self.nlv(id, price_of)?;
            let node = self.get_mut(id)?;
            node.tracers.record_value(cash, nlv);
        }
        Ok(())
    }

    fn verify_children_sum(&self, id: &str, price_of: &dyn Fn(&str) -> Option<f64>) -> HydraResult<()> {
        let node = self.get(id)?;
        if node.children_ids.is_empty() {
            return Ok(());
        }
        let parent_nlv = self.nlv(id, price_of)?;
        let mut children_nlv = 0.0;
        for child in &node.children_ids {
            children_nlv += self.nlv(child, price_of)?;
        }
        if (parent_nlv - children_nlv).abs() > 1e-6 {
            return Err(HydraError::internal_invariant(format!(
                "nlv({id}) = {parent_nlv} but children sum to {children_nlv}"
            )));
        }
        Ok(())
    }

    pub fn clear_tracer_history(&mut self) {
        for node in self.nodes.values_mut() {
            node.tracers.clear_history();
        }
    }

    /// Flushes every node's open positions (`Hydra::reset` always does
    /// this regardless of `clear_history`).
    pub fn reset_positions(&mut self) {
        for node in self.nodes.values_mut() {
            node.positions.clear();
        }
    }

    /// Drops closed-position/trade archives (only when `reset` is
    /// called with `clear_history = true`).
    pub fn clear_position_history(&mut self) {
        for node in self.nodes.values_mut() {
            node.closed_positions.clear();
        }
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &PortfolioId> {
        self.nodes.keys()
    }
}

// hydra_core/src/position.rs

//! Accounting primitives belonging to one `Portfolio`: `Position`
//! (a signed holding) and `Trade` (one atomic fill).
//!
//! Generalizes `farukon_core::portfolio::PositionState` (a bare `f64`
//! size) into the full size-weighted average-cost bookkeeping spec.md
//! §4.4 requires, including realized P/L and the trade history a
//! position carries even after it closes.

use crate::ids::AssetId;
use crate::order::Trade;

#[derive(Debug, Clone)]
pub struct Position {
    pub asset_id: AssetId,
    pub units: f64,
    pub average_price: f64,
    pub realized_pl: f64,
    pub opening_tick: i64,
    pub closing_tick: Option<i64>,
    pub trades: Vec<Trade>,
}

impl Position {
    /// Opens a position from its first fill. `units` must be nonzero
    /// (checked by the caller — spec.md §3 treats a zero-unit open as
    /// an error).
    pub fn open(asset_id: AssetId, units: f64, price: f64, opening_tick: i64, trade: Trade) -> Self {
        Self {
            asset_id,
            units,
            average_price: price,
            realized_pl: 0.0,
            opening_tick,
            closing_tick: None,
            trades: vec![trade],
        }
    }

    pub fn is_open(&self) -> bool {
        self.units != 0.0
    }

    /// Applies one fill tranche to this position using the
    /// size-weighted average cost rule from spec.md §4.4. Returns
    /// `true` if the position closed exactly (units reached zero).
    pub fn apply_fill(&mut self, fill_units: f64, fill_price: f64, tick: i64, trade: Trade) -> bool {
        let u0 = self.units;
        let a0 = self.average_price;
        let u1 = fill_units;
        let a1 = fill_price;
        let new_units = u0 + u1;

        if u0 == 0.0 || u1.signum() == u0.signum() {
            // Same-direction add (or opening from flat): blend cost.
            self.average_price = if new_units != 0.0 {
                (u0 * a0 + u1 * a1) / new_units
            } else {
                a0
            };
        } else {
            // Opposing fill: a partial close, a full close, or a flip
            // through zero. Realize P/L on the portion closed at the
            // old average cost.
            let closing_units = u0.abs().min(u1.abs());
            self.realized_pl += closing_units * (a1 - a0) * u0.signum();
            self.average_price = if new_units != 0.0 && new_units.signum() != u0.signum() {
                a1
            } else {
                a0
            };
        }

        self.units = new_units;
        self.trades.push(trade);

        if self.units == 0.0 {
            self.closing_tick = Some(tick);
            true
        } else {
            false
        }
    }

    pub fn unrealized_pl(&self, current_price: f64) -> f64 {
        self.units * (current_price - self.average_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(units: f64, price: f64, tick: i64) -> Trade {
        Trade {
            trade_id: 0,
            strategy_id: "s".to_string(),
            units,
            fill_price: price,
            fill_tick: tick,
            exchange_id: "ex".to_string(),
            broker_id: "br".to_string(),
        }
    }

    #[test]
    fn same_direction_add_blends_average_cost() {
        let mut p = Position::open("a".to_string(), 100.0, 10.0, 0, trade(100.0, 10.0, 0));
        p.apply_fill(100.0, 20.0, 1, trade(100.0, 20.0, 1));
        assert_eq!(p.units, 200.0);
        assert_eq!(p.average_price, 15.0);
        assert_eq!(p.realized_pl, 0.0);
    }

    #[test]
    fn partial_close_realizes_pl_and_keeps_average() {
        let mut p = Position::open("a".to_string(), 100.0, 10.0, 0, trade(100.0, 10.0, 0));
        let closed = p.apply_fill(-40.0, 12.0, 1, trade(-40.0, 12.0, 1));
        assert!(!closed);
        assert_eq!(p.units, 60.0);
        assert_eq!(p.average_price, 10.0);
        assert_eq!(p.realized_pl, 40.0 * (12.0 - 10.0));
    }

    #[test]
    fn exact_close_zeroes_units_and_sets_closing_tick() {
        let mut p = Position::open("a".to_string(), 100.0, 10.0, 0, trade(100.0, 10.0, 0));
        let closed = p.apply_fill(-100.0, 11.0, 5, trade(-100.0, 11.0, 5));
        assert!(closed);
        assert_eq!(p.units, 0.0);
        assert_eq!(p.closing_tick, Some(5));
        assert!(!p.is_open());
    }

    #[test]
    fn sign_flip_realizes_pl_on_closed_portion_and_opens_new_average() {
        let mut p = Position::open("a".to_string(), 100.0, 10.0, 0, trade(100.0, 10.0, 0));
        p.apply_fill(-150.0, 12.0, 2, trade(-150.0, 12.0, 2));
        assert_eq!(p.units, -50.0);
        assert_eq!(p.average_price, 12.0);
        assert_eq!(p.realized_pl, 100.0 * (12.0 - 10.0));
    }
}

// hydra_core/src/strategy.rs

//! The strategy contract. Generalizes
//! `farukon_core::strategy::Strategy` (a `calculate_signals` callback
//! plus four `open_by_*`/`close_by_*` helpers that emit `SignalEvent`s
//! onto a channel) into the two fixed suspension points spec.md §4.6
//! defines, called directly against the engine rather than through a
//! channel — `Hydra` is single-threaded, so there is nothing for a
//! channel to buy.
//!
//! LIMIT orders are reserved but unimplemented (spec.md §4.3), so the
//! `open_by_limit`/`close_by_limit` helpers the teacher's trait
//! carried have no counterpart here.

use crate::error::HydraResult;
use crate::hydra::Hydra;
use crate::ids::StrategyId;

/// Implemented by user-supplied strategies and invoked by `Hydra` at
/// the three fixed points in its tick state machine. A strategy must
/// only touch Exchange/Broker/Portfolio state through `ctx` and only
/// from inside these three callbacks (spec.md §5): it must not retain
/// `ctx` or any reference derived from it past the call.
pub trait Strategy {
    /// Called once before the first tick runs. Typical uses: creating
    /// sub-portfolios, enabling tracers.
    fn build(&mut self, ctx: &mut Hydra) -> HydraResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called every tick, after `forward_pass`, before the EAGER match
    /// cycle. Orders placed here with `OrderExecutionType::Eager` are
    /// eligible to fill later this same tick.
    fn on_open(&mut self, ctx: &mut Hydra) -> HydraResult<()>;

    /// Called every tick, after the EAGER match cycle. Orders placed
    /// here are necessarily LAZY in effect: the earliest they can fill
    /// is the next tick's `forward_pass`.
    fn on_close(&mut self, ctx: &mut Hydra) -> HydraResult<()>;
}

/// A registered strategy paired with the unique id strategies submit
/// orders under (spec.md §6: "strategy-id must be unique across the
/// engine").
pub struct RegisteredStrategy {
    pub strategy_id: StrategyId,
    pub strategy: Box<dyn Strategy>,
}

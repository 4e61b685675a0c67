// hydra_core/src/tracer.rs

//! Pluggable observers a `Portfolio` can own, each recording one time
//! series per tick. Generalizes the teacher's fixed
//! `EquitySnapshot`/`HoldingSnapshot` vectors
//! (`farukon_core::portfolio`) into a small tagged set any portfolio
//! node can opt into.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PortfolioTracerType {
    Value = 0,
    Event = 1,
}

/// One state-changing event recorded by an `Event` tracer.
#[derive(Debug, Clone)]
pub enum TracerEvent {
    OrderPlaced { order_id: u64, asset_id: String, units: f64, tick: i64 },
    OrderFilled { order_id: u64, asset_id: String, units: f64, price: f64, tick: i64 },
    PositionOpened { asset_id: String, units: f64, tick: i64 },
    PositionClosed { asset_id: String, tick: i64 },
}

#[derive(Debug, Default)]
pub struct ValueTracer {
    cash_history: Vec<f64>,
    nlv_history: Vec<f64>,
}

impl ValueTracer {
    pub fn record(&mut self, cash: f64, nlv: f64) {
        self.cash_history.push(cash);
        self.nlv_history.push(nlv);
    }

    pub fn cash_history(&self) -> &[f64] {
        &self.cash_history
    }

    pub fn nlv_history(&self) -> &[f64] {
        &self.nlv_history
    }

    fn clear(&mut self) {
        self.cash_history.clear();
        self.nlv_history.clear();
    }
}

#[derive(Debug, Default)]
pub struct EventTracer {
    events: Vec<TracerEvent>,
}

impl EventTracer {
    pub fn record(&mut self, event: TracerEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TracerEvent] {
        &self.events
    }

    fn clear(&mut self) {
        self.events.clear();
    }
}

/// The set of tracers attached to a single `Portfolio` node.
#[derive(Debug, Default)]
pub struct TracerSet {
    pub value: Option<ValueTracer>,
    pub event: Option<EventTracer>,
}

impl TracerSet {
    pub fn enable(&mut self, kind: PortfolioTracerType) {
        match kind {
            PortfolioTracerType::Value => self.value.get_or_insert_with(ValueTracer::default),
            PortfolioTracerType::Event => {
                self.event.get_or_insert_with(EventTracer::default);
                return;
            }
        };
    }

    pub fn record_value(&mut self, cash: f64, nlv: f64) {
        if let Some(v) = self.value.as_mut() {
            v.record(cash, nlv);
        }
    }

    pub fn record_event(&mut self, event: TracerEvent) {
        if let Some(e) = self.event.as_mut() {
            e.record(event);
        }
    }

    pub fn clear_history(&mut self) {
        if let Some(v) = self.value.as_mut() {
            v.clear();
        }
        if let Some(e) = self.event.as_mut() {
            e.clear();
        }
    }
}

// hydra_core/src/exchange.rs

//! An `Exchange` owns a set of `Asset`s sharing a price discovery
//! venue; it computes and exposes the merged timestamp index and
//! advances every contained asset's cursor on each tick.

use std::cell::Cell;
use std::rc::Rc;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::asset::Asset;
use crate::error::{HydraError, HydraResult};
use crate::ids::{AssetId, ExchangeId};

/// Filter applied by `Exchange::get_exchange_feature`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExchangeQueryType {
    All = 0,
    NSmallest = 1,
    NLargest = 2,
}

pub struct Exchange {
    exchange_id: ExchangeId,
    assets: IndexMap<AssetId, Rc<Asset>>,
    merged_index: Vec<i64>,
    cursor: usize,
    current_tick: Cell<Option<i64>>,
    built: bool,
}

impl Exchange {
    pub fn new(exchange_id: impl Into<ExchangeId>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            assets: IndexMap::new(),
            merged_index: Vec::new(),
            cursor: 0,
            current_tick: Cell::new(None),
            built: false,
        }
    }

    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    /// Pre-build only; fails if the asset-id or identity is already
    /// registered.
    pub fn register_asset(&mut self, asset: Rc<Asset>) -> HydraResult<()> {
        if self.built {
            return Err(HydraError::state("cannot register an asset after build()"));
        }
        if self.assets.contains_key(asset.asset_id()) {
            return Err(HydraError::configuration(format!("asset '{}' already registered", asset.asset_id())));
        }
        if self.assets.values().any(|existing| existing.same_identity(&asset)) {
            return Err(HydraError::configuration("this exact asset handle is already registered"));
        }
        self.assets.insert(asset.asset_id().to_string(), asset);
        Ok(())
    }

    pub fn asset(&self, asset_id: &str) -> HydraResult<&Rc<Asset>> {
        self.assets.get(asset_id).ok_or_else(|| HydraError::lookup("asset", asset_id))
    }

    pub fn assets(&self) -> impl Iterator<Item = &Rc<Asset>> {
        self.assets.values()
    }

    /// Computes the sorted unique union of all asset timestamps and
    /// freezes registration. Idempotent: a second call with no new
    /// assets is a no-op.
    pub fn build(&mut self) -> HydraResult<()> {
        self.merged_index = self
            .assets
            .values()
            .flat_map(|a| a.get_datetime_index_view().iter().copied())
            .sorted_unstable()
            .dedup()
            .collect();
        self.built = true;
        Ok(())
    }

    pub fn get_datetime_index_view(&self) -> &[i64] {
        &self.merged_index
    }

    pub fn len(&self) -> usize {
        self.merged_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged_index.is_empty()
    }

    /// Advances the exchange's own cursor and every contained asset's
    /// cursor to `tick`, whether or not this exchange has a row at
    /// `tick` itself.
    pub(crate) fn sync(&mut self, tick: i64) {
        if let Ok(idx) = self.merged_index.binary_search(&tick) {
            self.cursor = idx;
        }
        self.current_tick.set(Some(tick));
        for asset in self.assets.values() {
            asset.sync_cursor(tick);
        }
    }

    pub(crate) fn reset_cursor(&mut self) {
        self.cursor = 0;
        self.current_tick.set(None);
        for asset in self.assets.values() {
            asset.reset_cursor();
        }
    }

    /// Reads a feature from the named asset at its current cursor
    /// plus `row_offset`. Returns `Ok(None)` (the "missing" sentinel)
    /// when the asset is parked at the current tick.
    pub fn get_asset_feature(&self, asset_id: &str, column: &str, row_offset: i64) -> HydraResult<Option<f64>> {
        let asset = self.asset(asset_id)?;
        let tick = match self.current_tick.get() {
            Some(t) => t,
            None => return Ok(None),
        };
        if !asset.is_active(tick) {
            return Ok(None);
        }
        Ok(Some(asset.get(column, row_offset)?))
    }

    /// Returns an asset-id -> value mapping filtered by `query_type`.
    /// Ties in NSMALLEST/NLARGEST are broken by asset-id lexicographic
    /// order.
    pub fn get_exchange_feature(&self, column: &str, query_type: ExchangeQueryType, n: usize) -> HydraResult<IndexMap<AssetId, f64>> {
        let tick = self.current_tick.get();
        let mut active: Vec<(&AssetId, f64)> = Vec::new();
        for (id, asset) in self.assets.iter() {
            if tick.is_some_and(|t| asset.is_active(t)) {
                active.push((id, asset.get(column, 0)?));
            }
        }
        active.sort_by(|a, b| a.0.cmp(b.0));

        match query_type {
            ExchangeQueryType::All => {}
            ExchangeQueryType::NSmallest => {
                active.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(b.0)));
                active.truncate(n);
            }
            ExchangeQueryType::NLargest => {
                active.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(b.0)));
                active.truncate(n);
            }
        }

        Ok(active.into_iter().map(|(id, v)| (id.clone(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str, ts: &[i64], closes: &[f64]) -> Rc<Asset> {
        let mut a = Asset::new(id, "ex1", "br1", 0);
        a.load_headers(&["CLOSE".to_string()]).unwrap();
        a.load_data(closes, ts, ts.len(), 1, false).unwrap();
        Rc::new(a)
    }

    #[test]
    fn merged_index_is_sorted_unique_union() {
        let mut ex = Exchange::new("ex1");
        ex.register_asset(asset("a1", &[10, 30], &[1.0, 3.0])).unwrap();
        ex.register_asset(asset("a2", &[10, 20, 30], &[1.0, 2.0, 3.0])).unwrap();
        ex.build().unwrap();
        assert_eq!(ex.get_datetime_index_view(), &[10, 20, 30]);
    }

    #[test]
    fn duplicate_asset_id_is_rejected() {
        let mut ex = Exchange::new("ex1");
        ex.register_asset(asset("a1", &[10], &[1.0])).unwrap();
        assert!(ex.register_asset(asset("a1", &[20], &[2.0])).is_err());
    }

    #[test]
    fn parked_asset_feature_is_missing() {
        let mut ex = Exchange::new("ex1");
        ex.register_asset(asset("a1", &[10, 30], &[1.0, 3.0])).unwrap();
        ex.register_asset(asset("a2", &[10, 20, 30], &[1.0, 2.0, 3.0])).unwrap();
        ex.build().unwrap();
        ex.sync(20);
        assert_eq!(ex.get_asset_feature("a1", "CLOSE", 0).unwrap(), None);
        assert_eq!(ex.get_asset_feature("a2", "CLOSE", 0).unwrap(), Some(2.0));
    }

    #[test]
    fn nsmallest_breaks_ties_lexicographically() {
        let mut ex = Exchange::new("ex1");
        ex.register_asset(asset("b", &[10], &[5.0])).unwrap();
        ex.register_asset(asset("a", &[10], &[5.0])).unwrap();
        ex.build().unwrap();
        ex.sync(10);
        let result = ex.get_exchange_feature("CLOSE", ExchangeQueryType::NSmallest, 1).unwrap();
        assert_eq!(result.keys().next().unwrap(), "a");
    }
}

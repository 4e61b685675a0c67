// hydra_core/src/asset.rs

//! A single instrument's time series: an ordered sequence of
//! timestamps and a dense feature matrix, with O(1) column-by-name
//! lookup at the current row.

use std::cell::Cell;

use indexmap::IndexMap;

use crate::error::{HydraError, HydraResult};
use crate::ids::{AssetId, BrokerId, ExchangeId};

/// Backing storage for the feature matrix. `Owned` copies the caller's
/// values; `View` borrows a raw base pointer and documents that its
/// lifetime is the caller's responsibility (spec.md "Feature matrix as
/// borrowed view vs owned copy" design note). Both variants are laid
/// out column-major: `storage[col * rows + row]`.
enum FeatureStorage {
    Owned(Vec<f64>),
    View(*const f64),
}

impl FeatureStorage {
    /// # Safety
    /// For `View`, the caller must guarantee the pointed-to buffer
    /// remains valid and unmodified for at least `rows * cols`
    /// `f64`s for as long as this `Asset` is used.
    unsafe fn get(&self, index: usize) -> f64 {
        match self {
            FeatureStorage::Owned(v) => v[index],
            FeatureStorage::View(ptr) => unsafe { *ptr.add(index) },
        }
    }
}

/// A single instrument's time series.
pub struct Asset {
    asset_id: AssetId,
    exchange_id: ExchangeId,
    broker_id: BrokerId,
    warmup: usize,
    columns: IndexMap<String, usize>,
    timestamps: Vec<i64>,
    storage: Option<FeatureStorage>,
    rows: usize,
    cols: usize,
    headers_loaded: bool,
    data_loaded: bool,
    /// Sticky cursor: the last row this asset has ever advanced to.
    /// Retained across ticks where the asset is parked so `get(_, -n)`
    /// can still read history.
    cursor: Cell<Option<usize>>,
    /// The tick at which `cursor`'s row is actually current. `None`
    /// means the asset is parked (missing) at the exchange's present
    /// tick, even though `cursor` may point at stale history.
    active_tick: Cell<Option<i64>>,
}

impl std::fmt::Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("asset_id", &self.asset_id)
            .field("exchange_id", &self.exchange_id)
            .field("broker_id", &self.broker_id)
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .field("cursor", &self.cursor.get())
            .finish()
    }
}

impl Asset {
    pub fn new(asset_id: impl Into<AssetId>, exchange_id: impl Into<ExchangeId>, broker_id: impl Into<BrokerId>, warmup: usize) -> Self {
        Self {
            asset_id: asset_id.into(),
            exchange_id: exchange_id.into(),
            broker_id: broker_id.into(),
            warmup,
            columns: IndexMap::new(),
            timestamps: Vec::new(),
            storage: None,
            rows: 0,
            cols: 0,
            headers_loaded: false,
            data_loaded: false,
            cursor: Cell::new(None),
            active_tick: Cell::new(None),
        }
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn exchange_id(&self) -> &str {
        &self.exchange_id
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    /// Two handles are the same asset iff they are the same object in
    /// memory (spec.md §4.1: "compare equal by identity").
    pub fn same_identity(&self, other: &Asset) -> bool {
        std::ptr::eq(self, other)
    }

    /// Sets column-name -> offset. Idempotent only before `load_data`.
    pub fn load_headers(&mut self, names: &[String]) -> HydraResult<()> {
        if self.data_loaded {
            return Err(HydraError::state("cannot load headers after load_data"));
        }
        self.columns = names
            .iter()
            .enumerate()
            .map(|(offset, name)| (name.clone(), offset))
            .collect();
        self.headers_loaded = true;
        Ok(())
    }

    /// Installs the feature matrix. `values` is column-major,
    /// `rows * cols` long. When `is_view` is true the core does not
    /// copy `values`; the caller must keep the backing buffer alive
    /// and unchanged for the asset's lifetime.
    ///
    /// # Safety
    /// Passing `is_view = true` is unsafe in spirit even though the
    /// signature isn't: using the asset after the caller's buffer is
    /// freed is undefined behavior (spec.md §5).
    pub fn load_data(&mut self, values: &[f64], timestamps: &[i64], rows: usize, cols: usize, is_view: bool) -> HydraResult<()> {
        if rows * cols != values.len() {
            return Err(HydraError::data(format!(
                "shape mismatch: rows*cols={} but values.len()={}",
                rows * cols,
                values.len()
            )));
        }
        if timestamps.len() != rows {
            return Err(HydraError::data(format!(
                "timestamp length {} does not match row count {}",
                timestamps.len(),
                rows
            )));
        }
        if self.headers_loaded && self.columns.len() != cols {
            return Err(HydraError::data(format!(
                "header count {} does not match column count {}",
                self.columns.len(),
                cols
            )));
        }
        if !timestamps.windows(2).all(|w| w[0] < w[1]) {
            return Err(HydraError::data("timestamps must be strictly monotonically increasing"));
        }
        if self.warmup > rows {
            return Err(HydraError::data("warmup exceeds row count"));
        }

        self.storage = Some(if is_view {
            FeatureStorage::View(values.as_ptr())
        } else {
            FeatureStorage::Owned(values.to_vec())
        });
        self.timestamps = timestamps.to_vec();
        self.rows = rows;
        self.cols = cols;
        self.data_loaded = true;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn get_datetime_index_view(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn warmup(&self) -> usize {
        self.warmup
    }

    fn column_offset(&self, column: &str) -> HydraResult<usize> {
        self.columns
            .get(column)
            .copied()
            .ok_or_else(|| HydraError::lookup("column", column))
    }

    /// Value in the current row plus `offset` (0 = current, -1 =
    /// previous). Uses the sticky cursor, so history reads succeed
    /// even while the asset is parked at the present tick.
    pub fn get(&self, column: &str, offset: i64) -> HydraResult<f64> {
        let col = self.column_offset(column)?;
        let cursor = self.cursor.get().ok_or_else(|| HydraError::out_of_range("asset has not started ticking yet"))?;
        let row = cursor as i64 + offset;
        if row < 0 || row as usize >= self.rows {
            return Err(HydraError::out_of_range(format!("row offset {offset} from cursor {cursor} is out of [0,{})", self.rows)));
        }
        let storage = self.storage.as_ref().expect("data_loaded implies storage is set");
        let index = col * self.rows + row as usize;
        Ok(unsafe { storage.get(index) })
    }

    /// Whether this asset has a row for `tick` (i.e. is not parked).
    pub fn is_active(&self, tick: i64) -> bool {
        self.active_tick.get() == Some(tick)
    }

    /// Advances the sticky cursor to `tick` if the asset has a row
    /// there; otherwise marks the asset parked for this tick without
    /// moving the cursor. Driven externally by `Exchange`.
    pub(crate) fn sync_cursor(&self, tick: i64) {
        let next = match self.cursor.get() {
            None => self.warmup,
            Some(i) => i + 1,
        };
        if next < self.rows && self.timestamps[next] == tick {
            self.cursor.set(Some(next));
            self.active_tick.set(Some(tick));
            return;
        }
        if let Some(i) = self.cursor.get() {
            if self.timestamps[i] == tick {
                self.active_tick.set(Some(tick));
                return;
            }
        }
        self.active_tick.set(None);
    }

    pub(crate) fn reset_cursor(&self) {
        self.cursor.set(None);
        self.active_tick.set(None);
    }
}

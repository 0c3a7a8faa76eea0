//! Integral caches keyed by (integration set, normalisation set, range).
//!
//! A [`CacheManager`] lives inside a density (behind a `RefCell`) and owns the entries that
//! density builds for each distinct integration request. Entries are created lazily and kept
//! until the workspace reports a shape change (new named range or binning), at which point
//! the whole manager is emptied. Codes that still point into the old entries are re-resolved
//! through [`CacheManager::resolve`].
//!
//! [`ValueCache`] memoises a single number against the change stamps of its dependencies.

use std::cell::Cell;

use crate::workspace::{VarSet, Workspace};
use crate::{Error, Result};

/// Identity of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    /// Integrated variables.
    pub vars: VarSet,
    /// Normalisation variables, if normalised.
    pub norm: Option<VarSet>,
    /// Named range, `None` for the full range.
    pub range: Option<String>,
}

impl CacheKey {
    /// Build a key.
    pub fn new(vars: VarSet, norm: Option<VarSet>, range: Option<&str>) -> Self {
        Self { vars, norm, range: range.map(str::to_string) }
    }
}

/// Owner of the cache entries of one density.
#[derive(Debug)]
pub struct CacheManager<T> {
    entries: Vec<(CacheKey, T)>,
    shape_stamp: u64,
}

impl<T> Default for CacheManager<T> {
    fn default() -> Self {
        Self { entries: Vec::new(), shape_stamp: 0 }
    }
}

impl<T> CacheManager<T> {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    fn sync_shape(&mut self, ws: &Workspace) {
        let shape = ws.shape_stamp();
        if shape != self.shape_stamp {
            if !self.entries.is_empty() {
                log::debug!("shape change: dropping {} cache entries", self.entries.len());
            }
            self.entries.clear();
            self.shape_stamp = shape;
        }
    }

    /// Slot of the entry for `key`, building it with `make` if absent.
    pub fn get_or_create(
        &mut self,
        ws: &Workspace,
        key: CacheKey,
        make: impl FnOnce() -> Result<T>,
    ) -> Result<usize> {
        self.sync_shape(ws);
        if let Some(slot) = self.entries.iter().position(|(k, _)| *k == key) {
            return Ok(slot);
        }
        let entry = make()?;
        self.entries.push((key, entry));
        Ok(self.entries.len() - 1)
    }

    /// Validate `slot` against `key`, rebuilding the entry if the slot went stale.
    pub fn resolve(
        &mut self,
        ws: &Workspace,
        slot: usize,
        key: &CacheKey,
        make: impl FnOnce() -> Result<T>,
    ) -> Result<usize> {
        self.sync_shape(ws);
        match self.entries.get(slot) {
            Some((k, _)) if k == key => Ok(slot),
            _ => self.get_or_create(ws, key.clone(), make),
        }
    }

    /// Entry at `slot`.
    pub fn entry(&self, slot: usize) -> Result<&T> {
        self.entries
            .get(slot)
            .map(|(_, e)| e)
            .ok_or_else(|| Error::Computation(format!("unknown integral cache slot {slot}")))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Memoisation state of one number.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum CachedValue {
    /// Must be recomputed.
    #[default]
    Dirty,
    /// Valid as long as no dependency changed after `stamp` and no range or binning changed.
    Clean {
        /// Clock tick recorded after the computation.
        stamp: u64,
        /// Workspace shape stamp at the time of the computation.
        shape: u64,
        /// Cached result.
        value: f64,
    },
}

/// A number cached against the change stamps of a dependency set.
#[derive(Debug, Clone)]
pub struct ValueCache {
    deps: VarSet,
    state: Cell<CachedValue>,
}

impl ValueCache {
    /// Dirty cache over `deps`.
    pub fn new(deps: VarSet) -> Self {
        Self { deps, state: Cell::new(CachedValue::Dirty) }
    }

    /// Variables the cached value depends on.
    pub fn deps(&self) -> &VarSet {
        &self.deps
    }

    /// Whether the next read recomputes.
    pub fn is_dirty(&self, ws: &Workspace) -> bool {
        match self.state.get() {
            CachedValue::Dirty => true,
            CachedValue::Clean { stamp, shape, .. } => {
                shape != ws.shape_stamp() || ws.max_stamp(&self.deps) > stamp
            }
        }
    }

    /// Cached value, or the result of `compute` if a dependency changed.
    ///
    /// The stamp is taken after `compute` returns, so temporary moves of variables made
    /// (and undone) inside `compute` do not dirty the result.
    pub fn get_or_compute(
        &self,
        ws: &Workspace,
        compute: impl FnOnce() -> Result<f64>,
    ) -> Result<f64> {
        if let CachedValue::Clean { value, .. } = self.state.get() {
            if !self.is_dirty(ws) {
                return Ok(value);
            }
        }
        self.state.set(CachedValue::Dirty);
        let value = compute()?;
        let (stamp, shape) = (ws.clock(), ws.shape_stamp());
        self.state.set(CachedValue::Clean { stamp, shape, value });
        Ok(value)
    }

    /// Force recomputation on the next read.
    pub fn invalidate(&self) {
        self.state.set(CachedValue::Dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::var_set;

    #[test]
    fn test_value_cache_tracks_dependencies() {
        let mut ws = Workspace::new();
        let a = ws.add_real("a", 1.0, 0.0, 10.0).unwrap();
        let b = ws.add_real("b", 1.0, 0.0, 10.0).unwrap();
        let cache = ValueCache::new(var_set([a]));
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok(2.0 * ws.real(a))
        };

        assert_eq!(cache.get_or_compute(&ws, compute).unwrap(), 2.0);
        assert_eq!(cache.get_or_compute(&ws, compute).unwrap(), 2.0);
        assert_eq!(calls.get(), 1);

        ws.set_real(b, 3.0);
        assert!(!cache.is_dirty(&ws));

        ws.set_real(a, 4.0);
        assert!(cache.is_dirty(&ws));
        assert_eq!(cache.get_or_compute(&ws, compute).unwrap(), 8.0);
        assert_eq!(calls.get(), 2);

        cache.invalidate();
        assert!(cache.is_dirty(&ws));

        assert_eq!(cache.get_or_compute(&ws, compute).unwrap(), 8.0);
        ws.set_real_range(b, "side", 0.0, 1.0).unwrap();
        // Rebind the same closure: the earlier one borrowed `ws` across the `&mut` call above.
        let compute = || {
            calls.set(calls.get() + 1);
            Ok(2.0 * ws.real(a))
        };
        assert!(cache.is_dirty(&ws));
        assert_eq!(cache.get_or_compute(&ws, compute).unwrap(), 8.0);
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_manager_rebuilds_after_shape_change() {
        let mut ws = Workspace::new();
        let x = ws.add_real("x", 0.5, 0.0, 1.0).unwrap();
        let mut mgr: CacheManager<u32> = CacheManager::new();
        let key = CacheKey::new(var_set([x]), None, None);

        let slot = mgr.get_or_create(&ws, key.clone(), || Ok(7)).unwrap();
        let again = mgr.get_or_create(&ws, key.clone(), || Ok(99)).unwrap();
        assert_eq!(slot, again);
        assert_eq!(*mgr.entry(slot).unwrap(), 7);

        ws.set_real_range(x, "low", 0.0, 0.2).unwrap();
        let rebuilt = mgr.resolve(&ws, slot, &key, || Ok(8)).unwrap();
        assert_eq!(*mgr.entry(rebuilt).unwrap(), 8);
        assert_eq!(mgr.len(), 1);
        assert!(mgr.entry(5).is_err());
    }
}

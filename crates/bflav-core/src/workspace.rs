//! Parameter store shared by every density of a fit model.
//!
//! A [`Workspace`] owns real-valued variables and discrete categories. Densities never own
//! variables; they hold [`RealId`] / [`CatId`] handles and read the current values at
//! evaluation time.
//!
//! Values are kept in `Cell`s so that summations and numeric integrals can temporarily move
//! a variable through a shared `&Workspace` (see [`Workspace::scoped_real`]). Every value
//! change stamps the variable with a fresh tick of a monotonic clock; caches compare these
//! stamps against the tick at which they were filled.

use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};

use crate::{Error, Result};

/// Handle of a real-valued variable inside a [`Workspace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RealId(usize);

/// Handle of a category inside a [`Workspace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CatId(usize);

/// Any workspace variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VarId {
    /// Real-valued variable.
    Real(RealId),
    /// Discrete category.
    Cat(CatId),
}

impl From<RealId> for VarId {
    fn from(id: RealId) -> Self {
        VarId::Real(id)
    }
}

impl From<CatId> for VarId {
    fn from(id: CatId) -> Self {
        VarId::Cat(id)
    }
}

/// Ordered set of variables (integration sets, normalisation sets, dependents).
pub type VarSet = BTreeSet<VarId>;

/// Build a [`VarSet`] from anything convertible into [`VarId`].
pub fn var_set<V: Into<VarId>>(vars: impl IntoIterator<Item = V>) -> VarSet {
    vars.into_iter().map(Into::into).collect()
}

/// A real-valued variable (observable or parameter).
#[derive(Debug)]
pub struct RealVar {
    name: String,
    value: Cell<f64>,
    min: f64,
    max: f64,
    constant: bool,
    bins: usize,
    ranges: HashMap<String, (f64, f64)>,
    stamp: Cell<u64>,
}

impl RealVar {
    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    pub fn value(&self) -> f64 {
        self.value.get()
    }

    /// Lower bound of the full range.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound of the full range.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Whether the variable is declared constant.
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Number of bins used when this variable spans an interpolation grid.
    pub fn bins(&self) -> usize {
        self.bins
    }
}

/// One labelled state of a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatState {
    /// State label.
    pub label: String,
    /// Integer index of the state.
    pub index: i32,
}

/// A discrete category with labelled integer states.
#[derive(Debug)]
pub struct CategoryVar {
    name: String,
    states: Vec<CatState>,
    current: Cell<usize>,
    ranges: HashMap<String, BTreeSet<i32>>,
    stamp: Cell<u64>,
}

impl CategoryVar {
    /// Category name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared states in declaration order.
    pub fn states(&self) -> &[CatState] {
        &self.states
    }

    /// Index of the current state.
    pub fn index(&self) -> i32 {
        self.states[self.current.get()].index
    }

    /// Label of the current state.
    pub fn label(&self) -> &str {
        &self.states[self.current.get()].label
    }

    fn position_of_index(&self, index: i32) -> Option<usize> {
        self.states.iter().position(|s| s.index == index)
    }

    fn position_of_label(&self, label: &str) -> Option<usize> {
        self.states.iter().position(|s| s.label == label)
    }
}

/// Store of all variables of a model.
#[derive(Debug, Default)]
pub struct Workspace {
    reals: Vec<RealVar>,
    cats: Vec<CategoryVar>,
    names: HashMap<String, VarId>,
    clock: Cell<u64>,
    shape_stamp: u64,
}

const DEFAULT_BINS: usize = 100;

impl Workspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> u64 {
        let t = self.clock.get() + 1;
        self.clock.set(t);
        t
    }

    fn claim_name(&mut self, name: &str, id: VarId) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Validation("variable name must not be empty".into()));
        }
        if self.names.contains_key(name) {
            return Err(Error::Validation(format!("variable '{name}' already exists")));
        }
        self.names.insert(name.to_string(), id);
        Ok(())
    }

    /// Add a real variable with value `value` and full range `[min, max]`.
    pub fn add_real(
        &mut self,
        name: impl Into<String>,
        value: f64,
        min: f64,
        max: f64,
    ) -> Result<RealId> {
        let name = name.into();
        if min.is_nan() || max.is_nan() || min > max {
            return Err(Error::Validation(format!(
                "invalid range for '{name}': expected min <= max, got ({min}, {max})"
            )));
        }
        if !value.is_finite() || value < min || value > max {
            return Err(Error::Validation(format!(
                "initial value of '{name}' must be finite and inside [{min}, {max}], got {value}"
            )));
        }
        let id = RealId(self.reals.len());
        self.claim_name(&name, id.into())?;
        let stamp = self.tick();
        self.reals.push(RealVar {
            name,
            value: Cell::new(value),
            min,
            max,
            constant: false,
            bins: DEFAULT_BINS,
            ranges: HashMap::new(),
            stamp: Cell::new(stamp),
        });
        Ok(id)
    }

    /// Add a constant real variable.
    pub fn add_constant(&mut self, name: impl Into<String>, value: f64) -> Result<RealId> {
        let id = self.add_real(name, value, value, value)?;
        self.reals[id.0].constant = true;
        Ok(id)
    }

    /// Add a category with the given `(label, index)` states; the first state is current.
    pub fn add_category(
        &mut self,
        name: impl Into<String>,
        states: &[(&str, i32)],
    ) -> Result<CatId> {
        let name = name.into();
        if states.is_empty() {
            return Err(Error::Validation(format!("category '{name}' requires at least one state")));
        }
        let mut labels = BTreeSet::new();
        let mut indices = BTreeSet::new();
        for &(label, index) in states {
            if !labels.insert(label) {
                return Err(Error::Validation(format!(
                    "category '{name}' declares label '{label}' twice"
                )));
            }
            if !indices.insert(index) {
                return Err(Error::Validation(format!(
                    "category '{name}' declares index {index} twice"
                )));
            }
        }
        let id = CatId(self.cats.len());
        self.claim_name(&name, id.into())?;
        let stamp = self.tick();
        self.cats.push(CategoryVar {
            name,
            states: states
                .iter()
                .map(|&(label, index)| CatState { label: label.to_string(), index })
                .collect(),
            current: Cell::new(0),
            ranges: HashMap::new(),
            stamp: Cell::new(stamp),
        });
        Ok(id)
    }

    /// Declare a named sub-range `[lo, hi]` for a real variable.
    pub fn set_real_range(&mut self, id: RealId, range: &str, lo: f64, hi: f64) -> Result<()> {
        let var = &mut self.reals[id.0];
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(Error::Validation(format!(
                "invalid range '{range}' for '{}': expected lo <= hi, got ({lo}, {hi})",
                var.name
            )));
        }
        var.ranges.insert(range.to_string(), (lo, hi));
        self.shape_stamp += 1;
        Ok(())
    }

    /// Set the number of bins used for interpolation grids over this variable.
    pub fn set_bins(&mut self, id: RealId, bins: usize) -> Result<()> {
        if bins == 0 {
            return Err(Error::Validation(format!(
                "bin count for '{}' must be >= 1",
                self.reals[id.0].name
            )));
        }
        self.reals[id.0].bins = bins;
        self.shape_stamp += 1;
        Ok(())
    }

    /// Declare or release a real variable as constant.
    pub fn set_constant(&mut self, id: RealId, constant: bool) {
        self.reals[id.0].constant = constant;
    }

    /// Declare a named range of a category as the set of listed labels.
    pub fn set_category_range(&mut self, id: CatId, range: &str, labels: &[&str]) -> Result<()> {
        let cat = &mut self.cats[id.0];
        let mut indices = BTreeSet::new();
        for label in labels {
            let pos = cat.position_of_label(label).ok_or_else(|| {
                Error::Validation(format!("category '{}' has no state '{label}'", cat.name))
            })?;
            indices.insert(cat.states[pos].index);
        }
        cat.ranges.insert(range.to_string(), indices);
        self.shape_stamp += 1;
        Ok(())
    }

    /// Real variable metadata.
    pub fn real_var(&self, id: RealId) -> &RealVar {
        &self.reals[id.0]
    }

    /// Category metadata.
    pub fn category(&self, id: CatId) -> &CategoryVar {
        &self.cats[id.0]
    }

    /// Current value of a real variable.
    pub fn real(&self, id: RealId) -> f64 {
        self.reals[id.0].value.get()
    }

    /// Set a real variable, clamped into its full range.
    ///
    /// The variable is stamped only if its value actually changes.
    pub fn set_real(&self, id: RealId, value: f64) {
        let var = &self.reals[id.0];
        let v = if value.is_nan() { value } else { value.clamp(var.min, var.max) };
        if v.to_bits() != var.value.get().to_bits() {
            var.value.set(v);
            var.stamp.set(self.tick());
        }
    }

    /// `(lo, hi)` of a real variable in a named range; `None` or an undeclared name gives
    /// the full range.
    pub fn real_range(&self, id: RealId, range: Option<&str>) -> (f64, f64) {
        let var = &self.reals[id.0];
        range.and_then(|r| var.ranges.get(r).copied()).unwrap_or((var.min, var.max))
    }

    /// Index of the current state of a category.
    pub fn cat_index(&self, id: CatId) -> i32 {
        self.cats[id.0].index()
    }

    /// Label of the current state of a category.
    pub fn cat_label(&self, id: CatId) -> &str {
        self.cats[id.0].label()
    }

    /// Declared states of a category.
    pub fn cat_states(&self, id: CatId) -> &[CatState] {
        &self.cats[id.0].states
    }

    /// Switch a category to the state with integer index `index`.
    pub fn set_cat_index(&self, id: CatId, index: i32) -> Result<()> {
        let cat = &self.cats[id.0];
        let pos = cat.position_of_index(index).ok_or_else(|| {
            Error::Computation(format!("category '{}' has no state with index {index}", cat.name))
        })?;
        self.move_category(cat, pos);
        Ok(())
    }

    /// Switch a category to the state labelled `label`.
    pub fn set_cat_label(&self, id: CatId, label: &str) -> Result<()> {
        let cat = &self.cats[id.0];
        let pos = cat.position_of_label(label).ok_or_else(|| {
            Error::Computation(format!("category '{}' has no state '{label}'", cat.name))
        })?;
        self.move_category(cat, pos);
        Ok(())
    }

    fn move_category(&self, cat: &CategoryVar, pos: usize) {
        if cat.current.get() != pos {
            cat.current.set(pos);
            cat.stamp.set(self.tick());
        }
    }

    /// Whether state `index` of a category lies in the named range.
    ///
    /// No range, or a range name the category does not declare, admits every state.
    pub fn cat_in_range(&self, id: CatId, index: i32, range: Option<&str>) -> bool {
        let cat = &self.cats[id.0];
        match range.and_then(|r| cat.ranges.get(r)) {
            Some(states) => states.contains(&index),
            None => cat.position_of_index(index).is_some(),
        }
    }

    /// Look a variable up by name.
    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.names.get(name).copied()
    }

    /// Look a real variable up by name.
    pub fn real_id(&self, name: &str) -> Result<RealId> {
        match self.lookup(name) {
            Some(VarId::Real(id)) => Ok(id),
            Some(VarId::Cat(_)) => {
                Err(Error::Validation(format!("'{name}' is a category, not a real variable")))
            }
            None => Err(Error::Validation(format!("unknown variable '{name}'"))),
        }
    }

    /// Look a category up by name.
    pub fn cat_id(&self, name: &str) -> Result<CatId> {
        match self.lookup(name) {
            Some(VarId::Cat(id)) => Ok(id),
            Some(VarId::Real(_)) => {
                Err(Error::Validation(format!("'{name}' is a real variable, not a category")))
            }
            None => Err(Error::Validation(format!("unknown variable '{name}'"))),
        }
    }

    /// Name of any variable.
    pub fn var_name(&self, var: VarId) -> &str {
        match var {
            VarId::Real(id) => &self.reals[id.0].name,
            VarId::Cat(id) => &self.cats[id.0].name,
        }
    }

    /// Comma-separated names of a variable set, for diagnostics.
    pub fn describe(&self, vars: &VarSet) -> String {
        vars.iter().map(|v| self.var_name(*v)).collect::<Vec<_>>().join(",")
    }

    /// Whether a variable is constant. Categories are never constant.
    pub fn is_constant(&self, var: VarId) -> bool {
        match var {
            VarId::Real(id) => self.reals[id.0].constant,
            VarId::Cat(_) => false,
        }
    }

    /// Tick at which a variable last changed.
    pub fn stamp(&self, var: VarId) -> u64 {
        match var {
            VarId::Real(id) => self.reals[id.0].stamp.get(),
            VarId::Cat(id) => self.cats[id.0].stamp.get(),
        }
    }

    /// Latest change tick over a set of variables (0 for an empty set).
    pub fn max_stamp(&self, vars: &VarSet) -> u64 {
        vars.iter().map(|v| self.stamp(*v)).max().unwrap_or(0)
    }

    /// Current clock tick.
    pub fn clock(&self) -> u64 {
        self.clock.get()
    }

    /// Counter bumped by every range or binning change.
    pub fn shape_stamp(&self) -> u64 {
        self.shape_stamp
    }

    /// Move a real variable to `value` until the returned guard is dropped.
    pub fn scoped_real(&self, id: RealId, value: f64) -> ScopedReal<'_> {
        let saved = self.real(id);
        self.set_real(id, value);
        ScopedReal { ws: self, id, saved }
    }

    /// Move a category to state `index` until the returned guard is dropped.
    pub fn scoped_cat(&self, id: CatId, index: i32) -> Result<ScopedCat<'_>> {
        let saved = self.cat_index(id);
        self.set_cat_index(id, index)?;
        Ok(ScopedCat { ws: self, id, saved })
    }
}

/// Restores a real variable on drop.
#[derive(Debug)]
pub struct ScopedReal<'a> {
    ws: &'a Workspace,
    id: RealId,
    saved: f64,
}

impl Drop for ScopedReal<'_> {
    fn drop(&mut self) {
        self.ws.set_real(self.id, self.saved);
    }
}

/// Restores a category on drop.
#[derive(Debug)]
pub struct ScopedCat<'a> {
    ws: &'a Workspace,
    id: CatId,
    saved: i32,
}

impl Drop for ScopedCat<'_> {
    fn drop(&mut self) {
        // The saved index was valid when the guard was created.
        let _ = self.ws.set_cat_index(self.id, self.saved);
    }
}

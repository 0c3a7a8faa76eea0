//! Resolution model selected by the state of a category.
//!
//! Exactly one sub-model is live at a time: the one registered for the current index of the
//! switching category. Integrals are built per state and looked up by the live state; a
//! request that integrates over the category itself is left to the engine, which sums the
//! states one at a time.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use bflav_core::{
    CacheKey, CacheManager, CatId, Error, Integral, IntegralCode, ModelHandle, Pdf, RealId,
    ResolutionModel, Result, Substitution, VarId, VarSet, Workspace,
};

/// Per-state integrals for one (integration set, range).
#[derive(Debug)]
struct SwitchElem {
    integrals: BTreeMap<i32, Integral>,
}

/// Resolution model that dispatches to one of several models by category state.
#[derive(Debug)]
pub struct SimultaneousResolutionSwitch {
    name: String,
    category: CatId,
    models: BTreeMap<i32, ModelHandle>,
    conv_var: RealId,
    cache: RefCell<CacheManager<SwitchElem>>,
}

impl SimultaneousResolutionSwitch {
    /// Switch over `category` with one model per state index.
    pub fn from_index_map(
        name: impl Into<String>,
        ws: &Workspace,
        category: CatId,
        models: BTreeMap<i32, Rc<dyn ResolutionModel>>,
    ) -> Result<Self> {
        let models = models.into_iter().map(|(i, m)| (i, ModelHandle::Borrowed(m))).collect();
        Self::build(name.into(), ws, category, models)
    }

    /// Switch over `category` with one model per state label.
    pub fn from_label_map<'a>(
        name: impl Into<String>,
        ws: &Workspace,
        category: CatId,
        models: impl IntoIterator<Item = (&'a str, Rc<dyn ResolutionModel>)>,
    ) -> Result<Self> {
        let name = name.into();
        let mut by_index = BTreeMap::new();
        for (label, model) in models {
            let Some(state) = ws.cat_states(category).iter().find(|s| s.label == label) else {
                return Err(Error::Validation(format!(
                    "SimultaneousResolutionSwitch '{name}': category '{}' has no state '{label}'",
                    ws.category(category).name()
                )));
            };
            by_index.insert(state.index, ModelHandle::Borrowed(model));
        }
        Self::build(name, ws, category, by_index)
    }

    /// Switch over `category`, pairing `models` with its states in declaration order.
    pub fn from_list(
        name: impl Into<String>,
        ws: &Workspace,
        category: CatId,
        models: Vec<Rc<dyn ResolutionModel>>,
    ) -> Result<Self> {
        let name = name.into();
        let states = ws.cat_states(category);
        if states.len() != models.len() {
            return Err(Error::Validation(format!(
                "SimultaneousResolutionSwitch '{name}': category '{}' has {} states but {} models were given",
                ws.category(category).name(),
                states.len(),
                models.len()
            )));
        }
        let by_index = states
            .iter()
            .zip(models)
            .map(|(s, m)| (s.index, ModelHandle::Borrowed(m)))
            .collect();
        Self::build(name, ws, category, by_index)
    }

    fn build(
        name: String,
        ws: &Workspace,
        category: CatId,
        models: BTreeMap<i32, ModelHandle>,
    ) -> Result<Self> {
        let states = ws.cat_states(category);
        if let Some(s) = states.iter().find(|s| !models.contains_key(&s.index)) {
            return Err(Error::Validation(format!(
                "SimultaneousResolutionSwitch '{name}': no model for state '{}' ({})",
                s.label, s.index
            )));
        }
        if let Some(i) = models.keys().find(|i| !states.iter().any(|s| s.index == **i)) {
            return Err(Error::Validation(format!(
                "SimultaneousResolutionSwitch '{name}': category '{}' has no state with index {i}",
                ws.category(category).name()
            )));
        }
        let Some(conv_var) = models.values().next().map(|m| m.convolution_variable()) else {
            return Err(Error::Validation(format!(
                "SimultaneousResolutionSwitch '{name}': at least one model is required"
            )));
        };
        for model in models.values() {
            if model.convolution_variable() != conv_var {
                return Err(Error::Validation(format!(
                    "SimultaneousResolutionSwitch '{name}': model '{}' smears '{}', expected '{}'",
                    model.name(),
                    ws.real_var(model.convolution_variable()).name(),
                    ws.real_var(conv_var).name()
                )));
            }
            if model.dependents().contains(&VarId::Cat(category)) {
                return Err(Error::Validation(format!(
                    "SimultaneousResolutionSwitch '{name}': model '{}' depends on the switching category",
                    model.name()
                )));
            }
        }
        Ok(Self { name, category, models, conv_var, cache: RefCell::new(CacheManager::new()) })
    }

    /// The switching category.
    pub fn category(&self) -> CatId {
        self.category
    }

    /// Model registered for state `index`.
    pub fn model_for(&self, index: i32) -> Option<&dyn ResolutionModel> {
        self.models.get(&index).map(|m| &**m)
    }

    fn live_model(&self, ws: &Workspace) -> Result<(i32, &ModelHandle)> {
        let index = ws.cat_index(self.category);
        self.models.get(&index).map(|m| (index, m)).ok_or_else(|| {
            Error::Computation(format!("{}: no model for category index {index}", self.name))
        })
    }

    fn make_elem(&self, vars: &VarSet, range: Option<&str>) -> SwitchElem {
        let integrals = self
            .models
            .iter()
            .map(|(i, m)| (*i, Integral::new(&**m, vars.clone(), None, range)))
            .collect();
        SwitchElem { integrals }
    }

    fn with_models(&self, name: &str, models: BTreeMap<i32, ModelHandle>) -> Self {
        Self {
            name: name.to_string(),
            category: self.category,
            models,
            conv_var: self.conv_var,
            cache: RefCell::new(CacheManager::new()),
        }
    }
}

impl Pdf for SimultaneousResolutionSwitch {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependents(&self) -> VarSet {
        let mut deps: VarSet = self.models.values().flat_map(|m| m.dependents()).collect();
        deps.insert(VarId::Cat(self.category));
        deps
    }

    fn evaluate(&self, ws: &Workspace) -> Result<f64> {
        let (_, model) = self.live_model(ws)?;
        model.evaluate(ws)
    }

    fn analytical_integral_code(
        &self,
        ws: &Workspace,
        vars: &VarSet,
        _norm: Option<&VarSet>,
        range: Option<&str>,
    ) -> Result<Option<IntegralCode>> {
        let mut analytic: VarSet = vars.intersection(&self.dependents()).copied().collect();
        analytic.remove(&VarId::Cat(self.category));
        if analytic.is_empty() {
            return Ok(None);
        }
        let slot = self
            .cache
            .borrow_mut()
            .get_or_create(ws, CacheKey::new(analytic.clone(), None, range), || {
                Ok(self.make_elem(&analytic, range))
            })?;
        Ok(Some(IntegralCode::plain(analytic, slot)))
    }

    fn analytical_integral(
        &self,
        ws: &Workspace,
        code: &IntegralCode,
        range: Option<&str>,
    ) -> Result<f64> {
        let (index, model) = self.live_model(ws)?;
        let key = CacheKey::new(code.analytic.clone(), None, range);
        let slot = self
            .cache
            .borrow_mut()
            .resolve(ws, code.int_slot, &key, || Ok(self.make_elem(&code.analytic, range)))?;
        let cache = self.cache.borrow();
        match cache.entry(slot)?.integrals.get(&index) {
            Some(integral) => integral.value(&**model, ws),
            None => Err(Error::Computation(format!(
                "{}: no integral for category index {index}",
                self.name
            ))),
        }
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn Pdf>> {
        let models: BTreeMap<i32, ModelHandle> = self
            .models
            .iter()
            .map(|(i, m)| Ok((*i, m.duplicate()?)))
            .collect::<Result<_>>()?;
        Ok(Box::new(self.with_models(name, models)))
    }
}

impl ResolutionModel for SimultaneousResolutionSwitch {
    fn convolution_variable(&self) -> RealId {
        self.conv_var
    }

    fn customize(&self, name: &str, subst: &Substitution) -> Result<Box<dyn ResolutionModel>> {
        let models: BTreeMap<i32, ModelHandle> = self
            .models
            .iter()
            .map(|(i, m)| {
                let model = m.customize(&format!("{name}_{i}"), subst)?;
                Ok((*i, ModelHandle::Owned(model)))
            })
            .collect::<Result<_>>()?;
        Ok(Box::new(self.with_models(name, models)))
    }
}

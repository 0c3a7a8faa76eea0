//! Tagging density for non-oscillating (or background) decays with several taggers.
//!
//! Observables: the final-state charge `qf ∈ {-1, +1}`, the signed tag index `qt ∈ {-N..N}`
//! (0 = untagged, `|qt| = k` means tagger `k` fired) and optionally a per-event mistag `η`.
//!
//! ```text
//! P(qf)           = (1 + qf·a_det) / 2
//! P(qt = ±k | qf) = ε_k (1 + qf·a_f,k) (1 ± a_t,k) / 2
//! P(qt = 0 | qf)  = 1 - Σ_{qt ≠ 0} P(qt | qf)
//! P(η | qt)       = mistag density of the slot, normalised over η (uniform for qt = 0)
//! ```
//!
//! The full density `P(qf) P(qt|qf) P(η|qt)` is normalised over `(qf, qt, η)` by
//! construction. Integrals over any subset of the observables are analytic and cached per
//! (integration set, normalisation set, range).

use std::cell::RefCell;
use std::rc::Rc;

use bflav_core::{
    CacheKey, CacheManager, CatId, CatState, Error, Integral, IntegralCode, Pdf, RealFunction,
    RealId, Result, Term, VarId, VarSet, Workspace, var_set,
};

use crate::pdf::UniformPdf;
use crate::tag_multiplexer::TaggingCategoryMultiplexer;
use crate::tag_state::TagState;

/// A per-tagger input: a plain parameter, or a value multiplexed by tagging category.
///
/// Multiplexed inputs are allowed to depend on the tag index (they read it through
/// [`TaggingCategoryMultiplexer::value_with`]); plain terms are not.
#[derive(Debug, Clone)]
pub enum TaggingInput {
    /// A parameter expression.
    Value(Term),
    /// A tagging-category multiplexer whose decision category is the tag index.
    PerCategory(Rc<TaggingCategoryMultiplexer>),
}

impl TaggingInput {
    fn value(&self, ws: &Workspace, state: TagState) -> Result<f64> {
        match self {
            TaggingInput::Value(t) => Ok(t.value(ws)),
            TaggingInput::PerCategory(m) => m.value_with(ws, state.index()),
        }
    }

    fn dependents(&self) -> VarSet {
        match self {
            TaggingInput::Value(t) => t.dependents(),
            TaggingInput::PerCategory(m) => m.dependents(),
        }
    }
}

impl From<Term> for TaggingInput {
    fn from(t: Term) -> Self {
        TaggingInput::Value(t)
    }
}

impl From<RealId> for TaggingInput {
    fn from(id: RealId) -> Self {
        TaggingInput::Value(Term::Var(id))
    }
}

impl From<f64> for TaggingInput {
    fn from(c: f64) -> Self {
        TaggingInput::Value(Term::Const(c))
    }
}

impl From<Rc<TaggingCategoryMultiplexer>> for TaggingInput {
    fn from(m: Rc<TaggingCategoryMultiplexer>) -> Self {
        TaggingInput::PerCategory(m)
    }
}

/// Configuration of one tagger.
#[derive(Debug, Clone)]
pub struct Tagger {
    /// Tagging efficiency ε.
    pub efficiency: TaggingInput,
    /// Final-state dependent efficiency asymmetry a_f.
    pub final_state_asymmetry: TaggingInput,
    /// Tag dependent efficiency asymmetry a_t.
    pub tag_asymmetry: TaggingInput,
    /// Mistag densities for B and B̄ tags; required iff a mistag observable is configured.
    pub mistag_pdfs: Option<(Rc<dyn Pdf>, Rc<dyn Pdf>)>,
}

impl Tagger {
    /// Tagger without per-event mistag.
    pub fn new(
        efficiency: impl Into<TaggingInput>,
        final_state_asymmetry: impl Into<TaggingInput>,
        tag_asymmetry: impl Into<TaggingInput>,
    ) -> Self {
        Self {
            efficiency: efficiency.into(),
            final_state_asymmetry: final_state_asymmetry.into(),
            tag_asymmetry: tag_asymmetry.into(),
            mistag_pdfs: None,
        }
    }

    /// Attach mistag densities for B and B̄ tags.
    pub fn with_mistag(mut self, b_tag: Rc<dyn Pdf>, bbar_tag: Rc<dyn Pdf>) -> Self {
        self.mistag_pdfs = Some((b_tag, bbar_tag));
        self
    }
}

/// Per-slot storage, laid out by [`TagState::slot`].
#[derive(Debug, Clone)]
struct Slot {
    efficiency: TaggingInput,
    final_state_asymmetry: TaggingInput,
    tag_asymmetry: TaggingInput,
    mistag: Option<Rc<dyn Pdf>>,
}

/// Cached integral over a subset of `{qf, qt, η}`.
#[derive(Debug)]
struct CacheElem {
    sum_qf: bool,
    sum_qt: bool,
    range: Option<String>,
    /// Per slot: the mistag density normalised over η, evaluated at the current η or
    /// integrated over the range.
    eta_parts: Vec<Option<Integral>>,
}

/// Multi-tagger tagging density for non-oscillating decays.
#[derive(Debug)]
pub struct NonOscTaggingPdf {
    name: String,
    qf: CatId,
    qt: CatId,
    eta: Option<RealId>,
    detection_asymmetry: Term,
    slots: Vec<Slot>,
    n_taggers: usize,
    cache: RefCell<CacheManager<CacheElem>>,
}

impl NonOscTaggingPdf {
    /// Density without a per-event mistag observable.
    pub fn new(
        name: impl Into<String>,
        ws: &Workspace,
        qf: CatId,
        qt: CatId,
        detection_asymmetry: impl Into<Term>,
        taggers: Vec<Tagger>,
    ) -> Result<Self> {
        Self::build(name.into(), ws, qf, qt, None, detection_asymmetry.into(), taggers)
    }

    /// Density with a per-event mistag observable; every tagger needs mistag densities.
    pub fn with_mistag(
        name: impl Into<String>,
        ws: &Workspace,
        qf: CatId,
        qt: CatId,
        eta: RealId,
        detection_asymmetry: impl Into<Term>,
        taggers: Vec<Tagger>,
    ) -> Result<Self> {
        Self::build(name.into(), ws, qf, qt, Some(eta), detection_asymmetry.into(), taggers)
    }

    /// Density from parallel per-tagger lists.
    ///
    /// `mistag_b` and `mistag_bbar` must be empty when `eta` is `None`, and have one entry
    /// per tagger otherwise.
    #[allow(clippy::too_many_arguments)]
    pub fn from_lists(
        name: impl Into<String>,
        ws: &Workspace,
        qf: CatId,
        qt: CatId,
        eta: Option<RealId>,
        detection_asymmetry: impl Into<Term>,
        efficiencies: Vec<TaggingInput>,
        final_state_asymmetries: Vec<TaggingInput>,
        tag_asymmetries: Vec<TaggingInput>,
        mistag_b: Vec<Rc<dyn Pdf>>,
        mistag_bbar: Vec<Rc<dyn Pdf>>,
    ) -> Result<Self> {
        let name = name.into();
        let n = efficiencies.len();
        let expected_mistag = if eta.is_some() { n } else { 0 };
        if final_state_asymmetries.len() != n
            || tag_asymmetries.len() != n
            || mistag_b.len() != expected_mistag
            || mistag_bbar.len() != expected_mistag
        {
            return Err(Error::Validation(format!(
                "NonOscTaggingPdf '{name}': list sizes differ (efficiencies {n}, final-state \
                 asymmetries {}, tag asymmetries {}, B mistag pdfs {}, B̄ mistag pdfs {}, \
                 expected {expected_mistag} mistag pdfs)",
                final_state_asymmetries.len(),
                tag_asymmetries.len(),
                mistag_b.len(),
                mistag_bbar.len()
            )));
        }
        let mut mistags = mistag_b.into_iter().zip(mistag_bbar);
        let taggers = efficiencies
            .into_iter()
            .zip(final_state_asymmetries)
            .zip(tag_asymmetries)
            .map(|((efficiency, final_state_asymmetry), tag_asymmetry)| Tagger {
                efficiency,
                final_state_asymmetry,
                tag_asymmetry,
                mistag_pdfs: mistags.next(),
            })
            .collect();
        Self::build(name, ws, qf, qt, eta, detection_asymmetry.into(), taggers)
    }

    fn build(
        name: String,
        ws: &Workspace,
        qf: CatId,
        qt: CatId,
        eta: Option<RealId>,
        detection_asymmetry: Term,
        taggers: Vec<Tagger>,
    ) -> Result<Self> {
        let invalid = |msg: String| Error::Validation(format!("NonOscTaggingPdf '{name}': {msg}"));
        if taggers.is_empty() {
            return Err(invalid("at least one tagger is required".into()));
        }
        if qf == qt {
            let msg = "final-state charge and tag index must be different categories";
            return Err(invalid(msg.into()));
        }
        if let Some(s) = ws.cat_states(qf).iter().find(|s| s.index.abs() != 1) {
            return Err(invalid(format!(
                "final-state charge state '{}' has index {}, expected -1 or +1",
                s.label, s.index
            )));
        }
        let n_taggers = taggers.len();
        let too_high = |s: &&CatState| s.index.unsigned_abs() as usize > n_taggers;
        if let Some(s) = ws.cat_states(qt).iter().find(too_high) {
            return Err(invalid(format!(
                "tag index state '{}' ({}) exceeds the number of taggers ({n_taggers})",
                s.label, s.index
            )));
        }

        let qf_var = VarId::Cat(qf);
        let qt_var = VarId::Cat(qt);
        let eta_var = eta.map(VarId::Real);
        let is_observable = |v: VarId| v == qf_var || v == qt_var || Some(v) == eta_var;

        if let Some(v) = detection_asymmetry.dependents().into_iter().find(|&v| is_observable(v)) {
            return Err(invalid(format!(
                "detection asymmetry depends on observable '{}'",
                ws.var_name(v)
            )));
        }

        let mut slots = Vec::with_capacity(2 * n_taggers + 1);
        slots.push(Slot {
            efficiency: TaggingInput::Value(Term::Const(1.0)),
            final_state_asymmetry: TaggingInput::Value(Term::Const(0.0)),
            tag_asymmetry: TaggingInput::Value(Term::Const(0.0)),
            mistag: eta.map(|e| {
                Rc::new(UniformPdf::new(format!("{name}_untagged_mistag"), &[e])) as Rc<dyn Pdf>
            }),
        });

        for (i, tagger) in taggers.into_iter().enumerate() {
            let k = i + 1;
            for (what, input) in [
                ("efficiency", &tagger.efficiency),
                ("final-state asymmetry", &tagger.final_state_asymmetry),
                ("tag asymmetry", &tagger.tag_asymmetry),
            ] {
                // multiplexers may read the tag index
                let per_category = matches!(input, TaggingInput::PerCategory(_));
                let forbidden = |v: &VarId| is_observable(*v) && !(per_category && *v == qt_var);
                if let Some(v) = input.dependents().into_iter().find(forbidden) {
                    return Err(invalid(format!(
                        "{what} of tagger {k} depends on observable '{}'",
                        ws.var_name(v)
                    )));
                }
                if let TaggingInput::PerCategory(m) = input {
                    if m.decision() != qt {
                        return Err(invalid(format!(
                            "{what} of tagger {k}: multiplexer '{}' must use the tag index as decision",
                            m.name()
                        )));
                    }
                }
            }

            let (mistag_b, mistag_bbar) = match (eta, tagger.mistag_pdfs) {
                (Some(_), Some((b, bbar))) => (Some(b), Some(bbar)),
                (None, None) => (None, None),
                (Some(_), None) => {
                    return Err(invalid(format!("tagger {k} needs mistag densities")));
                }
                (None, Some(_)) => {
                    return Err(invalid(format!(
                        "tagger {k} has mistag densities but no mistag observable is configured"
                    )));
                }
            };
            for pdf in mistag_b.iter().chain(mistag_bbar.iter()) {
                let deps = pdf.dependents();
                if deps.contains(&qf_var) || deps.contains(&qt_var) {
                    return Err(invalid(format!(
                        "mistag density '{}' of tagger {k} depends on qf or qt",
                        pdf.name()
                    )));
                }
            }

            // slot 2k - 1 (B̄ tag) precedes slot 2k (B tag)
            for mistag in [mistag_bbar, mistag_b] {
                slots.push(Slot {
                    efficiency: tagger.efficiency.clone(),
                    final_state_asymmetry: tagger.final_state_asymmetry.clone(),
                    tag_asymmetry: tagger.tag_asymmetry.clone(),
                    mistag,
                });
            }
        }

        Ok(Self {
            name,
            qf,
            qt,
            eta,
            detection_asymmetry,
            slots,
            n_taggers,
            cache: RefCell::new(CacheManager::new()),
        })
    }

    /// Number of configured taggers.
    pub fn n_taggers(&self) -> usize {
        self.n_taggers
    }

    fn observables(&self) -> VarSet {
        let mut obs = var_set([self.qf, self.qt]);
        if let Some(eta) = self.eta {
            obs.insert(VarId::Real(eta));
        }
        obs
    }

    fn tagged_states(&self) -> impl Iterator<Item = TagState> {
        (1..self.slots.len()).map(TagState::from_slot)
    }

    /// `P(qf)`.
    fn charge_probability(&self, ws: &Workspace, qf: f64) -> f64 {
        0.5 * (1.0 + qf * self.detection_asymmetry.value(ws))
    }

    /// `P(qt | qf)`.
    fn tag_probability(&self, ws: &Workspace, qf: f64, state: TagState) -> Result<f64> {
        match state {
            TagState::Untagged => {
                let mut tagged = 0.0;
                for s in self.tagged_states() {
                    tagged += self.tag_probability(ws, qf, s)?;
                }
                if tagged > 1.0 {
                    log::warn!(
                        "{}: tagged probability {tagged} exceeds one for qf = {qf}",
                        self.name
                    );
                }
                Ok(1.0 - tagged)
            }
            TagState::Tagged { flavour, .. } => {
                let slot = &self.slots[state.slot()];
                let eff = slot.efficiency.value(ws, state)?;
                let a_f = slot.final_state_asymmetry.value(ws, state)?;
                let a_t = slot.tag_asymmetry.value(ws, state)?;
                Ok(0.5 * eff * (1.0 + qf * a_f) * (1.0 + flavour.sign() * a_t))
            }
        }
    }

    /// Whether `P(qt | qf)` does not depend on `qf` (exact zero asymmetries).
    fn charge_independent(&self, ws: &Workspace, state: TagState) -> Result<bool> {
        let states: Vec<TagState> = match state {
            TagState::Untagged => self.tagged_states().collect(),
            tagged => vec![tagged],
        };
        for s in states {
            if self.slots[s.slot()].final_state_asymmetry.value(ws, s)? != 0.0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eta_part(&self, elem: &CacheElem, ws: &Workspace, state: TagState) -> Result<f64> {
        let slot = state.slot();
        match (&elem.eta_parts[slot], &self.slots[slot].mistag) {
            (Some(part), Some(pdf)) => part.value(pdf.as_ref(), ws),
            _ => Ok(1.0),
        }
    }

    fn states_in_range(
        &self,
        ws: &Workspace,
        cat: CatId,
        summed: bool,
        range: Option<&str>,
    ) -> Vec<i32> {
        if !summed {
            return vec![ws.cat_index(cat)];
        }
        ws.cat_states(cat)
            .iter()
            .map(|s| s.index)
            .filter(|&i| ws.cat_in_range(cat, i, range))
            .collect()
    }

    fn eval_elem(&self, elem: &CacheElem, ws: &Workspace) -> Result<f64> {
        let range = elem.range.as_deref();
        let qf_values = self.states_in_range(ws, self.qf, elem.sum_qf, range);
        let qt_states = self
            .states_in_range(ws, self.qt, elem.sum_qt, range)
            .into_iter()
            .map(|q| TagState::from_index(q, self.n_taggers))
            .collect::<Result<Vec<_>>>()?;

        let factorizable = if elem.sum_qf {
            let mut all = true;
            for &s in &qt_states {
                if !self.charge_independent(ws, s)? {
                    all = false;
                    break;
                }
            }
            all
        } else {
            false
        };

        if factorizable {
            let charge: f64 =
                qf_values.iter().map(|&q| self.charge_probability(ws, f64::from(q))).sum();
            let mut tag = 0.0;
            for &s in &qt_states {
                tag += self.tag_probability(ws, 1.0, s)? * self.eta_part(elem, ws, s)?;
            }
            return Ok(charge * tag);
        }

        let mut total = 0.0;
        for &q in &qf_values {
            let qf = f64::from(q);
            let mut tag = 0.0;
            for &s in &qt_states {
                tag += self.tag_probability(ws, qf, s)? * self.eta_part(elem, ws, s)?;
            }
            total += self.charge_probability(ws, qf) * tag;
        }
        Ok(total)
    }

    fn make_elem(&self, vars: &VarSet, range: Option<&str>) -> CacheElem {
        let eta_integrated = self.eta.is_some_and(|e| vars.contains(&VarId::Real(e)));
        let eta_parts = self
            .slots
            .iter()
            .map(|slot| {
                let (eta, pdf) = (self.eta?, slot.mistag.as_ref()?);
                let eta_set = var_set([eta]);
                Some(if eta_integrated {
                    Integral::new(pdf.as_ref(), eta_set.clone(), Some(eta_set), range)
                } else {
                    Integral::new(pdf.as_ref(), VarSet::new(), Some(eta_set), None)
                })
            })
            .collect();
        CacheElem {
            sum_qf: vars.contains(&VarId::Cat(self.qf)),
            sum_qt: vars.contains(&VarId::Cat(self.qt)),
            range: range.map(str::to_string),
            eta_parts,
        }
    }

    fn int_key(analytic: &VarSet, norm: Option<&VarSet>, range: Option<&str>) -> CacheKey {
        CacheKey::new(analytic.clone(), norm.cloned(), range)
    }

    fn norm_key(norm: &VarSet) -> CacheKey {
        CacheKey::new(norm.clone(), None, None)
    }
}

impl Pdf for NonOscTaggingPdf {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependents(&self) -> VarSet {
        let mut deps = self.observables();
        deps.extend(self.detection_asymmetry.dependents());
        for slot in &self.slots {
            deps.extend(slot.efficiency.dependents());
            deps.extend(slot.final_state_asymmetry.dependents());
            deps.extend(slot.tag_asymmetry.dependents());
            if let Some(pdf) = &slot.mistag {
                deps.extend(pdf.dependents());
            }
        }
        deps
    }

    fn evaluate(&self, ws: &Workspace) -> Result<f64> {
        let empty = VarSet::new();
        let slot = self.cache.borrow_mut().get_or_create(ws, Self::int_key(&empty, None, None), || {
            Ok(self.make_elem(&empty, None))
        })?;
        let cache = self.cache.borrow();
        self.eval_elem(cache.entry(slot)?, ws)
    }

    fn analytical_integral_code(
        &self,
        ws: &Workspace,
        vars: &VarSet,
        norm: Option<&VarSet>,
        range: Option<&str>,
    ) -> Result<Option<IntegralCode>> {
        let obs = self.observables();
        let analytic: VarSet = vars.intersection(&obs).copied().collect();
        let norm: Option<VarSet> = norm
            .map(|n| n.intersection(&obs).copied().collect::<VarSet>())
            .filter(|n| !n.is_empty());

        let mut cache = self.cache.borrow_mut();
        let int_slot = cache.get_or_create(ws, Self::int_key(&analytic, norm.as_ref(), range), || {
            Ok(self.make_elem(&analytic, range))
        })?;
        let norm_slot = match &norm {
            Some(n) => {
                Some(cache.get_or_create(ws, Self::norm_key(n), || Ok(self.make_elem(n, None)))?)
            }
            None => None,
        };
        Ok(Some(IntegralCode { analytic, norm, int_slot, norm_slot }))
    }

    fn analytical_integral(
        &self,
        ws: &Workspace,
        code: &IntegralCode,
        range: Option<&str>,
    ) -> Result<f64> {
        let (int_slot, norm_slot) = {
            let mut cache = self.cache.borrow_mut();
            let key = Self::int_key(&code.analytic, code.norm.as_ref(), range);
            let int_slot = cache.resolve(ws, code.int_slot, &key, || {
                Ok(self.make_elem(&code.analytic, range))
            })?;
            let norm_slot = match (&code.norm, code.norm_slot) {
                (Some(n), Some(slot)) => Some(cache.resolve(ws, slot, &Self::norm_key(n), || {
                    Ok(self.make_elem(n, None))
                })?),
                (None, None) => None,
                _ => {
                    return Err(Error::Computation(format!(
                        "NonOscTaggingPdf '{}': malformed integral code {code:?}",
                        self.name
                    )));
                }
            };
            (int_slot, norm_slot)
        };

        let cache = self.cache.borrow();
        let value = self.eval_elem(cache.entry(int_slot)?, ws)?;
        match norm_slot {
            Some(slot) => Ok(value / self.eval_elem(cache.entry(slot)?, ws)?),
            None => Ok(value),
        }
    }

    fn self_normalized(&self) -> bool {
        true
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn Pdf>> {
        Ok(Box::new(Self {
            name: name.to_string(),
            qf: self.qf,
            qt: self.qt,
            eta: self.eta,
            detection_asymmetry: self.detection_asymmetry.clone(),
            slots: self.slots.clone(),
            n_taggers: self.n_taggers,
            cache: RefCell::new(CacheManager::new()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::GaussianModel;
    use approx::assert_relative_eq;
    use bflav_core::{integral, normalized_value};

    fn categories(ws: &mut Workspace, n_taggers: i32) -> (CatId, CatId) {
        let qf = ws.add_category("qf", &[("plus", 1), ("minus", -1)]).unwrap();
        let labels: Vec<String> = (-n_taggers..=n_taggers).map(|q| format!("qt{q}")).collect();
        let states: Vec<(&str, i32)> =
            labels.iter().zip(-n_taggers..=n_taggers).map(|(l, q)| (l.as_str(), q)).collect();
        let qt = ws.add_category("qt", &states).unwrap();
        (qf, qt)
    }

    #[test]
    fn test_construction_errors() {
        let mut ws = Workspace::new();
        let (qf, qt) = categories(&mut ws, 2);
        let eta = ws.add_real("eta", 0.3, 0.0, 0.5).unwrap();
        let one = || vec![Tagger::new(0.3, 0.0, 0.0)];

        // qt has states ±2 but only one tagger
        assert!(NonOscTaggingPdf::new("p", &ws, qf, qt, 0.0, one()).is_err());
        assert!(NonOscTaggingPdf::new("p", &ws, qt, qf, 0.0, one()).is_err());
        assert!(NonOscTaggingPdf::new("p", &ws, qf, qf, 0.0, one()).is_err());

        let two = || vec![Tagger::new(0.3, 0.0, 0.0), Tagger::new(0.2, 0.0, 0.0)];
        assert!(NonOscTaggingPdf::new("p", &ws, qf, qt, 0.0, two()).is_ok());
        assert!(NonOscTaggingPdf::with_mistag("p", &ws, qf, qt, eta, 0.0, two()).is_err());

        let flat = || Rc::new(UniformPdf::new("flat", &[eta])) as Rc<dyn Pdf>;
        let with_pdfs = |eff: TaggingInput| {
            vec![
                Tagger::new(eff, 0.0, 0.0).with_mistag(flat(), flat()),
                Tagger::new(0.2, 0.0, 0.0).with_mistag(flat(), flat()),
            ]
        };
        let build = |a_det: Term, eff: TaggingInput| {
            NonOscTaggingPdf::with_mistag("p", &ws, qf, qt, eta, a_det, with_pdfs(eff))
        };
        assert!(build(0.0.into(), 0.3.into()).is_ok());
        assert!(build(eta.into(), 0.3.into()).is_err());
        assert!(build(0.0.into(), eta.into()).is_err());
        assert!(NonOscTaggingPdf::new("p", &ws, qf, qt, 0.0, with_pdfs(0.3.into())).is_err());

        let mismatch = NonOscTaggingPdf::from_lists(
            "p",
            &ws,
            qf,
            qt,
            None,
            0.0,
            vec![0.3.into(), 0.2.into()],
            vec![0.0.into()],
            vec![0.0.into(), 0.0.into()],
            vec![],
            vec![],
        );
        assert!(matches!(mismatch, Err(Error::Validation(_))));
    }

    #[test]
    fn test_asymmetries_enter_tag_probabilities() {
        let mut ws = Workspace::new();
        let (qf, qt) = categories(&mut ws, 1);
        let taggers = vec![Tagger::new(0.4, 0.1, -0.05)];
        let pdf = NonOscTaggingPdf::new("p", &ws, qf, qt, 0.02, taggers).unwrap();

        ws.set_cat_index(qf, 1).unwrap();
        ws.set_cat_index(qt, 1).unwrap();
        let expected = 0.5 * 1.02 * 0.5 * 0.4 * 1.1 * 0.95;
        assert_relative_eq!(pdf.evaluate(&ws).unwrap(), expected, epsilon = 1e-15);

        ws.set_cat_index(qf, -1).unwrap();
        ws.set_cat_index(qt, 0).unwrap();
        let untagged = 1.0 - 0.5 * 0.4 * 0.9 * 0.95 - 0.5 * 0.4 * 0.9 * 1.05;
        assert_relative_eq!(pdf.evaluate(&ws).unwrap(), 0.5 * 0.98 * untagged, epsilon = 1e-15);

        // summing over qf with a nonzero a_f takes the explicit path
        let vars = var_set([qf]);
        let summed = integral(&pdf, &ws, &vars, None, None).unwrap();
        let plus = 0.5 * 1.02 * (1.0 - 0.5 * 0.4 * 1.1 * 2.0);
        let minus = 0.5 * 0.98 * (1.0 - 0.5 * 0.4 * 0.9 * 2.0);
        assert_relative_eq!(summed, plus + minus, epsilon = 1e-15);
    }

    #[test]
    fn test_mistag_observable_normalization_and_ranges() {
        let mut ws = Workspace::new();
        let (qf, qt) = categories(&mut ws, 1);
        let eta = ws.add_real("eta", 0.2, 0.0, 0.5).unwrap();
        ws.set_real_range(eta, "low", 0.0, 0.25).unwrap();
        ws.set_category_range(qt, "low", &["qt-1", "qt0", "qt1"]).unwrap();
        let w = ws.add_real("w", 0.1, 0.05, 0.5).unwrap();
        let g_b: Rc<dyn Pdf> = Rc::new(GaussianModel::new("gb", eta, 0.25, w).unwrap());
        let g_bbar: Rc<dyn Pdf> = Rc::new(GaussianModel::new("gbb", eta, 0.3, w).unwrap());
        let taggers = vec![Tagger::new(0.35, 0.0, 0.02).with_mistag(g_b, g_bbar)];
        let pdf = NonOscTaggingPdf::with_mistag("p", &ws, qf, qt, eta, 0.01, taggers).unwrap();

        let all = var_set([VarId::Cat(qf), VarId::Cat(qt), VarId::Real(eta)]);
        assert_relative_eq!(integral(&pdf, &ws, &all, None, None).unwrap(), 1.0, epsilon = 1e-12);

        // normalised value equals the raw value because the density closes to one
        let raw = pdf.evaluate(&ws).unwrap();
        assert_relative_eq!(normalized_value(&pdf, &ws, Some(&all)).unwrap(), raw, epsilon = 1e-12);

        // untagged mass in the low η range is the uniform fraction 0.5
        ws.set_cat_index(qt, 0).unwrap();
        let eta_only = var_set([eta]);
        let full = integral(&pdf, &ws, &eta_only, None, None).unwrap();
        let low = integral(&pdf, &ws, &eta_only, None, Some("low")).unwrap();
        assert_relative_eq!(low, 0.5 * full, epsilon = 1e-12);
    }

    #[test]
    fn test_clone_has_its_own_cache() {
        let mut ws = Workspace::new();
        let (qf, qt) = categories(&mut ws, 1);
        let eff = ws.add_real("eff", 0.4, 0.0, 1.0).unwrap();
        let taggers = vec![Tagger::new(eff, 0.1, -0.05)];
        let pdf = NonOscTaggingPdf::new("p", &ws, qf, qt, 0.02, taggers).unwrap();
        ws.set_cat_index(qt, 1).unwrap();
        let before = pdf.evaluate(&ws).unwrap();
        let entries = pdf.cache.borrow().len();
        assert_eq!(entries, 1);

        let copy = pdf.clone_named("p_copy").unwrap();
        assert_eq!(copy.name(), "p_copy");
        assert_eq!(copy.dependents(), pdf.dependents());
        assert_eq!(copy.evaluate(&ws).unwrap(), before);

        let vars = var_set([qf, qt]);
        let total = integral(copy.as_ref(), &ws, &vars, None, None).unwrap();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert_eq!(pdf.cache.borrow().len(), entries);

        // both follow a parameter change through their own caches
        ws.set_real(eff, 0.2);
        let after = pdf.evaluate(&ws).unwrap();
        assert_relative_eq!(after, 0.5 * before, epsilon = 1e-15);
        assert_eq!(copy.evaluate(&ws).unwrap(), after);
    }
}

//! Selection of a per-tagging-category parameter by the current category state.

use bflav_core::{CatId, Error, RealFunction, Result, Term, VarSet, Workspace, var_set};

/// Picks `values[category]` for tagged events.
///
/// Untagged events (decision index 0) get 0.5, or `1 - Σ values` in efficiency mode so that
/// the efficiencies of all decision outcomes add up to one.
#[derive(Debug, Clone)]
pub struct TaggingCategoryMultiplexer {
    name: String,
    decision: CatId,
    category: CatId,
    values: Vec<Term>,
    efficiency_mode: bool,
}

impl TaggingCategoryMultiplexer {
    /// Multiplex `values` by the state index of `category`.
    pub fn new(
        name: impl Into<String>,
        decision: CatId,
        category: CatId,
        values: Vec<Term>,
        efficiency_mode: bool,
    ) -> Result<Self> {
        let name = name.into();
        if values.is_empty() {
            return Err(Error::Validation(format!(
                "TaggingCategoryMultiplexer '{name}' requires at least one value"
            )));
        }
        Ok(Self { name, decision, category, values, efficiency_mode })
    }

    /// The decision category.
    pub fn decision(&self) -> CatId {
        self.decision
    }

    /// The tagging-category variable.
    pub fn category(&self) -> CatId {
        self.category
    }

    /// Whether untagged events return the efficiency complement.
    pub fn is_efficiency_mode(&self) -> bool {
        self.efficiency_mode
    }

    /// Value with the decision index overridden by `decision`.
    pub fn value_with(&self, ws: &Workspace, decision: i32) -> Result<f64> {
        if decision == 0 {
            if self.efficiency_mode {
                let total: f64 = self.values.iter().map(|v| v.value(ws)).sum();
                return Ok(1.0 - total);
            }
            return Ok(0.5);
        }
        let index = ws.cat_index(self.category);
        usize::try_from(index)
            .ok()
            .and_then(|i| self.values.get(i))
            .map(|v| v.value(ws))
            .ok_or_else(|| {
                Error::Computation(format!(
                    "TaggingCategoryMultiplexer '{}': category index {index} outside [0, {})",
                    self.name,
                    self.values.len()
                ))
            })
    }
}

impl RealFunction for TaggingCategoryMultiplexer {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependents(&self) -> VarSet {
        let mut deps = var_set([self.decision, self.category]);
        for v in &self.values {
            deps.extend(v.dependents());
        }
        deps
    }

    fn evaluate(&self, ws: &Workspace) -> Result<f64> {
        self.value_with(ws, ws.cat_index(self.decision))
    }

    fn clone_named(&self, name: &str) -> Box<dyn RealFunction> {
        Box::new(Self { name: name.to_string(), ..self.clone() })
    }
}

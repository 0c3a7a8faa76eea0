//! Parameter expressions and substitutions.
//!
//! Densities take their parameters as [`Term`]s rather than raw variable handles so that a
//! clone can replace `q` by `k * q` without touching the workspace.

use std::collections::BTreeMap;

use crate::workspace::{RealId, VarId, VarSet, Workspace};

/// A real-valued parameter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// A workspace variable.
    Var(RealId),
    /// A fixed number.
    Const(f64),
    /// `factor * term`.
    Scaled(f64, Box<Term>),
}

impl Term {
    /// Current value.
    pub fn value(&self, ws: &Workspace) -> f64 {
        match self {
            Term::Var(id) => ws.real(*id),
            Term::Const(c) => *c,
            Term::Scaled(f, t) => f * t.value(ws),
        }
    }

    /// Workspace variables the term reads.
    pub fn dependents(&self) -> VarSet {
        let mut out = VarSet::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut VarSet) {
        match self {
            Term::Var(id) => {
                out.insert(VarId::Real(*id));
            }
            Term::Const(_) => {}
            Term::Scaled(_, t) => t.collect(out),
        }
    }

    /// Whether the term reads `var`.
    pub fn depends_on(&self, var: VarId) -> bool {
        match self {
            Term::Var(id) => VarId::Real(*id) == var,
            Term::Const(_) => false,
            Term::Scaled(_, t) => t.depends_on(var),
        }
    }

    /// Whether the term cannot change: a literal, or built only from constant variables.
    pub fn is_constant(&self, ws: &Workspace) -> bool {
        self.dependents().iter().all(|v| ws.is_constant(*v))
    }

    /// Apply a substitution. Replacement terms are inserted as-is.
    pub fn substitute(&self, subst: &Substitution) -> Term {
        match self {
            Term::Var(id) => subst.get(*id).cloned().unwrap_or(Term::Var(*id)),
            Term::Const(c) => Term::Const(*c),
            Term::Scaled(f, t) => Term::Scaled(*f, Box::new(t.substitute(subst))),
        }
    }
}

impl From<RealId> for Term {
    fn from(id: RealId) -> Self {
        Term::Var(id)
    }
}

impl From<f64> for Term {
    fn from(c: f64) -> Self {
        Term::Const(c)
    }
}

/// Map from variables to replacement terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitution {
    map: BTreeMap<RealId, Term>,
}

impl Substitution {
    /// Empty substitution.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `var` by `term`.
    pub fn replace(mut self, var: RealId, term: Term) -> Self {
        self.map.insert(var, term);
        self
    }

    /// Replace `var` by `factor * var`.
    pub fn scale(self, var: RealId, factor: f64) -> Self {
        self.replace(var, Term::Scaled(factor, Box::new(Term::Var(var))))
    }

    /// Replacement registered for `var`.
    pub fn get(&self, var: RealId) -> Option<&Term> {
        self.map.get(&var)
    }

    /// Whether nothing is substituted.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_substitution() {
        let mut ws = Workspace::new();
        let q = ws.add_real("q", 2.0, 0.0, 10.0).unwrap();
        let r = ws.add_real("r", 3.0, 0.0, 10.0).unwrap();

        let subst = Substitution::new().scale(q, 1.5);
        let t = Term::from(q).substitute(&subst);
        assert_eq!(t.value(&ws), 3.0);
        assert!(t.depends_on(q.into()));

        let untouched = Term::from(r).substitute(&subst);
        assert_eq!(untouched, Term::Var(r));
        assert_eq!(Term::from(0.25).value(&ws), 0.25);
    }

    #[test]
    fn test_constness_follows_variables() {
        let mut ws = Workspace::new();
        let c = ws.add_constant("c", 1.0).unwrap();
        let p = ws.add_real("p", 1.0, 0.0, 2.0).unwrap();
        assert!(Term::from(c).is_constant(&ws));
        assert!(!Term::Scaled(2.0, Box::new(Term::from(p))).is_constant(&ws));
        assert!(Term::Const(4.0).dependents().is_empty());
    }
}

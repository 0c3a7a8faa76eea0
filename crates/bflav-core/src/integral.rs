//! Generic integration engine.
//!
//! [`integral()`] asks a density for an analytic code first and integrates whatever the
//! code leaves over: categories are summed over their in-range states, reals are integrated
//! with Gauss-Legendre quadrature on their (finite) range.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::cache::ValueCache;
use crate::traits::{IntegralCode, Pdf};
use crate::workspace::{VarId, VarSet, Workspace};
use crate::{Error, Result};

/// Gauss-Legendre quadrature order (number of nodes per dimension).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QuadratureOrder {
    /// 8 nodes.
    N8,
    /// 16 nodes.
    N16,
    /// 32 nodes.
    N32,
    /// 64 nodes (default).
    #[default]
    N64,
    /// 128 nodes.
    N128,
}

impl QuadratureOrder {
    /// Number of nodes.
    pub fn n(self) -> usize {
        match self {
            Self::N8 => 8,
            Self::N16 => 16,
            Self::N32 => 32,
            Self::N64 => 64,
            Self::N128 => 128,
        }
    }
}

thread_local! {
    static RULES: RefCell<HashMap<usize, (Vec<f64>, Vec<f64>)>> = RefCell::new(HashMap::new());
}

/// Gauss-Legendre nodes and weights on `[-1, 1]`, computed once per order and thread.
fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    if let Some(rule) = RULES.with(|r| r.borrow().get(&n).cloned()) {
        return rule;
    }
    let rule = gauss_legendre_nodes_weights(n);
    RULES.with(|r| {
        r.borrow_mut().insert(n, rule.clone());
    });
    rule
}

/// Roots of P_n by Newton iteration from a Chebyshev guess; weights from P'_n.
fn gauss_legendre_nodes_weights(n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0f64; n];
    let mut weights = vec![0.0f64; n];
    if n == 0 {
        return (nodes, weights);
    }
    if n == 1 {
        weights[0] = 2.0;
        return (nodes, weights);
    }

    let nf = n as f64;
    let legendre = |x: f64| {
        let mut p0 = 1.0f64;
        let mut p1 = x;
        for j in 2..=n {
            let jf = j as f64;
            let p2 = ((2.0 * jf - 1.0) * x * p1 - (jf - 1.0) * p0) / jf;
            p0 = p1;
            p1 = p2;
        }
        // (P_n, P'_n)
        (p1, nf * (x * p1 - p0) / (x * x - 1.0))
    };

    for i in 0..n.div_ceil(2) {
        let mut x = ((std::f64::consts::PI * (i as f64 + 0.75)) / (nf + 0.5)).cos();
        for _ in 0..100 {
            let (p, dp) = legendre(x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let (_, dp) = legendre(x);
        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        nodes[i] = -x;
        nodes[n - 1 - i] = x;
        weights[i] = w;
        weights[n - 1 - i] = w;
    }
    (nodes, weights)
}

fn restrict(vars: &VarSet, deps: &VarSet) -> VarSet {
    vars.intersection(deps).copied().collect()
}

/// Integrate `f` over `rest`, summing categories and applying quadrature to reals.
fn numeric(
    ws: &Workspace,
    rest: &[VarId],
    range: Option<&str>,
    order: QuadratureOrder,
    f: &dyn Fn(&Workspace) -> Result<f64>,
) -> Result<f64> {
    let Some((first, tail)) = rest.split_first() else {
        return f(ws);
    };
    match *first {
        VarId::Cat(cat) => {
            let indices: Vec<i32> = ws
                .cat_states(cat)
                .iter()
                .map(|s| s.index)
                .filter(|&i| ws.cat_in_range(cat, i, range))
                .collect();
            let mut sum = 0.0;
            for index in indices {
                let _state = ws.scoped_cat(cat, index)?;
                sum += numeric(ws, tail, range, order, f)?;
            }
            Ok(sum)
        }
        VarId::Real(id) => {
            let (lo, hi) = ws.real_range(id, range);
            if !(lo.is_finite() && hi.is_finite()) {
                return Err(Error::Computation(format!(
                    "cannot integrate '{}' numerically over an unbounded range",
                    ws.var_name(*first)
                )));
            }
            if lo == hi {
                return Ok(0.0);
            }
            let (nodes, weights) = gauss_legendre(order.n());
            let half = 0.5 * (hi - lo);
            let mid = 0.5 * (hi + lo);
            let mut sum = 0.0;
            for (t, w) in nodes.iter().zip(&weights) {
                let _at = ws.scoped_real(id, mid + half * t);
                sum += w * numeric(ws, tail, range, order, f)?;
            }
            Ok(sum * half)
        }
    }
}

fn integrate_code<P: Pdf + ?Sized>(
    pdf: &P,
    ws: &Workspace,
    vars: &VarSet,
    code: &IntegralCode,
    range: Option<&str>,
) -> Result<f64> {
    let rest: Vec<VarId> = vars.difference(&code.analytic).copied().collect();
    numeric(ws, &rest, range, QuadratureOrder::default(), &|ws: &Workspace| {
        pdf.analytical_integral(ws, code, range)
    })
}

fn raw_integral<P: Pdf + ?Sized>(
    pdf: &P,
    ws: &Workspace,
    vars: &VarSet,
    range: Option<&str>,
) -> Result<f64> {
    match pdf.analytical_integral_code(ws, vars, None, range)? {
        Some(code) => integrate_code(pdf, ws, vars, &code, range),
        None => {
            let rest: Vec<VarId> = vars.iter().copied().collect();
            let eval = |ws: &Workspace| pdf.evaluate(ws);
            numeric(ws, &rest, range, QuadratureOrder::default(), &eval)
        }
    }
}

/// Integral of `pdf` over `vars` in `range`, normalised over `norm` (full range).
///
/// Variables the density does not depend on are dropped from both sets.
pub fn integral<P: Pdf + ?Sized>(
    pdf: &P,
    ws: &Workspace,
    vars: &VarSet,
    norm: Option<&VarSet>,
    range: Option<&str>,
) -> Result<f64> {
    let deps = pdf.dependents();
    let vars = restrict(vars, &deps);
    let Some(norm) = norm.map(|n| restrict(n, &deps)).filter(|n| !n.is_empty()) else {
        return raw_integral(pdf, ws, &vars, range);
    };

    if pdf.self_normalized() {
        if let Some(code) = pdf.analytical_integral_code(ws, &vars, Some(&norm), range)? {
            if code.norm.is_some() {
                return integrate_code(pdf, ws, &vars, &code, range);
            }
        }
    }
    let num = raw_integral(pdf, ws, &vars, range)?;
    let den = raw_integral(pdf, ws, &norm, None)?;
    Ok(num / den)
}

/// Value of `pdf` normalised over `norm` at the current workspace state.
pub fn normalized_value<P: Pdf + ?Sized>(
    pdf: &P,
    ws: &Workspace,
    norm: Option<&VarSet>,
) -> Result<f64> {
    integral(pdf, ws, &VarSet::new(), norm, None)
}

/// A reusable integral request with a memoised result.
#[derive(Debug, Clone)]
pub struct Integral {
    vars: VarSet,
    norm: Option<VarSet>,
    range: Option<String>,
    cache: ValueCache,
}

impl Integral {
    /// Integral of `pdf` over `vars` in `range`, normalised over `norm`.
    pub fn new<P: Pdf + ?Sized>(
        pdf: &P,
        vars: VarSet,
        norm: Option<VarSet>,
        range: Option<&str>,
    ) -> Self {
        let all = pdf.dependents();
        let mut deps: VarSet = all.difference(&vars).copied().collect();
        if let Some(n) = &norm {
            deps.extend(all.difference(n).copied());
        }
        Self { vars, norm, range: range.map(str::to_string), cache: ValueCache::new(deps) }
    }

    /// Integrated variables.
    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    /// Current value; `pdf` must be the density this integral was built for.
    pub fn value<P: Pdf + ?Sized>(&self, pdf: &P, ws: &Workspace) -> Result<f64> {
        self.cache.get_or_compute(ws, || {
            integral(pdf, ws, &self.vars, self.norm.as_ref(), self.range.as_deref())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{RealId, var_set};
    use approx::assert_relative_eq;

    /// `x^2 * (1 + s)` on `[0, 2]`, no analytic integrals.
    #[derive(Debug)]
    struct Quadratic {
        x: RealId,
        s: RealId,
    }

    impl Pdf for Quadratic {
        fn name(&self) -> &str {
            "quadratic"
        }

        fn dependents(&self) -> VarSet {
            var_set([self.x, self.s])
        }

        fn evaluate(&self, ws: &Workspace) -> Result<f64> {
            let x = ws.real(self.x);
            Ok(x * x * (1.0 + ws.real(self.s)))
        }

        fn clone_named(&self, _name: &str) -> Result<Box<dyn Pdf>> {
            Ok(Box::new(Quadratic { x: self.x, s: self.s }))
        }
    }

    fn setup() -> (Workspace, Quadratic) {
        let mut ws = Workspace::new();
        let x = ws.add_real("x", 1.0, 0.0, 2.0).unwrap();
        let s = ws.add_real("s", 0.0, -0.5, 0.5).unwrap();
        ws.set_real_range(x, "low", 0.0, 1.0).unwrap();
        (ws, Quadratic { x, s })
    }

    #[test]
    fn test_gauss_legendre_weights_sum_to_two() {
        for order in [QuadratureOrder::N8, QuadratureOrder::N64, QuadratureOrder::N128] {
            let (nodes, weights) = gauss_legendre(order.n());
            assert_eq!(nodes.len(), order.n());
            assert_relative_eq!(weights.iter().sum::<f64>(), 2.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_numeric_integral_of_polynomial() {
        let (ws, pdf) = setup();
        let x = var_set([pdf.x]);
        let full = integral(&pdf, &ws, &x, None, None).unwrap();
        assert_relative_eq!(full, 8.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(
            integral(&pdf, &ws, &x, Some(&x), Some("low")).unwrap(),
            1.0 / 8.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            normalized_value(&pdf, &ws, Some(&x)).unwrap(),
            3.0 / 8.0,
            epsilon = 1e-12
        );
        // the scoped moves inside the quadrature left x untouched
        assert_eq!(ws.real(pdf.x), 1.0);
    }

    #[test]
    fn test_integral_handle_recomputes_on_parameter_change() {
        let (ws, pdf) = setup();
        let handle = Integral::new(&pdf, var_set([pdf.x]), None, None);
        let v0 = handle.value(&pdf, &ws).unwrap();
        assert_eq!(handle.value(&pdf, &ws).unwrap().to_bits(), v0.to_bits());

        ws.set_real(pdf.x, 0.3);
        assert_eq!(handle.value(&pdf, &ws).unwrap().to_bits(), v0.to_bits());

        ws.set_real(pdf.s, 0.5);
        assert_relative_eq!(handle.value(&pdf, &ws).unwrap(), 1.5 * v0, epsilon = 1e-12);
    }

    #[test]
    fn test_integral_handle_follows_range_redefinition() {
        let (mut ws, pdf) = setup();
        let handle = Integral::new(&pdf, var_set([pdf.x]), None, Some("low"));
        assert_relative_eq!(handle.value(&pdf, &ws).unwrap(), 1.0 / 3.0, epsilon = 1e-12);

        ws.set_real_range(pdf.x, "low", 0.0, 2.0).unwrap();
        assert_relative_eq!(handle.value(&pdf, &ws).unwrap(), 8.0 / 3.0, epsilon = 1e-12);
    }
}

use bflav_core::{
    BinnedPdf, Error, IntegralCode, Pdf, RealId, Result, VarId, VarSet, Workspace, var_set,
};

/// Piecewise-constant histogram density normalised on its bin edges.
///
/// `p(x) = p_i / (x_{i+1} - x_i)` for `x ∈ [x_i, x_{i+1})`, where `p_i` is the probability mass
/// of bin `i`; zero outside the edges. Backs the discrete k-factor distribution.
#[derive(Debug, Clone)]
pub struct HistogramPdf {
    name: String,
    observable: RealId,
    bin_edges: Vec<f64>,
    density: Vec<f64>,
}

impl HistogramPdf {
    /// Construct from edges and non-negative bin contents.
    ///
    /// `pseudo_count` is added to every bin content before normalisation.
    pub fn from_edges_and_contents(
        name: impl Into<String>,
        observable: RealId,
        bin_edges: Vec<f64>,
        bin_content: Vec<f64>,
        pseudo_count: f64,
    ) -> Result<Self> {
        if bin_edges.len() < 2 {
            return Err(Error::Validation(format!(
                "HistogramPdf requires at least 2 bin edges, got {}",
                bin_edges.len()
            )));
        }
        if bin_content.len() + 1 != bin_edges.len() {
            return Err(Error::Validation(format!(
                "HistogramPdf bin_content length mismatch: expected {}, got {}",
                bin_edges.len() - 1,
                bin_content.len()
            )));
        }
        if !pseudo_count.is_finite() || pseudo_count < 0.0 {
            return Err(Error::Validation(format!(
                "HistogramPdf pseudo_count must be finite and >=0, got {pseudo_count}"
            )));
        }
        for (i, w) in bin_content.iter().enumerate() {
            if !w.is_finite() || *w < 0.0 {
                return Err(Error::Validation(format!(
                    "HistogramPdf bin_content[{i}] must be finite and >=0, got {w}"
                )));
            }
        }
        for (i, e) in bin_edges.iter().enumerate() {
            if !e.is_finite() {
                return Err(Error::Validation(format!(
                    "HistogramPdf bin_edges[{i}] must be finite, got {e}"
                )));
            }
            if i > 0 && bin_edges[i - 1] >= *e {
                return Err(Error::Validation(format!(
                    "HistogramPdf bin edges must be strictly increasing, got edges[{}]={} and edges[{i}]={e}",
                    i - 1,
                    bin_edges[i - 1],
                )));
            }
        }

        let total: f64 = bin_content.iter().map(|w| w + pseudo_count).sum();
        if !(total.is_finite() && total > 0.0) {
            return Err(Error::Validation(format!(
                "HistogramPdf total content must be finite and >0 after pseudo_count, got {total}"
            )));
        }
        let density = bin_content
            .iter()
            .zip(bin_edges.windows(2))
            .map(|(w, e)| (w + pseudo_count) / total / (e[1] - e[0]))
            .collect();

        Ok(Self { name: name.into(), observable, bin_edges, density })
    }

    /// Bin edges.
    pub fn bin_edges(&self) -> &[f64] {
        &self.bin_edges
    }

    fn bin_index(&self, x: f64) -> Option<usize> {
        let x_min = self.bin_edges[0];
        let x_max = self.bin_edges[self.bin_edges.len() - 1];
        if !(x >= x_min && x <= x_max) {
            return None;
        }
        if x == x_max {
            return Some(self.density.len() - 1);
        }
        // number of edges <= x, minus one
        Some(self.bin_edges.partition_point(|e| *e <= x) - 1)
    }

    /// Probability mass in `[lo, hi]`.
    fn mass(&self, lo: f64, hi: f64) -> f64 {
        self.bin_edges
            .windows(2)
            .zip(&self.density)
            .map(|(e, d)| {
                let overlap = hi.min(e[1]) - lo.max(e[0]);
                if overlap > 0.0 { overlap * d } else { 0.0 }
            })
            .sum()
    }
}

impl Pdf for HistogramPdf {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependents(&self) -> VarSet {
        var_set([self.observable])
    }

    fn evaluate(&self, ws: &Workspace) -> Result<f64> {
        Ok(self.bin_index(ws.real(self.observable)).map_or(0.0, |i| self.density[i]))
    }

    fn analytical_integral_code(
        &self,
        _ws: &Workspace,
        vars: &VarSet,
        _norm: Option<&VarSet>,
        _range: Option<&str>,
    ) -> Result<Option<IntegralCode>> {
        let obs = VarId::Real(self.observable);
        Ok(vars.contains(&obs).then(|| IntegralCode::plain(var_set([obs]), 0)))
    }

    fn analytical_integral(
        &self,
        ws: &Workspace,
        code: &IntegralCode,
        range: Option<&str>,
    ) -> Result<f64> {
        if code.analytic != var_set([self.observable]) {
            return Err(Error::Computation(format!(
                "HistogramPdf '{}': unrecognised integral over {{{}}}",
                self.name,
                ws.describe(&code.analytic)
            )));
        }
        let (lo, hi) = ws.real_range(self.observable, range);
        Ok(self.mass(lo, hi))
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn Pdf>> {
        Ok(Box::new(Self { name: name.to_string(), ..self.clone() }))
    }
}

impl BinnedPdf for HistogramPdf {
    fn bin_boundaries(&self, observable: RealId, lo: f64, hi: f64) -> Option<Vec<f64>> {
        if observable != self.observable || !(lo < hi) {
            return None;
        }
        let mut out = vec![lo];
        out.extend(self.bin_edges.iter().copied().filter(|e| *e > lo && *e < hi));
        out.push(hi);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use bflav_core::normalized_value;

    #[test]
    fn test_histogram_density_and_boundaries() {
        let mut ws = Workspace::new();
        let k = ws.add_real("k", 1.0, 0.0, 3.0).unwrap();
        ws.set_real_range(k, "mid", 0.5, 1.5).unwrap();
        let h = HistogramPdf::from_edges_and_contents(
            "hk",
            k,
            vec![0.0, 1.0, 2.0, 3.0],
            vec![1.0, 2.0, 1.0],
            0.0,
        )
        .unwrap();

        assert_relative_eq!(h.evaluate(&ws).unwrap(), 0.5, epsilon = 1e-15);
        ws.set_real(k, 3.0);
        assert_relative_eq!(h.evaluate(&ws).unwrap(), 0.25, epsilon = 1e-15);
        assert_relative_eq!(normalized_value(&h, &ws, Some(&var_set([k]))).unwrap(), 0.25);

        let code = IntegralCode::plain(var_set([k]), 0);
        assert_relative_eq!(h.analytical_integral(&ws, &code, None).unwrap(), 1.0, epsilon = 1e-15);
        assert_relative_eq!(
            h.analytical_integral(&ws, &code, Some("mid")).unwrap(),
            0.125 + 0.25,
            epsilon = 1e-15
        );

        assert_eq!(h.bin_boundaries(k, 0.5, 2.5).unwrap(), vec![0.5, 1.0, 2.0, 2.5]);
        assert!(h.bin_boundaries(k, 2.0, 2.0).is_none());
    }

    #[test]
    fn test_histogram_rejects_bad_input() {
        let mut ws = Workspace::new();
        let k = ws.add_real("k", 1.0, 0.0, 3.0).unwrap();
        assert!(HistogramPdf::from_edges_and_contents("h", k, vec![0.0], vec![], 0.0).is_err());
        let build = |edges: Vec<f64>, contents: Vec<f64>| {
            HistogramPdf::from_edges_and_contents("h", k, edges, contents, 0.0)
        };
        assert!(build(vec![0.0, 1.0], vec![-1.0]).is_err());
        assert!(build(vec![1.0, 0.0], vec![1.0]).is_err());
        assert!(build(vec![0.0, 1.0], vec![0.0]).is_err());
    }
}

//! Dense multilinear interpolation grid over workspace variables.

use bflav_core::{Error, RealId, Result, ScopedReal, VarSet, Workspace};

#[derive(Debug, Clone)]
struct Axis {
    var: RealId,
    lo: f64,
    hi: f64,
    nodes: usize,
}

impl Axis {
    fn node(&self, i: usize) -> f64 {
        if self.nodes == 1 {
            return self.lo;
        }
        self.lo + (self.hi - self.lo) * i as f64 / (self.nodes - 1) as f64
    }

    /// Lower node index and fractional offset of `x`, clamped to the grid.
    fn locate(&self, x: f64) -> (usize, f64) {
        if self.nodes == 1 {
            return (0, 0.0);
        }
        let cells = (self.nodes - 1) as f64;
        let t = ((x - self.lo) / (self.hi - self.lo) * cells).clamp(0.0, cells);
        let i = (t.floor() as usize).min(self.nodes - 2);
        (i, t - i as f64)
    }
}

/// Values of a function sampled on `bins + 1` nodes per axis over each variable's range.
///
/// The grid stays valid until a variable in `deps` changes or the workspace shape changes.
#[derive(Debug, Clone)]
pub(crate) struct InterpolationGrid {
    axes: Vec<Axis>,
    values: Vec<f64>,
    deps: VarSet,
    stamp: u64,
    shape: u64,
}

impl InterpolationGrid {
    /// Sample `f` on the grid spanned by `vars`; the variables are restored afterwards.
    pub(crate) fn build(
        ws: &Workspace,
        vars: &[RealId],
        deps: VarSet,
        f: impl Fn(&Workspace) -> Result<f64>,
    ) -> Result<Self> {
        if vars.is_empty() {
            return Err(Error::Validation("interpolation grid needs at least one variable".into()));
        }
        let axes: Vec<Axis> = vars
            .iter()
            .map(|&var| {
                let (lo, hi) = ws.real_range(var, None);
                let nodes = if lo < hi { ws.real_var(var).bins() + 1 } else { 1 };
                Axis { var, lo, hi, nodes }
            })
            .collect();
        let total: usize = axes.iter().map(|a| a.nodes).product();

        let mut values = Vec::with_capacity(total);
        let mut index = vec![0usize; axes.len()];
        for _ in 0..total {
            let _guards: Vec<ScopedReal<'_>> =
                axes.iter().zip(&index).map(|(a, &i)| ws.scoped_real(a.var, a.node(i))).collect();
            values.push(f(ws)?);
            // row-major: last axis runs fastest
            for d in (0..axes.len()).rev() {
                index[d] += 1;
                if index[d] < axes[d].nodes {
                    break;
                }
                index[d] = 0;
            }
        }
        log::debug!(
            "built interpolation grid: {} axes, {total} nodes",
            axes.len()
        );
        Ok(Self { axes, values, deps, stamp: ws.clock(), shape: ws.shape_stamp() })
    }

    /// Whether a dependency or the workspace shape changed since the grid was built.
    pub(crate) fn is_stale(&self, ws: &Workspace) -> bool {
        ws.shape_stamp() != self.shape || ws.max_stamp(&self.deps) > self.stamp
    }

    /// Multilinear interpolation at the current values of the grid variables.
    pub(crate) fn interpolate(&self, ws: &Workspace) -> f64 {
        let cells: Vec<(usize, f64)> = self.axes.iter().map(|a| a.locate(ws.real(a.var))).collect();
        let mut sum = 0.0;
        for corner in 0..(1usize << self.axes.len()) {
            let mut weight = 1.0;
            let mut flat = 0usize;
            for (d, (axis, &(i, frac))) in self.axes.iter().zip(&cells).enumerate() {
                let upper = (corner >> d) & 1 == 1;
                let (node, w) = if upper { (i + 1, frac) } else { (i, 1.0 - frac) };
                if w == 0.0 {
                    weight = 0.0;
                    break;
                }
                weight *= w;
                flat = flat * axis.nodes + node;
            }
            if weight != 0.0 {
                sum += weight * self.values[flat];
            }
        }
        sum
    }
}

//! Criterion benchmarks for the per-event evaluation paths of the tagging density and the
//! k-factor smeared resolution model.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::rc::Rc;

use bflav_core::{BinnedPdf, ModelHandle, Pdf, ResolutionModel, Workspace, var_set};
use bflav_pdf::{GaussianModel, HistogramPdf, KFactorSmearingModel, NonOscTaggingPdf, Tagger};

// ---------------------------------------------------------------------------
// Tagging density
// ---------------------------------------------------------------------------

fn bench_tagging_pdf(c: &mut Criterion) {
    let mut ws = Workspace::new();
    let qf = ws.add_category("qf", &[("plus", 1), ("minus", -1)]).unwrap();
    let qt = ws
        .add_category("qt", &[("qt-2", -2), ("qt-1", -1), ("qt0", 0), ("qt1", 1), ("qt2", 2)])
        .unwrap();
    let eta = ws.add_real("eta", 0.2, 0.0, 0.5).unwrap();
    let width = ws.add_real("width", 0.1, 0.01, 1.0).unwrap();
    let taggers: Vec<Tagger> = [(0.3, 0.01, 0.02), (0.2, -0.01, 0.0)]
        .iter()
        .enumerate()
        .map(|(i, &(eff, a_f, a_t))| {
            let b: Rc<dyn Pdf> =
                Rc::new(GaussianModel::new(format!("eta_b{i}"), eta, 0.25, width).unwrap());
            let bbar: Rc<dyn Pdf> =
                Rc::new(GaussianModel::new(format!("eta_bbar{i}"), eta, 0.3, width).unwrap());
            Tagger::new(eff, a_f, a_t).with_mistag(b, bbar)
        })
        .collect();
    let pdf = NonOscTaggingPdf::with_mistag("tag", &ws, qf, qt, eta, 0.005, taggers).unwrap();

    let mut rng = StdRng::seed_from_u64(11);
    let events: Vec<(i32, i32, f64)> = (0..1_000)
        .map(|_| {
            let f = if rng.gen_bool(0.5) { 1 } else { -1 };
            (f, rng.gen_range(-2..=2), rng.gen_range(0.0..0.5))
        })
        .collect();
    let all = var_set([qf, qt]);

    c.bench_function("non_osc_tagging_1k_events", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &(f, t, e) in &events {
                ws.set_cat_index(qf, f).unwrap();
                ws.set_cat_index(qt, t).unwrap();
                ws.set_real(eta, e);
                acc += pdf.evaluate(&ws).unwrap();
            }
            black_box(acc)
        })
    });

    c.bench_function("non_osc_tagging_category_integral", |b| {
        b.iter(|| black_box(bflav_core::integral(&pdf, &ws, &all, None, None).unwrap()))
    });
}

// ---------------------------------------------------------------------------
// K-factor smearing
// ---------------------------------------------------------------------------

fn bench_kfactor(c: &mut Criterion) {
    let mut group = c.benchmark_group("kfactor_smearing");
    for &n_bins in &[4usize, 16, 64] {
        let mut ws = Workspace::new();
        let x = ws.add_real("x", 0.0, -3.0, 3.0).unwrap();
        let s = ws.add_real("s", 0.7, 0.05, 2.0).unwrap();
        let k = ws.add_real("k", 1.0, 0.8, 1.2).unwrap();
        let edges: Vec<f64> = (0..=n_bins).map(|i| 0.8 + 0.4 * i as f64 / n_bins as f64).collect();
        let contents: Vec<f64> = (0..n_bins).map(|i| 1.0 + (i % 5) as f64).collect();
        let model: Rc<dyn ResolutionModel> = Rc::new(GaussianModel::new("res", x, 0.0, s).unwrap());
        let kfactor: Rc<dyn BinnedPdf> =
            Rc::new(HistogramPdf::from_edges_and_contents("pk", k, edges, contents, 0.0).unwrap());
        let smeared =
            KFactorSmearingModel::new("smeared", ModelHandle::Borrowed(model), kfactor, k, vec![s])
                .unwrap();

        let xs: Vec<f64> = (0..1_000).map(|i| -3.0 + 6.0 * (i as f64 + 0.5) / 1_000.0).collect();
        group.bench_with_input(BenchmarkId::new("exact_1k", n_bins), &xs, |b, xs| {
            b.iter(|| {
                let mut acc = 0.0;
                for &xv in xs {
                    ws.set_real(x, xv);
                    acc += smeared.evaluate(&ws).unwrap();
                }
                black_box(acc)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_tagging_pdf, bench_kfactor);
criterion_main!(benches);

//! Concrete shapes used as collaborators of the tagging and smearing densities.

mod gaussian;
mod histogram;
mod uniform;

pub use gaussian::GaussianModel;
pub use histogram::HistogramPdf;
pub use uniform::UniformPdf;

//! JSON description of a workspace.
//!
//! ```json
//! {
//!   "reals": [
//!     { "name": "t", "value": 1.0, "bounds": [0.0, 15.0], "bins": 50,
//!       "ranges": { "signal": [0.2, 15.0] } },
//!     { "name": "k", "value": 1.0, "bounds": [0.8, 1.2] },
//!     { "name": "a_det", "value": 0.01, "constant": true }
//!   ],
//!   "categories": [
//!     { "name": "qt",
//!       "states": [ { "label": "B", "index": 1 }, { "label": "untagged", "index": 0 },
//!                   { "label": "Bbar", "index": -1 } ],
//!       "ranges": { "tagged": ["B", "Bbar"] } }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::workspace::Workspace;

/// A real variable entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealSpec {
    /// Variable name.
    pub name: String,
    /// Initial value.
    pub value: f64,
    /// Full range; omitted means the variable is fixed at `value`.
    #[serde(default)]
    pub bounds: Option<[f64; 2]>,
    /// Constant flag.
    #[serde(default)]
    pub constant: bool,
    /// Interpolation-grid bin count.
    #[serde(default)]
    pub bins: Option<usize>,
    /// Named sub-ranges.
    #[serde(default)]
    pub ranges: BTreeMap<String, [f64; 2]>,
}

/// One category state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSpec {
    /// State label.
    pub label: String,
    /// Integer index.
    pub index: i32,
}

/// A category entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    /// Category name.
    pub name: String,
    /// States in declaration order; the first one is current.
    pub states: Vec<StateSpec>,
    /// Named ranges as lists of state labels.
    #[serde(default)]
    pub ranges: BTreeMap<String, Vec<String>>,
}

/// Top-level workspace description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSpec {
    /// Real variables.
    #[serde(default)]
    pub reals: Vec<RealSpec>,
    /// Categories.
    #[serde(default)]
    pub categories: Vec<CategorySpec>,
}

impl WorkspaceSpec {
    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Build the workspace, validating every entry.
    pub fn build(&self) -> Result<Workspace> {
        let mut ws = Workspace::new();
        for r in &self.reals {
            let [min, max] = r.bounds.unwrap_or([r.value, r.value]);
            let id = ws.add_real(r.name.as_str(), r.value, min, max)?;
            if r.constant || r.bounds.is_none() {
                ws.set_constant(id, true);
            }
            if let Some(bins) = r.bins {
                ws.set_bins(id, bins)?;
            }
            for (range, [lo, hi]) in &r.ranges {
                ws.set_real_range(id, range, *lo, *hi)?;
            }
        }
        for c in &self.categories {
            let states: Vec<(&str, i32)> =
                c.states.iter().map(|s| (s.label.as_str(), s.index)).collect();
            let id = ws.add_category(c.name.as_str(), &states)?;
            for (range, labels) in &c.ranges {
                let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
                ws.set_category_range(id, range, &labels)?;
            }
        }
        log::debug!(
            "built workspace: {} reals, {} categories",
            self.reals.len(),
            self.categories.len()
        );
        Ok(ws)
    }
}

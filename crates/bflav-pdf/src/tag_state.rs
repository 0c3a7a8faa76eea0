//! Decoding of the signed tag index `qt = ±k`.

use bflav_core::{Error, Result};

/// Flavour called by a tagger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavour {
    /// b quark.
    B,
    /// b̄ quark.
    BBar,
}

impl Flavour {
    /// `+1` for B, `-1` for B̄.
    pub fn sign(self) -> f64 {
        match self {
            Flavour::B => 1.0,
            Flavour::BBar => -1.0,
        }
    }
}

/// Which tagger (if any) fired and which way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagState {
    /// No tagger fired.
    Untagged,
    /// Tagger `tagger` (1-based) called `flavour`.
    Tagged {
        /// 1-based tagger number.
        tagger: usize,
        /// Flavour call.
        flavour: Flavour,
    },
}

impl TagState {
    /// Decode `qt` for a configuration with `n_taggers` taggers.
    pub fn from_index(qt: i32, n_taggers: usize) -> Result<Self> {
        if qt == 0 {
            return Ok(TagState::Untagged);
        }
        let tagger = qt.unsigned_abs() as usize;
        if tagger > n_taggers {
            return Err(Error::Computation(format!(
                "tag index {qt} exceeds the number of taggers ({n_taggers})"
            )));
        }
        let flavour = if qt > 0 { Flavour::B } else { Flavour::BBar };
        Ok(TagState::Tagged { tagger, flavour })
    }

    /// Signed index `qt`.
    pub fn index(self) -> i32 {
        match self {
            TagState::Untagged => 0,
            TagState::Tagged { tagger, flavour: Flavour::B } => tagger as i32,
            TagState::Tagged { tagger, flavour: Flavour::BBar } => -(tagger as i32),
        }
    }

    /// Storage slot: 0 for untagged, `2k` for `qt = +k`, `2k - 1` for `qt = -k`.
    pub fn slot(self) -> usize {
        match self {
            TagState::Untagged => 0,
            TagState::Tagged { tagger, flavour: Flavour::B } => 2 * tagger,
            TagState::Tagged { tagger, flavour: Flavour::BBar } => 2 * tagger - 1,
        }
    }

    /// Inverse of [`TagState::slot`].
    pub fn from_slot(slot: usize) -> Self {
        match slot {
            0 => TagState::Untagged,
            s if s % 2 == 0 => TagState::Tagged { tagger: s / 2, flavour: Flavour::B },
            s => TagState::Tagged { tagger: s.div_ceil(2), flavour: Flavour::BBar },
        }
    }
}
